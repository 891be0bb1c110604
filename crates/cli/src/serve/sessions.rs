//! Cookie-keyed browser sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap};
use kbchat_chat::ChatSession;
use tokio::sync::{Mutex, RwLock};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "kbchat_session";

/// State of one logged-in browser.
#[derive(Debug)]
pub struct BrowserSession {
    pub chat: ChatSession,

    /// One-shot message shown on the next page render
    pub notice: Option<String>,
}

struct Entry {
    session: Arc<Mutex<BrowserSession>>,
    last_seen: Instant,
}

/// In-memory session table.
///
/// Sessions end on logout, after `idle_timeout` without a request, or on
/// server restart. Idle entries are swept whenever a session is opened.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Entry>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Open a session for `user_id` and return its cookie value.
    pub async fn create(&self, user_id: &str) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        let session = BrowserSession {
            chat: ChatSession::new(user_id),
            notice: None,
        };

        let mut sessions = self.sessions.write().await;
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_seen) < self.idle_timeout);
        if sessions.len() < before {
            tracing::debug!("Closed {} idle browser sessions", before - sessions.len());
        }

        sessions.insert(
            token.clone(),
            Entry {
                session: Arc::new(Mutex::new(session)),
                last_seen: now,
            },
        );
        tracing::info!("Opened browser session for {}", user_id);
        token
    }

    /// Session named by the request's cookie, if it is still open.
    ///
    /// A hit refreshes the session's idle clock; an idle one is closed.
    pub async fn lookup(&self, headers: &HeaderMap) -> Option<Arc<Mutex<BrowserSession>>> {
        let token = session_token(headers)?;
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();

        let entry = sessions.get_mut(token)?;
        if now.duration_since(entry.last_seen) >= self.idle_timeout {
            sessions.remove(token);
            tracing::info!("Browser session expired after {:?} idle", self.idle_timeout);
            return None;
        }

        entry.last_seen = now;
        Some(entry.session.clone())
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close the session named by the request's cookie.
    pub async fn remove(&self, headers: &HeaderMap) -> bool {
        match session_token(headers) {
            Some(token) => self.sessions.write().await.remove(token).is_some(),
            None => false,
        }
    }
}

/// Value of the session cookie in the request headers.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value opening a session.
pub fn session_cookie(token: &str) -> String {
    format!("{}={}; HttpOnly; SameSite=Lax; Path=/", SESSION_COOKIE, token)
}

/// `Set-Cookie` value clearing the session.
pub fn expired_cookie() -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", SESSION_COOKIE)
}
