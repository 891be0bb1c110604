//! Chat UI route handlers.
//!
//! Pages are rendered on GET; every action is a form POST that updates the
//! browser session and redirects back to `/`.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use chrono::Local;
use kbchat_chat::{sidebar_sections, ConversationIndex, FeedbackCategory, Vote};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::sessions::{expired_cookie, session_cookie, BrowserSession};
use super::templates;
use super::UiState;

/// Sidebar lists the last 30 days of history.
const SIDEBAR_DAYS: u32 = 30;

/// The logged-in browser session; anonymous requests go to the login page.
pub struct CurrentSession(Arc<Mutex<BrowserSession>>);

impl FromRequestParts<Arc<UiState>> for CurrentSession {
    type Rejection = Redirect;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<UiState>,
    ) -> Result<Self, Self::Rejection> {
        state
            .sessions
            .lookup(&parts.headers)
            .await
            .map(CurrentSession)
            .ok_or_else(|| Redirect::to("/login"))
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatForm {
    pub message: String,
}

// =============================================================================
// Pages
// =============================================================================

/// GET `/` - Chat page.
pub async fn index(
    State(state): State<Arc<UiState>>,
    CurrentSession(session): CurrentSession,
) -> Html<String> {
    let mut session = session.lock().await;
    let mut notice = session.notice.take();

    let index = match state
        .service
        .history()
        .conversations(&session.chat.user_id, Some(SIDEBAR_DAYS))
        .await
    {
        Ok(index) => index,
        Err(e) => {
            tracing::warn!("Could not load chat history: {}", e);
            notice.get_or_insert_with(|| "Could not load chat history".to_string());
            ConversationIndex::new()
        }
    };
    let sections = sidebar_sections(&index, Local::now().date_naive());

    Html(templates::render_chat(
        &state.page_title,
        &session.chat,
        &sections,
        notice.as_deref(),
        state.link_expiry_secs,
    ))
}

/// GET `/login`
pub async fn login_page(
    State(state): State<Arc<UiState>>,
    Query(query): Query<LoginQuery>,
) -> Html<String> {
    Html(templates::render_login(&state.page_title, query.error.is_some()))
}

// =============================================================================
// Login
// =============================================================================

/// POST `/login`
pub async fn login(State(state): State<Arc<UiState>>, Form(form): Form<LoginForm>) -> Response {
    match state.login.authenticate(&form.username, &form.password) {
        Some(user_id) => {
            let token = state.sessions.create(&user_id).await;
            (
                [(header::SET_COOKIE, session_cookie(&token))],
                Redirect::to("/"),
            )
                .into_response()
        }
        None => {
            tracing::warn!("Failed login attempt");
            Redirect::to("/login?error=1").into_response()
        }
    }
}

/// POST `/logout`
pub async fn logout(State(state): State<Arc<UiState>>, headers: HeaderMap) -> Response {
    if state.sessions.remove(&headers).await {
        tracing::info!("Closed browser session");
    }
    (
        [(header::SET_COOKIE, expired_cookie())],
        Redirect::to("/login"),
    )
        .into_response()
}

// =============================================================================
// Chat
// =============================================================================

/// POST `/chat` - One chat turn.
pub async fn chat(
    State(state): State<Arc<UiState>>,
    CurrentSession(session): CurrentSession,
    Form(form): Form<ChatForm>,
) -> Redirect {
    let mut session = session.lock().await;
    if let Err(e) = state.service.handle_input(&mut session.chat, &form.message).await {
        tracing::error!("Chat turn failed: {}", e);
        session.notice = Some(format!("Could not save your message: {}", e));
    }
    Redirect::to("/")
}

/// POST `/new`
pub async fn new_chat(CurrentSession(session): CurrentSession) -> Redirect {
    session.lock().await.chat.new_chat();
    Redirect::to("/")
}

/// POST `/conversations/{id}/load`
pub async fn load_conversation(
    State(state): State<Arc<UiState>>,
    CurrentSession(session): CurrentSession,
    Path(conversation_id): Path<String>,
) -> Redirect {
    let mut session = session.lock().await;
    match state
        .service
        .load_conversation(&mut session.chat, &conversation_id)
        .await
    {
        Ok(true) => {}
        Ok(false) => session.notice = Some("Conversation not found".to_string()),
        Err(e) => {
            tracing::error!("Loading conversation {} failed: {}", conversation_id, e);
            session.notice = Some(format!("Could not load conversation: {}", e));
        }
    }
    Redirect::to("/")
}

/// POST `/conversations/{id}/delete`
pub async fn delete_conversation(
    State(state): State<Arc<UiState>>,
    CurrentSession(session): CurrentSession,
    Path(conversation_id): Path<String>,
) -> Redirect {
    let mut session = session.lock().await;
    match state
        .service
        .delete_conversation(&mut session.chat, &conversation_id)
        .await
    {
        Ok(removed) => {
            tracing::info!("Deleted conversation {} ({} messages)", conversation_id, removed);
            session.notice = Some("Conversation deleted".to_string());
        }
        Err(e) => {
            tracing::error!("Deleting conversation {} failed: {}", conversation_id, e);
            session.notice = Some(format!("Could not delete conversation: {}", e));
        }
    }
    Redirect::to("/")
}

/// POST `/messages/{idx}/references/{ref_idx}`
pub async fn select_reference(
    CurrentSession(session): CurrentSession,
    Path((message_idx, reference_idx)): Path<(usize, usize)>,
) -> Redirect {
    session
        .lock()
        .await
        .chat
        .select_reference(message_idx, reference_idx);
    Redirect::to("/")
}

// =============================================================================
// Feedback
// =============================================================================

/// POST `/messages/{idx}/vote/{up|down}`
pub async fn vote(
    State(state): State<Arc<UiState>>,
    CurrentSession(session): CurrentSession,
    Path((message_idx, direction)): Path<(usize, String)>,
) -> Response {
    let vote = match direction.as_str() {
        "up" => Vote::Up,
        "down" => Vote::Down,
        _ => return (StatusCode::NOT_FOUND, "Unknown vote").into_response(),
    };

    let mut session = session.lock().await;
    if let Err(e) = state.feedback.vote(&mut session.chat, message_idx, vote).await {
        tracing::error!("Recording vote on message {} failed: {}", message_idx, e);
        session.notice = Some(format!("Could not record feedback: {}", e));
    }
    Redirect::to("/").into_response()
}

/// POST `/messages/{idx}/feedback`
///
/// Checkboxes arrive as repeated `category` fields, so the form is read as
/// raw pairs.
pub async fn submit_feedback(
    State(state): State<Arc<UiState>>,
    CurrentSession(session): CurrentSession,
    Path(message_idx): Path<usize>,
    Form(fields): Form<Vec<(String, String)>>,
) -> Redirect {
    let categories: Vec<FeedbackCategory> = fields
        .iter()
        .filter(|(name, _)| name == "category")
        .filter_map(|(_, label)| FeedbackCategory::from_label(label))
        .collect();
    let correction = fields
        .iter()
        .find(|(name, _)| name == "correction")
        .map(|(_, value)| value.as_str())
        .unwrap_or("");

    let mut session = session.lock().await;
    match state
        .feedback
        .submit_negative(&mut session.chat, message_idx, &categories, correction)
        .await
    {
        Ok(()) => session.notice = Some("Thank you for your feedback!".to_string()),
        Err(e) => {
            tracing::error!("Storing feedback on message {} failed: {}", message_idx, e);
            session.notice = Some(format!("Could not record feedback: {}", e));
        }
    }
    Redirect::to("/")
}

/// POST `/messages/{idx}/feedback/cancel`
pub async fn cancel_feedback(
    State(state): State<Arc<UiState>>,
    CurrentSession(session): CurrentSession,
    Path(message_idx): Path<usize>,
) -> Redirect {
    let mut session = session.lock().await;
    state.feedback.cancel(&mut session.chat, message_idx);
    Redirect::to("/")
}
