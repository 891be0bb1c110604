//! Chat turn orchestration.

use std::sync::Arc;

use kbchat_core::AppResult;

use crate::api::QueryApi;
use crate::history::ChatHistory;
use crate::message::ChatMessage;
use crate::session::ChatSession;

/// Assistant message shown when the handler gives no usable answer.
pub const FAILED_RESPONSE: &str = "Failed to get a valid response from the API.";

/// Ties a session to the handler and the history store.
#[derive(Clone)]
pub struct ChatService {
    history: ChatHistory,
    api: Arc<dyn QueryApi>,
}

impl ChatService {
    pub fn new(history: ChatHistory, api: Arc<dyn QueryApi>) -> Self {
        Self { history, api }
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// Run one chat turn.
    ///
    /// The question is persisted before the handler is called; if that
    /// write fails nothing is shown. The answer is always shown, and
    /// persisted when the store allows. An error status still shows the
    /// handler's text; [`FAILED_RESPONSE`] stands in when there is none.
    pub async fn handle_input(&self, session: &mut ChatSession, text: &str) -> AppResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let question = ChatMessage::user(text)
            .in_conversation(session.session_id.clone(), &session.conversation_id);
        self.history.save(&session.user_id, &question).await?;
        session.push(question);

        let answer = match self.api.query(text, session.session_id.as_deref()).await {
            Ok(response) if response.is_success() => {
                if let Some(session_id) = response.session_id.filter(|s| !s.is_empty()) {
                    session.session_id = Some(session_id);
                }
                ChatMessage::assistant(response.generated_response, response.detailed_references)
            }
            Ok(response) => {
                tracing::error!(
                    "Handler answered with status {}: {}",
                    response.status_code,
                    response.error.as_deref().unwrap_or("no detail")
                );
                let text = match response.generated_response.trim() {
                    "" => FAILED_RESPONSE.to_string(),
                    _ => response.generated_response,
                };
                ChatMessage::assistant(text, Vec::new())
            }
            Err(e) => {
                tracing::error!("Handler call failed: {}", e);
                ChatMessage::assistant(FAILED_RESPONSE, Vec::new())
            }
        }
        .in_conversation(session.session_id.clone(), &session.conversation_id);

        if let Err(e) = self.history.save(&session.user_id, &answer).await {
            tracing::warn!("Answer shown but not saved: {}", e);
        }
        session.push(answer);
        Ok(())
    }

    /// Open a stored conversation in `session`.
    pub async fn load_conversation(
        &self,
        session: &mut ChatSession,
        conversation_id: &str,
    ) -> AppResult<bool> {
        let rows = self
            .history
            .conversation(&session.user_id, conversation_id)
            .await?;
        if rows.is_empty() {
            return Ok(false);
        }
        session.load_conversation(&rows);
        Ok(true)
    }

    /// Delete a conversation; deleting the open one starts a new chat.
    pub async fn delete_conversation(
        &self,
        session: &mut ChatSession,
        conversation_id: &str,
    ) -> AppResult<usize> {
        let removed = self
            .history
            .delete_conversation(&session.user_id, conversation_id)
            .await?;
        if session.conversation_id == conversation_id {
            session.new_chat();
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalHistoryStore;
    use crate::message::Role;
    use kbchat_core::AppError;
    use kbchat_knowledge::{QueryResponse, Reference};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct ScriptedApi {
        responses: Mutex<Vec<AppResult<QueryResponse>>>,
        seen_sessions: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedApi {
        fn new(responses: Vec<AppResult<QueryResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                seen_sessions: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl QueryApi for ScriptedApi {
        async fn query(&self, _q: &str, session_id: Option<&str>) -> AppResult<QueryResponse> {
            self.seen_sessions
                .lock()
                .unwrap()
                .push(session_id.map(str::to_string));
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn service(dir: &TempDir, api: Arc<ScriptedApi>) -> ChatService {
        let store = LocalHistoryStore::new(dir.path().join("history.jsonl"));
        ChatService::new(ChatHistory::new(Arc::new(store)), api)
    }

    #[tokio::test]
    async fn test_turn_persists_and_adopts_session() {
        let dir = TempDir::new().unwrap();
        let api = ScriptedApi::new(vec![
            Ok(QueryResponse::success(
                "q1",
                "first answer",
                vec![Reference::new("s3://b/a", "alpha", 0.4)],
                Some("kb-1".to_string()),
            )),
            Ok(QueryResponse::success("q2", "second answer", Vec::new(), Some("kb-1".to_string()))),
        ]);
        let service = service(&dir, api.clone());
        let mut session = ChatSession::new("user_1");

        service.handle_input(&mut session, " q1 ").await.unwrap();
        service.handle_input(&mut session, "q2").await.unwrap();

        assert_eq!(session.session_id.as_deref(), Some("kb-1"));
        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.messages[0].content, "q1");
        assert_eq!(session.messages[1].references.len(), 1);
        assert_eq!(
            api.seen_sessions.lock().unwrap().as_slice(),
            &[None, Some("kb-1".to_string())]
        );

        let stored = service
            .history()
            .conversation("user_1", &session.conversation_id)
            .await
            .unwrap();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[1].role, Role::Assistant);
        assert_eq!(stored[1].session_id.as_deref(), Some("kb-1"));
    }

    #[tokio::test]
    async fn test_failures_show_fallback_answer() {
        let dir = TempDir::new().unwrap();
        let api = ScriptedApi::new(vec![
            Err(AppError::Api("timeout".to_string())),
            Ok(QueryResponse::failure(500, "q", "boom")),
        ]);
        let service = service(&dir, api);
        let mut session = ChatSession::new("user_1");

        service.handle_input(&mut session, "q").await.unwrap();
        service.handle_input(&mut session, "q").await.unwrap();

        assert_eq!(session.messages[1].content, FAILED_RESPONSE);
        assert_eq!(session.messages[3].content, kbchat_knowledge::ERROR_ANSWER);
        assert!(session.session_id.is_none());
    }

    #[tokio::test]
    async fn test_error_status_shows_handler_answer() {
        let dir = TempDir::new().unwrap();
        let mut rejected = QueryResponse::failure(400, "", "user_query must not be empty");
        rejected.generated_response = "Please enter a question.".to_string();
        let mut blank = QueryResponse::failure(502, "q", "bad gateway");
        blank.generated_response = "  ".to_string();

        let service = service(&dir, ScriptedApi::new(vec![Ok(rejected), Ok(blank)]));
        let mut session = ChatSession::new("user_1");
        service.handle_input(&mut session, "q").await.unwrap();
        service.handle_input(&mut session, "q").await.unwrap();

        assert_eq!(session.messages[1].content, "Please enter a question.");
        assert!(session.messages[1].references.is_empty());
        assert_eq!(session.messages[3].content, FAILED_RESPONSE);
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, ScriptedApi::new(Vec::new()));
        let mut session = ChatSession::new("user_1");

        service.handle_input(&mut session, "   ").await.unwrap();
        assert!(session.messages.is_empty());
    }

    #[tokio::test]
    async fn test_load_and_delete_conversation() {
        let dir = TempDir::new().unwrap();
        let api = ScriptedApi::new(vec![Ok(QueryResponse::success("q", "a", Vec::new(), None))]);
        let service = service(&dir, api);
        let mut session = ChatSession::new("user_1");
        session.conversation_id = "conv-1".to_string();
        service.handle_input(&mut session, "q").await.unwrap();

        let mut other = ChatSession::new("user_1");
        assert!(service.load_conversation(&mut other, "conv-1").await.unwrap());
        assert_eq!(other.messages.len(), 2);
        assert!(!service.load_conversation(&mut other, "missing").await.unwrap());

        assert_eq!(service.delete_conversation(&mut other, "conv-1").await.unwrap(), 2);
        assert!(other.messages.is_empty());
        assert_ne!(other.conversation_id, "conv-1");
    }
}
