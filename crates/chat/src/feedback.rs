//! Thumbs-up / thumbs-down feedback on assistant answers.

use std::fmt;
use std::sync::Arc;

use chrono::Local;
use kbchat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Role;
use crate::session::ChatSession;

/// User id recorded when the session has none.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Thumbs up or down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    Positive,
    Negative,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::Positive => "positive",
            FeedbackType::Negative => "negative",
        }
    }
}

/// Why an answer was unhelpful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedbackCategory {
    #[serde(rename = "Incorrect Information")]
    IncorrectInformation,
    #[serde(rename = "Incomplete Answer")]
    IncompleteAnswer,
    #[serde(rename = "Not Relevant")]
    NotRelevant,
    #[serde(rename = "Unclear Response")]
    UnclearResponse,
    #[serde(rename = "Other")]
    Other,
}

impl FeedbackCategory {
    pub const ALL: [FeedbackCategory; 5] = [
        FeedbackCategory::IncorrectInformation,
        FeedbackCategory::IncompleteAnswer,
        FeedbackCategory::NotRelevant,
        FeedbackCategory::UnclearResponse,
        FeedbackCategory::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FeedbackCategory::IncorrectInformation => "Incorrect Information",
            FeedbackCategory::IncompleteAnswer => "Incomplete Answer",
            FeedbackCategory::NotRelevant => "Not Relevant",
            FeedbackCategory::UnclearResponse => "Unclear Response",
            FeedbackCategory::Other => "Other",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }
}

impl fmt::Display for FeedbackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One stored feedback item, keyed by `feedback_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub feedback_id: String,

    /// Local ISO-8601 time of submission
    pub timestamp: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    pub message_idx: usize,
    pub feedback_type: FeedbackType,
    pub message_content: String,
    pub user_id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<FeedbackCategory>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,
}

impl FeedbackRecord {
    pub fn new(
        session: &ChatSession,
        message_idx: usize,
        feedback_type: FeedbackType,
        message_content: impl Into<String>,
    ) -> Self {
        let user_id = if session.user_id.is_empty() {
            ANONYMOUS_USER.to_string()
        } else {
            session.user_id.clone()
        };

        Self {
            feedback_id: Uuid::new_v4().to_string(),
            timestamp: Local::now()
                .naive_local()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
            session_id: session.session_id.clone(),
            message_idx,
            feedback_type,
            message_content: message_content.into(),
            user_id,
            categories: Vec::new(),
            correction: None,
        }
    }
}

/// Key-value backend for feedback records.
#[async_trait::async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn put(&self, record: &FeedbackRecord) -> AppResult<()>;
}

/// Feedback actions on a [`ChatSession`].
#[derive(Clone)]
pub struct FeedbackCollector {
    store: Arc<dyn FeedbackStore>,
}

impl FeedbackCollector {
    pub fn new(store: Arc<dyn FeedbackStore>) -> Self {
        Self { store }
    }

    /// Cast a vote on an assistant message.
    ///
    /// Up is stored right away. Down only opens the category form; the
    /// record is written on [`submit_negative`](Self::submit_negative).
    pub async fn vote(&self, session: &mut ChatSession, message_idx: usize, vote: Vote) -> AppResult<()> {
        let content = answer_content(session, message_idx)?;
        session.record_vote(message_idx, vote);

        match vote {
            Vote::Up => {
                let record = FeedbackRecord::new(session, message_idx, FeedbackType::Positive, content);
                self.store.put(&record).await?;
                tracing::info!("Stored positive feedback for message {}", message_idx);
            }
            Vote::Down => session.set_feedback_open(message_idx, true),
        }
        Ok(())
    }

    /// Store negative feedback with the chosen categories and an optional
    /// correction, then close the form.
    pub async fn submit_negative(
        &self,
        session: &mut ChatSession,
        message_idx: usize,
        categories: &[FeedbackCategory],
        correction: &str,
    ) -> AppResult<()> {
        let content = answer_content(session, message_idx)?;

        let mut record = FeedbackRecord::new(session, message_idx, FeedbackType::Negative, content);
        record.categories = categories.to_vec();
        let correction = correction.trim();
        if !correction.is_empty() {
            record.correction = Some(correction.to_string());
        }

        self.store.put(&record).await?;
        tracing::info!(
            "Stored negative feedback for message {} ({} categories)",
            message_idx,
            record.categories.len()
        );

        session.record_vote(message_idx, Vote::Down);
        session.set_feedback_open(message_idx, false);
        Ok(())
    }

    /// Close the negative-feedback form without storing anything.
    pub fn cancel(&self, session: &mut ChatSession, message_idx: usize) {
        session.set_feedback_open(message_idx, false);
    }
}

fn answer_content(session: &ChatSession, message_idx: usize) -> AppResult<String> {
    match session.messages.get(message_idx) {
        Some(message) if message.role == Role::Assistant => Ok(message.content.clone()),
        Some(_) => Err(AppError::Other(format!(
            "Message {} is not an assistant answer",
            message_idx
        ))),
        None => Err(AppError::Other(format!("No message at index {}", message_idx))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatMessage;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<FeedbackRecord>>,
    }

    #[async_trait::async_trait]
    impl FeedbackStore for MemoryStore {
        async fn put(&self, record: &FeedbackRecord) -> AppResult<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn setup() -> (FeedbackCollector, Arc<MemoryStore>, ChatSession) {
        let store = Arc::new(MemoryStore::default());
        let mut session = ChatSession::new("user_abc");
        session.session_id = Some("kb-1".to_string());
        session.push(ChatMessage::user("question"));
        session.push(ChatMessage::assistant("the answer", Vec::new()));
        (FeedbackCollector::new(store.clone()), store, session)
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(
            FeedbackCategory::from_label("Not Relevant"),
            Some(FeedbackCategory::NotRelevant)
        );
        assert_eq!(FeedbackCategory::from_label("nope"), None);
        assert_eq!(
            serde_json::to_string(&FeedbackCategory::UnclearResponse).unwrap(),
            "\"Unclear Response\""
        );
    }

    #[tokio::test]
    async fn test_upvote_is_stored_immediately() {
        let (collector, store, mut session) = setup();

        collector.vote(&mut session, 1, Vote::Up).await.unwrap();

        let records = store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.feedback_type, FeedbackType::Positive);
        assert_eq!(record.message_content, "the answer");
        assert_eq!(record.user_id, "user_abc");
        assert_eq!(record.session_id.as_deref(), Some("kb-1"));
        assert!(Uuid::parse_str(&record.feedback_id).is_ok());
        assert_eq!(session.vote(1), Some(Vote::Up));
    }

    #[tokio::test]
    async fn test_downvote_opens_form_then_submit() {
        let (collector, store, mut session) = setup();

        collector.vote(&mut session, 1, Vote::Down).await.unwrap();
        assert!(store.records.lock().unwrap().is_empty());
        assert!(session.is_feedback_open(1));

        collector
            .submit_negative(
                &mut session,
                1,
                &[FeedbackCategory::IncompleteAnswer, FeedbackCategory::Other],
                "  The limit is 30 days.  ",
            )
            .await
            .unwrap();

        assert!(!session.is_feedback_open(1));
        let records = store.records.lock().unwrap();
        assert_eq!(records[0].feedback_type, FeedbackType::Negative);
        assert_eq!(records[0].categories.len(), 2);
        assert_eq!(records[0].correction.as_deref(), Some("The limit is 30 days."));

        let json = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(json["categories"][0], "Incomplete Answer");
        assert_eq!(json["feedback_type"], "negative");
    }

    #[tokio::test]
    async fn test_blank_correction_is_omitted_and_cancel_stores_nothing() {
        let (collector, store, mut session) = setup();

        collector.vote(&mut session, 1, Vote::Down).await.unwrap();
        collector.cancel(&mut session, 1);
        assert!(!session.is_feedback_open(1));
        assert!(store.records.lock().unwrap().is_empty());

        collector
            .submit_negative(&mut session, 1, &[], "   ")
            .await
            .unwrap();
        let records = store.records.lock().unwrap();
        assert!(records[0].correction.is_none());
        assert!(serde_json::to_value(&records[0]).unwrap().get("correction").is_none());
    }

    #[tokio::test]
    async fn test_feedback_only_on_answers() {
        let (collector, _store, mut session) = setup();
        assert!(collector.vote(&mut session, 0, Vote::Up).await.is_err());
        assert!(collector.vote(&mut session, 5, Vote::Up).await.is_err());
    }
}
