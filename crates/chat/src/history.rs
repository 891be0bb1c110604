//! Conversation history.
//!
//! Rows are keyed by user id and timestamp. [`ChatHistory`] stamps each new
//! row and turns query results into the grouped and summarized views the UI
//! needs; the [`HistoryStore`] backends only move rows.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Local, NaiveDate};
use kbchat_core::{AppError, AppResult};

use crate::message::{
    group_conversations, summarize, ChatMessage, ConversationIndex, ConversationSummary,
    StoredMessage,
};

/// Server-side row filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFilter {
    /// Keep rows whose `date` is on or after this `YYYY-MM-DD` day
    pub since_date: Option<String>,
    /// Keep rows of this conversation only
    pub conversation_id: Option<String>,
}

impl RowFilter {
    pub fn matches(&self, row: &StoredMessage) -> bool {
        if let Some(since) = &self.since_date {
            if row.date.as_str() < since.as_str() {
                return false;
            }
        }
        if let Some(conversation_id) = &self.conversation_id {
            if &row.conversation_id != conversation_id {
                return false;
            }
        }
        true
    }
}

/// Key-value backend for history rows.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    async fn put(&self, row: &StoredMessage) -> AppResult<()>;

    /// All rows of `user_id` matching `filter`, in any order.
    async fn query(&self, user_id: &str, filter: &RowFilter) -> AppResult<Vec<StoredMessage>>;

    async fn delete(&self, user_id: &str, timestamp: f64) -> AppResult<()>;
}

/// Issues strictly increasing timestamps with microsecond resolution.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_micros: Mutex<i64>,
}

impl MonotonicClock {
    pub fn now(&self) -> f64 {
        let wall = chrono::Utc::now().timestamp_micros();
        self.after(wall)
    }

    fn after(&self, wall_micros: i64) -> f64 {
        let mut last = match self.last_micros.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = wall_micros.max(*last + 1);
        *last = next;
        next as f64 / 1_000_000.0
    }
}

/// History operations over a [`HistoryStore`].
#[derive(Clone)]
pub struct ChatHistory {
    store: Arc<dyn HistoryStore>,
    clock: Arc<MonotonicClock>,
}

impl ChatHistory {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            store,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Persist `message` for `user_id`, returning the written row.
    pub async fn save(&self, user_id: &str, message: &ChatMessage) -> AppResult<StoredMessage> {
        if user_id.is_empty() {
            return Err(AppError::Storage("Cannot save history without a user id".to_string()));
        }

        let row = StoredMessage::new(user_id, self.clock.now(), message);
        self.store.put(&row).await?;

        tracing::debug!(
            "Saved {} message for {} in conversation {}",
            row.role.as_str(),
            user_id,
            row.conversation_id
        );
        Ok(row)
    }

    /// Conversations of `user_id`, optionally limited to the last `days`.
    pub async fn conversations(
        &self,
        user_id: &str,
        days: Option<u32>,
    ) -> AppResult<ConversationIndex> {
        let filter = RowFilter {
            since_date: days.map(|d| cutoff_date(Local::now().date_naive(), d)),
            conversation_id: None,
        };
        let rows = self.store.query(user_id, &filter).await?;
        Ok(group_conversations(rows))
    }

    /// One summary per conversation, newest first.
    pub async fn summaries(&self, user_id: &str) -> AppResult<Vec<ConversationSummary>> {
        let rows = self.store.query(user_id, &RowFilter::default()).await?;
        Ok(summarize(rows))
    }

    /// Messages of one conversation in time order.
    pub async fn conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> AppResult<Vec<StoredMessage>> {
        let filter = RowFilter {
            since_date: None,
            conversation_id: Some(conversation_id.to_string()),
        };
        let mut rows = self.store.query(user_id, &filter).await?;
        rows.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Ok(rows)
    }

    /// Delete every row of a conversation. Returns the number of rows removed.
    pub async fn delete_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> AppResult<usize> {
        let rows = self.conversation(user_id, conversation_id).await?;
        for row in &rows {
            self.store.delete(user_id, row.timestamp).await?;
        }

        tracing::info!(
            "Deleted conversation {} ({} messages) for {}",
            conversation_id,
            rows.len(),
            user_id
        );
        Ok(rows.len())
    }
}

/// `YYYY-MM-DD` of `today - days`.
pub fn cutoff_date(today: NaiveDate, days: u32) -> String {
    (today - Duration::days(i64::from(days)))
        .format("%Y-%m-%d")
        .to_string()
}
