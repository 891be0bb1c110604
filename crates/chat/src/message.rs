//! Chat messages and the stored history rows derived from them.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use kbchat_knowledge::Reference;
use serde::{Deserialize, Serialize};

/// Characters of the first message shown in a conversation summary.
pub const SUMMARY_PREVIEW_CHARS: usize = 50;

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A message as shown in the chat window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,

    #[serde(default)]
    pub references: Vec<Reference>,

    #[serde(default)]
    pub session_id: Option<String>,

    /// Empty until the message is bound to a conversation
    #[serde(default)]
    pub conversation_id: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            references: Vec::new(),
            session_id: None,
            conversation_id: String::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, references: Vec<Reference>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            references,
            session_id: None,
            conversation_id: String::new(),
        }
    }

    /// Bind to a knowledge-base session and a conversation.
    pub fn in_conversation(mut self, session_id: Option<String>, conversation_id: &str) -> Self {
        self.session_id = session_id;
        self.conversation_id = conversation_id.to_string();
        self
    }
}

/// One history row, keyed by `(user_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub user_id: String,

    /// Epoch seconds with microsecond precision; the sort key
    pub timestamp: f64,

    /// Local calendar day of `timestamp`, `YYYY-MM-DD`
    pub date: String,

    pub role: Role,
    pub content: String,

    #[serde(default)]
    pub session_id: Option<String>,

    #[serde(default)]
    pub references: Vec<Reference>,

    pub conversation_id: String,
}

impl StoredMessage {
    /// Build a row for `message` written at `timestamp`.
    ///
    /// A message without a conversation id starts its own conversation named
    /// after the whole seconds of the timestamp.
    pub fn new(user_id: &str, timestamp: f64, message: &ChatMessage) -> Self {
        let conversation_id = if message.conversation_id.is_empty() {
            (timestamp.trunc() as i64).to_string()
        } else {
            message.conversation_id.clone()
        };

        Self {
            user_id: user_id.to_string(),
            timestamp,
            date: date_of(timestamp),
            role: message.role,
            content: message.content.clone(),
            session_id: message.session_id.clone(),
            references: message.references.clone(),
            conversation_id,
        }
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
            references: self.references.clone(),
            session_id: self.session_id.clone(),
            conversation_id: self.conversation_id.clone(),
        }
    }
}

/// Local calendar day of an epoch timestamp.
pub fn date_of(timestamp: f64) -> String {
    let micros = (timestamp * 1_000_000.0).round() as i64;
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    let local: DateTime<Local> = match Local.timestamp_opt(secs, nanos).single() {
        Some(t) => t,
        None => Local::now(),
    };
    local.format("%Y-%m-%d").to_string()
}

/// History grouped by date, then conversation id; messages in time order.
pub type ConversationIndex = BTreeMap<String, BTreeMap<String, Vec<StoredMessage>>>;

/// Group rows into a [`ConversationIndex`].
pub fn group_conversations(rows: Vec<StoredMessage>) -> ConversationIndex {
    let mut index = ConversationIndex::new();

    for row in rows {
        index
            .entry(row.date.clone())
            .or_default()
            .entry(row.conversation_id.clone())
            .or_default()
            .push(row);
    }

    for conversations in index.values_mut() {
        for messages in conversations.values_mut() {
            messages.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        }
    }

    index
}

/// Sidebar listing entry for one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub date: String,
    pub first_message: String,
    pub timestamp: f64,
}

/// One summary per conversation, newest first.
///
/// The earliest row of a conversation provides its date, preview and
/// timestamp.
pub fn summarize(mut rows: Vec<StoredMessage>) -> Vec<ConversationSummary> {
    rows.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let mut summaries: HashMap<String, ConversationSummary> = HashMap::new();
    for row in rows {
        summaries
            .entry(row.conversation_id.clone())
            .or_insert_with(|| ConversationSummary {
                conversation_id: row.conversation_id.clone(),
                date: row.date.clone(),
                first_message: format!("{}...", truncate_chars(&row.content, SUMMARY_PREVIEW_CHARS)),
                timestamp: row.timestamp,
            });
    }

    let mut list: Vec<ConversationSummary> = summaries.into_values().collect();
    list.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
    list
}

/// First `max` characters of `text` (not bytes).
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Parse a `YYYY-MM-DD` date column.
pub fn parse_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}
