//! Per-browser chat state.

use std::collections::{HashMap, HashSet};

use crate::feedback::Vote;
use crate::message::{ChatMessage, StoredMessage};

/// Everything the chat page shows for one logged-in browser.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub user_id: String,

    /// Knowledge-base session returned by the handler
    pub session_id: Option<String>,

    /// Conversation new messages are filed under
    pub conversation_id: String,

    pub messages: Vec<ChatMessage>,

    /// Selected reference per message index
    selected_references: HashMap<usize, usize>,

    /// Votes cast per message index
    votes: HashMap<usize, Vote>,

    /// Messages whose negative-feedback form is open
    open_feedback: HashSet<usize>,
}

impl ChatSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: None,
            conversation_id: new_conversation_id(),
            messages: Vec::new(),
            selected_references: HashMap::new(),
            votes: HashMap::new(),
            open_feedback: HashSet::new(),
        }
    }

    /// Start over: no knowledge-base session, no messages, new conversation.
    pub fn new_chat(&mut self) {
        self.session_id = None;
        self.messages.clear();
        self.conversation_id = new_conversation_id();
        self.clear_view_state();
    }

    /// Replace the window with a stored conversation.
    ///
    /// The knowledge-base session is not restored; the next question starts
    /// a fresh one inside the loaded conversation.
    pub fn load_conversation(&mut self, rows: &[StoredMessage]) {
        let Some(first) = rows.first() else {
            return;
        };

        self.conversation_id = first.conversation_id.clone();
        self.session_id = None;
        self.messages = rows.iter().map(StoredMessage::to_chat_message).collect();
        self.clear_view_state();
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Select reference `reference_idx` of message `message_idx`, clamped to
    /// the message's reference list. Returns the selection, if any.
    pub fn select_reference(&mut self, message_idx: usize, reference_idx: usize) -> Option<usize> {
        let count = self.messages.get(message_idx)?.references.len();
        if count == 0 {
            return None;
        }
        let selected = reference_idx.min(count - 1);
        self.selected_references.insert(message_idx, selected);
        Some(selected)
    }

    /// Currently selected reference of a message (first by default).
    pub fn selected_reference(&self, message_idx: usize) -> usize {
        let count = self
            .messages
            .get(message_idx)
            .map(|m| m.references.len())
            .unwrap_or(0);
        let selected = self
            .selected_references
            .get(&message_idx)
            .copied()
            .unwrap_or(0);
        selected.min(count.saturating_sub(1))
    }

    pub fn vote(&self, message_idx: usize) -> Option<Vote> {
        self.votes.get(&message_idx).copied()
    }

    pub fn is_feedback_open(&self, message_idx: usize) -> bool {
        self.open_feedback.contains(&message_idx)
    }

    pub(crate) fn record_vote(&mut self, message_idx: usize, vote: Vote) {
        self.votes.insert(message_idx, vote);
    }

    pub(crate) fn set_feedback_open(&mut self, message_idx: usize, open: bool) {
        if open {
            self.open_feedback.insert(message_idx);
        } else {
            self.open_feedback.remove(&message_idx);
        }
    }

    fn clear_view_state(&mut self) {
        self.selected_references.clear();
        self.votes.clear();
        self.open_feedback.clear();
    }
}

/// Conversation ids are the epoch seconds of their creation.
pub fn new_conversation_id() -> String {
    chrono::Utc::now().timestamp().to_string()
}
