//! Sidebar grouping of past conversations.

use std::collections::HashSet;

use chrono::{Duration, NaiveDate};

use crate::message::{parse_date, truncate_chars, ConversationIndex, StoredMessage};

/// Characters of the first message used as a sidebar title.
pub const TITLE_CHARS: usize = 30;

/// Named day ranges, newest first: `(label, oldest day back, newest day back)`.
const SECTIONS: [(&str, i64, i64); 4] = [
    ("Today", 0, 0),
    ("Yesterday", 1, 1),
    ("Previous 7 days", 7, 2),
    ("Previous 30 days", 30, 8),
];

/// One sidebar entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SidebarEntry {
    pub conversation_id: String,
    pub title: String,
    pub date: String,
}

/// A labelled group of conversations, newest day first.
#[derive(Debug, Clone, PartialEq)]
pub struct SidebarSection {
    pub label: &'static str,
    pub entries: Vec<SidebarEntry>,
}

/// Bucket `index` into the sidebar sections relative to `today`.
///
/// Each conversation appears once, in the newest section covering one of
/// its days. Empty sections and conversations older than 30 days are
/// left out.
pub fn sidebar_sections(index: &ConversationIndex, today: NaiveDate) -> Vec<SidebarSection> {
    let mut shown: HashSet<&str> = HashSet::new();
    let mut sections = Vec::new();

    for (label, oldest, newest) in SECTIONS {
        let start = today - Duration::days(oldest);
        let end = today - Duration::days(newest);
        let mut entries = Vec::new();

        for (date, conversations) in index.iter().rev() {
            let Some(day) = parse_date(date) else {
                continue;
            };
            if day < start || day > end {
                continue;
            }

            for (conversation_id, messages) in conversations.iter().rev() {
                if !shown.insert(conversation_id.as_str()) {
                    continue;
                }
                let Some(first) = messages.first() else {
                    continue;
                };
                entries.push(SidebarEntry {
                    conversation_id: conversation_id.clone(),
                    title: sidebar_title(first),
                    date: date.clone(),
                });
            }
        }

        if !entries.is_empty() {
            sections.push(SidebarSection { label, entries });
        }
    }

    sections
}

/// First message shortened to [`TITLE_CHARS`], with an ellipsis when cut.
pub fn sidebar_title(first: &StoredMessage) -> String {
    let title = truncate_chars(&first.content, TITLE_CHARS);
    if title.len() < first.content.len() {
        format!("{}...", title)
    } else {
        title.to_string()
    }
}
