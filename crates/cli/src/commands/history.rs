//! History command handler.
//!
//! Lists, shows and deletes stored conversations of one user.

use clap::{Args, Subcommand};
use kbchat_chat::{open_stores, user_id_for, ChatHistory};
use kbchat_core::{config::AppConfig, AppError, AppResult};

/// List, show or delete stored conversations
#[derive(Args, Debug)]
pub struct HistoryCommand {
    /// Login name whose history to use (user id is derived from it)
    #[arg(short, long, env = "CHATBOT_USERNAME")]
    pub username: Option<String>,

    /// Raw user id (e.g. user_8c6976e5b5410415); wins over --username
    #[arg(long)]
    pub user_id: Option<String>,

    #[command(subcommand)]
    pub command: HistorySubcommand,
}

#[derive(Subcommand, Debug)]
pub enum HistorySubcommand {
    /// List conversations, newest first
    List {
        /// Only conversations from the last N days
        #[arg(short, long)]
        days: Option<u32>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the messages of a conversation
    Show {
        /// Conversation id
        conversation_id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a conversation
    Delete {
        /// Conversation id
        conversation_id: String,
    },
}

impl HistoryCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing history command");

        let user_id = self.resolve_user_id()?;
        let (store, _) = open_stores(config)?;
        let history = ChatHistory::new(store);

        match &self.command {
            HistorySubcommand::List { days, json } => {
                let index = history.conversations(&user_id, *days).await?;
                let mut summaries = history.summaries(&user_id).await?;
                if days.is_some() {
                    summaries.retain(|s| {
                        index
                            .values()
                            .any(|conversations| conversations.contains_key(&s.conversation_id))
                    });
                }

                if *json {
                    println!("{}", serde_json::to_string_pretty(&summaries)?);
                } else if summaries.is_empty() {
                    println!("No chat history available");
                } else {
                    for summary in &summaries {
                        println!(
                            "{}  {:<12}  {}",
                            summary.date, summary.conversation_id, summary.first_message
                        );
                    }
                }
            }
            HistorySubcommand::Show {
                conversation_id,
                json,
            } => {
                let rows = history.conversation(&user_id, conversation_id).await?;
                if rows.is_empty() {
                    return Err(AppError::Storage(format!(
                        "No conversation {} for {}",
                        conversation_id, user_id
                    )));
                }

                if *json {
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                } else {
                    for row in &rows {
                        println!("[{}] {}", row.role.as_str(), row.content);
                        for reference in &row.references {
                            println!("    - {}", reference.uri);
                        }
                    }
                }
            }
            HistorySubcommand::Delete { conversation_id } => {
                let removed = history.delete_conversation(&user_id, conversation_id).await?;
                println!("Deleted {} messages", removed);
            }
        }

        Ok(())
    }

    fn resolve_user_id(&self) -> AppResult<String> {
        match (&self.user_id, &self.username) {
            (Some(user_id), _) => Ok(user_id.clone()),
            (None, Some(username)) => Ok(user_id_for(username)),
            (None, None) => Err(AppError::Config(
                "Pass --username or --user-id to select whose history to use".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_user_id() {
        let by_name = HistoryCommand {
            username: Some("admin".to_string()),
            user_id: None,
            command: HistorySubcommand::Delete {
                conversation_id: "1".to_string(),
            },
        };
        assert_eq!(by_name.resolve_user_id().unwrap(), "user_8c6976e5b5410415");

        let neither = HistoryCommand {
            username: None,
            user_id: None,
            command: HistorySubcommand::Delete {
                conversation_id: "1".to_string(),
            },
        };
        assert!(neither.resolve_user_id().is_err());
    }
}
