//! Conversation bookkeeping for the kbchat UI.
//!
//! - **history**: timestamped message rows, grouped into conversations
//! - **sidebar**: Today / Yesterday / Previous 7 / Previous 30 days listing
//! - **feedback**: thumbs up/down with categories and corrections
//! - **session**: per-browser state (messages, selections, open forms)
//! - **service**: one chat turn against the query handler
//!
//! Storage is pluggable: DynamoDB tables in production, JSONL files under
//! `.kbchat/` for local development.

pub mod api;
pub mod auth;
pub mod dynamo;
pub mod feedback;
pub mod history;
pub mod local;
pub mod message;
pub mod service;
pub mod session;
pub mod sidebar;

use std::sync::Arc;

use kbchat_aws::Credentials;
use kbchat_core::config::StorageBackend;
use kbchat_core::{AppConfig, AppResult};

pub use api::{HttpQueryApi, QueryApi};
pub use auth::{user_id_for, Login};
pub use feedback::{FeedbackCategory, FeedbackCollector, FeedbackRecord, FeedbackStore, Vote};
pub use history::{ChatHistory, HistoryStore, RowFilter};
pub use message::{ChatMessage, ConversationIndex, ConversationSummary, Role, StoredMessage};
pub use service::{ChatService, FAILED_RESPONSE};
pub use session::ChatSession;
pub use sidebar::{sidebar_sections, SidebarEntry, SidebarSection};

/// File name of the local history store under `.kbchat/`.
pub const LOCAL_HISTORY_FILE: &str = "history.jsonl";

/// File name of the local feedback store under `.kbchat/`.
pub const LOCAL_FEEDBACK_FILE: &str = "feedback.jsonl";

/// Open the configured history and feedback stores.
pub fn open_stores(
    config: &AppConfig,
) -> AppResult<(Arc<dyn HistoryStore>, Arc<dyn FeedbackStore>)> {
    match config.storage.backend {
        StorageBackend::Dynamodb => {
            let credentials = Credentials::from_env()?;
            tracing::info!(
                "Using DynamoDB tables {} and {} in {}",
                config.storage.history_table,
                config.storage.feedback_table,
                config.region
            );
            let history = dynamo::DynamoHistoryStore::new(
                dynamo::dynamodb_client(&config.region, credentials.clone()),
                config.storage.history_table.clone(),
            );
            let feedback = dynamo::DynamoFeedbackStore::new(
                dynamo::dynamodb_client(&config.region, credentials),
                config.storage.feedback_table.clone(),
            );
            Ok((Arc::new(history), Arc::new(feedback)))
        }
        StorageBackend::Local => {
            config.ensure_kbchat_dir()?;
            let dir = config.kbchat_dir();
            tracing::info!("Using local history store in {}", dir.display());
            Ok((
                Arc::new(local::LocalHistoryStore::new(dir.join(LOCAL_HISTORY_FILE))),
                Arc::new(local::LocalFeedbackStore::new(dir.join(LOCAL_FEEDBACK_FILE))),
            ))
        }
    }
}
