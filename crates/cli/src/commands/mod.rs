//! Command handlers for the kbchat CLI.
//!
//! This module organizes all CLI commands into separate submodules.

pub mod ask;
pub mod handler;
pub mod history;
pub mod ui;

// Re-export command types for convenience
pub use ask::AskCommand;
pub use handler::HandlerCommand;
pub use history::HistoryCommand;
pub use ui::UiCommand;
