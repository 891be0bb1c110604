//! Error types for kbchat.
//!
//! This module defines a unified error enum that covers all error categories
//! in the application: configuration, I/O, vendor (AWS) calls, the query
//! handler, conversation storage and the handler API.

use thiserror::Error;

/// Unified error type for kbchat.
///
/// All fallible functions return `Result<T, AppError>`.
/// We never panic; errors must be represented and propagated.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Vendor service errors (signing, transport, service exceptions)
    #[error("AWS error: {0}")]
    Aws(String),

    /// Retrieval, rerank and reference post-processing errors
    #[error("Knowledge error: {0}")]
    Knowledge(String),

    /// Conversation history and feedback storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Errors talking to the query handler API
    #[error("API error: {0}")]
    Api(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Other(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
