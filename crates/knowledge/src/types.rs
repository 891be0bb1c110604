//! Query handler wire types.
//!
//! Field names follow the JSON contract the chat UI (and any API gateway in
//! front of the handler) already speaks, hence the mixed casing.

use kbchat_core::config::HandlerSettings;
use kbchat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Answer text returned alongside any handler failure.
pub const ERROR_ANSWER: &str = "An error occurred while processing your request.";

/// Incoming question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// The user's question
    pub user_query: String,

    /// Knowledge-base session to continue, if any
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl QueryRequest {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

/// A ranked source document backing the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    /// Object store URI (`s3://bucket/key`)
    pub uri: String,

    /// Retrieved passage, trimmed
    #[serde(default)]
    pub snippet: String,

    /// Retrieval or rerank relevance score
    #[serde(default)]
    pub score: f64,

    /// Time-limited download link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presigned_url: Option<String>,
}

impl Reference {
    pub fn new(uri: impl Into<String>, snippet: impl Into<String>, score: f64) -> Self {
        Self {
            uri: uri.into(),
            snippet: snippet.into(),
            score,
            presigned_url: None,
        }
    }
}

/// Handler result, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,

    pub query: String,

    pub generated_response: String,

    /// Comma-joined reference URIs, `"N/A"` on failure
    pub s3_location: String,

    #[serde(default)]
    pub detailed_references: Vec<Reference>,

    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    /// Successful answer with its ranked references.
    pub fn success(
        query: impl Into<String>,
        generated_response: impl Into<String>,
        references: Vec<Reference>,
        session_id: Option<String>,
    ) -> Self {
        let s3_location = references
            .iter()
            .map(|r| r.uri.as_str())
            .collect::<Vec<_>>()
            .join(",");

        Self {
            status_code: 200,
            query: query.into(),
            generated_response: generated_response.into(),
            s3_location,
            detailed_references: references,
            session_id,
            error: None,
        }
    }

    /// Failure shape: fixed answer text, no references.
    pub fn failure(status_code: u16, query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status_code,
            query: query.into(),
            generated_response: ERROR_ANSWER.to_string(),
            s3_location: "N/A".to_string(),
            detailed_references: Vec::new(),
            session_id: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Resolved handler settings.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub knowledge_base_id: String,
    pub model_arn: String,
    pub number_of_results: u32,
    pub rerank_model_arn: Option<String>,
    pub presign_expiry_secs: u64,
}

impl HandlerConfig {
    /// Resolve from application settings; id and model are mandatory.
    pub fn from_settings(settings: &HandlerSettings) -> AppResult<Self> {
        let knowledge_base_id = settings
            .knowledge_base_id
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Config("Knowledge base id is not set".to_string()))?;
        let model_arn = settings
            .model_arn
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Config("Foundation model ARN is not set".to_string()))?;

        Ok(Self {
            knowledge_base_id,
            model_arn,
            number_of_results: settings.number_of_results.max(1),
            rerank_model_arn: settings.rerank_model_arn.clone().filter(|s| !s.is_empty()),
            presign_expiry_secs: settings.presign_expiry_secs,
        })
    }
}
