//! Client side of the query handler.

use std::time::Duration;

use kbchat_core::{AppError, AppResult};
use kbchat_knowledge::{QueryHandler, QueryRequest, QueryResponse};
use serde::Deserialize;

/// Request timeout for the handler endpoint.
pub const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that answers questions.
#[async_trait::async_trait]
pub trait QueryApi: Send + Sync {
    async fn query(&self, user_query: &str, session_id: Option<&str>) -> AppResult<QueryResponse>;
}

/// Calls the handler over HTTP.
pub struct HttpQueryApi {
    http: reqwest::Client,
    url: String,
}

/// API-gateway proxy responses wrap the payload as a JSON string.
#[derive(Deserialize)]
struct Envelope {
    body: String,
}

impl HttpQueryApi {
    pub fn new(url: impl Into<String>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| AppError::Api(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

/// Decode a handler response, bare or inside a `{"body": "<json>"}` envelope.
pub fn decode_response(text: &str) -> AppResult<QueryResponse> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| AppError::Api(format!("Handler returned invalid JSON: {}", e)))?;

    let value = match value.get("body") {
        Some(serde_json::Value::String(_)) => {
            let envelope: Envelope = serde_json::from_value(value)?;
            serde_json::from_str(&envelope.body)
                .map_err(|e| AppError::Api(format!("Invalid response body: {}", e)))?
        }
        _ => value,
    };

    serde_json::from_value(value)
        .map_err(|e| AppError::Api(format!("Unexpected handler response: {}", e)))
}

#[async_trait::async_trait]
impl QueryApi for HttpQueryApi {
    async fn query(&self, user_query: &str, session_id: Option<&str>) -> AppResult<QueryResponse> {
        let request = QueryRequest::new(user_query).with_session(session_id.map(str::to_string));

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Api(format!("Failed to reach handler at {}: {}", self.url, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::Api(format!("Failed to read handler response: {}", e)))?;

        if !status.is_success() {
            return Err(AppError::Api(format!("Handler returned {}: {}", status, text)));
        }

        decode_response(&text)
    }
}

/// Answer in-process, without an HTTP hop.
#[async_trait::async_trait]
impl QueryApi for QueryHandler {
    async fn query(&self, user_query: &str, session_id: Option<&str>) -> AppResult<QueryResponse> {
        let request = QueryRequest::new(user_query).with_session(session_id.map(str::to_string));
        Ok(self.handle(request).await)
    }
}
