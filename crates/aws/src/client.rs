//! Signed JSON client for the AWS JSON APIs.
//!
//! Every call is signed freshly per attempt (the signature embeds the time)
//! and retried with exponential backoff when the service throttles or fails
//! on its side.

use chrono::Utc;
use kbchat_core::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::credentials::Credentials;
use crate::sigv4::{presign_url, sign_request, SignableRequest, SigningParams};

/// Retry settings for vendor calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Error body returned by the AWS JSON protocols.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceError {
    #[serde(rename = "__type", default)]
    pub error_type: Option<String>,
    #[serde(alias = "Message", default)]
    pub message: Option<String>,
}

impl ServiceError {
    /// Short exception name, e.g. `ThrottlingException` from
    /// `com.amazonaws.dynamodb.v20120810#ThrottlingException`.
    pub fn code(&self) -> &str {
        self.error_type
            .as_deref()
            .map(|t| t.rsplit('#').next().unwrap_or(t))
            .unwrap_or("UnknownError")
    }

    fn is_throttling(&self) -> bool {
        matches!(
            self.code(),
            "ThrottlingException"
                | "ProvisionedThroughputExceededException"
                | "RequestLimitExceeded"
                | "ServiceUnavailableException"
        )
    }
}

/// Per-attempt limit for a vendor call, including reading the body.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A reqwest client bound to one AWS service endpoint.
pub struct AwsClient {
    http: reqwest::Client,
    endpoint: String,
    service: String,
    region: String,
    credentials: Credentials,
    retry: RetryPolicy,
    timeout: Duration,
}

impl AwsClient {
    /// Create a client.
    ///
    /// `service` is the signing name (e.g. `bedrock`, `dynamodb`, `s3`), which
    /// is not always the host prefix of `endpoint`.
    pub fn new(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        region: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            service: service.into(),
            region: region.into(),
            credentials,
            retry: RetryPolicy::default(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Presign a URL for this client's service and credentials.
    pub fn presign(&self, method: &str, url: &str, expires_in_secs: u64) -> AppResult<String> {
        let params = SigningParams {
            credentials: &self.credentials,
            region: &self.region,
            service: &self.service,
            time: Utc::now(),
        };
        presign_url(method, url, expires_in_secs, &params)
    }

    /// POST a JSON body to `path` and decode the JSON response.
    ///
    /// `target` sets the `X-Amz-Target` header used by the DynamoDB-style
    /// protocols; REST-style services leave it unset.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        content_type: &str,
        target: Option<&str>,
        body: &serde_json::Value,
    ) -> AppResult<T> {
        let url = format!("{}{}", self.endpoint, path);
        let payload = serde_json::to_vec(body)?;

        let mut headers = vec![("content-type".to_string(), content_type.to_string())];
        if let Some(target) = target {
            headers.push(("x-amz-target".to_string(), target.to_string()));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(
                "{} POST {} (target: {:?}, attempt {}/{})",
                self.service,
                url,
                target,
                attempt,
                self.retry.max_attempts
            );

            match self.send_once(&url, &headers, &payload).await {
                Ok(text) => {
                    return serde_json::from_str(&text).map_err(|e| {
                        AppError::Aws(format!(
                            "Failed to parse {} response: {}",
                            self.service, e
                        ))
                    });
                }
                Err(failure) if failure.retryable && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        "{} call failed ({}), retrying in {:?}",
                        self.service,
                        failure.error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }

    async fn send_once(
        &self,
        url: &str,
        headers: &[(String, String)],
        payload: &[u8],
    ) -> Result<String, Failure> {
        let params = SigningParams {
            credentials: &self.credentials,
            region: &self.region,
            service: &self.service,
            time: Utc::now(),
        };
        let signed = sign_request(
            &SignableRequest {
                method: "POST",
                url,
                headers,
                payload,
            },
            &params,
        )
        .map_err(Failure::fatal)?;

        let mut request = self
            .http
            .post(url)
            .timeout(self.timeout)
            .body(payload.to_vec());
        for (name, value) in headers.iter().chain(signed.iter()) {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| Failure {
            retryable: e.is_timeout() || e.is_connect(),
            error: AppError::Aws(format!("Failed to send request to {}: {}", self.service, e)),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| Failure {
            retryable: true,
            error: AppError::Aws(format!("Failed to read {} response: {}", self.service, e)),
        })?;

        if status.is_success() {
            return Ok(text);
        }

        let service_error: ServiceError = serde_json::from_str(&text).unwrap_or(ServiceError {
            error_type: None,
            message: Some(text.clone()),
        });

        let retryable = status.as_u16() == 429 || status.is_server_error() || service_error.is_throttling();

        Err(Failure {
            retryable,
            error: AppError::Aws(format!(
                "{} API error ({}): {}: {}",
                self.service,
                status,
                service_error.code(),
                service_error.message.as_deref().unwrap_or("no message")
            )),
        })
    }
}

struct Failure {
    retryable: bool,
    error: AppError,
}

impl Failure {
    fn fatal(error: AppError) -> Self {
        Self {
            retryable: false,
            error,
        }
    }
}
