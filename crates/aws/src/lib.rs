//! AWS plumbing for kbchat.
//!
//! The hosted services kbchat talks to (the knowledge-base runtime, the
//! rerank model, DynamoDB and S3) are plain HTTPS+JSON APIs authenticated
//! with Signature Version 4. This crate provides:
//! - **credentials**: static credentials loaded from the environment
//! - **sigv4**: header signing and presigned URLs
//! - **client**: a signed JSON client with retry on throttling
//!
//! # Example
//! ```no_run
//! use kbchat_aws::{endpoint_for, AwsClient, Credentials};
//!
//! # async fn example() -> kbchat_core::AppResult<()> {
//! let credentials = Credentials::from_env()?;
//! let client = AwsClient::new(
//!     "dynamodb",
//!     endpoint_for("dynamodb", "us-east-1"),
//!     "us-east-1",
//!     credentials,
//! );
//! let tables: serde_json::Value = client
//!     .post_json("/", "application/x-amz-json-1.0", Some("DynamoDB_20120810.ListTables"), &serde_json::json!({}))
//!     .await?;
//! println!("{}", tables);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod credentials;
pub mod sigv4;

pub use client::{AwsClient, RetryPolicy, ServiceError};
pub use credentials::Credentials;
pub use sigv4::{presign_url, sign_request, SignableRequest, SigningParams};

/// Regional endpoint for a service host prefix, e.g.
/// `endpoint_for("bedrock-agent-runtime", "us-east-1")`.
pub fn endpoint_for(host_prefix: &str, region: &str) -> String {
    format!("https://{}.{}.amazonaws.com", host_prefix, region)
}
