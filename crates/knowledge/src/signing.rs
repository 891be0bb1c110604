//! Time-limited download links for referenced documents.

use kbchat_aws::sigv4::encode_key_path;
use kbchat_aws::{endpoint_for, AwsClient, Credentials};
use kbchat_core::{AppError, AppResult};

use crate::types::Reference;

/// Parsed `s3://bucket/key` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Uri {
    pub bucket: String,
    pub key: String,
}

impl S3Uri {
    pub fn parse(uri: &str) -> AppResult<Self> {
        let rest = uri
            .strip_prefix("s3://")
            .ok_or_else(|| AppError::Knowledge(format!("Not an s3:// URI: {}", uri)))?;

        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok(Self {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            _ => Err(AppError::Knowledge(format!(
                "S3 URI needs both bucket and key: {}",
                uri
            ))),
        }
    }

    /// HTTPS URL of the object in `region`.
    ///
    /// Buckets with dots use path-style addressing, since the wildcard
    /// certificate does not cover nested subdomains.
    pub fn https_url(&self, region: &str) -> String {
        let key = encode_key_path(&self.key);
        if self.bucket.contains('.') {
            format!("https://s3.{}.amazonaws.com/{}/{}", region, self.bucket, key)
        } else {
            format!("https://{}.s3.{}.amazonaws.com/{}", self.bucket, region, key)
        }
    }
}

/// Produces signed download URLs for stored documents.
pub trait UrlSigner: Send + Sync {
    fn presign_get(&self, location: &S3Uri, expires_in_secs: u64) -> AppResult<String>;
}

/// SigV4 query-string signer for S3.
pub struct S3UrlSigner {
    client: AwsClient,
}

impl S3UrlSigner {
    pub fn new(credentials: Credentials, region: impl Into<String>) -> Self {
        let region = region.into();
        Self::with_client(AwsClient::new("s3", endpoint_for("s3", &region), region, credentials))
    }

    /// Sign with an existing S3 client.
    pub fn with_client(client: AwsClient) -> Self {
        Self { client }
    }
}

impl UrlSigner for S3UrlSigner {
    fn presign_get(&self, location: &S3Uri, expires_in_secs: u64) -> AppResult<String> {
        let url = location.https_url(self.client.region());
        self.client.presign("GET", &url, expires_in_secs)
    }
}

/// Attach a presigned URL to every reference that points at S3.
///
/// Failures are per reference: the link is left out and the rest proceed.
pub fn sign_references(
    signer: &dyn UrlSigner,
    references: &mut [Reference],
    expires_in_secs: u64,
) {
    for reference in references.iter_mut() {
        let signed = S3Uri::parse(&reference.uri)
            .and_then(|location| signer.presign_get(&location, expires_in_secs));

        match signed {
            Ok(url) => reference.presigned_url = Some(url),
            Err(e) => {
                tracing::warn!("Could not sign {}: {}", reference.uri, e);
                reference.presigned_url = None;
            }
        }
    }
}
