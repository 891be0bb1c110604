//! AWS Signature Version 4.
//!
//! Two flavours are needed:
//! - header signing for the JSON APIs (`Authorization` header)
//! - query-string presigning for time-limited S3 download links
//!
//! Both build the same canonical request:
//!
//! ```text
//! METHOD \n CANONICAL_URI \n CANONICAL_QUERY \n CANONICAL_HEADERS \n SIGNED_HEADERS \n PAYLOAD_HASH
//! ```

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use kbchat_core::{AppError, AppResult};
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::credentials::Credentials;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Longest lifetime S3 accepts for a presigned URL (7 days).
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 604_800;

/// Who signs, for which service and region, at what time.
#[derive(Debug, Clone)]
pub struct SigningParams<'a> {
    pub credentials: &'a Credentials,
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

impl SigningParams<'_> {
    fn amz_date(&self) -> String {
        self.time.format("%Y%m%dT%H%M%SZ").to_string()
    }

    fn short_date(&self) -> String {
        self.time.format("%Y%m%d").to_string()
    }

    fn scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.short_date(),
            self.region,
            self.service
        )
    }

    fn signing_key(&self) -> AppResult<Vec<u8>> {
        let secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac_sha256(secret.as_bytes(), self.short_date().as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        hmac_sha256(&k_service, b"aws4_request")
    }

    fn signature(&self, canonical_request: &str) -> AppResult<String> {
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            self.amz_date(),
            self.scope(),
            sha256_hex(canonical_request.as_bytes())
        );
        tracing::trace!("SigV4 string to sign:\n{}", string_to_sign);

        let key = self.signing_key()?;
        Ok(hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?))
    }
}

/// A request about to be signed.
#[derive(Debug, Clone)]
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub url: &'a str,
    /// Extra headers to include in the signature (e.g. `content-type`, `x-amz-target`)
    pub headers: &'a [(String, String)],
    pub payload: &'a [u8],
}

/// Sign a request and return the headers to attach to it
/// (`x-amz-date`, optional `x-amz-security-token`, `authorization`).
///
/// The `host` header is derived from the URL and must not be passed in.
pub fn sign_request(
    request: &SignableRequest<'_>,
    params: &SigningParams<'_>,
) -> AppResult<Vec<(String, String)>> {
    let url = parse_url(request.url)?;
    let amz_date = params.amz_date();

    let mut headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), normalize_header_value(v)))
        .collect();
    headers.push(("host".to_string(), host_header(&url)?));
    headers.push(("x-amz-date".to_string(), amz_date.clone()));
    if let Some(token) = &params.credentials.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let query_pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method.to_uppercase(),
        canonical_uri(&url),
        canonical_query(&query_pairs),
        canonical_headers,
        signed_headers,
        sha256_hex(request.payload)
    );
    tracing::trace!("SigV4 canonical request:\n{}", canonical_request);

    let signature = params.signature(&canonical_request)?;
    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM,
        params.credentials.access_key_id,
        params.scope(),
        signed_headers,
        signature
    );

    let mut out = vec![("x-amz-date".to_string(), amz_date)];
    if let Some(token) = &params.credentials.session_token {
        out.push(("x-amz-security-token".to_string(), token.clone()));
    }
    out.push(("authorization".to_string(), authorization));
    Ok(out)
}

/// Build a presigned URL that grants `method` on `url` for `expires_in_secs`.
///
/// Only the `host` header is signed and the payload is left unsigned, which
/// is what a browser following a plain link can satisfy.
pub fn presign_url(
    method: &str,
    url: &str,
    expires_in_secs: u64,
    params: &SigningParams<'_>,
) -> AppResult<String> {
    if expires_in_secs == 0 || expires_in_secs > MAX_PRESIGN_EXPIRY_SECS {
        return Err(AppError::Aws(format!(
            "Presign expiry must be between 1 and {} seconds, got {}",
            MAX_PRESIGN_EXPIRY_SECS, expires_in_secs
        )));
    }

    let url = parse_url(url)?;
    let host = host_header(&url)?;

    let mut query_pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    query_pairs.push(("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()));
    query_pairs.push((
        "X-Amz-Credential".to_string(),
        format!("{}/{}", params.credentials.access_key_id, params.scope()),
    ));
    query_pairs.push(("X-Amz-Date".to_string(), params.amz_date()));
    query_pairs.push(("X-Amz-Expires".to_string(), expires_in_secs.to_string()));
    if let Some(token) = &params.credentials.session_token {
        query_pairs.push(("X-Amz-Security-Token".to_string(), token.clone()));
    }
    query_pairs.push(("X-Amz-SignedHeaders".to_string(), "host".to_string()));

    let query = canonical_query(&query_pairs);
    let path = canonical_uri(&url);

    let canonical_request = format!(
        "{}\n{}\n{}\nhost:{}\n\nhost\n{}",
        method.to_uppercase(),
        path,
        query,
        host,
        UNSIGNED_PAYLOAD
    );
    tracing::trace!("SigV4 canonical request (presign):\n{}", canonical_request);

    let signature = params.signature(&canonical_request)?;

    Ok(format!(
        "{}://{}{}?{}&X-Amz-Signature={}",
        url.scheme(),
        host,
        path,
        query,
        signature
    ))
}

/// Percent-encode a single path segment or query component
/// (RFC 3986 unreserved characters stay as-is).
pub fn uri_encode(component: &str) -> String {
    urlencoding::encode(component).into_owned()
}

/// Encode an object key for use in a path, keeping `/` separators.
pub fn encode_key_path(key: &str) -> String {
    key.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

fn parse_url(url: &str) -> AppResult<Url> {
    Url::parse(url).map_err(|e| AppError::Aws(format!("Invalid URL {:?}: {}", url, e)))
}

fn host_header(url: &Url) -> AppResult<String> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::Aws(format!("URL has no host: {}", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

// `Url` keeps the path percent-encoded already.
fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

fn canonical_query(pairs: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn normalize_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> AppResult<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| AppError::Aws(format!("Invalid HMAC key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
