//! Query handler routes.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use kbchat_core::{AppError, AppResult};
use kbchat_knowledge::{QueryHandler, QueryRequest, QueryResponse};
use serde_json::Value;

/// POST /query
///
/// Accepts a bare request or an API-gateway style `{"body": "<json>"}`
/// event. The HTTP status mirrors `statusCode` of the response.
pub async fn query(State(handler): State<Arc<QueryHandler>>, Json(event): Json<Value>) -> Response {
    let request = match parse_event(event) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Rejected query event: {}", e);
            return respond(QueryResponse::failure(400, "", e.to_string()));
        }
    };

    respond(handler.handle(request).await)
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

fn respond(response: QueryResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response)).into_response()
}

/// Unwrap the request from an incoming event.
pub fn parse_event(event: Value) -> AppResult<QueryRequest> {
    let payload = match event.get("body").cloned() {
        Some(Value::String(body)) => serde_json::from_str(&body)
            .map_err(|e| AppError::Api(format!("Invalid request body: {}", e)))?,
        Some(body @ Value::Object(_)) => body,
        _ => event,
    };

    serde_json::from_value(payload)
        .map_err(|e| AppError::Api(format!("Invalid request: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serve::handler_router;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use kbchat_knowledge::citations::RetrieveAndGenerateOutput;
    use kbchat_knowledge::{KnowledgeBase, S3Uri, UrlSigner};
    use serde_json::json;
    use tower::ServiceExt;

    struct StaticKnowledgeBase {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl KnowledgeBase for StaticKnowledgeBase {
        async fn retrieve_and_generate(
            &self,
            _query: &str,
            session_id: Option<&str>,
        ) -> AppResult<RetrieveAndGenerateOutput> {
            if self.fail {
                return Err(AppError::Aws("AccessDeniedException".to_string()));
            }
            Ok(serde_json::from_value(json!({
                "output": { "text": "Reset it from the portal." },
                "citations": [{
                    "retrievedReferences": [{
                        "content": { "text": "Open the portal." },
                        "location": { "s3Location": { "uri": "s3://kb/portal.pdf" } },
                        "score": 0.8
                    }]
                }],
                "sessionId": session_id.unwrap_or("sess-new")
            }))?)
        }
    }

    struct PlainSigner;

    impl UrlSigner for PlainSigner {
        fn presign_get(&self, location: &S3Uri, _expires_in_secs: u64) -> AppResult<String> {
            Ok(format!("https://signed/{}", location.key))
        }
    }

    fn router(fail: bool) -> axum::Router {
        let handler = QueryHandler::new(
            Arc::new(StaticKnowledgeBase { fail }),
            Arc::new(PlainSigner),
            3600,
        );
        handler_router(Arc::new(handler))
    }

    async fn post_query(router: axum::Router, body: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/query")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_is_plain_text() {
        let response = router(false)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[test]
    fn test_parse_event_shapes() {
        let bare = parse_event(json!({ "user_query": "hi", "sessionId": "s-1" })).unwrap();
        assert_eq!(bare.user_query, "hi");
        assert_eq!(bare.session_id.as_deref(), Some("s-1"));

        let wrapped = parse_event(json!({ "body": "{\"user_query\":\"hi\"}" })).unwrap();
        assert_eq!(wrapped.user_query, "hi");
        assert_eq!(wrapped.session_id, None);

        assert!(parse_event(json!({ "body": "not json" })).is_err());
        assert!(parse_event(json!({ "question": "hi" })).is_err());
    }

    #[tokio::test]
    async fn test_query_answers() {
        let (status, body) = post_query(router(false), r#"{"user_query":"How do I reset?"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["statusCode"], 200);
        assert_eq!(body["generated_response"], "Reset it from the portal.");
        assert_eq!(body["sessionId"], "sess-new");
        assert_eq!(
            body["detailed_references"][0]["presigned_url"],
            "https://signed/portal.pdf"
        );
    }

    #[tokio::test]
    async fn test_query_status_follows_response() {
        let (status, body) = post_query(router(false), r#"{"user_query":"   "}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["s3_location"], "N/A");

        let (status, _) = post_query(router(false), r#"{"nothing":true}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post_query(router(true), r#"{"user_query":"hi"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["generated_response"], kbchat_knowledge::ERROR_ANSWER);
    }
}
