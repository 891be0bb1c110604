//! Query handler orchestration.
//!
//! One call per user question:
//! 1. Validate the request
//! 2. Retrieve and generate through the knowledge base
//! 3. Extract unique references, ordered by score
//! 4. Rerank them (when a rerank model is configured)
//! 5. Attach signed document links
//!
//! Failures never escape as errors: they become the fixed failure response,
//! which is what the chat UI renders.

use std::sync::Arc;
use std::time::Instant;

use kbchat_aws::{endpoint_for, AwsClient, Credentials};
use kbchat_core::{AppConfig, AppError, AppResult};

use crate::citations::extract_references;
use crate::rerank::{apply_ranking, rerank_document, BedrockReranker, Reranker};
use crate::retrieve::{BedrockKnowledgeBase, KnowledgeBase};
use crate::signing::{sign_references, S3UrlSigner, UrlSigner};
use crate::types::{HandlerConfig, QueryRequest, QueryResponse, Reference};

/// Stateless request handler.
pub struct QueryHandler {
    knowledge_base: Arc<dyn KnowledgeBase>,
    reranker: Option<Arc<dyn Reranker>>,
    signer: Arc<dyn UrlSigner>,
    presign_expiry_secs: u64,
}

impl QueryHandler {
    pub fn new(
        knowledge_base: Arc<dyn KnowledgeBase>,
        signer: Arc<dyn UrlSigner>,
        presign_expiry_secs: u64,
    ) -> Self {
        Self {
            knowledge_base,
            reranker: None,
            signer,
            presign_expiry_secs,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Build the Bedrock-backed handler from application config and the
    /// environment credentials.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let handler_config = HandlerConfig::from_settings(&config.handler)?;
        let credentials = Credentials::from_env()?;
        let runtime_endpoint = endpoint_for(BedrockKnowledgeBase::HOST_PREFIX, &config.region);

        let knowledge_base = BedrockKnowledgeBase::new(
            AwsClient::new(
                BedrockKnowledgeBase::SERVICE,
                runtime_endpoint.clone(),
                config.region.clone(),
                credentials.clone(),
            ),
            handler_config.knowledge_base_id.clone(),
            handler_config.model_arn.clone(),
            handler_config.number_of_results,
        );

        let signer = S3UrlSigner::new(credentials.clone(), config.region.clone());

        let mut handler = Self::new(
            Arc::new(knowledge_base),
            Arc::new(signer),
            handler_config.presign_expiry_secs,
        );

        if let Some(rerank_model_arn) = handler_config.rerank_model_arn {
            tracing::info!("Reranking enabled with {}", rerank_model_arn);
            let reranker = BedrockReranker::new(
                AwsClient::new(
                    BedrockKnowledgeBase::SERVICE,
                    runtime_endpoint,
                    config.region.clone(),
                    credentials,
                ),
                rerank_model_arn,
            );
            handler = handler.with_reranker(Arc::new(reranker));
        }

        Ok(handler)
    }

    /// Handle one question. Always returns a response.
    pub async fn handle(&self, request: QueryRequest) -> QueryResponse {
        let start = Instant::now();
        let query = request.user_query.trim().to_string();

        if query.is_empty() {
            tracing::warn!("Rejected empty query");
            return QueryResponse::failure(400, request.user_query, "user_query must not be empty");
        }

        match self.answer(&query, request.session_id.as_deref()).await {
            Ok(mut response) => {
                tracing::info!(
                    "Answered query with {} references in {:?}",
                    response.detailed_references.len(),
                    start.elapsed()
                );
                // The service sees the trimmed text; the caller gets its own back.
                response.query = request.user_query;
                response
            }
            Err(e) => {
                tracing::error!("Query failed: {}", e);
                QueryResponse::failure(500, request.user_query, e.to_string())
            }
        }
    }

    async fn answer(&self, query: &str, session_id: Option<&str>) -> AppResult<QueryResponse> {
        let output = self
            .knowledge_base
            .retrieve_and_generate(query, session_id)
            .await?;

        let generated = output.output.as_ref().ok_or_else(|| {
            AppError::Knowledge("Knowledge base returned no generated output".to_string())
        })?;

        let references = extract_references(&output.citations);
        let mut references = self.rerank(query, references).await;
        sign_references(self.signer.as_ref(), &mut references, self.presign_expiry_secs);

        Ok(QueryResponse::success(
            query,
            generated.text.clone(),
            references,
            output.session_id.clone(),
        ))
    }

    /// Rerank when configured. A failing rerank keeps the retrieval order.
    async fn rerank(&self, query: &str, references: Vec<Reference>) -> Vec<Reference> {
        let Some(reranker) = &self.reranker else {
            return references;
        };
        if references.len() < 2 {
            return references;
        }

        let documents: Vec<String> = references.iter().map(rerank_document).collect();
        match reranker.rerank(query, &documents).await {
            Ok(ranking) => apply_ranking(references, &ranking),
            Err(e) => {
                tracing::warn!("Rerank failed, keeping retrieval order: {}", e);
                references
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::RetrieveAndGenerateOutput;
    use crate::rerank::RankedDocument;
    use crate::signing::S3Uri;
    use std::sync::Mutex;

    struct FakeKnowledgeBase {
        response: Option<String>,
        calls: Mutex<Vec<(String, Option<String>)>>,
    }

    impl FakeKnowledgeBase {
        fn answering(json: &str) -> Self {
            Self {
                response: Some(json.to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                response: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl KnowledgeBase for FakeKnowledgeBase {
        async fn retrieve_and_generate(
            &self,
            query: &str,
            session_id: Option<&str>,
        ) -> AppResult<RetrieveAndGenerateOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((query.to_string(), session_id.map(str::to_string)));
            match &self.response {
                Some(json) => Ok(serde_json::from_str(json)?),
                None => Err(AppError::Aws("ThrottlingException: rate exceeded".to_string())),
            }
        }
    }

    struct FakeSigner;

    impl UrlSigner for FakeSigner {
        fn presign_get(&self, location: &S3Uri, expires_in_secs: u64) -> AppResult<String> {
            Ok(format!("https://signed/{}?ttl={}", location.key, expires_in_secs))
        }
    }

    struct ReverseReranker;

    #[async_trait::async_trait]
    impl Reranker for ReverseReranker {
        async fn rerank(&self, _query: &str, documents: &[String]) -> AppResult<Vec<RankedDocument>> {
            Ok((0..documents.len())
                .rev()
                .enumerate()
                .map(|(rank, index)| RankedDocument {
                    index,
                    relevance_score: 1.0 - rank as f64 * 0.1,
                })
                .collect())
        }
    }

    struct BrokenReranker;

    #[async_trait::async_trait]
    impl Reranker for BrokenReranker {
        async fn rerank(&self, _query: &str, _documents: &[String]) -> AppResult<Vec<RankedDocument>> {
            Err(AppError::Aws("rerank unavailable".to_string()))
        }
    }

    const TWO_DOCS: &str = r#"{
        "output": {"text": "Use the portal."},
        "sessionId": "sess-42",
        "citations": [
            {"retrievedReferences": [
                {"content": {"text": "Portal guide"}, "location": {"s3Location": {"uri": "s3://kb/portal.pdf"}}, "score": 0.8},
                {"content": {"text": "FAQ"}, "location": {"s3Location": {"uri": "s3://kb/faq.pdf"}}, "score": 0.3}
            ]},
            {"retrievedReferences": [
                {"content": {"text": "Portal guide again"}, "location": {"s3Location": {"uri": "s3://kb/portal.pdf"}}, "score": 0.8}
            ]}
        ]
    }"#;

    fn handler(kb: FakeKnowledgeBase) -> (QueryHandler, Arc<FakeKnowledgeBase>) {
        let kb = Arc::new(kb);
        (QueryHandler::new(kb.clone(), Arc::new(FakeSigner), 3600), kb)
    }

    #[tokio::test]
    async fn test_successful_query() {
        let (handler, kb) = handler(FakeKnowledgeBase::answering(TWO_DOCS));

        let response = handler
            .handle(QueryRequest::new("  How do I log in?  ").with_session(Some("sess-41".to_string())))
            .await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.query, "  How do I log in?  ");
        assert_eq!(response.generated_response, "Use the portal.");
        assert_eq!(response.session_id.as_deref(), Some("sess-42"));
        assert_eq!(response.s3_location, "s3://kb/portal.pdf,s3://kb/faq.pdf");
        assert_eq!(response.detailed_references.len(), 2);
        assert_eq!(
            response.detailed_references[0].presigned_url.as_deref(),
            Some("https://signed/portal.pdf?ttl=3600")
        );

        let calls = kb.calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            &[("How do I log in?".to_string(), Some("sess-41".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected_without_calling_service() {
        let (handler, kb) = handler(FakeKnowledgeBase::answering(TWO_DOCS));

        let response = handler.handle(QueryRequest::new("   ")).await;

        assert_eq!(response.status_code, 400);
        assert_eq!(response.s3_location, "N/A");
        assert_eq!(response.query, "   ");
        assert!(kb.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_is_echoed_verbatim() {
        let (failing, _kb) = handler(FakeKnowledgeBase::failing());
        let response = failing.handle(QueryRequest::new("\tWhere is  the VPN guide?\n")).await;
        assert_eq!(response.query, "\tWhere is  the VPN guide?\n");

        let (answering, kb) = handler(FakeKnowledgeBase::answering(TWO_DOCS));
        let response = answering.handle(QueryRequest::new(" vpn ")).await;
        assert_eq!(response.query, " vpn ");
        assert_eq!(kb.calls.lock().unwrap()[0].0, "vpn");
    }

    #[tokio::test]
    async fn test_service_failure_maps_to_error_shape() {
        let (handler, _kb) = handler(FakeKnowledgeBase::failing());

        let response = handler.handle(QueryRequest::new("anything")).await;

        assert_eq!(response.status_code, 500);
        assert_eq!(response.query, "anything");
        assert_eq!(
            response.generated_response,
            "An error occurred while processing your request."
        );
        assert!(response.error.unwrap().contains("ThrottlingException"));
        assert!(response.detailed_references.is_empty());
    }

    #[tokio::test]
    async fn test_missing_output_is_an_error() {
        let (handler, _kb) = handler(FakeKnowledgeBase::answering(r#"{"citations": []}"#));
        let response = handler.handle(QueryRequest::new("q")).await;
        assert_eq!(response.status_code, 500);
    }

    #[tokio::test]
    async fn test_reranker_reorders_references() {
        let (handler, _kb) = handler(FakeKnowledgeBase::answering(TWO_DOCS));
        let handler = handler.with_reranker(Arc::new(ReverseReranker));

        let response = handler.handle(QueryRequest::new("q")).await;

        let uris: Vec<_> = response
            .detailed_references
            .iter()
            .map(|r| r.uri.as_str())
            .collect();
        assert_eq!(uris, vec!["s3://kb/faq.pdf", "s3://kb/portal.pdf"]);
        assert_eq!(response.detailed_references[0].score, 1.0);
        assert_eq!(response.s3_location, "s3://kb/faq.pdf,s3://kb/portal.pdf");
    }

    #[tokio::test]
    async fn test_rerank_failure_keeps_retrieval_order() {
        let (handler, _kb) = handler(FakeKnowledgeBase::answering(TWO_DOCS));
        let handler = handler.with_reranker(Arc::new(BrokenReranker));

        let response = handler.handle(QueryRequest::new("q")).await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.detailed_references[0].uri, "s3://kb/portal.pdf");
    }
}
