//! Retrieve-and-generate backend.

use kbchat_aws::AwsClient;
use kbchat_core::AppResult;
use serde_json::json;

use crate::citations::RetrieveAndGenerateOutput;

/// A hosted knowledge base that retrieves passages and generates an answer.
#[async_trait::async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Answer `query`, continuing `session_id` when given.
    async fn retrieve_and_generate(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> AppResult<RetrieveAndGenerateOutput>;
}

/// Bedrock knowledge base over the agent runtime REST API.
pub struct BedrockKnowledgeBase {
    client: AwsClient,
    knowledge_base_id: String,
    model_arn: String,
    number_of_results: u32,
}

impl BedrockKnowledgeBase {
    /// Signing name of the agent runtime.
    pub const SERVICE: &'static str = "bedrock";

    /// Host prefix of the agent runtime endpoint.
    pub const HOST_PREFIX: &'static str = "bedrock-agent-runtime";

    pub fn new(
        client: AwsClient,
        knowledge_base_id: impl Into<String>,
        model_arn: impl Into<String>,
        number_of_results: u32,
    ) -> Self {
        Self {
            client,
            knowledge_base_id: knowledge_base_id.into(),
            model_arn: model_arn.into(),
            number_of_results,
        }
    }

    fn request_body(&self, query: &str, session_id: Option<&str>) -> serde_json::Value {
        let mut body = json!({
            "input": { "text": query },
            "retrieveAndGenerateConfiguration": {
                "type": "KNOWLEDGE_BASE",
                "knowledgeBaseConfiguration": {
                    "knowledgeBaseId": self.knowledge_base_id,
                    "modelArn": self.model_arn,
                    "retrievalConfiguration": {
                        "vectorSearchConfiguration": {
                            "numberOfResults": self.number_of_results
                        }
                    }
                }
            }
        });

        if let Some(session_id) = session_id.filter(|s| !s.is_empty()) {
            body["sessionId"] = json!(session_id);
        }

        body
    }
}

#[async_trait::async_trait]
impl KnowledgeBase for BedrockKnowledgeBase {
    async fn retrieve_and_generate(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> AppResult<RetrieveAndGenerateOutput> {
        tracing::info!(
            "Calling retrieve-and-generate on knowledge base {} ({} results)",
            self.knowledge_base_id,
            self.number_of_results
        );

        let body = self.request_body(query, session_id);
        let output: RetrieveAndGenerateOutput = self
            .client
            .post_json("/retrieveAndGenerate", "application/json", None, &body)
            .await?;

        tracing::debug!(
            "Knowledge base returned {} citations (session: {:?})",
            output.citations.len(),
            output.session_id
        );

        Ok(output)
    }
}
