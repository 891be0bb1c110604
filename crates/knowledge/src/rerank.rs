//! Reranking of extracted references by a hosted rerank model.

use kbchat_aws::AwsClient;
use kbchat_core::AppResult;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;

use crate::citations::sort_by_score;
use crate::types::Reference;

/// One entry of a rerank result: position in the submitted list plus score.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedDocument {
    pub index: usize,
    pub relevance_score: f64,
}

/// A model that orders documents by relevance to a query.
#[async_trait::async_trait]
pub trait Reranker: Send + Sync {
    /// Rank `documents` for `query`, most relevant first.
    async fn rerank(&self, query: &str, documents: &[String]) -> AppResult<Vec<RankedDocument>>;
}

/// Bedrock rerank endpoint of the agent runtime.
pub struct BedrockReranker {
    client: AwsClient,
    model_arn: String,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    #[serde(default)]
    results: Vec<RankedDocument>,
}

impl BedrockReranker {
    pub fn new(client: AwsClient, model_arn: impl Into<String>) -> Self {
        Self {
            client,
            model_arn: model_arn.into(),
        }
    }

    fn request_body(&self, query: &str, documents: &[String]) -> serde_json::Value {
        let sources: Vec<serde_json::Value> = documents
            .iter()
            .map(|text| {
                json!({
                    "type": "INLINE",
                    "inlineDocumentSource": {
                        "type": "TEXT",
                        "textDocument": { "text": text }
                    }
                })
            })
            .collect();

        json!({
            "queries": [{ "type": "TEXT", "textQuery": { "text": query } }],
            "sources": sources,
            "rerankingConfiguration": {
                "type": "BEDROCK_RERANKING_MODEL",
                "bedrockRerankingConfiguration": {
                    "modelConfiguration": { "modelArn": self.model_arn },
                    "numberOfResults": documents.len()
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl Reranker for BedrockReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> AppResult<Vec<RankedDocument>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!("Reranking {} documents with {}", documents.len(), self.model_arn);

        let body = self.request_body(query, documents);
        let response: RerankResponse = self
            .client
            .post_json("/rerank", "application/json", None, &body)
            .await?;

        Ok(response.results)
    }
}

/// Text submitted for a reference: its snippet, or the URI when the
/// service returned no passage text.
pub fn rerank_document(reference: &Reference) -> String {
    if reference.snippet.is_empty() {
        reference.uri.clone()
    } else {
        reference.snippet.clone()
    }
}

/// Reorder `references` according to `ranking`.
///
/// Ranked references take the relevance score and come first, highest
/// score first. Indices out of range or repeated are ignored. References
/// the ranking does not mention follow in their previous order.
pub fn apply_ranking(references: Vec<Reference>, ranking: &[RankedDocument]) -> Vec<Reference> {
    let mut used = HashSet::new();
    let mut slots: Vec<Option<Reference>> = references.into_iter().map(Some).collect();
    let mut ranked = Vec::with_capacity(slots.len());

    for entry in ranking {
        if !used.insert(entry.index) {
            continue;
        }
        if let Some(mut reference) = slots.get_mut(entry.index).and_then(Option::take) {
            reference.score = entry.relevance_score;
            ranked.push(reference);
        }
    }

    sort_by_score(&mut ranked);
    ranked.extend(slots.into_iter().flatten());
    ranked
}
