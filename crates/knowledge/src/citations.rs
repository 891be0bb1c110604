//! Citation post-processing.
//!
//! The retrieve-and-generate service returns one citation per generated
//! span, each carrying the passages it was grounded on. The same document
//! usually backs several spans, so references are flattened, deduplicated
//! by URI and ordered by score.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::types::Reference;

/// Vendor response of `RetrieveAndGenerate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveAndGenerateOutput {
    #[serde(default)]
    pub output: Option<GeneratedOutput>,

    #[serde(default)]
    pub citations: Vec<Citation>,

    #[serde(default)]
    pub session_id: Option<String>,
}

impl RetrieveAndGenerateOutput {
    /// Generated answer text (empty when the service returned none).
    pub fn text(&self) -> &str {
        self.output.as_ref().map(|o| o.text.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratedOutput {
    #[serde(default)]
    pub text: String,
}

/// One grounded span of the answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    #[serde(default)]
    pub generated_response_part: Option<serde_json::Value>,

    #[serde(default)]
    pub retrieved_references: Vec<RetrievedReference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedReference {
    #[serde(default)]
    pub content: Option<ReferenceContent>,

    #[serde(default)]
    pub location: Option<ReferenceLocation>,

    #[serde(default)]
    pub score: Option<f64>,

    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceContent {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceLocation {
    #[serde(rename = "type", default)]
    pub location_type: Option<String>,

    #[serde(default)]
    pub s3_location: Option<S3LocationRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3LocationRef {
    #[serde(default)]
    pub uri: Option<String>,
}

impl RetrievedReference {
    fn s3_uri(&self) -> Option<&str> {
        self.location
            .as_ref()?
            .s3_location
            .as_ref()?
            .uri
            .as_deref()
            .filter(|uri| !uri.is_empty())
    }
}

/// Flatten citations into unique references ordered by descending score.
///
/// - only references with an object-store location are kept
/// - the first occurrence of a URI wins
/// - snippets are trimmed; missing text becomes an empty snippet
/// - missing scores count as 0; ties keep retrieval order
pub fn extract_references(citations: &[Citation]) -> Vec<Reference> {
    let mut seen_uris = HashSet::new();
    let mut references = Vec::new();

    for citation in citations {
        for retrieved in &citation.retrieved_references {
            let Some(uri) = retrieved.s3_uri() else {
                continue;
            };

            if !seen_uris.insert(uri.to_string()) {
                continue;
            }

            let snippet = retrieved
                .content
                .as_ref()
                .and_then(|c| c.text.as_deref())
                .unwrap_or("")
                .trim();

            references.push(Reference::new(uri, snippet, retrieved.score.unwrap_or(0.0)));
        }
    }

    sort_by_score(&mut references);

    tracing::debug!(
        "Extracted {} unique references from {} citations",
        references.len(),
        citations.len()
    );

    references
}

/// Stable sort, highest score first.
pub fn sort_by_score(references: &mut [Reference]) {
    references.sort_by(|a, b| b.score.total_cmp(&a.score));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> RetrieveAndGenerateOutput {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parses_vendor_response() {
        let output = parse(
            r#"{
                "output": {"text": "Employees get 25 days."},
                "sessionId": "sess-1",
                "citations": [{
                    "generatedResponsePart": {"textResponsePart": {"text": "25 days", "span": {"start": 0, "end": 7}}},
                    "retrievedReferences": [{
                        "content": {"text": "  Annual leave is 25 days.  "},
                        "location": {"type": "S3", "s3Location": {"uri": "s3://hr-docs/leave.pdf"}},
                        "metadata": {"x-amz-bedrock-kb-source-uri": "s3://hr-docs/leave.pdf"}
                    }]
                }]
            }"#,
        );

        assert_eq!(output.text(), "Employees get 25 days.");
        assert_eq!(output.session_id.as_deref(), Some("sess-1"));

        let refs = extract_references(&output.citations);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uri, "s3://hr-docs/leave.pdf");
        assert_eq!(refs[0].snippet, "Annual leave is 25 days.");
        assert_eq!(refs[0].score, 0.0);
    }

    #[test]
    fn test_deduplicates_by_uri_keeping_first() {
        let output = parse(
            r#"{"citations": [
                {"retrievedReferences": [
                    {"content": {"text": "first"}, "location": {"s3Location": {"uri": "s3://b/a"}}, "score": 0.4},
                    {"content": {"text": "other"}, "location": {"s3Location": {"uri": "s3://b/c"}}, "score": 0.2}
                ]},
                {"retrievedReferences": [
                    {"content": {"text": "second"}, "location": {"s3Location": {"uri": "s3://b/a"}}, "score": 0.9}
                ]}
            ]}"#,
        );

        let refs = extract_references(&output.citations);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].uri, "s3://b/a");
        assert_eq!(refs[0].snippet, "first");
        assert_eq!(refs[0].score, 0.4);
        assert_eq!(refs[1].uri, "s3://b/c");
    }

    #[test]
    fn test_skips_references_without_s3_location() {
        let output = parse(
            r#"{"citations": [{"retrievedReferences": [
                {"content": {"text": "web"}, "location": {"type": "WEB", "webLocation": {"url": "https://example.com"}}},
                {"content": {"text": "no location"}},
                {"content": {"text": "empty"}, "location": {"s3Location": {"uri": ""}}},
                {"location": {"s3Location": {"uri": "s3://b/kept"}}}
            ]}]}"#,
        );

        let refs = extract_references(&output.citations);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uri, "s3://b/kept");
        assert_eq!(refs[0].snippet, "");
    }

    #[test]
    fn test_sorted_by_score_with_stable_ties() {
        let output = parse(
            r#"{"citations": [{"retrievedReferences": [
                {"location": {"s3Location": {"uri": "s3://b/low"}}, "score": 0.1},
                {"location": {"s3Location": {"uri": "s3://b/tie-1"}}, "score": 0.5},
                {"location": {"s3Location": {"uri": "s3://b/high"}}, "score": 0.8},
                {"location": {"s3Location": {"uri": "s3://b/tie-2"}}, "score": 0.5}
            ]}]}"#,
        );

        let uris: Vec<_> = extract_references(&output.citations)
            .into_iter()
            .map(|r| r.uri)
            .collect();
        assert_eq!(
            uris,
            vec!["s3://b/high", "s3://b/tie-1", "s3://b/tie-2", "s3://b/low"]
        );
    }

    #[test]
    fn test_empty_response() {
        let output = parse("{}");
        assert_eq!(output.text(), "");
        assert!(extract_references(&output.citations).is_empty());
    }
}
