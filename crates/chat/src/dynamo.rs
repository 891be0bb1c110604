//! DynamoDB-backed history and feedback stores.
//!
//! Talks to the DynamoDB JSON protocol directly: items are maps of typed
//! attribute values (`{"S": ..}`, `{"N": ..}`, `{"L": [..]}`).

use kbchat_aws::{endpoint_for, AwsClient, Credentials};
use kbchat_core::{AppError, AppResult};
use kbchat_knowledge::Reference;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::feedback::{FeedbackRecord, FeedbackStore};
use crate::history::{HistoryStore, RowFilter};
use crate::message::{Role, StoredMessage};

const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const SERVICE: &str = "dynamodb";

type Item = Map<String, Value>;

/// Build a client for the regional DynamoDB endpoint.
pub fn dynamodb_client(region: &str, credentials: Credentials) -> AwsClient {
    AwsClient::new(SERVICE, endpoint_for(SERVICE, region), region, credentials)
}

fn target(operation: &str) -> String {
    format!("DynamoDB_20120810.{}", operation)
}

fn s(value: &str) -> Value {
    json!({ "S": value })
}

fn n(value: f64) -> Value {
    json!({ "N": value.to_string() })
}

fn get_s(item: &Item, name: &str) -> Option<String> {
    item.get(name)?.get("S")?.as_str().map(str::to_string)
}

fn get_n(item: &Item, name: &str) -> Option<f64> {
    item.get(name)?.get("N")?.as_str()?.parse().ok()
}

#[derive(Debug, Deserialize)]
struct QueryOutput {
    #[serde(rename = "Items", default)]
    items: Vec<Item>,
    #[serde(rename = "LastEvaluatedKey", default)]
    last_evaluated_key: Option<Item>,
}

/// History rows in a DynamoDB table keyed by `user_id` + `timestamp`.
pub struct DynamoHistoryStore {
    client: AwsClient,
    table: String,
}

impl DynamoHistoryStore {
    pub fn new(client: AwsClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    fn to_item(row: &StoredMessage) -> AppResult<Item> {
        let mut item = Item::new();
        item.insert("user_id".into(), s(&row.user_id));
        item.insert("timestamp".into(), n(row.timestamp));
        item.insert("date".into(), s(&row.date));
        item.insert("role".into(), s(row.role.as_str()));
        item.insert("content".into(), s(&row.content));
        item.insert(
            "session_id".into(),
            match &row.session_id {
                Some(id) => s(id),
                None => json!({ "NULL": true }),
            },
        );
        item.insert("references".into(), s(&serde_json::to_string(&row.references)?));
        item.insert("conversation_id".into(), s(&row.conversation_id));
        Ok(item)
    }

    /// Decode a stored item; rows missing a key attribute are skipped.
    fn from_item(item: &Item) -> Option<StoredMessage> {
        let user_id = get_s(item, "user_id")?;
        let timestamp = get_n(item, "timestamp")?;

        let role = match get_s(item, "role").as_deref().and_then(Role::parse) {
            Some(role) => role,
            None => {
                tracing::warn!("Skipping history row {} with unknown role", timestamp);
                return None;
            }
        };

        let references = match get_s(item, "references") {
            Some(text) => serde_json::from_str::<Vec<Reference>>(&text).unwrap_or_else(|e| {
                tracing::warn!("Unreadable references on row {}: {}", timestamp, e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        Some(StoredMessage {
            date: get_s(item, "date").unwrap_or_else(|| crate::message::date_of(timestamp)),
            conversation_id: get_s(item, "conversation_id")
                .unwrap_or_else(|| (timestamp.trunc() as i64).to_string()),
            content: get_s(item, "content").unwrap_or_default(),
            session_id: get_s(item, "session_id"),
            user_id,
            timestamp,
            role,
            references,
        })
    }

    fn query_body(&self, user_id: &str, filter: &RowFilter, start_key: Option<&Item>) -> Value {
        let mut values = Map::new();
        values.insert(":uid".into(), s(user_id));

        let mut conditions = Vec::new();
        let mut names = Map::new();
        if let Some(since) = &filter.since_date {
            conditions.push("#date >= :cutoff");
            names.insert("#date".into(), json!("date"));
            values.insert(":cutoff".into(), s(since));
        }
        if let Some(conversation_id) = &filter.conversation_id {
            conditions.push("conversation_id = :cid");
            values.insert(":cid".into(), s(conversation_id));
        }

        let mut body = json!({
            "TableName": self.table,
            "KeyConditionExpression": "user_id = :uid",
            "ExpressionAttributeValues": values,
        });
        if !conditions.is_empty() {
            body["FilterExpression"] = json!(conditions.join(" AND "));
        }
        if !names.is_empty() {
            body["ExpressionAttributeNames"] = Value::Object(names);
        }
        if let Some(key) = start_key {
            body["ExclusiveStartKey"] = Value::Object(key.clone());
        }
        body
    }
}

#[async_trait::async_trait]
impl HistoryStore for DynamoHistoryStore {
    async fn put(&self, row: &StoredMessage) -> AppResult<()> {
        let body = json!({ "TableName": self.table, "Item": Self::to_item(row)? });
        let _: Value = self
            .client
            .post_json("/", CONTENT_TYPE, Some(&target("PutItem")), &body)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to save message: {}", e)))?;
        Ok(())
    }

    async fn query(&self, user_id: &str, filter: &RowFilter) -> AppResult<Vec<StoredMessage>> {
        let mut rows = Vec::new();
        let mut start_key: Option<Item> = None;
        let mut pages = 0;

        loop {
            let body = self.query_body(user_id, filter, start_key.as_ref());
            let page: QueryOutput = self
                .client
                .post_json("/", CONTENT_TYPE, Some(&target("Query")), &body)
                .await
                .map_err(|e| AppError::Storage(format!("Failed to query history: {}", e)))?;
            pages += 1;

            rows.extend(page.items.iter().filter_map(Self::from_item));

            match page.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        tracing::debug!(
            "Loaded {} history rows for {} in {} pages",
            rows.len(),
            user_id,
            pages
        );
        Ok(rows)
    }

    async fn delete(&self, user_id: &str, timestamp: f64) -> AppResult<()> {
        let body = json!({
            "TableName": self.table,
            "Key": { "user_id": s(user_id), "timestamp": n(timestamp) },
        });
        let _: Value = self
            .client
            .post_json("/", CONTENT_TYPE, Some(&target("DeleteItem")), &body)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to delete message: {}", e)))?;
        Ok(())
    }
}

/// Feedback records in a DynamoDB table keyed by `feedback_id`.
pub struct DynamoFeedbackStore {
    client: AwsClient,
    table: String,
}

impl DynamoFeedbackStore {
    pub fn new(client: AwsClient, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    fn to_item(record: &FeedbackRecord) -> Item {
        let mut item = Item::new();
        item.insert("feedback_id".into(), s(&record.feedback_id));
        item.insert("timestamp".into(), s(&record.timestamp));
        if let Some(session_id) = &record.session_id {
            item.insert("session_id".into(), s(session_id));
        }
        item.insert("message_idx".into(), json!({ "N": record.message_idx.to_string() }));
        item.insert("feedback_type".into(), s(record.feedback_type.as_str()));
        item.insert("message_content".into(), s(&record.message_content));
        item.insert("user_id".into(), s(&record.user_id));
        if !record.categories.is_empty() {
            let list: Vec<Value> = record.categories.iter().map(|c| s(c.label())).collect();
            item.insert("categories".into(), json!({ "L": list }));
        }
        if let Some(correction) = &record.correction {
            item.insert("correction".into(), s(correction));
        }
        item
    }
}

#[async_trait::async_trait]
impl FeedbackStore for DynamoFeedbackStore {
    async fn put(&self, record: &FeedbackRecord) -> AppResult<()> {
        let body = json!({ "TableName": self.table, "Item": Self::to_item(record) });
        let _: Value = self
            .client
            .post_json("/", CONTENT_TYPE, Some(&target("PutItem")), &body)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to store feedback: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::{FeedbackCategory, FeedbackType};
    use crate::message::ChatMessage;
    use kbchat_aws::RetryPolicy;
    use mockito::Matcher;
    use std::time::Duration;

    fn client(endpoint: &str) -> AwsClient {
        AwsClient::new(SERVICE, endpoint, "us-east-1", Credentials::new("AKID", "secret", None))
            .with_retry(RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
            })
    }

    fn row() -> StoredMessage {
        let message = ChatMessage::assistant(
            "Answer",
            vec![Reference::new("s3://docs/a.pdf", "alpha", 0.5)],
        )
        .in_conversation(None, "1700000000");
        let mut row = StoredMessage::new("user_1", 1_700_000_000.25, &message);
        row.date = "2023-11-14".to_string();
        row
    }

    #[test]
    fn test_history_item_encoding() {
        let item = DynamoHistoryStore::to_item(&row()).unwrap();

        assert_eq!(item["user_id"], json!({"S": "user_1"}));
        assert_eq!(item["timestamp"], json!({"N": "1700000000.25"}));
        assert_eq!(item["role"], json!({"S": "assistant"}));
        assert_eq!(item["session_id"], json!({"NULL": true}));
        let refs = item["references"]["S"].as_str().unwrap();
        assert!(refs.starts_with(r#"[{"uri":"s3://docs/a.pdf""#));

        assert_eq!(DynamoHistoryStore::from_item(&item), Some(row()));
    }

    #[test]
    fn test_from_item_tolerates_legacy_rows() {
        let item: Item = serde_json::from_value(json!({
            "user_id": {"S": "user_1"},
            "timestamp": {"N": "1700000000.123456"},
            "date": {"S": "2023-11-14"},
            "role": {"S": "user"},
            "content": {"S": "hello"},
            "references": {"S": "not json"},
            "conversation_id": {"S": "1700000000"}
        }))
        .unwrap();

        let row = DynamoHistoryStore::from_item(&item).unwrap();
        assert_eq!(row.timestamp, 1_700_000_000.123456);
        assert!(row.references.is_empty());
        assert!(row.session_id.is_none());

        let mut bad_role = item.clone();
        bad_role.insert("role".into(), json!({"S": "system"}));
        assert!(DynamoHistoryStore::from_item(&bad_role).is_none());
    }

    #[test]
    fn test_query_body_filters() {
        let store = DynamoHistoryStore::new(client("https://example.com"), "ChatHistory");
        let body = store.query_body(
            "user_1",
            &RowFilter {
                since_date: Some("2024-01-01".to_string()),
                conversation_id: Some("42".to_string()),
            },
            None,
        );

        assert_eq!(body["FilterExpression"], "#date >= :cutoff AND conversation_id = :cid");
        assert_eq!(body["ExpressionAttributeNames"]["#date"], "date");
        assert_eq!(body["ExpressionAttributeValues"][":cid"], json!({"S": "42"}));

        let plain = store.query_body("user_1", &RowFilter::default(), None);
        assert!(plain.get("FilterExpression").is_none());
        assert!(plain.get("ExpressionAttributeNames").is_none());
    }

    #[tokio::test]
    async fn test_query_follows_pagination() {
        let mut server = mockito::Server::new_async().await;
        let item = Value::Object(DynamoHistoryStore::to_item(&row()).unwrap());

        let first = server
            .mock("POST", "/")
            .match_header("x-amz-target", "DynamoDB_20120810.Query")
            .match_body(Matcher::Regex(r#"^\{"ExpressionAttributeValues""#.to_string()))
            .with_status(200)
            .with_body(
                json!({
                    "Items": [item.clone()],
                    "LastEvaluatedKey": {"user_id": {"S": "user_1"}, "timestamp": {"N": "1700000000.25"}}
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/")
            .match_header("x-amz-target", "DynamoDB_20120810.Query")
            .match_body(Matcher::PartialJson(json!({
                "ExclusiveStartKey": {"timestamp": {"N": "1700000000.25"}}
            })))
            .with_status(200)
            .with_body(json!({ "Items": [item] }).to_string())
            .expect(1)
            .create_async()
            .await;

        let store = DynamoHistoryStore::new(client(&server.url()), "ChatHistory");
        let rows = store.query("user_1", &RowFilter::default()).await.unwrap();

        assert_eq!(rows.len(), 2);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_uses_composite_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("x-amz-target", "DynamoDB_20120810.DeleteItem")
            .match_body(Matcher::PartialJson(json!({
                "TableName": "ChatHistory",
                "Key": {"user_id": {"S": "user_1"}, "timestamp": {"N": "1700000000.25"}}
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        DynamoHistoryStore::new(client(&server.url()), "ChatHistory")
            .delete("user_1", 1_700_000_000.25)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_put_failure_is_storage_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(400)
            .with_body(r#"{"__type":"com.amazonaws.dynamodb.v20120810#ResourceNotFoundException","message":"Requested resource not found"}"#)
            .create_async()
            .await;

        let err = DynamoHistoryStore::new(client(&server.url()), "Missing")
            .put(&row())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert!(err.to_string().contains("ResourceNotFoundException"));
    }

    #[test]
    fn test_feedback_item_encoding() {
        let mut session = crate::session::ChatSession::new("user_1");
        session.push(ChatMessage::assistant("a", Vec::new()));
        let mut record = FeedbackRecord::new(&session, 0, FeedbackType::Negative, "a");
        record.categories = vec![FeedbackCategory::NotRelevant];
        record.correction = Some("fix".to_string());

        let item = DynamoFeedbackStore::to_item(&record);

        assert_eq!(item["feedback_type"], json!({"S": "negative"}));
        assert_eq!(item["message_idx"], json!({"N": "0"}));
        assert_eq!(item["categories"], json!({"L": [{"S": "Not Relevant"}]}));
        assert_eq!(item["correction"], json!({"S": "fix"}));
        assert!(item.get("session_id").is_none());
    }
}
