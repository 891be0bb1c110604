//! JSONL file stores for local development.
//!
//! One JSON object per line. Writes append; deletes rewrite the file under
//! a lock. Good for a single UI process, nothing more.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use kbchat_core::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::feedback::{FeedbackRecord, FeedbackStore};
use crate::history::{HistoryStore, RowFilter};
use crate::message::StoredMessage;

/// History rows in a JSONL file.
pub struct LocalHistoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LocalHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl HistoryStore for LocalHistoryStore {
    async fn put(&self, row: &StoredMessage) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        append_line(&self.path, row).await
    }

    async fn query(&self, user_id: &str, filter: &RowFilter) -> AppResult<Vec<StoredMessage>> {
        let _guard = self.lock.lock().await;
        let rows: Vec<StoredMessage> = read_lines(&self.path).await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.user_id == user_id && filter.matches(row))
            .collect())
    }

    async fn delete(&self, user_id: &str, timestamp: f64) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let rows: Vec<StoredMessage> = read_lines(&self.path).await?;
        let kept: Vec<&StoredMessage> = rows
            .iter()
            .filter(|row| !(row.user_id == user_id && row.timestamp == timestamp))
            .collect();

        if kept.len() != rows.len() {
            write_lines(&self.path, &kept).await?;
        }
        Ok(())
    }
}

/// Feedback records in a JSONL file.
pub struct LocalFeedbackStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LocalFeedbackStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Every stored record, oldest first.
    pub async fn all(&self) -> AppResult<Vec<FeedbackRecord>> {
        let _guard = self.lock.lock().await;
        read_lines(&self.path).await
    }
}

#[async_trait::async_trait]
impl FeedbackStore for LocalFeedbackStore {
    async fn put(&self, record: &FeedbackRecord) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        append_line(&self.path, record).await
    }
}

async fn append_line<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> AppResult<Vec<T>> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut values = Vec::new();
    for (number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(line).map_err(|e| {
            AppError::Storage(format!(
                "{}:{}: invalid record: {}",
                path.display(),
                number + 1,
                e
            ))
        })?;
        values.push(value);
    }
    Ok(values)
}

async fn write_lines<T: Serialize>(path: &Path, values: &[T]) -> AppResult<()> {
    let mut buf = String::new();
    for value in values {
        buf.push_str(&serde_json::to_string(value)?);
        buf.push('\n');
    }

    let tmp = path.with_extension("jsonl.tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(buf.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
}
