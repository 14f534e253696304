//! Response Buffer
//!
//! Ordered, append-only store of captured records for one scrape pass.
//! Clones share the same underlying storage.

use crate::record::CapturedRecord;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ResponseBuffer {
    records: Arc<RwLock<Vec<CapturedRecord>>>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with an empty sequence.
    pub async fn reset(&self) {
        let mut records = self.records.write().await;
        debug!("Resetting response buffer ({} records dropped)", records.len());
        records.clear();
    }

    /// Add a record at the end (completion order).
    pub async fn append(&self, record: CapturedRecord) {
        let mut records = self.records.write().await;
        debug!("Captured {} ({} buffered)", record.url, records.len() + 1);
        records.push(record);
    }

    /// Current contents, without mutating them.
    pub async fn snapshot(&self) -> Vec<CapturedRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_reset_empties_snapshot() {
        let buffer = ResponseBuffer::new();
        buffer.append(CapturedRecord::new("https://a/1", json!(1))).await;
        buffer.append(CapturedRecord::new("https://a/2", json!(2))).await;
        assert_eq!(buffer.len().await, 2);

        buffer.reset().await;
        assert!(buffer.snapshot().await.is_empty());
        assert!(buffer.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_is_non_destructive_and_live() {
        let buffer = ResponseBuffer::new();
        let shared = buffer.clone();

        buffer.append(CapturedRecord::new("https://a/1", json!({"n": 1}))).await;
        let first = shared.snapshot().await;
        let again = shared.snapshot().await;
        assert_eq!(first, again);
        assert_eq!(first.len(), 1);

        buffer.append(CapturedRecord::new("https://a/2", json!({"n": 2}))).await;
        let latest = shared.snapshot().await;
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[1].url, "https://a/2");
        // earlier snapshot is unaffected
        assert_eq!(first.len(), 1);
    }
}
