//! 历史索引：把一轮问答按段落切块后写入 HistoryIndex
//!
//! 尽力而为、后台执行，失败只记日志，不影响调用结果。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::memory::{Chunker, HistoryIndex};

/// 单条历史索引记录：分块作为 key，完整回复作为 value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub turn: u64,
    pub key: String,
    pub value: String,
    /// 毫秒时间戳
    pub timestamp: i64,
}

/// 生成本轮的索引记录（每块一条，id 各不相同）
pub fn build_index_records(
    chunker: &Chunker,
    user_id: &str,
    session_id: &str,
    turn: u64,
    query: &str,
    response: &str,
) -> Vec<IndexRecord> {
    let timestamp = chrono::Utc::now().timestamp_millis();
    chunker
        .chunk(query)
        .into_iter()
        .map(|chunk| IndexRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            turn,
            key: chunk,
            value: response.to_string(),
            timestamp,
        })
        .collect()
}

/// 后台写入历史索引（fire-and-forget）
pub fn spawn_history_indexing(
    index: Arc<dyn HistoryIndex>,
    records: Vec<IndexRecord>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if records.is_empty() {
            return;
        }
        let n = records.len();
        match index.index(records).await {
            Ok(()) => tracing::debug!(records = n, "history indexed"),
            Err(e) => tracing::warn!(error = %e, records = n, "history indexing failed"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::memory::InMemoryVectorStore;

    struct BrokenIndex;

    #[async_trait]
    impl HistoryIndex for BrokenIndex {
        async fn index(&self, _records: Vec<IndexRecord>) -> Result<(), String> {
            Err("index offline".to_string())
        }
    }

    #[test]
    fn test_one_record_per_chunk() {
        let records = build_index_records(
            &Chunker::default(),
            "u1",
            "s1",
            3,
            "para one\n\npara two",
            "full answer",
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "para one");
        assert_eq!(records[1].key, "para two");
        assert!(records.iter().all(|r| r.value == "full answer" && r.turn == 3));
        assert_ne!(records[0].id, records[1].id);
    }

    #[tokio::test]
    async fn test_spawn_indexing_writes_records() {
        let store = Arc::new(InMemoryVectorStore::default());
        let records = build_index_records(&Chunker::default(), "u", "s", 1, "hello", "world");
        spawn_history_indexing(store.clone(), records).await.unwrap();
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_indexing_failure_is_swallowed() {
        let records = build_index_records(&Chunker::default(), "u", "s", 1, "hello", "world");
        let handle = spawn_history_indexing(Arc::new(BrokenIndex), records);
        assert!(handle.await.is_ok());
    }
}
