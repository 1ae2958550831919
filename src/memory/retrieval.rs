//! 长期记忆检索：知识、历史相似度、画像三路并发，受请求超时与取消约束
//!
//! 任一来源失败只记 warn 并视为空段；整体超时或取消时返回空记忆，不让调用失败。

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::memory::{LongTermMemory, MemoryClients};

/// 检索参数（来自配置 [memory]）
#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub namespace: String,
    pub timeout: Duration,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            namespace: "history".to_string(),
            timeout: Duration::from_millis(3000),
        }
    }
}

/// 并发检索三类长期记忆并组装为 LongTermMemory
pub async fn retrieve_long_term(
    clients: &MemoryClients,
    settings: &RetrievalSettings,
    query: &str,
    user_id: &str,
    cancel: &CancellationToken,
) -> LongTermMemory {
    let facts = async {
        match &clients.knowledge {
            Some(k) => k.lookup(query, user_id).await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "knowledge lookup failed, continuing without facts");
                Vec::new()
            }),
            None => Vec::new(),
        }
    };
    let history = async {
        match &clients.vectors {
            Some(v) => v
                .similar(&settings.namespace, query, settings.top_k)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "vector search failed, continuing without history");
                    Vec::new()
                }),
            None => Vec::new(),
        }
    };
    let profile = async {
        match &clients.profiles {
            Some(p) => p.profile(user_id).await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "profile lookup failed, continuing without profile");
                None
            }),
            None => None,
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!("long-term retrieval cancelled");
            LongTermMemory::default()
        }
        joined = tokio::time::timeout(settings.timeout, async { tokio::join!(facts, history, profile) }) => {
            match joined {
                Ok((facts, history, profile)) => LongTermMemory { facts, history, profile },
                Err(_) => {
                    tracing::warn!(timeout_ms = settings.timeout.as_millis() as u64, "long-term retrieval timed out");
                    LongTermMemory::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::memory::{InMemoryKnowledge, InMemoryProfileStore, InMemoryVectorStore, VectorStore};

    struct FailingVectors;

    #[async_trait]
    impl VectorStore for FailingVectors {
        async fn similar(&self, _ns: &str, _q: &str, _k: usize) -> Result<Vec<String>, String> {
            Err("connection refused".to_string())
        }
    }

    struct SlowVectors;

    #[async_trait]
    impl VectorStore for SlowVectors {
        async fn similar(&self, _ns: &str, _q: &str, _k: usize) -> Result<Vec<String>, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec!["late".to_string()])
        }
    }

    #[tokio::test]
    async fn test_retrieve_assembles_all_sources() {
        let kb = InMemoryKnowledge::new();
        kb.add("tokyo is the capital of japan");
        let vectors = InMemoryVectorStore::new("history");
        vectors.add("history", "user asked about tokyo weather");
        let profiles = InMemoryProfileStore::new();
        profiles.set("u1", "prefers metric units");

        let clients = MemoryClients::new()
            .with_knowledge(Arc::new(kb))
            .with_vectors(Arc::new(vectors))
            .with_profiles(Arc::new(profiles));
        let ltm = retrieve_long_term(
            &clients,
            &RetrievalSettings::default(),
            "tokyo",
            "u1",
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(ltm.facts.len(), 1);
        assert_eq!(ltm.history.len(), 1);
        assert_eq!(ltm.profile.as_deref(), Some("prefers metric units"));
    }

    #[tokio::test]
    async fn test_failing_source_recovered() {
        let kb = InMemoryKnowledge::new();
        kb.add("tokyo is big");
        let clients = MemoryClients::new()
            .with_knowledge(Arc::new(kb))
            .with_vectors(Arc::new(FailingVectors));
        let ltm = retrieve_long_term(
            &clients,
            &RetrievalSettings::default(),
            "tokyo",
            "u1",
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(ltm.facts, vec!["tokyo is big".to_string()]);
        assert!(ltm.history.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_yields_empty() {
        let clients = MemoryClients::new().with_vectors(Arc::new(SlowVectors));
        let settings = RetrievalSettings {
            timeout: Duration::from_millis(50),
            ..RetrievalSettings::default()
        };
        let ltm = retrieve_long_term(&clients, &settings, "q", "u", &CancellationToken::new()).await;
        assert!(ltm.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_yields_empty() {
        let clients = MemoryClients::new().with_vectors(Arc::new(SlowVectors));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ltm = retrieve_long_term(&clients, &RetrievalSettings::default(), "q", "u", &cancel).await;
        assert!(ltm.is_empty());
    }
}
