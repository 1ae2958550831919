//! 长期记忆：结构化知识、历史向量检索、用户画像
//!
//! 检索客户端均由外部注入（KnowledgeSearch / VectorStore / ProfileStore / HistoryIndex），
//! 编排器只持有句柄、不管理其生命周期。内存实现按关键词重叠打分，适合测试与本地运行。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::memory::IndexRecord;

/// 单次调用检索得到的长期记忆
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LongTermMemory {
    pub facts: Vec<String>,
    pub history: Vec<String>,
    pub profile: Option<String>,
}

impl LongTermMemory {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.history.is_empty() && self.profile.is_none()
    }

    /// 不带标签的原始拼接（history + facts + profile），用于 ReAct 循环上下文
    pub fn raw_block(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        parts.extend(self.history.iter().map(String::as_str));
        parts.extend(self.facts.iter().map(String::as_str));
        if let Some(p) = &self.profile {
            parts.push(p);
        }
        parts.join("\n")
    }

    /// 带标签的分段（Facts / History / Profile），用于流水线上下文；空段省略
    pub fn labeled_sections(&self) -> String {
        let mut out = String::new();
        if !self.facts.is_empty() {
            out.push_str("## Facts\n");
            out.push_str(&self.facts.join("\n"));
            out.push('\n');
        }
        if !self.history.is_empty() {
            out.push_str("## History\n");
            out.push_str(&self.history.join("\n"));
            out.push('\n');
        }
        if let Some(p) = &self.profile {
            out.push_str("## Profile\n");
            out.push_str(p);
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

/// 结构化知识检索（无相似度阈值）
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn lookup(&self, query: &str, user_id: &str) -> Result<Vec<String>, String>;
}

/// 向量相似度检索：在固定 namespace 中取 top-k
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn similar(&self, namespace: &str, query: &str, k: usize) -> Result<Vec<String>, String>;
}

/// 用户画像
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn profile(&self, user_id: &str) -> Result<Option<String>, String>;
}

/// 历史索引写入（每个分块一条记录）
#[async_trait]
pub trait HistoryIndex: Send + Sync {
    async fn index(&self, records: Vec<IndexRecord>) -> Result<(), String>;
}

/// 注入的共享检索客户端；未配置的来源检索结果为空
#[derive(Clone, Default)]
pub struct MemoryClients {
    pub knowledge: Option<Arc<dyn KnowledgeSearch>>,
    pub vectors: Option<Arc<dyn VectorStore>>,
    pub profiles: Option<Arc<dyn ProfileStore>>,
    pub history_index: Option<Arc<dyn HistoryIndex>>,
}

impl MemoryClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_knowledge(mut self, k: Arc<dyn KnowledgeSearch>) -> Self {
        self.knowledge = Some(k);
        self
    }

    pub fn with_vectors(mut self, v: Arc<dyn VectorStore>) -> Self {
        self.vectors = Some(v);
        self
    }

    pub fn with_profiles(mut self, p: Arc<dyn ProfileStore>) -> Self {
        self.profiles = Some(p);
        self
    }

    pub fn with_history_index(mut self, h: Arc<dyn HistoryIndex>) -> Self {
        self.history_index = Some(h);
        self
    }
}

/// 将文本切分为小写词集合，用于简单相似度（词重叠数）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1)
        .collect()
}

/// 按查询词重叠数排序，取前 k 条（k 为 None 时不限）
fn rank(entries: &[(String, HashSet<String>)], query: &str, k: Option<usize>) -> Vec<String> {
    let query_tokens = tokenize_lower(query);
    if query_tokens.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<(usize, &String)> = entries
        .iter()
        .map(|(text, doc)| (query_tokens.intersection(doc).count(), text))
        .filter(|(s, _)| *s > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored
        .into_iter()
        .take(k.unwrap_or(usize::MAX))
        .map(|(_, t)| t.clone())
        .collect()
}

/// 内存知识库：关键词重叠检索，返回所有命中（无阈值）
#[derive(Clone, Default)]
pub struct InMemoryKnowledge {
    store: Arc<RwLock<Vec<(String, HashSet<String>)>>>,
}

impl InMemoryKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        store.push((text.to_string(), tokenize_lower(text)));
    }
}

#[async_trait]
impl KnowledgeSearch for InMemoryKnowledge {
    async fn lookup(&self, query: &str, _user_id: &str) -> Result<Vec<String>, String> {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        Ok(rank(&store, query, None))
    }
}

/// 内存向量库：按 namespace 分区；同时实现 HistoryIndex，写入的记录进入 index_namespace
#[derive(Clone)]
pub struct InMemoryVectorStore {
    spaces: Arc<RwLock<HashMap<String, Vec<(String, HashSet<String>)>>>>,
    records: Arc<RwLock<Vec<IndexRecord>>>,
    index_namespace: String,
}

impl InMemoryVectorStore {
    pub fn new(index_namespace: impl Into<String>) -> Self {
        Self {
            spaces: Arc::new(RwLock::new(HashMap::new())),
            records: Arc::new(RwLock::new(Vec::new())),
            index_namespace: index_namespace.into(),
        }
    }

    pub fn add(&self, namespace: &str, text: &str) {
        let mut spaces = self.spaces.write().unwrap_or_else(|e| e.into_inner());
        spaces
            .entry(namespace.to_string())
            .or_default()
            .push((text.to_string(), tokenize_lower(text)));
    }

    /// 已写入的历史索引记录（按写入顺序）
    pub fn records(&self) -> Vec<IndexRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new("history")
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn similar(&self, namespace: &str, query: &str, k: usize) -> Result<Vec<String>, String> {
        let spaces = self.spaces.read().unwrap_or_else(|e| e.into_inner());
        Ok(spaces
            .get(namespace)
            .map(|entries| rank(entries, query, Some(k)))
            .unwrap_or_default())
    }
}

#[async_trait]
impl HistoryIndex for InMemoryVectorStore {
    async fn index(&self, records: Vec<IndexRecord>) -> Result<(), String> {
        for r in &records {
            self.add(&self.index_namespace, &format!("{}\n{}", r.key, r.value));
        }
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .extend(records);
        Ok(())
    }
}

/// 内存用户画像
#[derive(Clone, Default)]
pub struct InMemoryProfileStore {
    profiles: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user_id: &str, profile: impl Into<String>) {
        self.profiles
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.to_string(), profile.into());
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn profile(&self, user_id: &str) -> Result<Option<String>, String> {
        Ok(self
            .profiles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned())
    }
}
