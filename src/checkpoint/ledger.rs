//! 断点账本：按 (mas_name, session_id) 记录已完成的顶层步骤
//!
//! 顶层步骤指根调用的直接子调用（工作流的各步、ReAct 每轮的模型与工具调用、主控的委派）；
//! 嵌套调用包含在步骤自身 ExecResult 的 exec_results 中。
//! 会话内每次外部调用开启一个区段（RunSegment），账本只追加，会话结束时才删除。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{CallInput, ExecResult, OxyError};
use crate::memory::Message;

/// 根调用快照：resume 时据此重放整个调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCall {
    pub callee: String,
    pub query: String,
    pub user_id: String,
    #[serde(default)]
    pub group_data: HashMap<String, Value>,
    #[serde(default)]
    pub attachments: Vec<String>,
    /// 调用开始时的短期历史窗口；回放时按此重建上下文
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub history_turns: u64,
}

impl RootCall {
    pub fn to_input(&self, session_id: &str) -> CallInput {
        CallInput {
            query: self.query.clone(),
            session_id: Some(session_id.to_string()),
            user_id: Some(self.user_id.clone()),
            group_data: self.group_data.clone(),
            attachments: self.attachments.clone(),
            timeout: None,
        }
    }
}

/// 一次外部调用在账本中的区段：根调用快照 + 该调用首条记录的下标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSegment {
    pub root: RootCall,
    pub start: usize,
}

/// 会话账本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub mas_name: String,
    pub session_id: String,
    pub last_node: Option<String>,
    pub exec_results: Vec<ExecResult>,
    #[serde(default)]
    pub runs: Vec<RunSegment>,
    /// 毫秒时间戳
    pub updated_at: i64,
}

impl Ledger {
    pub fn new(mas_name: &str, session_id: &str) -> Self {
        Self {
            mas_name: mas_name.to_string(),
            session_id: session_id.to_string(),
            last_node: None,
            exec_results: Vec::new(),
            runs: Vec::new(),
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 开启新的调用区段，之前的记录保留
    pub fn begin_run(&mut self, root: RootCall) {
        self.runs.push(RunSegment {
            root,
            start: self.exec_results.len(),
        });
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// 最近一次外部调用的区段
    pub fn latest_run(&self) -> Option<&RunSegment> {
        self.runs.last()
    }

    /// 最近区段内的记录
    pub fn latest_entries(&self) -> &[ExecResult] {
        let start = self.latest_run().map(|r| r.start).unwrap_or(0);
        self.exec_results.get(start..).unwrap_or(&[])
    }

    pub fn record(&mut self, result: ExecResult) {
        self.last_node = Some(result.executor.clone());
        self.exec_results.push(result);
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// node 第一次出现的位置
    pub fn position_of(&self, node: &str) -> Option<usize> {
        self.exec_results.iter().position(|r| r.executor == node)
    }

    /// 只保留前 len 条记录，last_node 随之回退；起点越界的区段一并丢弃
    pub fn truncate(&mut self, len: usize) {
        self.exec_results.truncate(len);
        self.runs.retain(|r| r.start <= len);
        self.last_node = self.exec_results.last().map(|r| r.executor.clone());
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// 按顺序的执行者名
    pub fn executors(&self) -> Vec<&str> {
        self.exec_results.iter().map(|r| r.executor.as_str()).collect()
    }
}

/// 账本存储；同一会话的 append 串行化，不丢更新
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// 新的外部调用开始：账本不存在时创建，并以根调用开启新区段
    async fn begin_run(&self, mas_name: &str, session_id: &str, root: RootCall) -> Result<(), OxyError>;

    /// 追加一条已完成记录（账本不存在时创建）
    async fn append(&self, mas_name: &str, session_id: &str, result: ExecResult) -> Result<(), OxyError>;

    async fn load(&self, mas_name: &str, session_id: &str) -> Result<Option<Ledger>, OxyError>;

    /// 整体替换（resume 截断时使用）
    async fn replace(&self, ledger: Ledger) -> Result<(), OxyError>;

    /// 删除会话账本；不存在返回 false
    async fn remove(&self, mas_name: &str, session_id: &str) -> Result<bool, OxyError>;
}

/// 会话粒度的异步锁表
#[derive(Debug, Default)]
pub(crate) struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub(crate) fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    pub(crate) fn forget(&self, key: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(key);
    }
}

pub(crate) fn session_key(mas_name: &str, session_id: &str) -> String {
    format!("{mas_name}/{session_id}")
}
