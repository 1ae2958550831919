//! 执行引擎错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 OxyError 决定 RetryWithPrompt / Observe / Abort。
//! ErrorKind 为可序列化的判别值，写入失败的 OxyResponse 与跨进程响应信封。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 错误种类（失败响应中对外暴露的判别值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NodeNotFound,
    DuplicateName,
    LoopBoundExceeded,
    ToolExecutionFailure,
    InvalidArguments,
    ModelTimeout,
    ModelFailure,
    MalformedOutput,
    DelegationCycle,
    Saturated,
    CheckpointGap,
    CheckpointNotFound,
    RemoteUnavailable,
    Timeout,
    Cancelled,
    MasNotFound,
    Config,
    Ledger,
}

/// 节点解析、策略执行、并发闸门、断点与远程分发过程中可能出现的错误
#[derive(Error, Debug, Clone)]
pub enum OxyError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Duplicate node name: {0}")]
    DuplicateName(String),

    #[error("Loop bound exceeded: {agent} did not finish within {max_iterations} iterations")]
    LoopBoundExceeded { agent: String, max_iterations: usize },

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecutionFailure { tool: String, message: String },

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Model timeout: {0}")]
    ModelTimeout(String),

    #[error("Model call failed: {model}: {message}")]
    ModelFailure { model: String, message: String },

    #[error("Malformed model output from {model}: {raw}")]
    MalformedOutput { model: String, raw: String },

    #[error("Delegation cycle: {target} already on ancestor chain [{chain}]")]
    DelegationCycle { target: String, chain: String },

    #[error("Concurrency gate saturated after waiting {waited_ms}ms")]
    Saturated { waited_ms: u64 },

    #[error("Checkpoint gap: session {session_id} has not reached {target}")]
    CheckpointGap { session_id: String, target: String },

    #[error("Checkpoint not found for session {0}")]
    CheckpointNotFound(String),

    #[error("Remote node unavailable: {node}: {message}")]
    RemoteUnavailable { node: String, message: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Mas not found: {0}")]
    MasNotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Ledger error: {0}")]
    Ledger(String),
}

impl OxyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OxyError::NodeNotFound(_) => ErrorKind::NodeNotFound,
            OxyError::DuplicateName(_) => ErrorKind::DuplicateName,
            OxyError::LoopBoundExceeded { .. } => ErrorKind::LoopBoundExceeded,
            OxyError::ToolExecutionFailure { .. } => ErrorKind::ToolExecutionFailure,
            OxyError::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            OxyError::ModelTimeout(_) => ErrorKind::ModelTimeout,
            OxyError::ModelFailure { .. } => ErrorKind::ModelFailure,
            OxyError::MalformedOutput { .. } => ErrorKind::MalformedOutput,
            OxyError::DelegationCycle { .. } => ErrorKind::DelegationCycle,
            OxyError::Saturated { .. } => ErrorKind::Saturated,
            OxyError::CheckpointGap { .. } => ErrorKind::CheckpointGap,
            OxyError::CheckpointNotFound(_) => ErrorKind::CheckpointNotFound,
            OxyError::RemoteUnavailable { .. } => ErrorKind::RemoteUnavailable,
            OxyError::Timeout(_) => ErrorKind::Timeout,
            OxyError::Cancelled => ErrorKind::Cancelled,
            OxyError::MasNotFound(_) => ErrorKind::MasNotFound,
            OxyError::Config(_) => ErrorKind::Config,
            OxyError::Ledger(_) => ErrorKind::Ledger,
        }
    }

    /// 出错的执行者名（工具 / 模型 / 远程节点 / 智能体），用于失败响应中的 executor 字段
    pub fn executor(&self) -> Option<&str> {
        match self {
            OxyError::NodeNotFound(name)
            | OxyError::ModelTimeout(name)
            | OxyError::Timeout(name) => Some(name),
            OxyError::LoopBoundExceeded { agent, .. } => Some(agent),
            OxyError::ToolExecutionFailure { tool, .. } | OxyError::InvalidArguments { tool, .. } => {
                Some(tool)
            }
            OxyError::ModelFailure { model, .. } | OxyError::MalformedOutput { model, .. } => {
                Some(model)
            }
            OxyError::DelegationCycle { target, .. } => Some(target),
            OxyError::RemoteUnavailable { node, .. } => Some(node),
            _ => None,
        }
    }

    /// 致命错误：无论策略如何配置都终止整个调用（不可被当作 Observation 继续）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OxyError::LoopBoundExceeded { .. }
                | OxyError::DelegationCycle { .. }
                | OxyError::Cancelled
                | OxyError::CheckpointGap { .. }
        )
    }

    /// 由跨进程响应信封中的 (kind, message, executor) 还原错误，保持错误种类不变
    pub fn from_parts(kind: ErrorKind, message: &str, executor: &str) -> Self {
        let executor = executor.to_string();
        let message = message.to_string();
        match kind {
            ErrorKind::NodeNotFound => OxyError::NodeNotFound(executor),
            ErrorKind::DuplicateName => OxyError::DuplicateName(executor),
            ErrorKind::LoopBoundExceeded => OxyError::LoopBoundExceeded {
                agent: executor,
                max_iterations: 0,
            },
            ErrorKind::ToolExecutionFailure => OxyError::ToolExecutionFailure {
                tool: executor,
                message,
            },
            ErrorKind::InvalidArguments => OxyError::InvalidArguments {
                tool: executor,
                message,
            },
            ErrorKind::ModelTimeout => OxyError::ModelTimeout(executor),
            ErrorKind::ModelFailure => OxyError::ModelFailure {
                model: executor,
                message,
            },
            ErrorKind::MalformedOutput => OxyError::MalformedOutput {
                model: executor,
                raw: message,
            },
            ErrorKind::DelegationCycle => OxyError::DelegationCycle {
                target: executor,
                chain: message,
            },
            ErrorKind::Saturated => OxyError::Saturated { waited_ms: 0 },
            ErrorKind::CheckpointGap => OxyError::CheckpointGap {
                session_id: message,
                target: executor,
            },
            ErrorKind::CheckpointNotFound => OxyError::CheckpointNotFound(message),
            ErrorKind::RemoteUnavailable => OxyError::RemoteUnavailable {
                node: executor,
                message,
            },
            ErrorKind::Timeout => OxyError::Timeout(executor),
            ErrorKind::Cancelled => OxyError::Cancelled,
            ErrorKind::MasNotFound => OxyError::MasNotFound(executor),
            ErrorKind::Config => OxyError::Config(message),
            ErrorKind::Ledger => OxyError::Ledger(message),
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让模型重试（如输出的 JSON 格式错误）
    RetryWithPrompt(String),
    /// 把失败作为 Observation 写回记忆，继续循环
    Observe(String),
    /// 终止当前调用
    Abort,
}
