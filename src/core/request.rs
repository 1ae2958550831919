//! 调用与结果：OxyRequest / OxyResponse / ExecResult
//!
//! 每次调用携带不可变的追踪谱系（trace_id、from_trace_id、祖先链），子调用由 child() 派生；
//! 取消令牌随谱系向下传递，截止时间只会收紧不会放宽。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::ReplayCursor;
use crate::core::{ErrorKind, OxyError};
use crate::memory::Message;
use crate::react::ReactEvent;

/// 外部调用入参：query 必填，其余可选
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallInput {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub group_data: HashMap<String, Value>,
    #[serde(default)]
    pub attachments: Vec<String>,
    /// 整个调用的截止时长
    #[serde(default, skip)]
    pub timeout: Option<Duration>,
}

impl CallInput {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_group_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.group_data.insert(key.into(), value);
        self
    }

    pub fn with_attachment(mut self, reference: impl Into<String>) -> Self {
        self.attachments.push(reference.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<&str> for CallInput {
    fn from(query: &str) -> Self {
        Self::new(query)
    }
}

/// 一次节点调用
#[derive(Debug, Clone)]
pub struct OxyRequest {
    pub callee: String,
    pub caller: Option<String>,
    pub query: String,
    pub session_id: String,
    /// 调用方未给 session_id、由本次调用生成的会话：不写账本与短期历史
    pub transient_session: bool,
    pub user_id: String,
    pub group_data: HashMap<String, Value>,
    pub attachments: Vec<String>,
    /// 工具参数（模型给出）；工具节点为 Null 时以 {"query": query} 代替
    pub arguments: Value,
    /// 模型连接节点的输入消息
    pub messages: Option<Vec<Message>>,
    pub trace_id: String,
    pub from_trace_id: Option<String>,
    /// 祖先链（根在前，不含自身）
    pub ancestors: Vec<String>,
    /// 本进程入口请求的祖先深度（本地根为 0，远程入口为对端传入的祖先数）
    pub root_depth: usize,
    /// 委派方传下的工具作用域上限
    pub scope: Option<Vec<String>>,
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
    pub events: Option<UnboundedSender<ReactEvent>>,
    pub replay: Option<Arc<ReplayCursor>>,
}

fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl OxyRequest {
    /// 外部调用的根请求
    pub fn root(callee: impl Into<String>, input: CallInput, cancel: CancellationToken) -> Self {
        Self {
            callee: callee.into(),
            caller: None,
            query: input.query,
            transient_session: input.session_id.is_none(),
            session_id: input
                .session_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            user_id: input.user_id.unwrap_or_else(|| "anonymous".to_string()),
            group_data: input.group_data,
            attachments: input.attachments,
            arguments: Value::Null,
            messages: None,
            trace_id: new_trace_id(),
            from_trace_id: None,
            ancestors: Vec::new(),
            root_depth: 0,
            scope: None,
            deadline: input.timeout.map(|t| Instant::now() + t),
            cancel,
            events: None,
            replay: None,
        }
    }

    /// 派生子调用：新 trace_id，from_trace_id 指向当前调用，祖先链追加当前 callee
    pub fn child(&self, callee: impl Into<String>) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.callee.clone());
        Self {
            callee: callee.into(),
            caller: Some(self.callee.clone()),
            query: self.query.clone(),
            session_id: self.session_id.clone(),
            transient_session: self.transient_session,
            user_id: self.user_id.clone(),
            group_data: self.group_data.clone(),
            attachments: self.attachments.clone(),
            arguments: Value::Null,
            messages: None,
            trace_id: new_trace_id(),
            from_trace_id: Some(self.trace_id.clone()),
            ancestors,
            root_depth: self.root_depth,
            scope: None,
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
            events: self.events.clone(),
            replay: self.replay.clone(),
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_arguments(mut self, args: Value) -> Self {
        self.arguments = args;
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn with_scope(mut self, scope: Vec<String>) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<ReactEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// 收紧截止时间（只取更早者）
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(d) if d < deadline => d,
            _ => deadline,
        });
        self
    }

    /// 距截止时间的剩余时长
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// 是否为本进程入口的直接子调用（断点账本只记录这一层）
    pub fn is_top_level_step(&self) -> bool {
        self.ancestors.len() == self.root_depth + 1
    }

    /// 祖先链中是否已有 name
    pub fn has_ancestor(&self, name: &str) -> bool {
        self.ancestors.iter().any(|a| a == name)
    }

    /// 推送过程事件（不阻塞；接收端关闭时忽略）
    pub fn emit(&self, ev: ReactEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(ev);
        }
    }
}

/// 调用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OxyState {
    Completed,
    Failed,
    Skipped,
}

/// 失败信息（种类 + 消息 + 出错执行者）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub executor: String,
}

impl ErrorInfo {
    pub fn from_error(err: &OxyError, fallback_executor: &str) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            executor: err.executor().unwrap_or(fallback_executor).to_string(),
        }
    }

    pub fn to_error(&self) -> OxyError {
        OxyError::from_parts(self.kind, &self.message, &self.executor)
    }
}

/// 子调用结果：执行者 + 其响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecResult {
    pub executor: String,
    pub response: OxyResponse,
}

/// 调用结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OxyResponse {
    pub state: OxyState,
    pub output: String,
    pub executor: String,
    pub trace_id: String,
    #[serde(default)]
    pub from_trace_id: Option<String>,
    /// 开始时间（毫秒时间戳）
    pub started_at: i64,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub exec_results: Vec<ExecResult>,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

impl OxyResponse {
    pub fn completed(
        req: &OxyRequest,
        output: impl Into<String>,
        started_at: i64,
        elapsed: Duration,
        exec_results: Vec<ExecResult>,
    ) -> Self {
        Self {
            state: OxyState::Completed,
            output: output.into(),
            executor: req.callee.clone(),
            trace_id: req.trace_id.clone(),
            from_trace_id: req.from_trace_id.clone(),
            started_at,
            elapsed_ms: elapsed.as_millis() as u64,
            exec_results,
            error: None,
        }
    }

    /// 失败响应：output 为错误消息，error 记录种类与出错执行者
    pub fn failed(req: &OxyRequest, err: &OxyError, started_at: i64, elapsed: Duration) -> Self {
        Self {
            state: OxyState::Failed,
            output: err.to_string(),
            executor: req.callee.clone(),
            trace_id: req.trace_id.clone(),
            from_trace_id: req.from_trace_id.clone(),
            started_at,
            elapsed_ms: elapsed.as_millis() as u64,
            exec_results: Vec::new(),
            error: Some(ErrorInfo::from_error(err, &req.callee)),
        }
    }

    /// 可选步骤失败后的跳过记录
    pub fn skipped(req: &OxyRequest, err: &OxyError) -> Self {
        Self {
            state: OxyState::Skipped,
            output: String::new(),
            executor: req.callee.clone(),
            trace_id: req.trace_id.clone(),
            from_trace_id: req.from_trace_id.clone(),
            started_at: chrono::Utc::now().timestamp_millis(),
            elapsed_ms: 0,
            exec_results: Vec::new(),
            error: Some(ErrorInfo::from_error(err, &req.callee)),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == OxyState::Completed
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// 转为 Result：非 Completed 时还原为 OxyError
    pub fn into_result(self) -> Result<OxyResponse, OxyError> {
        match (&self.state, &self.error) {
            (OxyState::Failed, Some(info)) => Err(info.to_error()),
            (OxyState::Failed, None) => Err(OxyError::ToolExecutionFailure {
                tool: self.executor.clone(),
                message: self.output.clone(),
            }),
            _ => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_lineage() {
        let root = OxyRequest::root("master", CallInput::new("hi"), CancellationToken::new());
        let child = root.child("worker");
        assert_eq!(child.from_trace_id.as_deref(), Some(root.trace_id.as_str()));
        assert_ne!(child.trace_id, root.trace_id);
        assert_eq!(child.ancestors, vec!["master".to_string()]);
        assert!(child.has_ancestor("master"));
        assert_eq!(child.caller.as_deref(), Some("master"));
        assert_eq!(child.session_id, root.session_id);

        let grandchild = child.child("tool");
        assert_eq!(grandchild.ancestors, vec!["master".to_string(), "worker".to_string()]);
        assert!(child.is_top_level_step());
        assert!(!grandchild.is_top_level_step());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let root = OxyRequest::root("a", CallInput::new("q"), CancellationToken::new());
        let child = root.child("b");
        root.cancel.cancel();
        assert!(child.cancel.is_cancelled());
    }

    #[test]
    fn test_deadline_only_tightens() {
        let input = CallInput::new("q").with_timeout(Duration::from_secs(1));
        let req = OxyRequest::root("a", input, CancellationToken::new());
        let original = req.deadline.unwrap();
        let later = req.clone().with_deadline(original + Duration::from_secs(10));
        assert_eq!(later.deadline, Some(original));
        assert!(req.remaining().unwrap() <= Duration::from_secs(1));
    }

    #[test]
    fn test_failed_response_names_executor() {
        let req = OxyRequest::root("agent", CallInput::new("q"), CancellationToken::new());
        let err = OxyError::ToolExecutionFailure {
            tool: "time_tool".into(),
            message: "boom".into(),
        };
        let resp = OxyResponse::failed(&req, &err, 0, Duration::from_millis(3));
        assert_eq!(resp.state, OxyState::Failed);
        let info = resp.error.clone().unwrap();
        assert_eq!(info.kind, ErrorKind::ToolExecutionFailure);
        assert_eq!(info.executor, "time_tool");
        assert!(resp.into_result().is_err());
    }
}
