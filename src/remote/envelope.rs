//! 跨进程调用信封（JSON）
//!
//! 调用信封携带追踪谱系与截止时间；响应信封回传同一组追踪元数据以及输出与状态。

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::{ErrorInfo, ExecResult, OxyError, OxyRequest, OxyResponse, OxyState};

/// 调用信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub trace_id: String,
    #[serde(default)]
    pub from_trace_id: Option<String>,
    pub session_id: String,
    /// 调用方生成的临时会话，对端同样不留存
    #[serde(default)]
    pub transient_session: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub group_data: HashMap<String, Value>,
    pub target_name: String,
    pub query: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub arguments: Value,
    /// 调用方祖先链（含调用方自身），供对端继续做环检测
    #[serde(default)]
    pub ancestors: Vec<String>,
    /// 调用方剩余时间，作为对端的截止时间
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl CallEnvelope {
    /// 由本地请求构造出站信封
    pub fn from_request(req: &OxyRequest) -> Self {
        Self {
            trace_id: req.trace_id.clone(),
            from_trace_id: req.from_trace_id.clone(),
            session_id: req.session_id.clone(),
            transient_session: req.transient_session,
            user_id: Some(req.user_id.clone()),
            group_data: req.group_data.clone(),
            target_name: req.callee.clone(),
            query: req.query.clone(),
            attachments: req.attachments.clone(),
            arguments: req.arguments.clone(),
            ancestors: req.ancestors.clone(),
            timeout_ms: req.remaining().map(|d| d.as_millis() as u64),
        }
    }

    /// 对端还原为入口请求：保留 trace_id / from_trace_id / 祖先链
    pub fn into_request(self, cancel: CancellationToken) -> OxyRequest {
        let root_depth = self.ancestors.len();
        OxyRequest {
            callee: self.target_name,
            caller: self.ancestors.last().cloned(),
            query: self.query,
            session_id: self.session_id,
            transient_session: self.transient_session,
            user_id: self.user_id.unwrap_or_else(|| "anonymous".to_string()),
            group_data: self.group_data,
            attachments: self.attachments,
            arguments: self.arguments,
            messages: None,
            trace_id: self.trace_id,
            from_trace_id: self.from_trace_id,
            ancestors: self.ancestors,
            root_depth,
            scope: None,
            deadline: self
                .timeout_ms
                .map(|ms| Instant::now() + Duration::from_millis(ms)),
            cancel,
            events: None,
            replay: None,
        }
    }
}

/// 响应信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub trace_id: String,
    #[serde(default)]
    pub from_trace_id: Option<String>,
    pub session_id: String,
    pub target_name: String,
    pub state: OxyState,
    pub output: String,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub exec_results: Vec<ExecResult>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ResponseEnvelope {
    pub fn from_response(env: &CallEnvelope, resp: OxyResponse) -> Self {
        Self {
            trace_id: env.trace_id.clone(),
            from_trace_id: env.from_trace_id.clone(),
            session_id: env.session_id.clone(),
            target_name: env.target_name.clone(),
            state: resp.state,
            output: resp.output,
            error: resp.error,
            exec_results: resp.exec_results,
            elapsed_ms: resp.elapsed_ms,
        }
    }

    /// 对端在执行前即失败（如信封无效）
    pub fn failure(env: &CallEnvelope, err: &OxyError) -> Self {
        Self {
            trace_id: env.trace_id.clone(),
            from_trace_id: env.from_trace_id.clone(),
            session_id: env.session_id.clone(),
            target_name: env.target_name.clone(),
            state: OxyState::Failed,
            output: err.to_string(),
            error: Some(ErrorInfo::from_error(err, &env.target_name)),
            exec_results: Vec::new(),
            elapsed_ms: 0,
        }
    }

    /// 对端失败一律归一为 RemoteUnavailable，消息保留对端的错误种类
    pub fn into_outcome(self, node: &str) -> Result<(String, Vec<ExecResult>), OxyError> {
        match self.state {
            OxyState::Failed => {
                let message = match &self.error {
                    Some(info) => format!("{:?}: {}", info.kind, info.message),
                    None => self.output,
                };
                Err(OxyError::RemoteUnavailable {
                    node: node.to_string(),
                    message,
                })
            }
            _ => Ok((self.output, self.exec_results)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CallInput;

    #[test]
    fn test_envelope_preserves_lineage() {
        let root = OxyRequest::root(
            "master",
            CallInput::new("weather?")
                .with_session("s1")
                .with_timeout(Duration::from_secs(5)),
            CancellationToken::new(),
        );
        let child = root.child("remote_agent");
        let env = CallEnvelope::from_request(&child);
        assert_eq!(env.target_name, "remote_agent");
        assert_eq!(env.from_trace_id.as_deref(), Some(root.trace_id.as_str()));
        assert_eq!(env.ancestors, vec!["master".to_string()]);
        assert!(env.timeout_ms.unwrap() <= 5000);

        let json = serde_json::to_string(&env).unwrap();
        let back: CallEnvelope = serde_json::from_str(&json).unwrap();
        let req = back.into_request(CancellationToken::new());
        assert_eq!(req.trace_id, child.trace_id);
        assert_eq!(req.session_id, "s1");
        assert!(req.has_ancestor("master"));
        assert_eq!(req.root_depth, 1);
        assert!(req.child("tool").is_top_level_step());
    }

    #[test]
    fn test_minimal_envelope_defaults() {
        let env: CallEnvelope = serde_json::from_str(
            r#"{"trace_id":"t","session_id":"s","target_name":"echo","query":"hi"}"#,
        )
        .unwrap();
        assert!(env.ancestors.is_empty());
        assert!(env.timeout_ms.is_none());
        let req = env.into_request(CancellationToken::new());
        assert_eq!(req.user_id, "anonymous");
        assert!(req.deadline.is_none());
    }

    #[test]
    fn test_failed_envelope_normalizes_to_remote_unavailable() {
        let env: CallEnvelope = serde_json::from_str(
            r#"{"trace_id":"t","session_id":"s","target_name":"agent","query":"q"}"#,
        )
        .unwrap();
        let resp = ResponseEnvelope::failure(&env, &OxyError::NodeNotFound("agent".into()));
        match resp.into_outcome("agent") {
            Err(OxyError::RemoteUnavailable { node, message }) => {
                assert_eq!(node, "agent");
                assert!(message.contains("NodeNotFound"));
            }
            other => panic!("Expected RemoteUnavailable, got {other:?}"),
        }
    }
}
