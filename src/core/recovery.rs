//! 错误恢复引擎
//!
//! 根据 OxyError 类型返回 RecoveryAction，供 ReAct 循环决定是重试、作为观察继续还是终止。

use crate::core::{OxyError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作（重试提示 / 观察 / 终止）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// observe_failures：当前策略是否把执行失败当作 Observation（工具失败策略或主控的委派失败策略）
    pub fn handle(&self, err: &OxyError, observe_failures: bool) -> RecoveryAction {
        if err.is_fatal() {
            return RecoveryAction::Abort;
        }
        match err {
            OxyError::MalformedOutput { raw, .. } => RecoveryAction::RetryWithPrompt(format!(
                "上一轮输出的 JSON 格式错误: {raw}。\
                调用工具时你必须只输出一个合法的 JSON 对象，不能输出代码、Markdown 或其它文字。\
                格式必须为: {{\"tool\": \"工具名\", \"args\": {{...}}}}。\
                例如: {{\"tool\": \"echo\", \"args\": {{\"text\": \"hi\"}}}}。请只输出这一行 JSON。"
            )),
            OxyError::ToolExecutionFailure { .. }
            | OxyError::InvalidArguments { .. }
            | OxyError::NodeNotFound(_)
            | OxyError::RemoteUnavailable { .. }
            | OxyError::Timeout(_)
            | OxyError::ModelTimeout(_)
            | OxyError::ModelFailure { .. }
            | OxyError::Saturated { .. }
                if observe_failures =>
            {
                RecoveryAction::Observe(format!("Error: {err}"))
            }
            _ => RecoveryAction::Abort,
        }
    }
}
