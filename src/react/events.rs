//! 执行过程事件：思考、工具调用、观察、委派、工作流步骤与最终答案
//!
//! 通过请求携带的无界通道推送，发送永不阻塞；接收端可序列化为 JSON 流式展示。

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// ReAct 步数更新（当前第几步）
    StepUpdate {
        agent: String,
        step: usize,
        max_steps: usize,
    },
    /// 正在调用 LLM 思考
    Thinking { agent: String },
    /// 调用工具
    ToolCall {
        agent: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        agent: String,
        tool: String,
        preview: String,
    },
    /// 工具执行失败
    ToolFailure {
        agent: String,
        tool: String,
        reason: String,
    },
    /// 错误恢复动作（RetryWithPrompt / Observe）
    Recovery {
        agent: String,
        action: String,
        detail: String,
    },
    /// 主控委派给子智能体
    Delegation {
        agent: String,
        target: String,
        query: String,
    },
    /// 使用长期记忆（检索到的相关内容预览）
    MemoryRecovery { agent: String, preview: String },
    /// 工作流进入第 index 步
    WorkflowStep {
        agent: String,
        index: usize,
        node: String,
    },
    /// 可选步骤失败被跳过
    StepSkipped {
        agent: String,
        node: String,
        reason: String,
    },
    /// 最终答案
    Done { agent: String, output: String },
    /// 错误
    Error { agent: String, text: String },
}

/// Observation 预览最大字符数
pub const OBSERVATION_PREVIEW_CHARS: usize = 200;

pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
