//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! MockLlmClient：有工具结果时据此作答，否则回显用户最后一条消息。
//! ScriptedLlmClient：由闭包按调用序号返回输出，确定性地驱动 ReAct / 工作流测试。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, ModelParams};
use crate::memory::{Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message], _params: &ModelParams) -> Result<String, String> {
        if let Some(last) = messages.last() {
            if last.role == Role::Tool {
                return Ok(format!("Based on the tool result: {}", last.content));
            }
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {}", last_user))
    }
}

type Script = dyn Fn(&[Message], usize) -> Result<String, String> + Send + Sync;

/// 脚本化客户端：第 n 次调用（从 0 开始）返回 script(messages, n)
pub struct ScriptedLlmClient {
    script: Box<Script>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedLlmClient {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&[Message], usize) -> Result<String, String> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// 依次返回 replies；用尽后重复最后一条
    pub fn from_replies(replies: Vec<String>) -> Self {
        Self::new(move |_, n| {
            replies
                .get(n)
                .or_else(|| replies.last())
                .cloned()
                .ok_or_else(|| "no scripted reply".to_string())
        })
    }

    /// 每次调用前等待（用于超时与并发测试）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已被调用的次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message], _params: &ModelParams) -> Result<String, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        (self.script)(messages, n)
    }
}
