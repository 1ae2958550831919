//! 短期记忆：对话消息与会话历史
//!
//! Message 为所有上下文构建、模型调用与账本回放共享的角色化消息；
//! ConversationMemory 保留最近 N 轮对话（user/assistant 对），超出时自动剪枝。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致；Tool 为工具结果消息）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 工具结果消息对应的工具 / 节点名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            name: None,
        }
    }

    /// 工具结果消息（OBSERVE 阶段写回记忆）
    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            name: Some(name.into()),
        }
    }
}

/// 短期记忆：最近 N 轮对话（每轮含 user + assistant，故实际保留约 max_turns*2 条消息）
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_turns: usize,
    turns: u64,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns: max_turns.max(1),
            turns: 0,
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.prune();
    }

    /// 记录一轮完整对话（用户提问 + 最终回复），返回该轮序号（从 1 开始）
    pub fn push_turn(&mut self, query: &str, answer: &str) -> u64 {
        self.messages.push(Message::user(query));
        self.messages.push(Message::assistant(answer));
        self.prune();
        self.turns += 1;
        self.turns
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 已记录的轮数（剪枝不影响计数）
    pub fn turns(&self) -> u64 {
        self.turns
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.turns = 0;
    }

    /// 回退到某个快照：消息窗口与轮次计数一并替换
    pub fn restore(&mut self, messages: &[Message], turns: u64) {
        self.messages = messages.to_vec();
        self.turns = turns;
        self.prune();
    }

    /// 超出 max_turns*2 时丢弃最旧的消息，保留最近部分
    fn prune(&mut self) {
        if self.messages.len() > self.max_turns * 2 {
            let keep = self.max_turns * 2;
            self.messages.drain(..self.messages.len() - keep);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_turn_prunes_oldest() {
        let mut conv = ConversationMemory::new(2);
        conv.push_turn("q1", "a1");
        conv.push_turn("q2", "a2");
        let turn = conv.push_turn("q3", "a3");
        assert_eq!(turn, 3);
        assert_eq!(conv.len(), 4);
        assert_eq!(conv.messages()[0].content, "q2");
    }

    #[test]
    fn test_tool_message_carries_name() {
        let msg = Message::tool("time_tool", "2024-01-01 00:00:00");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.name.as_deref(), Some("time_tool"));
    }
}
