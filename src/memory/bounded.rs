//! 单次调用的有界消息序列
//!
//! 超过上限时优先淘汰最旧的非 system 消息；全部为 system 时淘汰最旧的一条。

use crate::memory::{Message, Role};

/// 调用内记忆：按插入顺序保存角色化消息，长度永不超过 cap
#[derive(Clone, Debug)]
pub struct Memory {
    messages: Vec<Message>,
    cap: Option<usize>,
}

impl Memory {
    pub fn new(cap: usize) -> Self {
        Self {
            messages: Vec::new(),
            cap: Some(cap.max(1)),
        }
    }

    /// 不设上限（ReAct 循环上下文未配置 memory_cap 时使用）
    pub fn unbounded() -> Self {
        Self {
            messages: Vec::new(),
            cap: None,
        }
    }

    pub fn with_cap(cap: Option<usize>) -> Self {
        match cap {
            Some(c) => Self::new(c),
            None => Self::unbounded(),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.evict();
    }

    pub fn extend(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs {
            self.push(m);
        }
    }

    fn evict(&mut self) {
        let Some(cap) = self.cap else {
            return;
        };
        while self.messages.len() > cap {
            let idx = self
                .messages
                .iter()
                .position(|m| m.role != Role::System)
                .unwrap_or(0);
            self.messages.remove(idx);
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn cap(&self) -> Option<usize> {
        self.cap
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
    fn test_len_never_exceeds_cap() {
        let mut mem = Memory::new(5);
        mem.push(Message::system("sys"));
        for i in 0..50 {
            if i % 3 == 0 {
                mem.push(Message::tool("t", format!("obs {i}")));
            } else {
                mem.push(Message::user(format!("u {i}")));
            }
            assert!(mem.len() <= 5);
        }
        assert_eq!(mem.messages()[0].role, Role::System);
        assert_eq!(mem.messages()[4].content, "u 49");
    }

    #[test]
    fn test_all_system_evicts_oldest() {
        let mut mem = Memory::new(2);
        mem.push(Message::system("a"));
        mem.push(Message::system("b"));
        mem.push(Message::system("c"));
        let contents: Vec<&str> = mem.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }

    #[test]
    fn test_zero_cap_clamped_to_one() {
        let mut mem = Memory::new(0);
        mem.push(Message::user("x"));
        mem.push(Message::user("y"));
        assert_eq!(mem.len(), 1);
        assert_eq!(mem.messages()[0].content, "y");
    }

    #[test]
    fn test_unbounded_keeps_everything() {
        let mut mem = Memory::unbounded();
        for i in 0..100 {
            mem.push(Message::user(i.to_string()));
        }
        assert_eq!(mem.len(), 100);
        assert_eq!(mem.cap(), None);
    }
}
