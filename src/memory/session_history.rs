//! 会话级短期历史：按 session_id 保存最近 N 轮（用户提问 + 最终回答）

use std::collections::HashMap;
use std::sync::Mutex;

use crate::memory::{ConversationMemory, Message};

/// 每个会话一份 ConversationMemory；end_session 时清除
#[derive(Debug)]
pub struct SessionHistory {
    sessions: Mutex<HashMap<String, ConversationMemory>>,
    max_turns: usize,
}

impl SessionHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_turns,
        }
    }

    /// 当前短期窗口（按时间顺序）
    pub fn window(&self, session_id: &str) -> Vec<Message> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(session_id)
            .map(|c| c.messages().to_vec())
            .unwrap_or_default()
    }

    /// 已记录的轮数
    pub fn turns(&self, session_id: &str) -> u64 {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).map(|c| c.turns()).unwrap_or(0)
    }

    /// 把会话回退到调用开始时的快照；快照为空时移除会话
    pub fn restore(&self, session_id: &str, snapshot: &[Message], turns: u64) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if snapshot.is_empty() && turns == 0 {
            sessions.remove(session_id);
            return;
        }
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| ConversationMemory::new(self.max_turns))
            .restore(snapshot, turns);
    }

    /// 记录一轮，返回轮次序号
    pub fn record_turn(&self, session_id: &str, query: &str, answer: &str) -> u64 {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| ConversationMemory::new(self.max_turns))
            .push_turn(query, answer)
    }

    pub fn clear(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new(10)
    }
}
