//! 回放游标：resume 时按顺序满足已记录的顶层步骤，之后第一个实时执行的步骤必须是目标节点

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::checkpoint::RootCall;
use crate::core::{ExecResult, OxyError};
use crate::memory::Message;

#[derive(Debug)]
pub struct ReplayCursor {
    session_id: String,
    target: String,
    entries: Mutex<VecDeque<ExecResult>>,
    live: AtomicBool,
    history: Vec<Message>,
    history_turns: u64,
}

impl ReplayCursor {
    pub fn new(session_id: impl Into<String>, target: impl Into<String>, entries: Vec<ExecResult>) -> Self {
        Self {
            session_id: session_id.into(),
            target: target.into(),
            entries: Mutex::new(entries.into()),
            live: AtomicBool::new(false),
            history: Vec::new(),
            history_turns: 0,
        }
    }

    /// 带上原调用开始时的短期历史
    pub fn with_history(mut self, root: &RootCall) -> Self {
        self.history = root.history.clone();
        self.history_turns = root.history_turns;
        self
    }

    /// 原调用看到的短期历史窗口
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn history_turns(&self) -> u64 {
        self.history_turns
    }

    /// 回放阶段：若下一条记录的执行者是 node，弹出并返回
    pub fn take(&self, node: &str) -> Option<ExecResult> {
        if self.is_live() {
            return None;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.front().map(|r| r.executor == node).unwrap_or(false) {
            entries.pop_front()
        } else {
            None
        }
    }

    /// 切换为实时执行：首个实时步骤必须是目标节点，否则 CheckpointGap
    pub fn check_live(&self, node: &str) -> Result<(), OxyError> {
        if self.is_live() {
            return Ok(());
        }
        if node != self.target {
            return Err(OxyError::CheckpointGap {
                session_id: self.session_id.clone(),
                target: self.target.clone(),
            });
        }
        let leftover = self.remaining();
        if leftover > 0 {
            tracing::warn!(
                session = %self.session_id,
                leftover,
                "resume reached target with unconsumed ledger entries"
            );
        }
        self.live.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::test_support::exec_result;

    #[test]
    fn test_take_in_order_then_live() {
        let cursor = ReplayCursor::new("s1", "c", vec![exec_result("a", "A"), exec_result("b", "B")]);
        assert!(cursor.take("b").is_none());
        assert_eq!(cursor.take("a").unwrap().response.output, "A");
        assert_eq!(cursor.take("b").unwrap().response.output, "B");
        assert!(cursor.take("c").is_none());
        assert!(cursor.check_live("c").is_ok());
        assert!(cursor.is_live());
        assert!(cursor.check_live("anything").is_ok());
    }

    #[test]
    fn test_wrong_first_live_node_is_gap() {
        let cursor = ReplayCursor::new("s1", "c", vec![exec_result("a", "A")]);
        cursor.take("a");
        let err = cursor.check_live("b").unwrap_err();
        assert!(matches!(err, OxyError::CheckpointGap { ref target, .. } if target == "c"));
    }
}
