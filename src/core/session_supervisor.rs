//! 会话监管：按 session_id 管理取消令牌
//!
//! 每个会话一个根 token 的子 token；每次调用通过 lease 派生子 token，cancel(session) 会中断该会话所有在途调用（包括闸门等待）。
//! 会话条目只在有在途调用时存在，最后一个 lease 释放时移除。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct SessionEntry {
    token: CancellationToken,
    active: usize,
    generation: u64,
}

/// 会话级生命周期管理
#[derive(Debug)]
pub struct SessionSupervisor {
    /// 编排器关闭时触发
    root: CancellationToken,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    generations: AtomicU64,
}

/// 一次调用对会话的占用；drop 时归还
#[derive(Debug)]
pub struct SessionLease<'a> {
    supervisor: &'a SessionSupervisor,
    session_id: String,
    generation: u64,
    token: CancellationToken,
}

impl SessionLease<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        self.supervisor.release(&self.session_id, self.generation);
    }
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            sessions: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// 为一次调用占用会话并派生 token；会话曾被取消时换一个新的会话 token
    pub fn lease(&self, session_id: &str) -> SessionLease<'_> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let entry = sessions.entry(session_id.to_string()).or_insert_with(|| SessionEntry {
            token: self.root.child_token(),
            active: 0,
            generation: self.generations.fetch_add(1, Ordering::Relaxed),
        });
        if entry.token.is_cancelled() && !self.root.is_cancelled() {
            entry.token = self.root.child_token();
        }
        entry.active += 1;
        SessionLease {
            supervisor: self,
            session_id: session_id.to_string(),
            generation: entry.generation,
            token: entry.token.child_token(),
        }
    }

    fn release(&self, session_id: &str, generation: u64) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let idle = match sessions.get_mut(session_id) {
            Some(entry) if entry.generation == generation => {
                entry.active = entry.active.saturating_sub(1);
                entry.active == 0
            }
            _ => false,
        };
        if idle {
            sessions.remove(session_id);
        }
    }

    /// 取消会话内所有在途调用；会话没有在途调用返回 false
    pub fn cancel(&self, session_id: &str) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get(session_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// 取消全部会话
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    /// 会话结束：取消在途调用并移除条目
    pub fn end(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = sessions.remove(session_id) {
            entry.token.cancel();
        }
    }

    /// 当前有在途调用的会话数
    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_session_only() {
        let sup = SessionSupervisor::new();
        let a = sup.lease("s1");
        let b = sup.lease("s2");
        assert!(sup.cancel("s1"));
        assert!(a.token().is_cancelled());
        assert!(!b.token().is_cancelled());
        assert!(!sup.cancel("missing"));
    }

    #[test]
    fn test_session_reusable_after_cancel() {
        let sup = SessionSupervisor::new();
        let first = sup.lease("s1");
        sup.cancel("s1");
        let fresh = sup.lease("s1");
        assert!(first.token().is_cancelled());
        assert!(!fresh.token().is_cancelled());
    }

    #[test]
    fn test_cancel_all() {
        let sup = SessionSupervisor::new();
        let a = sup.lease("s1");
        sup.cancel_all();
        assert!(a.token().is_cancelled());
    }

    #[test]
    fn test_entry_removed_after_last_lease() {
        let sup = SessionSupervisor::new();
        let first = sup.lease("s1");
        let second = sup.lease("s1");
        assert_eq!(sup.active_sessions(), 1);
        drop(first);
        assert_eq!(sup.active_sessions(), 1);
        drop(second);
        assert_eq!(sup.active_sessions(), 0);
        assert!(!sup.cancel("s1"));
    }

    #[test]
    fn test_end_cancels_and_stale_lease_keeps_new_entry() {
        let sup = SessionSupervisor::new();
        let old = sup.lease("s1");
        sup.end("s1");
        assert!(old.token().is_cancelled());

        let new = sup.lease("s1");
        drop(old);
        assert_eq!(sup.active_sessions(), 1);
        assert!(!new.token().is_cancelled());
        drop(new);
        assert_eq!(sup.active_sessions(), 0);
    }
}
