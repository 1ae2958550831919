//! 上下文引擎：为单次调用组装 AgentContext 并生成有界记忆
//!
//! 循环上下文（ReAct）：system = 基础提示 + 长期记忆原文 → 完整短期历史 → 当前用户消息；仅在配置了上限时截断。
//! 流水线上下文（工作流 / 对话）：system = 基础提示 + 带标签的 Facts/History/Profile → 短期历史 → 用户消息 → 工具结果，硬上限默认 20。

use std::sync::Arc;

use crate::core::OxyRequest;
use crate::memory::{
    retrieve_long_term, LongTermMemory, Memory, MemoryClients, Message, RetrievalSettings,
    SessionHistory,
};

/// 单次调用的上下文材料
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub system_prompt: String,
    pub short_term: Vec<Message>,
    pub long_term: LongTermMemory,
    pub user_prompt: String,
    pub tool_results: Vec<Message>,
}

impl AgentContext {
    pub fn with_tool_results(mut self, results: Vec<Message>) -> Self {
        self.tool_results = results;
        self
    }

    /// ReAct 循环上下文
    pub fn loop_context(&self, cap: Option<usize>) -> Memory {
        let mut memory = Memory::with_cap(cap);
        let raw = self.long_term.raw_block();
        let system = if raw.is_empty() {
            self.system_prompt.clone()
        } else {
            format!("{}\n\n{}", self.system_prompt, raw)
        };
        memory.push(Message::system(system));
        memory.extend(self.short_term.iter().cloned());
        memory.push(Message::user(self.user_prompt.clone()));
        memory
    }

    /// 流水线上下文
    pub fn pipeline_context(&self, cap: usize) -> Memory {
        let mut memory = Memory::new(cap);
        let labeled = self.long_term.labeled_sections();
        let system = if labeled.is_empty() {
            self.system_prompt.clone()
        } else {
            format!("{}\n\n{}", self.system_prompt, labeled)
        };
        memory.push(Message::system(system));
        memory.extend(self.short_term.iter().cloned());
        memory.push(Message::user(self.user_prompt.clone()));
        memory.extend(self.tool_results.iter().cloned());
        memory
    }
}

/// 上下文引擎：持有注入的检索客户端与会话历史
#[derive(Clone)]
pub struct ContextEngine {
    clients: MemoryClients,
    settings: RetrievalSettings,
    history: Arc<SessionHistory>,
}

impl ContextEngine {
    pub fn new(clients: MemoryClients, settings: RetrievalSettings, history: Arc<SessionHistory>) -> Self {
        Self {
            clients,
            settings,
            history,
        }
    }

    /// 检索长期记忆（超时取 min(配置, 请求剩余时间)）并拼入短期历史
    pub async fn assemble(&self, req: &OxyRequest, system_prompt: String) -> AgentContext {
        let mut settings = self.settings.clone();
        if let Some(rem) = req.remaining() {
            settings.timeout = settings.timeout.min(rem);
        }
        let long_term = retrieve_long_term(
            &self.clients,
            &settings,
            &req.query,
            &req.user_id,
            &req.cancel,
        )
        .await;

        // 回放时使用原调用开始时的历史窗口
        let short_term = match &req.replay {
            Some(cursor) => cursor.history().to_vec(),
            None => self.history.window(&req.session_id),
        };

        AgentContext {
            system_prompt,
            short_term,
            long_term,
            user_prompt: req.query.clone(),
            tool_results: Vec::new(),
        }
    }
}
