//! 编排器（Mas）：统一的节点调用契约
//!
//! invoke 依次完成：祖先环检测 → 解析节点 → 断点回放 → 计算超时预算 → 并发闸门 → 按种类执行 → 审计日志 → 写账本。
//! 外部调用（call / call_request）额外负责会话取消令牌、开启账本区段、写入短期历史与后台历史索引。
//! 未指定 session_id 的调用使用临时会话：不写账本与短期历史，结束后不留任何会话状态。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{InMemoryLedgerStore, LedgerStore, ReplayCursor, RootCall};
use crate::config::AppConfig;
use crate::core::{
    CallInput, ConcurrencyGate, ExecResult, Node, NodeKind, OxyError, OxyRequest, OxyResponse,
    OxySpace, RecoveryEngine, SessionSupervisor, SpaceOrigin,
};
use crate::memory::{
    build_index_records, spawn_history_indexing, Chunker, MemoryClients, Message, RetrievalSettings,
    SessionHistory,
};
use crate::react::{normalize_args, run_react, ContextEngine, ReactEvent};
use crate::remote::{CallEnvelope, RemoteDispatcher};
use crate::workflow::run_workflow;

/// 节点执行结果（成功路径）
#[derive(Debug, Clone, Default)]
pub struct NodeOutcome {
    pub output: String,
    pub exec_results: Vec<ExecResult>,
}

impl NodeOutcome {
    pub fn leaf(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exec_results: Vec::new(),
        }
    }
}

/// 编排器运行参数
#[derive(Debug, Clone)]
pub struct MasSettings {
    pub max_concurrency: usize,
    /// 等待闸门名额的上限；None 表示只受请求截止时间约束
    pub acquire_timeout: Option<Duration>,
    /// 节点未配置 timeout 时的单次调用预算
    pub default_timeout: Duration,
    pub checkpoint: bool,
    pub max_iterations: usize,
    /// ReAct 循环上下文的默认上限；None 表示不截断
    pub memory_cap: Option<usize>,
    pub short_term_turns: usize,
    pub retrieval: RetrievalSettings,
    pub chunk_size: usize,
}

impl Default for MasSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            acquire_timeout: Some(Duration::from_secs(30)),
            default_timeout: Duration::from_secs(120),
            checkpoint: true,
            max_iterations: 10,
            memory_cap: None,
            short_term_turns: 10,
            retrieval: RetrievalSettings::default(),
            chunk_size: 500,
        }
    }
}

impl MasSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_concurrency: cfg.mas.max_concurrency.max(1),
            acquire_timeout: (cfg.mas.acquire_timeout_ms > 0)
                .then(|| Duration::from_millis(cfg.mas.acquire_timeout_ms)),
            default_timeout: Duration::from_secs(cfg.mas.default_timeout_secs.max(1)),
            checkpoint: cfg.mas.checkpoint,
            max_iterations: cfg.react.max_iterations.max(1),
            memory_cap: cfg.memory.memory_cap,
            short_term_turns: cfg.memory.short_term_turns,
            retrieval: RetrievalSettings {
                top_k: cfg.memory.top_k,
                namespace: cfg.memory.namespace.clone(),
                timeout: Duration::from_millis(cfg.memory.retrieval_timeout_ms),
            },
            chunk_size: cfg.memory.chunk_size,
        }
    }
}

/// 编排器构建器
pub struct MasBuilder {
    name: String,
    space: Option<OxySpace>,
    nodes: Vec<Node>,
    origin: SpaceOrigin,
    settings: MasSettings,
    ledger: Option<Arc<dyn LedgerStore>>,
    clients: MemoryClients,
    dispatcher: Option<Arc<dyn RemoteDispatcher>>,
}

impl MasBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            space: None,
            nodes: Vec::new(),
            origin: SpaceOrigin::Custom,
            settings: MasSettings::default(),
            ledger: None,
            clients: MemoryClients::default(),
            dispatcher: None,
        }
    }

    /// 追加节点（构建时注册，重名即失败）
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn nodes(mut self, nodes: impl IntoIterator<Item = Node>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    /// 使用已解析好的空间（来自 SpaceCatalog）
    pub fn space(mut self, space: OxySpace, origin: SpaceOrigin) -> Self {
        self.space = Some(space);
        self.origin = origin;
        self
    }

    pub fn settings(mut self, settings: MasSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.settings.max_concurrency = n.max(1);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.acquire_timeout = timeout;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.settings.default_timeout = timeout;
        self
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.settings.max_iterations = n.max(1);
        self
    }

    pub fn checkpoint(mut self, on: bool) -> Self {
        self.settings.checkpoint = on;
        self
    }

    pub fn ledger(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.ledger = Some(store);
        self
    }

    pub fn memory_clients(mut self, clients: MemoryClients) -> Self {
        self.clients = clients;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn RemoteDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn build(self) -> Result<Mas, OxyError> {
        let mut space = self.space.unwrap_or_default();
        for node in self.nodes {
            space.register(node)?;
        }
        let settings = self.settings;
        let history = Arc::new(SessionHistory::new(settings.short_term_turns));
        let context = ContextEngine::new(self.clients.clone(), settings.retrieval.clone(), history.clone());
        tracing::info!(
            mas = %self.name,
            nodes = space.len(),
            origin = ?self.origin,
            max_concurrency = settings.max_concurrency,
            "mas created"
        );
        Ok(Mas {
            gate: ConcurrencyGate::new(settings.max_concurrency),
            chunker: Chunker::with_chunk_size(settings.chunk_size),
            ledger: self
                .ledger
                .unwrap_or_else(|| Arc::new(InMemoryLedgerStore::new())),
            name: self.name,
            space: Arc::new(space),
            origin: self.origin,
            settings,
            clients: self.clients,
            dispatcher: self.dispatcher,
            supervisor: SessionSupervisor::new(),
            history,
            recovery: RecoveryEngine::new(),
            context,
        })
    }
}

/// 多智能体编排器实例
pub struct Mas {
    name: String,
    space: Arc<OxySpace>,
    origin: SpaceOrigin,
    settings: MasSettings,
    gate: ConcurrencyGate,
    ledger: Arc<dyn LedgerStore>,
    clients: MemoryClients,
    dispatcher: Option<Arc<dyn RemoteDispatcher>>,
    supervisor: SessionSupervisor,
    history: Arc<SessionHistory>,
    recovery: RecoveryEngine,
    context: ContextEngine,
    chunker: Chunker,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn timeout_error(node: &Node, budget: Duration) -> OxyError {
    if node.is_remote() {
        OxyError::RemoteUnavailable {
            node: node.name.clone(),
            message: format!("timed out after {}ms", budget.as_millis()),
        }
    } else if matches!(node.kind, NodeKind::ModelConnector(_)) {
        OxyError::ModelTimeout(node.name.clone())
    } else {
        OxyError::Timeout(node.name.clone())
    }
}

impl Mas {
    pub fn builder(name: impl Into<String>) -> MasBuilder {
        MasBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn space(&self) -> &OxySpace {
        &self.space
    }

    pub fn origin(&self) -> SpaceOrigin {
        self.origin
    }

    pub fn settings(&self) -> &MasSettings {
        &self.settings
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    pub fn context(&self) -> &ContextEngine {
        &self.context
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    /// 外部调用：返回的 OxyResponse 在失败时 state = Failed 并带错误种类
    pub async fn call(&self, node: &str, input: impl Into<CallInput>) -> OxyResponse {
        let req = OxyRequest::root(node, input.into(), CancellationToken::new());
        self.call_request(req).await
    }

    /// 外部调用并推送过程事件
    pub async fn call_with_events(
        &self,
        node: &str,
        input: impl Into<CallInput>,
        events: UnboundedSender<ReactEvent>,
    ) -> OxyResponse {
        let req = OxyRequest::root(node, input.into(), CancellationToken::new()).with_events(events);
        self.call_request(req).await
    }

    /// 以已构造的请求作为外部调用执行（远程入口也走这里）
    pub async fn call_request(&self, req: OxyRequest) -> OxyResponse {
        if self.settings.checkpoint && !req.transient_session {
            let root = RootCall {
                callee: req.callee.clone(),
                query: req.query.clone(),
                user_id: req.user_id.clone(),
                group_data: req.group_data.clone(),
                attachments: req.attachments.clone(),
                history: self.history.window(&req.session_id),
                history_turns: self.history.turns(&req.session_id),
            };
            if let Err(e) = self.ledger.begin_run(&self.name, &req.session_id, root).await {
                tracing::warn!(mas = %self.name, session = %req.session_id, error = %e, "ledger begin failed");
            }
        }
        self.run_root(req).await
    }

    async fn run_root(&self, mut req: OxyRequest) -> OxyResponse {
        let started_at = now_ms();
        let start = Instant::now();
        let external = req.cancel.clone();
        let lease = self.supervisor.lease(&req.session_id);
        let token = lease.token().clone();
        req.cancel = token.clone();

        tracing::info!(
            mas = %self.name,
            node = %req.callee,
            session = %req.session_id,
            trace_id = %req.trace_id,
            "call started"
        );
        let result = tokio::select! {
            _ = external.cancelled() => {
                token.cancel();
                Err(OxyError::Cancelled)
            }
            r = self.invoke(req.clone()) => r,
        };

        // 回放期间从未触达目标：无论结果如何都视为断点缺口
        let result = match &req.replay {
            Some(cursor) if !cursor.is_live() => Err(OxyError::CheckpointGap {
                session_id: req.session_id.clone(),
                target: cursor.target().to_string(),
            }),
            _ => result,
        };

        drop(lease);

        match result {
            Ok(resp) => {
                self.remember_turn(&req, &resp.output);
                tracing::info!(
                    mas = %self.name,
                    node = %req.callee,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "call completed"
                );
                resp
            }
            Err(e) => {
                tracing::warn!(mas = %self.name, node = %req.callee, error = %e, "call failed");
                OxyResponse::failed(&req, &e, started_at, start.elapsed())
            }
        }
    }

    /// 写入短期历史，并在配置了历史索引时后台建索引
    ///
    /// 回放时先把历史回退到原调用开始时的快照，本轮替换原先记录的那一轮。
    fn remember_turn(&self, req: &OxyRequest, answer: &str) {
        if req.transient_session {
            return;
        }
        if let Some(cursor) = &req.replay {
            self.history
                .restore(&req.session_id, cursor.history(), cursor.history_turns());
        }
        let turn = self.history.record_turn(&req.session_id, &req.query, answer);
        if let Some(index) = &self.clients.history_index {
            let records = build_index_records(
                &self.chunker,
                &req.user_id,
                &req.session_id,
                turn,
                &req.query,
                answer,
            );
            let _ = spawn_history_indexing(index.clone(), records);
        }
    }

    /// 批量外部调用，结果顺序与输入一致
    pub async fn call_batch<I, S>(&self, calls: I) -> Vec<OxyResponse>
    where
        I: IntoIterator<Item = (S, CallInput)>,
        S: AsRef<str>,
    {
        let futures: Vec<_> = calls
            .into_iter()
            .map(|(node, input)| {
                let req = OxyRequest::root(node.as_ref(), input, CancellationToken::new());
                self.call_request(req)
            })
            .collect();
        join_all(futures).await
    }

    /// 后台执行外部调用（fire-and-forget，可 await 句柄取结果）
    pub fn spawn_call(
        self: &Arc<Self>,
        node: impl Into<String>,
        input: CallInput,
    ) -> tokio::task::JoinHandle<OxyResponse> {
        let mas = Arc::clone(self);
        let node = node.into();
        tokio::spawn(async move { mas.call(&node, input).await })
    }

    /// 从断点续跑：重放会话最近一次外部调用，该区段的顶层步骤按序视为已完成，首个实时执行的顶层步骤必须是 target
    ///
    /// 区段完整回放后若下一步不是 target 且 target 在区段内有记录，则截断到 target 最后一次出现处重跑。
    /// 更早的区段保持不变。无账本返回 CheckpointNotFound；target 未被触达返回 CheckpointGap（账本保持原样）。
    pub async fn resume(&self, session_id: &str, target: &str) -> Result<OxyResponse, OxyError> {
        let ledger = self
            .ledger
            .load(&self.name, session_id)
            .await?
            .ok_or_else(|| OxyError::CheckpointNotFound(session_id.to_string()))?;
        let run = ledger
            .latest_run()
            .cloned()
            .ok_or_else(|| OxyError::CheckpointNotFound(session_id.to_string()))?;
        let entries = ledger.latest_entries().to_vec();

        tracing::info!(
            mas = %self.name,
            session = %session_id,
            target = %target,
            segments = ledger.runs.len(),
            recorded = entries.len(),
            "resuming session"
        );

        let resp = self
            .replay_root(&run.root, session_id, target, entries.clone())
            .await;
        match resp.error_kind() {
            Some(crate::core::ErrorKind::CheckpointGap) => {}
            _ => return Ok(resp),
        }

        let Some(pos) = entries.iter().rposition(|r| r.executor == target) else {
            return Err(OxyError::CheckpointGap {
                session_id: session_id.to_string(),
                target: target.to_string(),
            });
        };
        let mut truncated = ledger.clone();
        truncated.truncate(run.start + pos);
        self.ledger.replace(truncated).await?;

        let resp = self
            .replay_root(&run.root, session_id, target, entries[..pos].to_vec())
            .await;
        if resp.error_kind() == Some(crate::core::ErrorKind::CheckpointGap) {
            self.ledger.replace(ledger).await?;
            return Err(OxyError::CheckpointGap {
                session_id: session_id.to_string(),
                target: target.to_string(),
            });
        }
        Ok(resp)
    }

    async fn replay_root(
        &self,
        root: &RootCall,
        session_id: &str,
        target: &str,
        entries: Vec<ExecResult>,
    ) -> OxyResponse {
        let mut req = OxyRequest::root(
            root.callee.clone(),
            root.to_input(session_id),
            CancellationToken::new(),
        );
        req.replay = Some(Arc::new(
            ReplayCursor::new(session_id, target, entries).with_history(root),
        ));
        self.run_root(req).await
    }

    /// 取消会话内所有进行中的调用（包括闸门等待）
    pub fn cancel_session(&self, session_id: &str) -> bool {
        let cancelled = self.supervisor.cancel(session_id);
        tracing::info!(mas = %self.name, session = %session_id, cancelled, "session cancel requested");
        cancelled
    }

    /// 当前有在途调用的会话数
    pub fn active_sessions(&self) -> usize {
        self.supervisor.active_sessions()
    }

    /// 取消所有会话（进程关闭时使用）
    pub fn cancel_all_sessions(&self) {
        self.supervisor.cancel_all();
    }

    /// 结束会话：取消进行中调用，移除账本与短期历史
    pub async fn end_session(&self, session_id: &str) -> Result<bool, OxyError> {
        self.supervisor.end(session_id);
        self.history.clear(session_id);
        let removed = self.ledger.remove(&self.name, session_id).await?;
        tracing::info!(mas = %self.name, session = %session_id, removed, "session ended");
        Ok(removed)
    }

    /// 节点调用（策略内部的子调用与外部调用共用）
    pub fn invoke(&self, req: OxyRequest) -> BoxFuture<'_, Result<OxyResponse, OxyError>> {
        Box::pin(async move {
            if req.cancel.is_cancelled() {
                return Err(OxyError::Cancelled);
            }
            if req.has_ancestor(&req.callee) {
                let err = OxyError::DelegationCycle {
                    target: req.callee.clone(),
                    chain: req.ancestors.join(" > "),
                };
                tracing::warn!(mas = %self.name, error = %err, "delegation cycle rejected");
                return Err(err);
            }
            let node = self.space.resolve(&req.callee)?;

            let top_level = req.is_top_level_step();
            if top_level {
                if let Some(cursor) = &req.replay {
                    if let Some(recorded) = cursor.take(&req.callee) {
                        tracing::debug!(mas = %self.name, node = %req.callee, "step replayed from ledger");
                        return recorded.response.into_result();
                    }
                    cursor.check_live(&req.callee)?;
                }
            }

            let mut budget = node.timeout.unwrap_or(self.settings.default_timeout);
            if let Some(rem) = req.remaining() {
                budget = budget.min(rem);
            }
            let start = Instant::now();
            let req = req.with_deadline(start + budget);
            // 闸门等待计入预算：执行只能用到截止时间为止
            let deadline = req.deadline.unwrap_or(start + budget);

            let started_at = now_ms();
            let permit = if node.is_gated() {
                let wait = match (self.settings.acquire_timeout, req.remaining()) {
                    (Some(a), Some(r)) => Some(a.min(r)),
                    (a, r) => a.or(r),
                };
                Some(self.gate.acquire(wait, &req.cancel).await?)
            } else {
                None
            };

            let result = tokio::select! {
                _ = req.cancel.cancelled() => Err(OxyError::Cancelled),
                r = tokio::time::timeout_at(deadline, self.execute(&node, &req)) => {
                    r.unwrap_or_else(|_| Err(timeout_error(&node, budget)))
                }
            };
            drop(permit);
            let elapsed = start.elapsed();

            let audit = serde_json::json!({
                "event": "node_audit",
                "mas": self.name,
                "node": node.name,
                "kind": node.kind.label(),
                "remote": node.is_remote(),
                "trace_id": req.trace_id,
                "from_trace_id": req.from_trace_id,
                "session_id": req.session_id,
                "ok": result.is_ok(),
                "outcome": match &result {
                    Ok(_) => "completed".to_string(),
                    Err(e) => format!("{:?}", e.kind()),
                },
                "duration_ms": elapsed.as_millis() as u64,
            });
            tracing::info!(audit = %audit.to_string(), "node");

            let outcome = result.map(|o| OxyResponse::completed(&req, o.output, started_at, elapsed, o.exec_results));

            if top_level && self.settings.checkpoint && !req.transient_session {
                let response = match &outcome {
                    Ok(resp) => resp.clone(),
                    Err(e) => OxyResponse::failed(&req, e, started_at, elapsed),
                };
                let entry = ExecResult {
                    executor: req.callee.clone(),
                    response,
                };
                if let Err(e) = self.ledger.append(&self.name, &req.session_id, entry).await {
                    tracing::warn!(mas = %self.name, node = %req.callee, error = %e, "ledger append failed");
                }
            }
            outcome
        })
    }

    async fn execute(&self, node: &Node, req: &OxyRequest) -> Result<NodeOutcome, OxyError> {
        if let Some(endpoint) = node.endpoint() {
            return self.dispatch_remote(node, endpoint, req).await;
        }
        match &node.kind {
            NodeKind::ModelConnector(model) => {
                let messages = req
                    .messages
                    .clone()
                    .unwrap_or_else(|| vec![Message::user(req.query.clone())]);
                model
                    .client
                    .complete(&messages, &model.params)
                    .await
                    .map(NodeOutcome::leaf)
                    .map_err(|message| OxyError::ModelFailure {
                        model: node.name.clone(),
                        message,
                    })
            }
            NodeKind::Tool(tool) => {
                let args = normalize_args(req.arguments.clone(), &req.query);
                tool.handler
                    .validate(&args)
                    .map_err(|message| OxyError::InvalidArguments {
                        tool: node.name.clone(),
                        message,
                    })?;
                tool.handler
                    .execute(args)
                    .await
                    .map(NodeOutcome::leaf)
                    .map_err(|message| OxyError::ToolExecutionFailure {
                        tool: node.name.clone(),
                        message,
                    })
            }
            NodeKind::ReActAgent(cfg) => run_react(self, node, cfg, None, req).await,
            NodeKind::MasterAgent(master) => run_react(self, node, &master.react, Some(master), req).await,
            NodeKind::WorkflowAgent(cfg) => run_workflow(self, node, cfg, req).await,
        }
    }

    async fn dispatch_remote(&self, node: &Node, endpoint: &str, req: &OxyRequest) -> Result<NodeOutcome, OxyError> {
        let dispatcher = self.dispatcher.as_ref().ok_or_else(|| OxyError::RemoteUnavailable {
            node: node.name.clone(),
            message: "no remote dispatcher configured".to_string(),
        })?;
        let response = dispatcher
            .dispatch(endpoint, CallEnvelope::from_request(req))
            .await?;
        let (output, exec_results) = response.into_outcome(&node.name)?;
        Ok(NodeOutcome {
            output,
            exec_results,
        })
    }
}
