//! 能力节点：模型连接、工具、ReAct 智能体、工作流智能体、主控智能体
//!
//! Node 在注册后不可变，由 OxySpace 持有；NodeKind 为带配置的枚举，编排器按 match 分派执行。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::{LlmClient, ModelParams};
use crate::tools::Tool;
use crate::workflow::WorkflowConfig;

/// 节点位置：本地执行，或经远程分发器发往 endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NodeLocation {
    #[default]
    Local,
    Remote { endpoint: String },
}

/// 模型连接节点配置
#[derive(Clone)]
pub struct ModelConfig {
    pub client: Arc<dyn LlmClient>,
    pub params: ModelParams,
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// 工具节点配置
#[derive(Clone)]
pub struct ToolConfig {
    pub handler: Arc<dyn Tool>,
}

impl fmt::Debug for ToolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolConfig")
            .field("tool", &self.handler.name())
            .finish()
    }
}

/// ReAct 智能体配置
#[derive(Debug, Clone)]
pub struct ReActConfig {
    /// 思考阶段调用的模型连接节点名
    pub llm: String,
    /// 可调用的工具节点名；为空时继承委派方传下来的作用域
    pub tools: Vec<String>,
    pub system_prompt: Option<String>,
    /// 信任模式：工具原始输出直接作为最终答案
    pub trust_mode: bool,
    /// None 时使用配置 [react].max_iterations
    pub max_iterations: Option<usize>,
    /// 工具失败时写回 Observation 继续循环，而不是终止
    pub tool_failure_as_observation: bool,
    /// 循环上下文的记忆上限；None 表示不截断
    pub memory_cap: Option<usize>,
}

impl ReActConfig {
    pub fn new(llm: impl Into<String>) -> Self {
        Self {
            llm: llm.into(),
            tools: Vec::new(),
            system_prompt: None,
            trust_mode: false,
            max_iterations: None,
            tool_failure_as_observation: false,
            memory_cap: None,
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn trust_mode(mut self, on: bool) -> Self {
        self.trust_mode = on;
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }

    pub fn observe_tool_failures(mut self, on: bool) -> Self {
        self.tool_failure_as_observation = on;
        self
    }

    pub fn with_memory_cap(mut self, cap: usize) -> Self {
        self.memory_cap = Some(cap);
        self
    }
}

/// 子智能体调用失败时主控智能体的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegateFailurePolicy {
    /// 失败直接终止主控调用
    #[default]
    Abort,
    /// 失败作为 Observation 写回，由主控继续决策
    Observe,
}

/// 主控智能体：ReAct 循环，THINK 可选择委派给子智能体
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub react: ReActConfig,
    pub sub_agents: Vec<String>,
    pub on_delegate_failure: DelegateFailurePolicy,
}

impl MasterConfig {
    pub fn new<I, S>(react: ReActConfig, sub_agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            react,
            sub_agents: sub_agents.into_iter().map(Into::into).collect(),
            on_delegate_failure: DelegateFailurePolicy::default(),
        }
    }

    pub fn on_delegate_failure(mut self, policy: DelegateFailurePolicy) -> Self {
        self.on_delegate_failure = policy;
        self
    }

    pub fn is_sub_agent(&self, name: &str) -> bool {
        self.sub_agents.iter().any(|s| s == name)
    }
}

/// 节点种类（带种类专属配置）
#[derive(Debug, Clone)]
pub enum NodeKind {
    ModelConnector(ModelConfig),
    Tool(ToolConfig),
    ReActAgent(ReActConfig),
    WorkflowAgent(WorkflowConfig),
    MasterAgent(MasterConfig),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::ModelConnector(_) => "model_connector",
            NodeKind::Tool(_) => "tool",
            NodeKind::ReActAgent(_) => "react_agent",
            NodeKind::WorkflowAgent(_) => "workflow_agent",
            NodeKind::MasterAgent(_) => "master_agent",
        }
    }

    /// 是否为叶子节点（模型 / 工具）；叶子调用受并发闸门约束
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeKind::ModelConnector(_) | NodeKind::Tool(_))
    }

    pub fn is_agent(&self) -> bool {
        !self.is_leaf()
    }
}

/// 能力节点
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub description: String,
    pub kind: NodeKind,
    /// 单次调用超时；None 时使用 [mas].default_timeout_secs
    pub timeout: Option<Duration>,
    pub location: NodeLocation,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind,
            timeout: None,
            location: NodeLocation::Local,
        }
    }

    pub fn model(name: impl Into<String>, client: Arc<dyn LlmClient>, params: ModelParams) -> Self {
        Self::new(name, NodeKind::ModelConnector(ModelConfig { client, params }))
    }

    /// 以工具自身的 name 注册
    pub fn tool(handler: impl Tool + 'static) -> Self {
        Self::tool_arc(Arc::new(handler))
    }

    pub fn tool_arc(handler: Arc<dyn Tool>) -> Self {
        let name = handler.name().to_string();
        let description = handler.description().to_string();
        Self::new(name, NodeKind::Tool(ToolConfig { handler })).with_description(description)
    }

    pub fn react(name: impl Into<String>, cfg: ReActConfig) -> Self {
        Self::new(name, NodeKind::ReActAgent(cfg))
    }

    pub fn workflow(name: impl Into<String>, cfg: WorkflowConfig) -> Self {
        Self::new(name, NodeKind::WorkflowAgent(cfg))
    }

    pub fn master(name: impl Into<String>, cfg: MasterConfig) -> Self {
        Self::new(name, NodeKind::MasterAgent(cfg))
    }

    /// 远程智能体占位：本地只保存名称、描述与 endpoint，执行交给远端注册表
    pub fn remote_agent(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::new(name, NodeKind::ReActAgent(ReActConfig::new(String::new()))).at_remote(endpoint)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_timeout_secs(self, secs: u64) -> Self {
        self.with_timeout(Duration::from_secs(secs))
    }

    pub fn at_remote(mut self, endpoint: impl Into<String>) -> Self {
        self.location = NodeLocation::Remote {
            endpoint: endpoint.into(),
        };
        self
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.location, NodeLocation::Remote { .. })
    }

    pub fn endpoint(&self) -> Option<&str> {
        match &self.location {
            NodeLocation::Remote { endpoint } => Some(endpoint),
            NodeLocation::Local => None,
        }
    }

    /// 是否受并发闸门约束（叶子节点与远程节点）
    pub fn is_gated(&self) -> bool {
        self.kind.is_leaf() || self.is_remote()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::tools::EchoTool;

    #[test]
    fn test_tool_node_takes_tool_name() {
        let node = Node::tool(EchoTool);
        assert_eq!(node.name, "echo");
        assert_eq!(node.kind.label(), "tool");
        assert!(!node.description.is_empty());
        assert!(node.is_gated());
    }

    #[test]
    fn test_remote_agent_is_gated() {
        let node = Node::remote_agent("weather", "http://127.0.0.1:9000");
        assert!(node.is_remote());
        assert_eq!(node.endpoint(), Some("http://127.0.0.1:9000"));
        assert!(node.is_gated());
    }

    #[test]
    fn test_agent_not_gated() {
        let node = Node::react("a", ReActConfig::new("llm").with_tools(["echo"]));
        assert!(!node.is_gated());
        let model = Node::model("llm", Arc::new(MockLlmClient), ModelParams::default())
            .with_timeout_secs(5);
        assert_eq!(model.timeout, Some(Duration::from_secs(5)));
    }
}
