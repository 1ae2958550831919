//! 节点注册表（OxySpace）与空间目录（SpaceCatalog）
//!
//! OxySpace：按注册顺序保存节点，名字唯一，构建后只读。
//! SpaceCatalog：按编排器名解析空间，优先级 显式声明 > 自定义 > 全局 > 内置默认。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::core::{Node, OxyError, ReActConfig};
use crate::llm::{LlmClient, ModelParams};
use crate::tools::{CurrentTimeTool, EchoTool};

/// 有序、按名索引的节点集合
#[derive(Debug, Clone, Default)]
pub struct OxySpace {
    nodes: Vec<Arc<Node>>,
    index: HashMap<String, usize>,
}

impl OxySpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Result<Self, OxyError> {
        let mut space = Self::new();
        for node in nodes {
            space.register(node)?;
        }
        Ok(space)
    }

    /// 注册节点；重名返回 DuplicateName
    pub fn register(&mut self, node: Node) -> Result<Arc<Node>, OxyError> {
        if self.index.contains_key(&node.name) {
            return Err(OxyError::DuplicateName(node.name));
        }
        let node = Arc::new(node);
        self.index.insert(node.name.clone(), self.nodes.len());
        self.nodes.push(node.clone());
        Ok(node)
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<Node>, OxyError> {
        self.index
            .get(name)
            .map(|&i| self.nodes[i].clone())
            .ok_or_else(|| OxyError::NodeNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// 按注册顺序的节点名
    pub fn names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// 空间来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceOrigin {
    Declared,
    Custom,
    Global,
    Default,
}

/// 各来源的节点表；resolve 时按优先级选取并构建 OxySpace
#[derive(Debug, Clone, Default)]
pub struct SpaceCatalog {
    declared: HashMap<String, Vec<Node>>,
    custom: HashMap<String, Vec<Node>>,
    global: Option<Vec<Node>>,
    default_nodes: Vec<Node>,
}

impl SpaceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为指定编排器显式声明空间（最高优先级）
    pub fn declare(mut self, mas_name: impl Into<String>, nodes: Vec<Node>) -> Self {
        self.declared.insert(mas_name.into(), nodes);
        self
    }

    /// 程序化提供的自定义空间
    pub fn custom(mut self, mas_name: impl Into<String>, nodes: Vec<Node>) -> Self {
        self.custom.insert(mas_name.into(), nodes);
        self
    }

    /// 进程级全局空间（对所有编排器名生效）
    pub fn global(mut self, nodes: Vec<Node>) -> Self {
        self.global = Some(nodes);
        self
    }

    pub fn default_space(mut self, nodes: Vec<Node>) -> Self {
        self.default_nodes = nodes;
        self
    }

    pub fn resolve(&self, mas_name: &str) -> Result<(OxySpace, SpaceOrigin), OxyError> {
        if let Some(nodes) = self.declared.get(mas_name) {
            return Ok((OxySpace::from_nodes(nodes.iter().cloned())?, SpaceOrigin::Declared));
        }
        if let Some(nodes) = self.custom.get(mas_name) {
            return Ok((OxySpace::from_nodes(nodes.iter().cloned())?, SpaceOrigin::Custom));
        }
        if let Some(nodes) = &self.global {
            return Ok((OxySpace::from_nodes(nodes.iter().cloned())?, SpaceOrigin::Global));
        }
        tracing::warn!(mas = %mas_name, "no declared/custom/global space, falling back to default space");
        Ok((
            OxySpace::from_nodes(self.default_nodes.iter().cloned())?,
            SpaceOrigin::Default,
        ))
    }
}

/// 内置默认空间：一个模型连接、echo 与 current_time 工具、一个可用二者的 ReAct 智能体
pub fn builtin_default_space(llm: Arc<dyn LlmClient>, params: ModelParams) -> Vec<Node> {
    vec![
        Node::model("default_llm", llm, params)
            .with_description("Default language model connector"),
        Node::tool(EchoTool),
        Node::tool(CurrentTimeTool::new()),
        Node::react(
            "default_agent",
            ReActConfig::new("default_llm").with_tools(["echo", "current_time"]),
        )
        .with_description("General assistant with echo and clock tools"),
    ]
}
