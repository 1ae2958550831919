//! 工作流类型定义
//!
//! 固定顺序的节点调用流水线；相邻步骤之间通过 StepInput 显式绑定输入

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 默认流水线上下文硬上限
pub const DEFAULT_PIPELINE_MEMORY_CAP: usize = 20;

/// 步骤输入绑定
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepInput {
    /// 工作流收到的原始查询
    Query,
    /// 上一个成功步骤的输出（首步时退回原始查询）
    #[default]
    Previous,
    /// 模板，支持 {query} 与 {previous} 占位
    Template(String),
}

impl StepInput {
    /// 按绑定生成本步骤的查询
    pub fn render(&self, query: &str, previous: Option<&str>) -> String {
        match self {
            StepInput::Query => query.to_string(),
            StepInput::Previous => previous.unwrap_or(query).to_string(),
            StepInput::Template(t) => t
                .replace("{query}", query)
                .replace("{previous}", previous.unwrap_or("")),
        }
    }
}

/// 流水线中的单个步骤
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// 目标节点名
    pub node: String,
    #[serde(default)]
    pub input: StepInput,
    /// 失败时记录跳过并继续
    #[serde(default)]
    pub optional: bool,
    /// 工具步骤的固定参数；为空时由编排器补成 {"query": ...}
    #[serde(default)]
    pub arguments: Option<Value>,
}

impl WorkflowStep {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            input: StepInput::default(),
            optional: false,
            arguments: None,
        }
    }
}

/// 工作流智能体配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_memory_cap")]
    pub memory_cap: usize,
}

fn default_memory_cap() -> usize {
    DEFAULT_PIPELINE_MEMORY_CAP
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_bindings() {
        assert_eq!(StepInput::Query.render("q", Some("p")), "q");
        assert_eq!(StepInput::Previous.render("q", Some("p")), "p");
        assert_eq!(StepInput::Previous.render("q", None), "q");
        assert_eq!(
            StepInput::Template("summarize {previous} for {query}".into()).render("q", Some("p")),
            "summarize p for q"
        );
    }

    #[test]
    fn test_step_deserialize_defaults() {
        let step: WorkflowStep = serde_json::from_str(r#"{"node": "echo"}"#).unwrap();
        assert_eq!(step.input, StepInput::Previous);
        assert!(!step.optional);
        let cfg: WorkflowConfig = serde_json::from_str(r#"{"steps": []}"#).unwrap();
        assert_eq!(cfg.memory_cap, DEFAULT_PIPELINE_MEMORY_CAP);
    }
}
