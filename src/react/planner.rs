//! Planner：系统提示拼装与模型输出解析
//!
//! parse_llm_output 从文本中提取 JSON：含有效 tool 字段则为 ToolCall，否则为最终答案；
//! 明显是工具调用却无法解析时返回 MalformedOutput，由恢复引擎注入重试提示。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::OxyError;
use crate::tools::tool_call_schema_json;

/// LLM 返回的 Tool Call（简化 JSON：{"tool": "time_tool", "args": {...}}）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// Planner 输出
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    /// 最终答案
    Response(String),
    /// 需要执行工具或委派
    ToolCall(ToolCall),
}

/// 取出候选 JSON 片段（```json ... ``` 或首个 { 到最后一个 }）
fn extract_json(trimmed: &str) -> Option<&str> {
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析 LLM 输出
pub fn parse_llm_output(model: &str, output: &str) -> Result<PlannerOutput, OxyError> {
    let trimmed = output.trim();
    let Some(json_str) = extract_json(trimmed) else {
        return Ok(PlannerOutput::Response(trimmed.to_string()));
    };

    match serde_json::from_str::<Value>(json_str) {
        Ok(value) => match value.get("tool").and_then(|t| t.as_str()) {
            Some(tool) if !tool.is_empty() => {
                let args = value.get("args").cloned().unwrap_or(Value::Null);
                Ok(PlannerOutput::ToolCall(ToolCall {
                    tool: tool.to_string(),
                    args,
                }))
            }
            _ => Ok(PlannerOutput::Response(trimmed.to_string())),
        },
        Err(e) if json_str.contains("\"tool\"") => Err(OxyError::MalformedOutput {
            model: model.to_string(),
            raw: format!("{}: {}", e, json_str),
        }),
        Err(_) => Ok(PlannerOutput::Response(trimmed.to_string())),
    }
}

/// 提示词中的可调用项（工具或子智能体）
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub name: String,
    pub description: String,
    pub parameters: Option<Value>,
    pub delegate: bool,
}

const DEFAULT_AGENT_PROMPT: &str = "You are a helpful agent. Solve the user's request step by step.";

/// 拼装智能体 system prompt：基础提示 + 可用工具 / 子智能体 + 输出格式约束
pub fn agent_system_prompt(base: Option<&str>, catalog: &[CatalogEntry]) -> String {
    let mut prompt = base.unwrap_or(DEFAULT_AGENT_PROMPT).to_string();

    let tools: Vec<&CatalogEntry> = catalog.iter().filter(|e| !e.delegate).collect();
    let delegates: Vec<&CatalogEntry> = catalog.iter().filter(|e| e.delegate).collect();

    if !tools.is_empty() {
        prompt.push_str("\n\n## Available tools\n");
        for t in tools {
            prompt.push_str(&format!("- {}: {}", t.name, t.description));
            if let Some(p) = &t.parameters {
                prompt.push_str(&format!(" (parameters: {})", p));
            }
            prompt.push('\n');
        }
    }
    if !delegates.is_empty() {
        prompt.push_str("\n## Sub-agents you may delegate to\n");
        for d in delegates {
            prompt.push_str(&format!(
                "- {}: {} (args: {{\"query\": \"task for the sub-agent\"}})\n",
                d.name, d.description
            ));
        }
    }
    if !catalog.is_empty() {
        prompt.push_str(
            "\nTo call a tool or delegate, output ONLY one JSON object matching this schema:\n",
        );
        prompt.push_str(&tool_call_schema_json());
        prompt.push_str("\nWhen you have the final answer, reply in plain text without JSON.");
    }
    prompt
}
