//! 当前时间工具

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::tools::Tool;

const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 返回当前 UTC 时间；可选参数 format（chrono 格式串）
pub struct CurrentTimeTool {
    name: String,
    fixed: Option<DateTime<Utc>>,
}

impl CurrentTimeTool {
    pub fn new() -> Self {
        Self {
            name: "current_time".to_string(),
            fixed: None,
        }
    }

    /// 以指定节点名注册（如 time_tool）
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fixed: None,
        }
    }

    /// 固定时钟（测试用）
    pub fn with_fixed_time(mut self, at: DateTime<Utc>) -> Self {
        self.fixed = Some(at);
        self
    }
}

impl Default for CurrentTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Get the current UTC date and time. Args: {\"format\": \"%Y-%m-%d %H:%M:%S\"} (optional)"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "format": { "type": "string" },
                "query": { "type": "string" }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let now = self.fixed.unwrap_or_else(Utc::now);
        let fmt = args
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_FORMAT);
        Ok(now.format(fmt).to_string())
    }
}
