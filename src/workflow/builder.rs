//! 工作流构建器
//!
//! 提供流畅的API来构建流水线

use serde_json::Value;

use crate::core::OxyError;
use crate::workflow::types::*;

/// 工作流构建器
#[derive(Debug, Default)]
pub struct WorkflowBuilder {
    steps: Vec<WorkflowStep>,
    system_prompt: Option<String>,
    memory_cap: Option<usize>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置系统提示（模型步骤使用）
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// 设置流水线上下文上限
    pub fn memory_cap(mut self, cap: usize) -> Self {
        self.memory_cap = Some(cap);
        self
    }

    /// 添加步骤，输入为上一步输出
    pub fn step(self, node: impl Into<String>) -> Self {
        self.step_with(node, StepInput::Previous)
    }

    /// 添加步骤并指定输入绑定
    pub fn step_with(mut self, node: impl Into<String>, input: StepInput) -> Self {
        let mut step = WorkflowStep::new(node);
        step.input = input;
        self.steps.push(step);
        self
    }

    /// 添加可选步骤：失败时跳过
    pub fn optional_step(mut self, node: impl Into<String>, input: StepInput) -> Self {
        let mut step = WorkflowStep::new(node);
        step.input = input;
        step.optional = true;
        self.steps.push(step);
        self
    }

    /// 为最近添加的步骤设置固定工具参数
    pub fn with_arguments(mut self, args: Value) -> Self {
        if let Some(last) = self.steps.last_mut() {
            last.arguments = Some(args);
        }
        self
    }

    /// 构建工作流配置
    pub fn build(self) -> Result<WorkflowConfig, OxyError> {
        if self.steps.is_empty() {
            return Err(OxyError::Config("workflow requires at least one step".to_string()));
        }
        if let Some(step) = self.steps.iter().find(|s| s.node.trim().is_empty()) {
            return Err(OxyError::Config(format!(
                "workflow step has empty node name: {step:?}"
            )));
        }
        Ok(WorkflowConfig {
            steps: self.steps,
            system_prompt: self.system_prompt,
            memory_cap: self.memory_cap.unwrap_or(DEFAULT_PIPELINE_MEMORY_CAP).max(1),
        })
    }
}
