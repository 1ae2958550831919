//! 工作流引擎
//!
//! 依次调用各步骤节点；模型步骤使用流水线上下文（已完成步骤的输出作为尾部工具结果）。
//! 必选步骤失败即中止后续；可选步骤的非致命失败记录为 Skipped 并继续。

use crate::core::{ExecResult, Mas, Node, NodeKind, NodeOutcome, OxyError, OxyRequest, OxyResponse};
use crate::memory::Message;
use crate::react::ReactEvent;
use crate::workflow::types::WorkflowConfig;

const DEFAULT_WORKFLOW_PROMPT: &str = "You are one step of a pipeline. Use the previous step results to answer.";

/// 执行工作流智能体
pub async fn run_workflow(
    mas: &Mas,
    node: &Node,
    cfg: &WorkflowConfig,
    req: &OxyRequest,
) -> Result<NodeOutcome, OxyError> {
    let agent = node.name.clone();
    let system = cfg
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_WORKFLOW_PROMPT.to_string());
    let ctx = mas.context().assemble(req, system).await;

    let mut previous: Option<String> = None;
    let mut tool_results: Vec<Message> = Vec::new();
    let mut exec_results: Vec<ExecResult> = Vec::with_capacity(cfg.steps.len());

    for (index, step) in cfg.steps.iter().enumerate() {
        if req.cancel.is_cancelled() {
            return Err(OxyError::Cancelled);
        }
        req.emit(ReactEvent::WorkflowStep {
            agent: agent.clone(),
            index,
            node: step.node.clone(),
        });

        let input = step.input.render(&req.query, previous.as_deref());
        let mut child = req.child(&step.node).with_query(input.clone());
        if let Some(args) = &step.arguments {
            child = child.with_arguments(args.clone());
        }
        let is_model = mas
            .space()
            .resolve(&step.node)
            .map(|n| matches!(n.kind, NodeKind::ModelConnector(_)))
            .unwrap_or(false);
        if is_model {
            let mut step_ctx = ctx.clone().with_tool_results(tool_results.clone());
            step_ctx.user_prompt = input;
            child = child.with_messages(step_ctx.pipeline_context(cfg.memory_cap).into_messages());
        }

        match mas.invoke(child.clone()).await {
            Ok(resp) => {
                tracing::debug!(workflow = %agent, index, step = %step.node, "workflow step completed");
                tool_results.push(Message::tool(&step.node, resp.output.clone()));
                previous = Some(resp.output.clone());
                exec_results.push(ExecResult {
                    executor: step.node.clone(),
                    response: resp,
                });
            }
            Err(e) if step.optional && !e.is_fatal() => {
                tracing::warn!(workflow = %agent, index, step = %step.node, error = %e, "optional step skipped");
                req.emit(ReactEvent::StepSkipped {
                    agent: agent.clone(),
                    node: step.node.clone(),
                    reason: e.to_string(),
                });
                exec_results.push(ExecResult {
                    executor: step.node.clone(),
                    response: OxyResponse::skipped(&child, &e),
                });
            }
            Err(e) => {
                tracing::warn!(workflow = %agent, index, step = %step.node, error = %e, "workflow aborted");
                return Err(e);
            }
        }
    }

    let output = previous.unwrap_or_default();
    req.emit(ReactEvent::Done {
        agent,
        output: output.clone(),
    });
    Ok(NodeOutcome {
        output,
        exec_results,
    })
}
