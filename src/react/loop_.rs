//! ReAct 主循环
//!
//! THINK（调用模型节点）→ ACT（调用工具节点或委派子智能体）→ OBSERVE（工具结果写回记忆）→ 下一轮 THINK；
//! 模型给出最终答案即 DONE，信任模式下工具原始输出即最终答案。超过 max_iterations 返回 LoopBoundExceeded。
//! 所有子调用经 Mas::invoke，因此同样受并发闸门、超时、取消、断点回放与环检测约束。

use serde_json::Value;

use crate::core::{
    DelegateFailurePolicy, ExecResult, Mas, MasterConfig, Node, NodeOutcome, OxyError, OxyRequest,
    OxyResponse, ReActConfig, RecoveryAction,
};
use crate::memory::Message;
use crate::react::delegation::delegation_request;
use crate::react::events::{preview, OBSERVATION_PREVIEW_CHARS};
use crate::react::{agent_system_prompt, parse_llm_output, CatalogEntry, PlannerOutput, ReactEvent};

/// 记忆相关展示最大字符数
const MEMORY_PREVIEW_CHARS: usize = 300;

/// 实际可用工具：自身声明优先；未声明时继承委派方的作用域
pub fn effective_tools(cfg: &ReActConfig, req: &OxyRequest) -> Vec<String> {
    if !cfg.tools.is_empty() {
        cfg.tools.clone()
    } else {
        req.scope.clone().unwrap_or_default()
    }
}

fn build_catalog(mas: &Mas, tools: &[String], delegates: &[String]) -> Vec<CatalogEntry> {
    let mut catalog = Vec::with_capacity(tools.len() + delegates.len());
    for (names, delegate) in [(tools, false), (delegates, true)] {
        for name in names {
            let entry = match mas.space().resolve(name) {
                Ok(node) => CatalogEntry {
                    name: name.clone(),
                    description: node.description.clone(),
                    parameters: match &node.kind {
                        crate::core::NodeKind::Tool(t) => Some(t.handler.parameters_schema()),
                        _ => None,
                    },
                    delegate,
                },
                Err(_) => {
                    tracing::warn!(node = %name, "catalog entry not registered in space");
                    CatalogEntry {
                        name: name.clone(),
                        description: String::new(),
                        parameters: None,
                        delegate,
                    }
                }
            };
            catalog.push(entry);
        }
    }
    catalog
}

fn failed_exec(child: &OxyRequest, err: &OxyError) -> ExecResult {
    ExecResult {
        executor: child.callee.clone(),
        response: OxyResponse::failed(
            child,
            err,
            chrono::Utc::now().timestamp_millis(),
            std::time::Duration::ZERO,
        ),
    }
}

/// 执行 ReAct（master 为 Some 时按主控智能体运行，THINK 可选择委派）
pub async fn run_react(
    mas: &Mas,
    node: &Node,
    cfg: &ReActConfig,
    master: Option<&MasterConfig>,
    req: &OxyRequest,
) -> Result<NodeOutcome, OxyError> {
    let agent = node.name.clone();
    let max_iterations = cfg
        .max_iterations
        .unwrap_or(mas.settings().max_iterations)
        .max(1);
    let tools = effective_tools(cfg, req);
    let delegates: Vec<String> = master.map(|m| m.sub_agents.clone()).unwrap_or_default();

    let catalog = build_catalog(mas, &tools, &delegates);
    let system = agent_system_prompt(cfg.system_prompt.as_deref(), &catalog);
    let ctx = mas.context().assemble(req, system).await;
    if !ctx.long_term.is_empty() {
        req.emit(ReactEvent::MemoryRecovery {
            agent: agent.clone(),
            preview: preview(&ctx.long_term.raw_block(), MEMORY_PREVIEW_CHARS),
        });
    }
    let mut memory = ctx.loop_context(cfg.memory_cap.or(mas.settings().memory_cap));
    let mut exec_results: Vec<ExecResult> = Vec::new();

    for step in 0..max_iterations {
        if req.cancel.is_cancelled() {
            req.emit(ReactEvent::Error {
                agent: agent.clone(),
                text: "Cancelled".to_string(),
            });
            return Err(OxyError::Cancelled);
        }
        req.emit(ReactEvent::StepUpdate {
            agent: agent.clone(),
            step,
            max_steps: max_iterations,
        });

        // THINK
        req.emit(ReactEvent::Thinking { agent: agent.clone() });
        let think = req.child(&cfg.llm).with_messages(memory.messages().to_vec());
        let think_resp = mas.invoke(think).await?;
        let output = think_resp.output.clone();
        exec_results.push(ExecResult {
            executor: cfg.llm.clone(),
            response: think_resp,
        });

        let call = match parse_llm_output(&cfg.llm, &output) {
            Ok(PlannerOutput::Response(answer)) => {
                tracing::debug!(agent = %agent, step, "react done");
                req.emit(ReactEvent::Done {
                    agent: agent.clone(),
                    output: answer.clone(),
                });
                return Ok(NodeOutcome {
                    output: answer,
                    exec_results,
                });
            }
            Ok(PlannerOutput::ToolCall(call)) => call,
            Err(e) => match mas.recovery().handle(&e, false) {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    req.emit(ReactEvent::Recovery {
                        agent: agent.clone(),
                        action: "RetryWithPrompt".to_string(),
                        detail: prompt.clone(),
                    });
                    memory.push(Message::assistant(output));
                    memory.push(Message::user(prompt));
                    continue;
                }
                _ => {
                    req.emit(ReactEvent::Error {
                        agent: agent.clone(),
                        text: e.to_string(),
                    });
                    return Err(e);
                }
            },
        };

        // ACT
        memory.push(Message::assistant(output));
        let is_delegate = master.map(|m| m.is_sub_agent(&call.tool)).unwrap_or(false);
        let child = if is_delegate {
            let child = delegation_request(req, &call, &tools);
            req.emit(ReactEvent::Delegation {
                agent: agent.clone(),
                target: call.tool.clone(),
                query: child.query.clone(),
            });
            child
        } else {
            req.emit(ReactEvent::ToolCall {
                agent: agent.clone(),
                tool: call.tool.clone(),
                args: call.args.clone(),
            });
            req.child(&call.tool).with_arguments(call.args.clone())
        };

        let result = if !is_delegate && !tools.iter().any(|t| t == &call.tool) {
            Err(OxyError::NodeNotFound(call.tool.clone()))
        } else {
            mas.invoke(child.clone()).await
        };

        // OBSERVE
        match result {
            Ok(resp) => {
                let observation = resp.output.clone();
                exec_results.push(ExecResult {
                    executor: call.tool.clone(),
                    response: resp,
                });
                req.emit(ReactEvent::Observation {
                    agent: agent.clone(),
                    tool: call.tool.clone(),
                    preview: preview(&observation, OBSERVATION_PREVIEW_CHARS),
                });
                if cfg.trust_mode {
                    req.emit(ReactEvent::Done {
                        agent: agent.clone(),
                        output: observation.clone(),
                    });
                    return Ok(NodeOutcome {
                        output: observation,
                        exec_results,
                    });
                }
                memory.push(Message::tool(&call.tool, observation));
            }
            Err(e) => {
                req.emit(ReactEvent::ToolFailure {
                    agent: agent.clone(),
                    tool: call.tool.clone(),
                    reason: e.to_string(),
                });
                let observe = if is_delegate {
                    master
                        .map(|m| m.on_delegate_failure == DelegateFailurePolicy::Observe)
                        .unwrap_or(false)
                } else {
                    cfg.tool_failure_as_observation
                };
                match mas.recovery().handle(&e, observe) {
                    RecoveryAction::Observe(msg) => {
                        req.emit(ReactEvent::Recovery {
                            agent: agent.clone(),
                            action: "Observe".to_string(),
                            detail: msg.clone(),
                        });
                        exec_results.push(failed_exec(&child, &e));
                        memory.push(Message::tool(&call.tool, msg));
                    }
                    RecoveryAction::RetryWithPrompt(prompt) => {
                        memory.push(Message::user(prompt));
                    }
                    RecoveryAction::Abort => {
                        req.emit(ReactEvent::Error {
                            agent: agent.clone(),
                            text: e.to_string(),
                        });
                        return Err(e);
                    }
                }
            }
        }
    }

    req.emit(ReactEvent::Error {
        agent: agent.clone(),
        text: format!("max iterations ({max_iterations}) reached"),
    });
    Err(OxyError::LoopBoundExceeded {
        agent,
        max_iterations,
    })
}

/// 调用方未给参数时以 {"query": query} 代替
pub fn normalize_args(args: Value, query: &str) -> Value {
    if args.is_null() {
        serde_json::json!({ "query": query })
    } else {
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    use crate::core::CallInput;

    #[test]
    fn test_effective_tools_declared_wins() {
        let cfg = ReActConfig::new("llm").with_tools(["a"]);
        let req = OxyRequest::root("x", CallInput::new("q"), CancellationToken::new())
            .with_scope(vec!["b".into(), "c".into()]);
        assert_eq!(effective_tools(&cfg, &req), vec!["a".to_string()]);

        let inherit = ReActConfig::new("llm");
        assert_eq!(effective_tools(&inherit, &req), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_normalize_null_args() {
        assert_eq!(
            normalize_args(Value::Null, "hello"),
            serde_json::json!({ "query": "hello" })
        );
        let args = serde_json::json!({ "text": "x" });
        assert_eq!(normalize_args(args.clone(), "hello"), args);
    }
}
