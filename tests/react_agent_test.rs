//! ReAct 智能体集成测试
//!
//! 使用 ScriptedLlmClient 确定性地驱动 THINK / ACT / OBSERVE，验证循环上限、信任模式、
//! 记忆上限、输出格式错误重试、工具失败作为观察以及过程事件。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use oxy::core::{ErrorKind, Node, ReActConfig};
use oxy::llm::{ModelParams, ScriptedLlmClient};
use oxy::memory::{Message, Role};
use oxy::react::ReactEvent;
use oxy::tools::{CurrentTimeTool, EchoTool, FnTool};
use oxy::{CallInput, Mas};
use tokio::sync::mpsc;

fn last_is_tool(messages: &[Message]) -> Option<&Message> {
    messages.last().filter(|m| m.role == Role::Tool)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ReactEvent>) -> Vec<ReactEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

#[derive(serde::Deserialize, schemars::JsonSchema)]
struct QueryArgs {
    #[allow(dead_code)]
    query: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_time_agent_calls_tool_once_and_answers_with_timestamp() {
        let fixed = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let llm = Arc::new(ScriptedLlmClient::new(|messages, _| {
            Ok(match last_is_tool(messages) {
                Some(m) => format!("The current time is {}", m.content),
                None => r#"{"tool": "time_tool", "args": {}}"#.to_string(),
            })
        }));
        let mas = Mas::builder("clock")
            .node(Node::model("llm", llm.clone(), ModelParams::default()))
            .node(Node::tool(CurrentTimeTool::named("time_tool").with_fixed_time(fixed)))
            .node(Node::react(
                "time_agent",
                ReActConfig::new("llm").with_tools(["time_tool"]),
            ))
            .build()
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let resp = mas.call_with_events("time_agent", "What time is it now?", tx).await;
        assert!(resp.is_completed(), "{resp:?}");
        assert_eq!(resp.output, "The current time is 2026-01-02 03:04:05");
        assert_eq!(llm.calls(), 2);

        let events = drain(&mut rx);
        let tool_calls = events
            .iter()
            .filter(|e| matches!(e, ReactEvent::ToolCall { tool, .. } if tool == "time_tool"))
            .count();
        let observations = events
            .iter()
            .filter(|e| matches!(e, ReactEvent::Observation { .. }))
            .count();
        assert_eq!(tool_calls, 1);
        assert_eq!(observations, 1);
        match events.last() {
            Some(ReactEvent::Done { agent, output }) => {
                assert_eq!(agent, "time_agent");
                assert!(output.contains("2026-01-02 03:04:05"));
            }
            other => panic!("Expected Done, got {other:?}"),
        }

        let executors: Vec<&str> = resp.exec_results.iter().map(|r| r.executor.as_str()).collect();
        assert_eq!(executors, vec!["llm", "time_tool", "llm"]);
    }

    #[tokio::test]
    async fn test_loop_bound_exceeded_after_max_iterations() {
        let llm = Arc::new(ScriptedLlmClient::new(|_, _| {
            Ok(r#"{"tool": "echo", "args": {"text": "again"}}"#.to_string())
        }));
        let mas = Mas::builder("loop")
            .node(Node::model("llm", llm.clone(), ModelParams::default()))
            .node(Node::tool(EchoTool))
            .node(Node::react(
                "stubborn",
                ReActConfig::new("llm").with_tools(["echo"]).with_max_iterations(3),
            ))
            .build()
            .unwrap();

        let resp = mas.call("stubborn", "never finishes").await;
        assert_eq!(resp.error_kind(), Some(ErrorKind::LoopBoundExceeded));
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_trust_mode_returns_raw_tool_output() {
        let llm = Arc::new(ScriptedLlmClient::new(|messages, _| {
            Ok(match last_is_tool(messages) {
                Some(m) => format!("Summary: {}", m.content),
                None => r#"{"tool": "echo", "args": {"text": "raw tool output"}}"#.to_string(),
            })
        }));
        let mas = Mas::builder("trust")
            .node(Node::model("llm", llm.clone(), ModelParams::default()))
            .node(Node::tool(EchoTool))
            .node(Node::react(
                "trusting",
                ReActConfig::new("llm").with_tools(["echo"]).trust_mode(true),
            ))
            .node(Node::react("normal", ReActConfig::new("llm").with_tools(["echo"])))
            .build()
            .unwrap();

        let trusted = mas.call("trusting", "say it").await;
        assert!(trusted.is_completed(), "{trusted:?}");
        assert_eq!(trusted.output, "raw tool output");
        assert_eq!(llm.calls(), 1);

        let normal = mas.call("normal", "say it").await;
        assert!(normal.is_completed(), "{normal:?}");
        assert_eq!(normal.output, "Summary: raw tool output");
        assert_ne!(normal.output, trusted.output);
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_memory_cap_bounds_every_model_input() {
        let longest = Arc::new(AtomicUsize::new(0));
        let system_first = Arc::new(AtomicUsize::new(0));
        let (seen_len, seen_sys) = (Arc::clone(&longest), Arc::clone(&system_first));
        let llm = Arc::new(ScriptedLlmClient::new(move |messages, n| {
            seen_len.fetch_max(messages.len(), Ordering::SeqCst);
            if messages.first().map(|m| m.role == Role::System).unwrap_or(false) {
                seen_sys.fetch_add(1, Ordering::SeqCst);
            }
            Ok(if n < 5 {
                format!(r#"{{"tool": "echo", "args": {{"text": "step {n}"}}}}"#)
            } else {
                "finished".to_string()
            })
        }));
        let mas = Mas::builder("capped")
            .node(Node::model("llm", llm.clone(), ModelParams::default()))
            .node(Node::tool(EchoTool))
            .node(Node::react(
                "capped_agent",
                ReActConfig::new("llm").with_tools(["echo"]).with_memory_cap(4),
            ))
            .build()
            .unwrap();

        let resp = mas.call("capped_agent", "work").await;
        assert!(resp.is_completed(), "{resp:?}");
        assert_eq!(resp.output, "finished");
        assert_eq!(llm.calls(), 6);
        assert_eq!(longest.load(Ordering::SeqCst), 4);
        assert_eq!(system_first.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_malformed_output_retried_with_prompt() {
        let llm = Arc::new(ScriptedLlmClient::from_replies(vec![
            r#"{"tool": "echo", "args": {"text": }"#.to_string(),
            "Recovered answer".to_string(),
        ]));
        let mas = Mas::builder("retry")
            .node(Node::model("llm", llm.clone(), ModelParams::default()))
            .node(Node::tool(EchoTool))
            .node(Node::react("agent", ReActConfig::new("llm").with_tools(["echo"])))
            .build()
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let resp = mas.call_with_events("agent", "hi", tx).await;
        assert!(resp.is_completed(), "{resp:?}");
        assert_eq!(resp.output, "Recovered answer");
        assert_eq!(llm.calls(), 2);
        assert!(drain(&mut rx).iter().any(
            |e| matches!(e, ReactEvent::Recovery { action, .. } if action == "RetryWithPrompt")
        ));
    }

    #[tokio::test]
    async fn test_tool_failure_observed_when_enabled() {
        let flaky = FnTool::new("flaky", "always fails", |_: QueryArgs| async {
            Err::<String, String>("upstream down".to_string())
        });
        let llm = Arc::new(ScriptedLlmClient::new(|messages, _| {
            Ok(match last_is_tool(messages) {
                Some(m) => format!("Handled: {}", m.content),
                None => r#"{"tool": "flaky", "args": {}}"#.to_string(),
            })
        }));
        let mas = Mas::builder("failures")
            .node(Node::model("llm", llm.clone(), ModelParams::default()))
            .node(Node::tool(flaky))
            .node(Node::react(
                "observer",
                ReActConfig::new("llm").with_tools(["flaky"]).observe_tool_failures(true),
            ))
            .node(Node::react("strict", ReActConfig::new("llm").with_tools(["flaky"])))
            .build()
            .unwrap();

        let observed = mas.call("observer", "try it").await;
        assert!(observed.is_completed(), "{observed:?}");
        assert!(observed.output.starts_with("Handled: Error:"));
        assert!(observed.output.contains("upstream down"));

        let strict = mas.call("strict", "try it").await;
        assert_eq!(strict.error_kind(), Some(ErrorKind::ToolExecutionFailure));
    }

    #[tokio::test]
    async fn test_undeclared_tool_is_node_not_found() {
        let llm = Arc::new(ScriptedLlmClient::new(|_, _| {
            Ok(r#"{"tool": "ghost", "args": {}}"#.to_string())
        }));
        let mas = Mas::builder("ghosts")
            .node(Node::model("llm", llm, ModelParams::default()))
            .node(Node::tool(EchoTool))
            .node(Node::react("agent", ReActConfig::new("llm").with_tools(["echo"])))
            .build()
            .unwrap();

        let resp = mas.call("agent", CallInput::new("call a ghost")).await;
        assert_eq!(resp.error_kind(), Some(ErrorKind::NodeNotFound));
    }

    #[tokio::test]
    async fn test_short_term_history_feeds_next_turn() {
        let llm = Arc::new(ScriptedLlmClient::new(|messages, _| {
            Ok(format!("seen {} messages", messages.len()))
        }));
        let mas = Mas::builder("chat")
            .node(Node::model("llm", llm, ModelParams::default()))
            .node(Node::react("chat_agent", ReActConfig::new("llm")))
            .build()
            .unwrap();

        let first = mas.call("chat_agent", CallInput::new("hello").with_session("s1")).await;
        assert_eq!(first.output, "seen 2 messages");
        let second = mas.call("chat_agent", CallInput::new("again").with_session("s1")).await;
        assert_eq!(second.output, "seen 4 messages");
        let other = mas.call("chat_agent", CallInput::new("fresh").with_session("s2")).await;
        assert_eq!(other.output, "seen 2 messages");
    }
}
