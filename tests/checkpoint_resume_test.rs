//! 断点续跑集成测试
//!
//! 以文件账本模拟进程重启：第一个 Mas 完整执行并落盘，截断账本后由新的 Mas 从目标步骤续跑，
//! 结果应与未中断执行一致，且已记录的步骤不再执行。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use oxy::checkpoint::{FileLedgerStore, InMemoryLedgerStore, LedgerStore};
use oxy::core::{ErrorKind, Node, OxyState, ReActConfig};
use oxy::llm::{ModelParams, ScriptedLlmClient};
use oxy::memory::{Message, Role};
use oxy::tools::FnTool;
use oxy::{CallInput, Mas, OxyError, OxyResponse};

#[derive(serde::Deserialize, schemars::JsonSchema)]
struct TextArgs {
    text: String,
}

/// 工具执行计数
#[derive(Default)]
struct Counters {
    tool_a: Arc<AtomicUsize>,
    tool_b: Arc<AtomicUsize>,
}

fn counting_tool(name: &'static str, counter: Arc<AtomicUsize>) -> Node {
    Node::tool(FnTool::new(name, "labels its input", move |args: TextArgs| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{name}:{}", args.text))
        }
    }))
}

/// 只依据消息内容决策：先 tool_a，再 tool_b，最后汇总
fn pipeline_llm() -> ScriptedLlmClient {
    ScriptedLlmClient::new(|messages, _| {
        let observed: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| m.content.as_str())
            .collect();
        Ok(match observed.len() {
            0 => r#"{"tool": "tool_a", "args": {"text": "A"}}"#.to_string(),
            1 => r#"{"tool": "tool_b", "args": {"text": "B"}}"#.to_string(),
            _ => format!("done: {}", observed.join(", ")),
        })
    })
}

fn build_mas(store: Arc<dyn LedgerStore>, counters: &Counters) -> Mas {
    Mas::builder("pipeline_mas")
        .node(Node::model("llm", Arc::new(pipeline_llm()), ModelParams::default()))
        .node(counting_tool("tool_a", Arc::clone(&counters.tool_a)))
        .node(counting_tool("tool_b", Arc::clone(&counters.tool_b)))
        .node(Node::react(
            "pipeline_agent",
            ReActConfig::new("llm").with_tools(["tool_a", "tool_b"]),
        ))
        .ledger(store)
        .build()
        .unwrap()
}

fn steps(resp: &OxyResponse) -> Vec<(String, String, OxyState)> {
    resp.exec_results
        .iter()
        .map(|r| (r.executor.clone(), r.response.output.clone(), r.response.state))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resume_matches_uninterrupted_run() {
        let dir = tempfile::tempdir().unwrap();
        let first_counters = Counters::default();
        let first = build_mas(Arc::new(FileLedgerStore::new(dir.path())), &first_counters);

        let full = first
            .call("pipeline_agent", CallInput::new("run both").with_session("s1"))
            .await;
        assert!(full.is_completed(), "{full:?}");
        assert_eq!(full.output, "done: tool_a:A, tool_b:B");

        let ledger = first
            .ledger()
            .load("pipeline_mas", "s1")
            .await
            .unwrap()
            .expect("ledger persisted");
        assert_eq!(ledger.executors(), vec!["llm", "tool_a", "llm", "tool_b", "llm"]);

        // 模拟在 tool_b 之前中断
        let store: Arc<dyn LedgerStore> = Arc::new(FileLedgerStore::new(dir.path()));
        let mut interrupted = ledger.clone();
        interrupted.truncate(3);
        store.replace(interrupted).await.unwrap();

        let counters = Counters::default();
        let restarted = build_mas(Arc::clone(&store), &counters);
        let resumed = restarted.resume("s1", "tool_b").await.unwrap();

        assert!(resumed.is_completed(), "{resumed:?}");
        assert_eq!(resumed.output, full.output);
        assert_eq!(steps(&resumed), steps(&full));
        assert_eq!(counters.tool_a.load(Ordering::SeqCst), 0);
        assert_eq!(counters.tool_b.load(Ordering::SeqCst), 1);

        let after = store.load("pipeline_mas", "s1").await.unwrap().unwrap();
        assert_eq!(after.executors(), vec!["llm", "tool_a", "llm", "tool_b", "llm"]);
        assert_eq!(after.last_node.as_deref(), Some("llm"));
    }

    #[tokio::test]
    async fn test_resume_from_recorded_step_reruns_it() {
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
        let counters = Counters::default();
        let mas = build_mas(Arc::clone(&store), &counters);

        let full = mas
            .call("pipeline_agent", CallInput::new("run both").with_session("s2"))
            .await;
        assert!(full.is_completed());
        assert_eq!(counters.tool_a.load(Ordering::SeqCst), 1);

        let resumed = mas.resume("s2", "tool_a").await.unwrap();
        assert_eq!(resumed.output, full.output);
        assert_eq!(counters.tool_a.load(Ordering::SeqCst), 2);
        assert_eq!(counters.tool_b.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resume_unreached_target_is_gap_and_keeps_ledger() {
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
        let counters = Counters::default();
        let mas = build_mas(Arc::clone(&store), &counters);

        let full = mas
            .call("pipeline_agent", CallInput::new("run both").with_session("s3"))
            .await;
        assert!(full.is_completed());
        let before = store.load("pipeline_mas", "s3").await.unwrap().unwrap();

        let err = mas.resume("s3", "tool_c").await.unwrap_err();
        assert!(matches!(err, OxyError::CheckpointGap { ref target, .. } if target == "tool_c"));
        assert_eq!(counters.tool_a.load(Ordering::SeqCst), 1);
        assert_eq!(counters.tool_b.load(Ordering::SeqCst), 1);

        let after = store.load("pipeline_mas", "s3").await.unwrap().unwrap();
        assert_eq!(after.executors(), before.executors());
    }

    #[tokio::test]
    async fn test_resume_unknown_session_is_not_found() {
        let mas = build_mas(Arc::new(InMemoryLedgerStore::new()), &Counters::default());
        let err = mas.resume("nobody", "tool_a").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CheckpointNotFound);
    }

    #[tokio::test]
    async fn test_session_ledger_keeps_every_call() {
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
        let counters = Counters::default();
        let mas = build_mas(Arc::clone(&store), &counters);

        let first = mas.call("pipeline_agent", CallInput::new("one").with_session("s4")).await;
        let second = mas.call("pipeline_agent", CallInput::new("two").with_session("s4")).await;
        assert!(first.is_completed() && second.is_completed());

        let ledger = store.load("pipeline_mas", "s4").await.unwrap().unwrap();
        assert_eq!(ledger.exec_results.len(), 10);
        assert_eq!(ledger.runs.len(), 2);
        assert_eq!(ledger.runs[0].root.query, "one");
        assert_eq!(ledger.runs[1].root.query, "two");
        assert_eq!(ledger.runs[1].start, 5);

        // 续跑只作用于最近一次调用，之前的区段原样保留
        let resumed = mas.resume("s4", "tool_b").await.unwrap();
        assert_eq!(resumed.output, second.output);
        assert_eq!(counters.tool_a.load(Ordering::SeqCst), 2);
        assert_eq!(counters.tool_b.load(Ordering::SeqCst), 3);

        let after = store.load("pipeline_mas", "s4").await.unwrap().unwrap();
        assert_eq!(after.runs.len(), 2);
        assert_eq!(after.exec_results[..5], ledger.exec_results[..5]);
        assert_eq!(after.executors()[5..], ["llm", "tool_a", "llm", "tool_b", "llm"]);
        assert_eq!(mas.history().window("s4").len(), 4);

        assert!(mas.end_session("s4").await.unwrap());
        assert!(store.load("pipeline_mas", "s4").await.unwrap().is_none());
        assert!(mas.history().window("s4").is_empty());
    }

    #[tokio::test]
    async fn test_resume_on_same_mas_sees_original_history() {
        let seen: Arc<Mutex<Vec<Vec<Message>>>> = Arc::default();
        let recorder = Arc::clone(&seen);
        let llm = ScriptedLlmClient::new(move |messages, _| {
            recorder.lock().unwrap().push(messages.to_vec());
            Ok(match messages.last() {
                Some(m) if m.role == Role::Tool => format!("done after {} messages", messages.len()),
                _ => r#"{"tool": "tool_a", "args": {"text": "A"}}"#.to_string(),
            })
        });
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
        let counters = Counters::default();
        let mas = Mas::builder("pipeline_mas")
            .node(Node::model("llm", Arc::new(llm), ModelParams::default()))
            .node(counting_tool("tool_a", Arc::clone(&counters.tool_a)))
            .node(Node::react("agent", ReActConfig::new("llm").with_tools(["tool_a"])))
            .ledger(Arc::clone(&store))
            .build()
            .unwrap();

        let full = mas.call("agent", CallInput::new("count").with_session("s6")).await;
        assert!(full.is_completed(), "{full:?}");
        assert_eq!(mas.history().window("s6").len(), 2);

        let mut interrupted = store.load("pipeline_mas", "s6").await.unwrap().unwrap();
        assert_eq!(interrupted.executors(), vec!["llm", "tool_a", "llm"]);
        interrupted.truncate(2);
        store.replace(interrupted).await.unwrap();

        let resumed = mas.resume("s6", "llm").await.unwrap();
        assert!(resumed.is_completed(), "{resumed:?}");
        assert_eq!(resumed.output, full.output);
        assert_eq!(counters.tool_a.load(Ordering::SeqCst), 1);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], seen[1]);

        // 续跑替换原来那一轮，而不是再追加一轮
        let window = mas.history().window("s6");
        assert_eq!(window.len(), 2);
        assert_eq!(window[1].content, full.output);
        assert_eq!(mas.history().turns("s6"), 1);
    }

    #[tokio::test]
    async fn test_failed_top_level_step_is_recorded() {
        let llm = ScriptedLlmClient::new(|_, _| Ok(r#"{"tool": "tool_a", "args": {}}"#.to_string()));
        let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
        let counters = Counters::default();
        let mas = Mas::builder("pipeline_mas")
            .node(Node::model("llm", Arc::new(llm), ModelParams::default()))
            .node(counting_tool("tool_a", Arc::clone(&counters.tool_a)))
            .node(Node::react("agent", ReActConfig::new("llm").with_tools(["tool_a"])))
            .ledger(Arc::clone(&store))
            .build()
            .unwrap();

        let resp = mas.call("agent", CallInput::new("bad args").with_session("s5")).await;
        assert_eq!(resp.error_kind(), Some(ErrorKind::InvalidArguments));

        let ledger = store.load("pipeline_mas", "s5").await.unwrap().unwrap();
        assert_eq!(ledger.executors(), vec!["llm", "tool_a"]);
        assert_eq!(ledger.exec_results[1].response.state, OxyState::Failed);
        assert_eq!(counters.tool_a.load(Ordering::SeqCst), 0);
    }
}
