//! 远程节点服务端：在本地 Mas 上执行收到的调用信封
//!
//! serve_envelope 与传输无关；启用 `server` feature 时 router() 通过 axum 暴露 POST /oxy/call。

use tokio_util::sync::CancellationToken;

use crate::core::Mas;
use crate::remote::envelope::{CallEnvelope, ResponseEnvelope};

/// 执行调用信封：对端按自己的节点空间解析目标，回传同一组追踪元数据
///
/// 返回的 future 被丢弃（请求方断开、HTTP 处理被中止）时取消本次调用派生的所有任务。
pub async fn serve_envelope(mas: &Mas, envelope: CallEnvelope) -> ResponseEnvelope {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let response = serve_envelope_with_cancel(mas, envelope, cancel).await;
    guard.disarm();
    response
}

/// 同 serve_envelope，由调用方控制取消
pub async fn serve_envelope_with_cancel(
    mas: &Mas,
    envelope: CallEnvelope,
    cancel: CancellationToken,
) -> ResponseEnvelope {
    tracing::info!(
        mas = %mas.name(),
        target = %envelope.target_name,
        trace_id = %envelope.trace_id,
        session = %envelope.session_id,
        "serving remote call"
    );
    let req = envelope.clone().into_request(cancel);
    let resp = mas.call_request(req).await;
    ResponseEnvelope::from_response(&envelope, resp)
}

#[cfg(feature = "server")]
mod http {
    use std::sync::Arc;

    use axum::{
        extract::State,
        routing::{get, post},
        Json, Router,
    };

    use super::serve_envelope;
    use crate::core::Mas;
    use crate::remote::dispatcher::CALL_PATH;
    use crate::remote::envelope::{CallEnvelope, ResponseEnvelope};

    async fn handle_call(State(mas): State<Arc<Mas>>, Json(envelope): Json<CallEnvelope>) -> Json<ResponseEnvelope> {
        Json(serve_envelope(&mas, envelope).await)
    }

    /// 节点服务路由
    pub fn router(mas: Arc<Mas>) -> Router {
        Router::new()
            .route(CALL_PATH, post(handle_call))
            .route("/health", get(|| async { "OK" }))
            .with_state(mas)
    }
}

#[cfg(feature = "server")]
pub use http::router;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::{ErrorKind, Node, OxyState};
    use crate::tools::FnTool;

    #[derive(serde::Deserialize, schemars::JsonSchema)]
    struct QueryArgs {
        query: String,
    }

    fn sleepy_mas() -> Mas {
        Mas::builder("remote_side")
            .node(Node::tool(FnTool::new("sleepy", "sleeps", |args: QueryArgs| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, String>(args.query)
            })))
            .build()
            .unwrap()
    }

    fn envelope(session: &str) -> CallEnvelope {
        serde_json::from_value(serde_json::json!({
            "trace_id": "t-1",
            "session_id": session,
            "target_name": "sleepy",
            "query": "zzz",
            "ancestors": ["caller"]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_request_abort_cancels_served_call() {
        let mas = sleepy_mas();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let response = tokio::time::timeout(
            Duration::from_secs(2),
            serve_envelope_with_cancel(&mas, envelope("abort"), cancel),
        )
        .await
        .expect("aborted call returns promptly");
        assert_eq!(response.state, OxyState::Failed);
        assert_eq!(response.error.map(|e| e.kind), Some(ErrorKind::Cancelled));
        assert_eq!(mas.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_dropped_serve_future_releases_session() {
        let mas = sleepy_mas();
        let served = tokio::time::timeout(Duration::from_millis(50), serve_envelope(&mas, envelope("dropped"))).await;
        assert!(served.is_err());
        assert_eq!(mas.active_sessions(), 0);
    }
}
