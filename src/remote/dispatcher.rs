//! 远程分发器：把解析到远程位置的节点调用经信封发往对端
//!
//! HttpDispatcher 通过 reqwest POST {endpoint}/oxy/call；调用方剩余时间即出站超时。
//! 传输层失败（连接、超时、非 2xx、响应无法解析）统一映射为 RemoteUnavailable。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::core::{Mas, OxyError};
use crate::remote::envelope::{CallEnvelope, ResponseEnvelope};
use crate::remote::server::serve_envelope;

/// 对端接收调用信封的路径
pub const CALL_PATH: &str = "/oxy/call";

#[async_trait]
pub trait RemoteDispatcher: Send + Sync {
    async fn dispatch(&self, endpoint: &str, envelope: CallEnvelope) -> Result<ResponseEnvelope, OxyError>;
}

fn unavailable(node: &str, message: impl Into<String>) -> OxyError {
    OxyError::RemoteUnavailable {
        node: node.to_string(),
        message: message.into(),
    }
}

/// HTTP 分发器
#[derive(Clone)]
pub struct HttpDispatcher {
    client: Client,
}

impl HttpDispatcher {
    pub fn new(connect_timeout: Duration) -> Result<Self, OxyError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| OxyError::Config(format!("http client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn call_url(endpoint: &str) -> String {
        format!("{}{}", endpoint.trim_end_matches('/'), CALL_PATH)
    }
}

#[async_trait]
impl RemoteDispatcher for HttpDispatcher {
    async fn dispatch(&self, endpoint: &str, envelope: CallEnvelope) -> Result<ResponseEnvelope, OxyError> {
        let node = envelope.target_name.clone();
        let mut request = self.client.post(Self::call_url(endpoint)).json(&envelope);
        if let Some(ms) = envelope.timeout_ms {
            request = request.timeout(Duration::from_millis(ms));
        }

        tracing::debug!(node = %node, endpoint = %endpoint, trace_id = %envelope.trace_id, "dispatching remote call");
        let response = request
            .send()
            .await
            .map_err(|e| unavailable(&node, format!("request to {} failed: {}", endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(unavailable(&node, format!("{} returned {}: {}", endpoint, status, body)));
        }

        response
            .json::<ResponseEnvelope>()
            .await
            .map_err(|e| unavailable(&node, format!("invalid response envelope: {}", e)))
    }
}

/// 进程内回环分发器：endpoint → 对端 Mas，信封同样经 JSON 序列化往返
#[derive(Default)]
pub struct LoopbackDispatcher {
    routes: RwLock<HashMap<String, Arc<Mas>>>,
}

impl LoopbackDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, endpoint: impl Into<String>, mas: Arc<Mas>) {
        self.routes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(endpoint.into(), mas);
    }

    fn route(&self, endpoint: &str) -> Option<Arc<Mas>> {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(endpoint)
            .cloned()
    }
}

#[async_trait]
impl RemoteDispatcher for LoopbackDispatcher {
    async fn dispatch(&self, endpoint: &str, envelope: CallEnvelope) -> Result<ResponseEnvelope, OxyError> {
        let node = envelope.target_name.clone();
        let mas = self
            .route(endpoint)
            .ok_or_else(|| unavailable(&node, format!("no route to {}", endpoint)))?;

        let wire = serde_json::to_string(&envelope).map_err(|e| unavailable(&node, e.to_string()))?;
        let inbound: CallEnvelope = serde_json::from_str(&wire).map_err(|e| unavailable(&node, e.to_string()))?;
        let response = serve_envelope(&mas, inbound).await;
        let wire = serde_json::to_string(&response).map_err(|e| unavailable(&node, e.to_string()))?;
        serde_json::from_str(&wire).map_err(|e| unavailable(&node, e.to_string()))
    }
}
