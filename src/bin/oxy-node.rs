//! Oxy 远程节点服务
//!
//! 启动: cargo run --bin oxy-node --features server -- 0.0.0.0:8700
//! 接收 POST /oxy/call 调用信封，在本地默认空间上执行并回传响应信封。

use std::sync::Arc;

use anyhow::Context;
use oxy::config::{load_config, AppConfig};
use oxy::core::{builtin_default_space, MasRegistry, MasSettings, ShutdownManager, SpaceCatalog};
use oxy::llm::{create_llm_from_config, model_params_from_config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    oxy::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8700".to_string());

    let llm = create_llm_from_config(&cfg.llm);
    let catalog = SpaceCatalog::new().default_space(builtin_default_space(llm, model_params_from_config(&cfg.llm)));
    let registry = MasRegistry::new(catalog).with_settings(MasSettings::from_config(&cfg));
    let mas = registry
        .get_or_create(&cfg.mas.name)
        .await
        .context("Failed to create mas")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let _ = shutdown.attach(Arc::clone(&mas));

    let app = oxy::remote::router(mas);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("oxy-node listening on http://{}", addr);

    let token = shutdown.token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("Server error")?;
    tracing::info!(reason = ?shutdown.reason(), "oxy-node stopped");
    Ok(())
}
