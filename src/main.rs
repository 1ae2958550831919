//! Oxy 演示入口
//!
//! 用内置默认空间构建编排器，对 default_agent 执行一次查询并打印过程事件与结果。
//! 用法：cargo run -- "现在几点？"

use anyhow::Context;
use oxy::config::{load_config, AppConfig};
use oxy::core::{builtin_default_space, CallInput, MasRegistry, MasSettings, SpaceCatalog};
use oxy::llm::{create_llm_from_config, model_params_from_config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    oxy::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let query = if query.trim().is_empty() {
        "What time is it now?".to_string()
    } else {
        query
    };

    let llm = create_llm_from_config(&cfg.llm);
    let catalog = SpaceCatalog::new().default_space(builtin_default_space(llm, model_params_from_config(&cfg.llm)));
    let registry = MasRegistry::new(catalog).with_settings(MasSettings::from_config(&cfg));
    let mas = registry
        .get_or_create(&cfg.mas.name)
        .await
        .context("Failed to create mas")?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&ev) {
                println!("{}", line);
            }
        }
    });

    let resp = mas
        .call_with_events("default_agent", CallInput::new(query), tx)
        .await;
    let _ = printer.await;

    println!("{}", serde_json::to_string_pretty(&resp).context("Failed to render response")?);
    if !resp.is_completed() {
        anyhow::bail!("call failed: {}", resp.output);
    }
    Ok(())
}
