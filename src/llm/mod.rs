//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::LlmSection;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, ModelParams};

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let provider = cfg.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY")
        .ok()
        .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok());

    match (provider.as_str(), api_key) {
        ("mock", _) => {
            tracing::info!("Using Mock LLM (provider = mock)");
            Arc::new(MockLlmClient)
        }
        (_, Some(key)) => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.model);
            Arc::new(OpenAiClient::new(
                cfg.base_url.as_deref(),
                &cfg.model,
                Some(&key),
            ))
        }
        (_, None) => {
            tracing::warn!("No API key set, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// [llm] 段中的模型参数
pub fn model_params_from_config(cfg: &LlmSection) -> ModelParams {
    let mut params = ModelParams::new(cfg.model.clone());
    if let Some(t) = cfg.temperature {
        params = params.with_temperature(t);
    }
    params
}
