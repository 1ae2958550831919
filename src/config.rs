//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `OXY__*` 覆盖（双下划线表示嵌套，如 `OXY__MAS__MAX_CONCURRENCY=4`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub mas: MasSection,
    pub memory: MemorySection,
    pub react: ReactSection,
    pub llm: LlmSection,
    pub remote: RemoteSection,
}

/// [mas] 段：编排器名、并发闸门、默认超时、断点开关
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MasSection {
    pub name: String,
    pub max_concurrency: usize,
    /// 等待闸门名额的上限（毫秒）；0 表示只受请求截止时间约束
    pub acquire_timeout_ms: u64,
    /// 节点未配置 timeout 时的单次调用超时（秒）
    pub default_timeout_secs: u64,
    pub checkpoint: bool,
}

impl Default for MasSection {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_concurrency: 10,
            acquire_timeout_ms: 30_000,
            default_timeout_secs: 120,
            checkpoint: true,
        }
    }
}

/// [memory] 段：上下文上限、短期轮数、长期检索与历史索引分块
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// ReAct 循环上下文上限；未设置时不截断
    pub memory_cap: Option<usize>,
    pub short_term_turns: usize,
    pub top_k: usize,
    /// 向量相似度检索的命名空间
    pub namespace: String,
    pub retrieval_timeout_ms: u64,
    pub chunk_size: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            memory_cap: None,
            short_term_turns: 10,
            top_k: 5,
            namespace: "history".to_string(),
            retrieval_timeout_ms: 3000,
            chunk_size: 500,
        }
    }
}

/// [react] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReactSection {
    pub max_iterations: usize,
}

impl Default for ReactSection {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}

/// [llm] 段：后端选择与模型参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / deepseek / mock；无 API Key 时退回 Mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            temperature: None,
        }
    }
}

/// [remote] 段：远程节点名 → endpoint，出站连接超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    pub endpoints: HashMap<String, String>,
    pub connect_timeout_ms: u64,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            endpoints: HashMap::new(),
            connect_timeout_ms: 3000,
        }
    }
}

/// 从 config 目录加载配置，环境变量 OXY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("OXY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
