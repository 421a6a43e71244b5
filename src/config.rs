//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `INBOX__*` 覆盖（双下划线表示嵌套，如 `INBOX__RETRIEVAL__TOP_K=3`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub retrieval: RetrievalSection,
    #[serde(default)]
    pub tickets: TicketsSection,
}

/// [app] 段：应用名、数据目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// inbox.csv / knowledge_base.csv / tickets.csv 所在目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("datasets")
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            data_dir: default_data_dir(),
        }
    }
}

/// [retrieval] 段：知识库检索参数
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalSection {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// 编排器构建知识上下文时使用的更宽松阈值
    #[serde(default = "default_orchestrator_min_score")]
    pub orchestrator_min_score: f64,
    /// 分诊兜底检索
    #[serde(default = "default_fallback_top_k")]
    pub fallback_top_k: usize,
    #[serde(default = "default_min_score")]
    pub fallback_min_score: f64,
}

impl RetrievalSection {
    /// 知识库检索参数：显式传入的优先，否则取 top_k / min_score
    pub fn search_limits(&self, top_k: Option<usize>, min_score: Option<f64>) -> (usize, f64) {
        (top_k.unwrap_or(self.top_k), min_score.unwrap_or(self.min_score))
    }
}

fn default_top_k() -> usize {
    5
}

fn default_min_score() -> f64 {
    0.1
}

fn default_orchestrator_min_score() -> f64 {
    0.05
}

fn default_fallback_top_k() -> usize {
    3
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            orchestrator_min_score: default_orchestrator_min_score(),
            fallback_top_k: default_fallback_top_k(),
            fallback_min_score: default_min_score(),
        }
    }
}

/// [tickets] 段：工单默认字段
#[derive(Debug, Clone, Deserialize)]
pub struct TicketsSection {
    #[serde(default = "default_created_by")]
    pub created_by: String,
    #[serde(default = "default_assigned_to")]
    pub assigned_to: String,
}

fn default_created_by() -> String {
    "orchestrator_agent".to_string()
}

fn default_assigned_to() -> String {
    "inbox_manager".to_string()
}

impl Default for TicketsSection {
    fn default() -> Self {
        Self {
            created_by: default_created_by(),
            assigned_to: default_assigned_to(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 INBOX__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 INBOX__*（双下划线表示嵌套键）
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
        } else {
            tracing::warn!(path = %path.display(), "config file not found, skipped");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("INBOX")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 加载失败时回退到默认配置
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    })
}
