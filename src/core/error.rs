//! 错误类型
//!
//! 所有组件同步返回 InboxError，核心内部不吞错、不重试；编排器逐级向调用方传播。

use thiserror::Error;

/// 分诊流水线中可能出现的错误（缺行、越权表、工单校验、空查询、知识库缺列等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InboxError {
    /// 缺少邮件 / 线程 / 工单行，或底层数据文件不存在
    #[error("Not found: {0}")]
    NotFound(String),

    /// 访问不在白名单内的表
    #[error("Permission denied: {0}")]
    Permission(String),

    /// 工单载荷缺少必填字段（按声明顺序列出）
    #[error("Missing required ticket fields: {}", missing.join(", "))]
    Validation { missing: Vec<String> },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// 知识库 / 收件箱缺少预期列，或列值无法解析
    #[error("Schema error: {0}")]
    Schema(String),

    /// 读写底层存储失败（非 NotFound / Permission）
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type InboxResult<T> = Result<T, InboxError>;

impl From<config::ConfigError> for InboxError {
    fn from(e: config::ConfigError) -> Self {
        InboxError::Config(e.to_string())
    }
}
