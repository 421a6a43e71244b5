//! Inbox Bee - 创作者收件箱分诊与回复草拟
//!
//! 模块划分：
//! - **agents**: 分诊、知识上下文、回复三个 Agent 及数据模型
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、流水线阶段、编排器
//! - **knowledge**: 分词、TF-IDF 索引与带缓存的知识库检索
//! - **observability**: 日志初始化
//! - **tools**: 表格存储网关（CSV / 内存）与工单台账

pub mod agents;
pub mod config;
pub mod core;
pub mod knowledge;
pub mod observability;
pub mod tools;

pub use crate::core::{InboxError, InboxResult, Orchestrator, ProcessOutcome};
