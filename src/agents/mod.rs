//! 流水线各阶段 Agent：分诊、知识上下文、回复

pub mod kb;
pub mod reply;
pub mod triage;
pub mod types;

pub use kb::KnowledgeAgent;
pub use reply::{ReplyAgent, TemplateReplyAgent};
pub use triage::TriageAgent;
pub use types::{
    Category, Email, FollowUpAction, KbContext, KbDebugInfo, Priority, ReplyResult,
    TicketSuggestion, TriageResult,
};
