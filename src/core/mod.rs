//! 核心编排层：错误类型、流水线阶段、主控编排器

pub mod error;
pub mod orchestrator;
pub mod state;

pub use error::{InboxError, InboxResult};
pub use orchestrator::{Orchestrator, ProcessOutcome};
pub use state::{PipelineStage, StageTimings};
