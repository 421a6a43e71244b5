//! 流水线阶段与阶段耗时
//!
//! 单封邮件严格按 Load → Triage → Retrieve → Reply → MaybeTicket → Done 顺序推进，不跳过任何阶段。

use std::time::Instant;

use serde::Serialize;

/// 流水线阶段（日志与耗时统计用）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Load,
    Triage,
    Retrieve,
    Reply,
    MaybeTicket,
    Done,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Load => "load",
            PipelineStage::Triage => "triage",
            PipelineStage::Retrieve => "retrieve",
            PipelineStage::Reply => "reply",
            PipelineStage::MaybeTicket => "maybe_ticket",
            PipelineStage::Done => "done",
        }
    }

    /// 下一阶段；Done 之后仍为 Done
    pub fn next(&self) -> PipelineStage {
        match self {
            PipelineStage::Load => PipelineStage::Triage,
            PipelineStage::Triage => PipelineStage::Retrieve,
            PipelineStage::Retrieve => PipelineStage::Reply,
            PipelineStage::Reply => PipelineStage::MaybeTicket,
            PipelineStage::MaybeTicket | PipelineStage::Done => PipelineStage::Done,
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 各阶段耗时（毫秒）
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub load_ms: u64,
    pub triage_ms: u64,
    pub retrieve_ms: u64,
    pub reply_ms: u64,
    pub ticket_ms: u64,
}

impl StageTimings {
    pub fn record(&mut self, stage: PipelineStage, started: Instant) -> u64 {
        let ms = started.elapsed().as_millis() as u64;
        match stage {
            PipelineStage::Load => self.load_ms = ms,
            PipelineStage::Triage => self.triage_ms = ms,
            PipelineStage::Retrieve => self.retrieve_ms = ms,
            PipelineStage::Reply => self.reply_ms = ms,
            PipelineStage::MaybeTicket => self.ticket_ms = ms,
            PipelineStage::Done => {}
        }
        ms
    }

    pub fn total_ms(&self) -> u64 {
        self.load_ms + self.triage_ms + self.retrieve_ms + self.reply_ms + self.ticket_ms
    }
}
