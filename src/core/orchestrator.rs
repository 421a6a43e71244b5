//! 流水线编排器
//!
//! 单封邮件：Load → Triage → Retrieve → Reply → MaybeTicket → Done，严格顺序、同步执行。
//! 每个阶段记录耗时并输出结构化日志；任一阶段失败立即返回给调用方，不重试、不降级。
//! 批量模式逐封处理：process_batch 遇错即停，process_batch_isolated 逐项返回结果。
//!
//! MaybeTicket 先写工单台账，再回写 inbox 的 ticket_id。回写失败时工单已存在但未关联，
//! 重跑会再建一张；单写者部署下需按台账中的 email_id 人工补回关联。

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::agents::kb::KnowledgeAgent;
use crate::agents::reply::{ReplyAgent, TemplateReplyAgent};
use crate::agents::triage::TriageAgent;
use crate::agents::types::{Email, KbContext, ReplyResult, TriageResult};
use crate::config::AppConfig;
use crate::core::state::{PipelineStage, StageTimings};
use crate::core::{InboxError, InboxResult};
use crate::knowledge::KnowledgeBase;
use crate::tools::table_store::{field_i64, CsvTableStore, TableStore, INBOX_TABLE};
use crate::tools::ticket_logger::{utc_now_iso, Ticket, TicketDefaults, TicketLedger};

/// inbox.last_action 取值
pub const ACTION_REPLY_DRAFTED: &str = "reply_drafted";
pub const ACTION_TICKET_CREATED: &str = "ticket_created";

/// 单封邮件的处理结果
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub email_id: i64,
    pub thread_length: usize,
    pub triage: TriageResult,
    pub kb_context: KbContext,
    pub reply: ReplyResult,
    /// MaybeTicket 阶段新建的工单；未触发或已有关联工单时为 None
    pub ticket: Option<Ticket>,
    /// 最后到达的阶段，成功时为 Done
    pub stage: PipelineStage,
    pub timings: StageTimings,
}

fn stage_failed(stage: PipelineStage, e: InboxError) -> InboxError {
    tracing::warn!(stage = %stage, error = %e, "Stage failed");
    e
}

pub struct Orchestrator {
    store: Arc<dyn TableStore>,
    kb: Arc<KnowledgeBase>,
    triage: TriageAgent,
    knowledge: KnowledgeAgent,
    reply: Arc<dyn ReplyAgent>,
    ledger: TicketLedger,
}

impl Orchestrator {
    /// 默认参数：知识上下文 top_k=5 / min_score=0.05，分诊兜底 top_k=3 / min_score=0.1
    pub fn new(store: Arc<dyn TableStore>, reply: Arc<dyn ReplyAgent>) -> Self {
        Self::with_config(store, reply, &AppConfig::default())
    }

    pub fn with_config(store: Arc<dyn TableStore>, reply: Arc<dyn ReplyAgent>, cfg: &AppConfig) -> Self {
        let kb = Arc::new(KnowledgeBase::new(store.clone()));
        let triage = TriageAgent::new(store.clone(), kb.clone())
            .with_fallback(cfg.retrieval.fallback_top_k, cfg.retrieval.fallback_min_score);
        let knowledge = KnowledgeAgent::new(kb.clone())
            .with_limits(cfg.retrieval.top_k, cfg.retrieval.orchestrator_min_score);
        let ledger = TicketLedger::with_defaults(
            store.clone(),
            TicketDefaults {
                created_by: cfg.tickets.created_by.clone(),
                assigned_to: cfg.tickets.assigned_to.clone(),
                ..TicketDefaults::default()
            },
        );
        Self {
            store,
            kb,
            triage,
            knowledge,
            reply,
            ledger,
        }
    }

    /// CSV 数据目录 + 模板回复
    pub fn from_config(cfg: &AppConfig) -> Self {
        tracing::info!(data_dir = %cfg.app.data_dir.display(), "Using CSV table store");
        let store: Arc<dyn TableStore> = Arc::new(CsvTableStore::new(&cfg.app.data_dir));
        Self::with_config(store, Arc::new(TemplateReplyAgent::default()), cfg)
    }

    pub fn knowledge_base(&self) -> &Arc<KnowledgeBase> {
        &self.kb
    }

    pub fn ledger(&self) -> &TicketLedger {
        &self.ledger
    }

    pub fn triage_agent(&self) -> &TriageAgent {
        &self.triage
    }

    /// 加载邮件及其线程：同 thread_id 的所有行，按接收时间升序（无时间的排后），同时间按 email_id
    pub fn load_email_and_thread(&self, email_id: i64) -> InboxResult<(Email, Vec<Email>)> {
        let rows = self.store.read(INBOX_TABLE)?;

        let mut current_row = None;
        for row in &rows {
            if field_i64(row, "email_id")? == Some(email_id) {
                current_row = Some(row);
                break;
            }
        }
        let current = match current_row {
            Some(row) => Email::from_record(row)?,
            None => {
                return Err(InboxError::NotFound(format!(
                    "No inbox row found for email_id={}",
                    email_id
                )))
            }
        };

        let mut thread = Vec::new();
        for row in &rows {
            if field_i64(row, "thread_id")? == Some(current.thread_id) {
                thread.push(Email::from_record(row)?);
            }
        }
        thread.sort_by_key(|e| (e.received_key(), e.email_id));

        Ok((current, thread))
    }

    /// 只跑分诊（会写回 category / priority）
    pub fn triage_one(&self, email_id: i64) -> InboxResult<TriageResult> {
        let (email, _) = self.load_email_and_thread(email_id)?;
        self.triage.run(&email)
    }

    pub fn process_one(&self, email_id: i64) -> InboxResult<ProcessOutcome> {
        let span = tracing::info_span!("process_email", email_id);
        let _enter = span.enter();
        let mut timings = StageTimings::default();
        let mut stage = PipelineStage::Load;
        tracing::info!("Processing email");

        let started = Instant::now();
        let (email, thread) = self
            .load_email_and_thread(email_id)
            .map_err(|e| stage_failed(stage, e))?;
        let ms = timings.record(stage, started);
        tracing::info!(
            stage = %stage,
            thread_id = email.thread_id,
            thread_length = thread.len(),
            elapsed_ms = ms,
            "Loaded email"
        );
        stage = stage.next();

        let started = Instant::now();
        let triage = self.triage.run(&email).map_err(|e| stage_failed(stage, e))?;
        let ms = timings.record(stage, started);
        tracing::info!(
            stage = %stage,
            category = %triage.category,
            priority = %triage.priority,
            elapsed_ms = ms,
            "Triage done"
        );
        stage = stage.next();

        let started = Instant::now();
        let kb_context = self
            .knowledge
            .build(&email, Some(&triage), Some(&thread))
            .map_err(|e| stage_failed(stage, e))?;
        let ms = timings.record(stage, started);
        tracing::info!(
            stage = %stage,
            query = %kb_context.debug_info.query,
            hits = kb_context.debug_info.hit_count,
            elapsed_ms = ms,
            "KB search done"
        );
        stage = stage.next();

        let started = Instant::now();
        let reply = self
            .reply
            .generate(&email, &triage, &kb_context, &thread)
            .map_err(|e| stage_failed(stage, e))?;
        let ms = timings.record(stage, started);
        tracing::info!(
            stage = %stage,
            subject = %reply.reply_subject,
            elapsed_ms = ms,
            "Reply generated"
        );
        stage = stage.next();

        let started = Instant::now();
        let ticket = self
            .maybe_log_ticket(&email, &reply)
            .map_err(|e| stage_failed(stage, e))?;
        self.record_outcome(email_id, &reply, ticket.as_ref())
            .map_err(|e| stage_failed(stage, e))?;
        let ms = timings.record(stage, started);
        tracing::info!(
            stage = %stage,
            ticket_id = ?ticket.as_ref().map(|t| t.ticket_id),
            elapsed_ms = ms,
            "Ticket stage done"
        );
        stage = stage.next();

        tracing::info!(stage = %stage, total_ms = timings.total_ms(), "Finished email");
        Ok(ProcessOutcome {
            email_id,
            thread_length: thread.len(),
            triage,
            kb_context,
            reply,
            ticket,
            stage,
            timings,
        })
    }

    /// 仅当回复明确要求建单时写工单；邮件已关联工单时跳过（每封邮件最多一张）
    fn maybe_log_ticket(&self, email: &Email, reply: &ReplyResult) -> InboxResult<Option<Ticket>> {
        let action = match &reply.follow_up_action {
            Some(action) => action,
            None => {
                tracing::info!("No follow-up action");
                return Ok(None);
            }
        };
        if !action.create_ticket {
            tracing::info!("Follow-up action present, but create_ticket=false");
            return Ok(None);
        }
        if let Some(existing) = email.linked_ticket_id()? {
            tracing::info!(ticket_id = existing, "Email already linked to a ticket, skipping");
            return Ok(None);
        }

        let mut payload = action.ticket_payload.clone().unwrap_or_default();
        // 状态与归属由台账默认值决定
        payload.status = None;
        payload.created_by = None;
        payload.assigned_to = None;

        let ticket = self.ledger.log(&payload)?;
        tracing::info!(ticket_id = ticket.ticket_id, email_id = ticket.email_id, "Ticket logged");
        Ok(Some(ticket))
    }

    /// 回写 notes / last_action / last_action_datetime_utc / ticket_id
    fn record_outcome(&self, email_id: i64, reply: &ReplyResult, ticket: Option<&Ticket>) -> InboxResult<()> {
        let mut rows = self.store.read(INBOX_TABLE)?;
        let action = if ticket.is_some() {
            ACTION_TICKET_CREATED
        } else {
            ACTION_REPLY_DRAFTED
        };
        let now = utc_now_iso();

        let mut matched = false;
        for row in rows.iter_mut() {
            if field_i64(row, "email_id")? != Some(email_id) {
                continue;
            }
            matched = true;
            if let Some(notes) = &reply.notes {
                row.insert("notes".to_string(), notes.clone().into());
            }
            row.insert("last_action".to_string(), action.into());
            row.insert("last_action_datetime_utc".to_string(), now.clone().into());
            if let Some(ticket) = ticket {
                row.insert("ticket_id".to_string(), ticket.ticket_id.into());
            }
        }
        if !matched {
            return Err(InboxError::NotFound(format!(
                "No inbox row found for email_id={}",
                email_id
            )));
        }
        self.store.write(INBOX_TABLE, &rows)
    }

    /// 给定 id 列表，或 inbox 中全部 email_id（按行序）
    fn resolve_batch_ids(&self, email_ids: Option<&[i64]>) -> InboxResult<Vec<i64>> {
        if let Some(ids) = email_ids {
            return Ok(ids.to_vec());
        }
        let mut ids = Vec::new();
        for row in self.store.read(INBOX_TABLE)? {
            let id = field_i64(&row, "email_id")?
                .ok_or_else(|| InboxError::Schema("inbox row is missing 'email_id'".to_string()))?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// 批量处理，遇到第一个错误即返回
    pub fn process_batch(&self, email_ids: Option<&[i64]>) -> InboxResult<Vec<ProcessOutcome>> {
        let ids = self.resolve_batch_ids(email_ids)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("batch", %run_id);
        let _enter = span.enter();
        tracing::info!(count = ids.len(), "Batch processing");

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            outcomes.push(self.process_one(id)?);
        }
        tracing::info!("Batch complete");
        Ok(outcomes)
    }

    /// 批量处理，每封邮件独立返回结果，单项失败不影响后续
    pub fn process_batch_isolated(
        &self,
        email_ids: Option<&[i64]>,
    ) -> InboxResult<Vec<(i64, InboxResult<ProcessOutcome>)>> {
        let ids = self.resolve_batch_ids(email_ids)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("batch", %run_id);
        let _enter = span.enter();
        tracing::info!(count = ids.len(), "Batch processing (isolated)");

        let results: Vec<(i64, InboxResult<ProcessOutcome>)> = ids
            .into_iter()
            .map(|id| {
                let result = self.process_one(id);
                if let Err(e) = &result {
                    tracing::warn!(email_id = id, error = %e, "Email failed");
                }
                (id, result)
            })
            .collect();

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        tracing::info!(total = results.len(), failed, "Batch complete");
        Ok(results)
    }
}
