//! 知识上下文 Agent：由邮件、分诊结果与线程拼出检索 query，调用 KnowledgeBase

use std::sync::Arc;

use crate::agents::types::{Email, KbContext, KbDebugInfo, TriageResult};
use crate::core::InboxResult;
use crate::knowledge::KnowledgeBase;

/// query 拼接结果为空时的占位 query
pub const PLACEHOLDER_QUERY: &str = "generic email";

pub struct KnowledgeAgent {
    kb: Arc<KnowledgeBase>,
    top_k: usize,
    min_score: f64,
}

impl KnowledgeAgent {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self {
            kb,
            top_k: 5,
            min_score: 0.1,
        }
    }

    pub fn with_limits(mut self, top_k: usize, min_score: f64) -> Self {
        self.top_k = top_k;
        self.min_score = min_score;
        self
    }

    /// subject、body、分类标签、线程内其它邮件的 subject，去空后以空格拼接
    pub fn compose_query(email: &Email, triage: Option<&TriageResult>, thread: Option<&[Email]>) -> String {
        let mut parts: Vec<&str> = vec![email.subject.as_str(), email.body_text.as_str()];
        if let Some(triage) = triage {
            parts.push(triage.category.label());
        }
        if let Some(thread) = thread {
            parts.extend(
                thread
                    .iter()
                    .filter(|msg| msg.email_id != email.email_id)
                    .map(|msg| msg.subject.as_str()),
            );
        }

        let query = parts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let query = query.trim();
        if query.is_empty() {
            PLACEHOLDER_QUERY.to_string()
        } else {
            query.to_string()
        }
    }

    pub fn build(
        &self,
        email: &Email,
        triage: Option<&TriageResult>,
        thread: Option<&[Email]>,
    ) -> InboxResult<KbContext> {
        let query = Self::compose_query(email, triage, thread);
        let kb_entries = self.kb.search(&query, self.top_k, self.min_score)?;
        let thread_length = match thread {
            Some(t) if !t.is_empty() => t.len(),
            _ => 1,
        };

        tracing::debug!(
            email_id = email.email_id,
            hits = kb_entries.len(),
            thread_length,
            "KB context built"
        );
        Ok(KbContext {
            email_id: email.email_id,
            debug_info: KbDebugInfo {
                query,
                hit_count: kb_entries.len(),
                thread_length,
            },
            kb_entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{Category, Priority};
    use crate::tools::table_store::{record_from_json, MemoryTableStore};
    use serde_json::json;

    fn email(id: i64, subject: &str, body: &str) -> Email {
        Email::from_record(&record_from_json(json!({
            "email_id": id, "thread_id": 7, "subject": subject, "body_text": body
        })))
        .unwrap()
    }

    fn agent() -> KnowledgeAgent {
        let store = Arc::new(
            MemoryTableStore::new()
                .with_table(
                    "knowledge_base",
                    vec![
                        record_from_json(json!({"title": "Sponsorship rates", "category": "Brand", "content": "rate card for brand deal"})),
                        record_from_json(json!({"title": "Refund policy", "category": "Support", "content": "refunds within 30 days"})),
                    ],
                )
                .unwrap(),
        );
        KnowledgeAgent::new(Arc::new(KnowledgeBase::new(store)))
    }

    #[test]
    fn test_compose_query_folds_thread_subjects() {
        let current = email(2, "Re: rates", "What is your rate?");
        let thread = vec![email(1, "Brand deal", "hi"), current.clone(), email(3, "", "x")];
        let triage = TriageResult {
            email_id: 2,
            category: Category::SponsorshipInquiry,
            priority: Priority::P1,
            ticket_suggestion: None,
        };
        let query = KnowledgeAgent::compose_query(&current, Some(&triage), Some(&thread));
        assert_eq!(
            query,
            "Re: rates What is your rate? Brand/Sponsorship – New Inquiry Brand deal"
        );
    }

    #[test]
    fn test_empty_email_uses_placeholder() {
        let ctx = agent().build(&email(1, "  ", ""), None, None).unwrap();
        assert_eq!(ctx.debug_info.query, PLACEHOLDER_QUERY);
        assert_eq!(ctx.debug_info.thread_length, 1);
    }

    #[test]
    fn test_build_returns_ranked_hits() {
        let current = email(1, "Brand deal", "Send your rate card");
        let thread = vec![current.clone(), email(2, "follow", "")];
        let ctx = agent().build(&current, None, Some(&thread)).unwrap();
        assert_eq!(ctx.email_id, 1);
        assert_eq!(ctx.debug_info.thread_length, 2);
        assert_eq!(ctx.debug_info.hit_count, 1);
        assert_eq!(ctx.kb_entries[0].field("title").as_deref(), Some("Sponsorship rates"));
        assert!(ctx.kb_entries[0].similarity_score > 0.1);
    }
}
