//! 回复 Agent
//!
//! ReplyAgent 是流水线消费的外部协作者接口；TemplateReplyAgent 是默认的模板实现，
//! 按分类生成确认语并附上知识库条目标题，分诊建议建工单时填写 follow_up_action。

use crate::agents::types::{
    Category, Email, FollowUpAction, KbContext, ReplyResult, TicketSuggestion, TriageResult,
};
use crate::core::InboxResult;
use crate::tools::ticket_logger::TicketPayload;

/// 回复生成接口
pub trait ReplyAgent: Send + Sync {
    fn generate(
        &self,
        email: &Email,
        triage: &TriageResult,
        kb: &KbContext,
        thread: &[Email],
    ) -> InboxResult<ReplyResult>;
}

/// 回复中最多引用的知识库条目数
const MAX_REFERENCES: usize = 3;

#[derive(Debug, Clone)]
pub struct TemplateReplyAgent {
    signature: String,
}

impl Default for TemplateReplyAgent {
    fn default() -> Self {
        Self {
            signature: "Inbox Team".to_string(),
        }
    }
}

impl TemplateReplyAgent {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
        }
    }

    fn acknowledgement(category: Category) -> &'static str {
        match category {
            Category::SponsorshipNegotiation => {
                "Thanks for following up on the partnership. We're reviewing the updated terms and will get back to you shortly."
            }
            Category::SponsorshipInquiry => {
                "Thanks for reaching out about a sponsorship. We'd love to learn more about the campaign, timeline and budget."
            }
            Category::CreatorCollaboration => {
                "Thanks for the collaboration idea! We'll take a look and follow up."
            }
            Category::UgcContentRequest => {
                "Thanks for your interest in content creation. Please share deliverables and usage rights details."
            }
            Category::PrMedia => {
                "Thanks for the media request. Please send over the proposed format, date and outlet details."
            }
            Category::EventsSpeaking => {
                "Thanks for the invitation. Please share the event date, location and expected audience."
            }
            Category::ManagementLegal => {
                "Thanks for your message. We'll review it with our team and respond soon."
            }
            Category::PlatformAccount => {
                "Thanks for the notice. We're checking the account status now."
            }
            Category::BusinessOperations => {
                "Thanks, we've received this and will process it with our admin team."
            }
            Category::CustomerSupport => {
                "Sorry for any trouble with your order. We're looking into it and will update you shortly."
            }
            Category::SpamPhishing => "We will not be pursuing this request.",
            Category::CommunityFanMail => "Thank you so much for the kind words!",
            Category::Other => "Thanks for your email. We'll get back to you soon.",
        }
    }

    fn ticket_payload(email: &Email, suggestion: &TicketSuggestion) -> TicketPayload {
        let subject = if email.subject.trim().is_empty() {
            "(no subject)"
        } else {
            email.subject.as_str()
        };
        TicketPayload {
            creator_id: Some(email.creator_id.clone()),
            email_id: Some(email.email_id),
            ticket_type: Some(suggestion.ticket_type.clone()),
            title: Some(format!("{}: {}", suggestion.ticket_type, subject)),
            description: Some(format!(
                "{} (from {} <{}>)",
                suggestion.reason, email.from_name, email.from_email
            )),
            priority: Some(suggestion.suggested_priority.as_str().to_string()),
            ..TicketPayload::default()
        }
    }
}

impl ReplyAgent for TemplateReplyAgent {
    fn generate(
        &self,
        email: &Email,
        triage: &TriageResult,
        kb: &KbContext,
        thread: &[Email],
    ) -> InboxResult<ReplyResult> {
        let reply_subject = if email.subject.to_lowercase().starts_with("re:") {
            email.subject.clone()
        } else {
            format!("Re: {}", email.subject)
        };

        let greeting = if email.from_name.trim().is_empty() {
            "Hi,".to_string()
        } else {
            format!("Hi {},", email.from_name.trim())
        };

        let mut body = vec![greeting, String::new(), Self::acknowledgement(triage.category).to_string()];
        let references: Vec<String> = kb
            .kb_entries
            .iter()
            .take(MAX_REFERENCES)
            .filter_map(|entry| entry.field("title"))
            .collect();
        if !references.is_empty() {
            body.push(String::new());
            body.push("You may find these helpful:".to_string());
            body.extend(references.iter().map(|t| format!("- {}", t)));
        }
        body.push(String::new());
        body.push("Best,".to_string());
        body.push(self.signature.clone());

        let follow_up_action = triage
            .ticket_suggestion
            .as_ref()
            .filter(|s| s.needed)
            .map(|s| FollowUpAction {
                create_ticket: true,
                ticket_payload: Some(Self::ticket_payload(email, s)),
            });

        let notes = format!(
            "Drafted reply ({}, {}); kb_hits={}; thread_length={}",
            triage.category,
            triage.priority,
            kb.kb_entries.len(),
            thread.len().max(1)
        );

        Ok(ReplyResult {
            email_id: email.email_id,
            reply_subject,
            reply_body: body.join("\n"),
            follow_up_action,
            notes: Some(notes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::types::{KbDebugInfo, Priority};
    use crate::knowledge::ScoredEntry;
    use crate::tools::table_store::record_from_json;
    use serde_json::json;

    fn email() -> Email {
        Email::from_record(&record_from_json(json!({
            "email_id": 4, "thread_id": 4, "creator_id": "creator_9",
            "from_name": "Ana", "from_email": "ana@brand.com",
            "subject": "Sponsorship inquiry", "body_text": "brand deal?"
        })))
        .unwrap()
    }

    fn kb_context() -> KbContext {
        KbContext {
            email_id: 4,
            kb_entries: vec![ScoredEntry {
                row: record_from_json(json!({"title": "Sponsorship rates"})),
                similarity_score: 0.5,
            }],
            debug_info: KbDebugInfo {
                query: "q".to_string(),
                hit_count: 1,
                thread_length: 1,
            },
        }
    }

    #[test]
    fn test_reply_requests_ticket_from_suggestion() {
        let triage = TriageResult {
            email_id: 4,
            category: Category::SponsorshipInquiry,
            priority: Priority::P1,
            ticket_suggestion: crate::agents::triage::suggest_ticket(Category::SponsorshipInquiry, Priority::P1),
        };
        let reply = TemplateReplyAgent::default()
            .generate(&email(), &triage, &kb_context(), &[])
            .unwrap();

        assert_eq!(reply.reply_subject, "Re: Sponsorship inquiry");
        assert!(reply.reply_body.starts_with("Hi Ana,"));
        assert!(reply.reply_body.contains("- Sponsorship rates"));

        let action = reply.follow_up_action.unwrap();
        assert!(action.create_ticket);
        let payload = action.ticket_payload.unwrap();
        assert!(payload.missing_fields().is_empty());
        assert_eq!(payload.ticket_type.as_deref(), Some("Follow-up"));
        assert_eq!(payload.priority.as_deref(), Some("P1"));
        assert_eq!(payload.email_id, Some(4));
    }

    #[test]
    fn test_reply_without_suggestion_has_no_follow_up() {
        let triage = TriageResult {
            email_id: 4,
            category: Category::CommunityFanMail,
            priority: Priority::P2,
            ticket_suggestion: None,
        };
        let reply = TemplateReplyAgent::new("Sam")
            .generate(&email(), &triage, &kb_context(), &[])
            .unwrap();
        assert!(reply.follow_up_action.is_none());
        assert!(reply.reply_body.ends_with("Sam"));
        assert!(reply.notes.unwrap().contains("kb_hits=1"));
    }
}
