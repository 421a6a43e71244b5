//! 分诊 Agent
//!
//! 分类：对小写后的 subject + body 依次套用关键词规则，首个命中的规则胜出（顺序即语义，
//! 赞助谈判先于赞助新询价，赞助先于泛合作）。规则均未命中时查询知识库，前 3 条命中中有
//! spam 开头的分类则判为垃圾邮件，否则为 Other。
//! 优先级在分类确定后独立计算；工单建议先看高价值分类，再看 P0，只产出一条。
//! 结果写回 inbox 对应行的 category / priority。

use std::sync::Arc;

use crate::agents::types::{Category, Email, Priority, TicketSuggestion, TriageResult};
use crate::core::{InboxError, InboxResult};
use crate::knowledge::KnowledgeBase;
use crate::tools::table_store::{field_i64, TableStore, INBOX_TABLE};

const SPONSORSHIP: &[&str] = &[
    "sponsor",
    "sponsorship",
    "brand deal",
    "partnership",
    "campaign",
    "integration",
];
const NEGOTIATION: &[&str] = &[
    "follow up",
    "renegotiate",
    "counter",
    "rate change",
    "update terms",
];
const COLLABORATION: &[&str] = &["collab", "collaboration", "collaborate", "duet", "co-create"];
const UGC: &[&str] = &["ugc", "user-generated", "whitelisting", "usage rights"];
const PR_MEDIA: &[&str] = &[
    "interview",
    "press",
    "media request",
    "podcast",
    "feature you",
    "article about you",
];
const EVENTS: &[&str] = &["event", "conference", "speaking slot", "panel", "keynote"];
const MANAGEMENT: &[&str] = &[
    "representation",
    "management",
    "agency",
    "talent manager",
    "contract review",
];
const PLATFORM: &[&str] = &[
    "account",
    "suspicious login",
    "password reset",
    "policy violation",
    "community guidelines",
];
const BUSINESS_OPS: &[&str] = &["invoice", "payment", "payout", "billing", "tax", "w9"];
const SUPPORT: &[&str] = &[
    "refund",
    "order",
    "shipping",
    "customer support",
    "support ticket",
];
const SPAM: &[&str] = &[
    "lottery",
    "wire transfer",
    "prince",
    "crypto double",
    "earn $$$ fast",
];

const URGENCY: &[&str] = &["urgent", "immediately", "asap", "24 hours", "deadline"];
const ACCOUNT_COMPROMISE: &[&str] = &["compromised", "hacked", "disabled"];

/// 一条分类规则：every 中每组关键词都至少命中一个
struct CategoryRule {
    category: Category,
    every: &'static [&'static [&'static str]],
}

/// 规则按求值顺序排列，首个命中者胜出
const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        category: Category::SponsorshipNegotiation,
        every: &[SPONSORSHIP, NEGOTIATION],
    },
    CategoryRule {
        category: Category::SponsorshipInquiry,
        every: &[SPONSORSHIP],
    },
    CategoryRule {
        category: Category::CreatorCollaboration,
        every: &[COLLABORATION],
    },
    CategoryRule {
        category: Category::UgcContentRequest,
        every: &[UGC],
    },
    CategoryRule {
        category: Category::PrMedia,
        every: &[PR_MEDIA],
    },
    CategoryRule {
        category: Category::EventsSpeaking,
        every: &[EVENTS],
    },
    CategoryRule {
        category: Category::ManagementLegal,
        every: &[MANAGEMENT],
    },
    CategoryRule {
        category: Category::PlatformAccount,
        every: &[PLATFORM],
    },
    CategoryRule {
        category: Category::BusinessOperations,
        every: &[BUSINESS_OPS],
    },
    CategoryRule {
        category: Category::CustomerSupport,
        every: &[SUPPORT],
    },
    CategoryRule {
        category: Category::SpamPhishing,
        every: &[SPAM],
    },
];

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

/// 关键词规则分类（text 须已小写）；无规则命中返回 None
pub fn match_category_rules(text: &str) -> Option<Category> {
    CATEGORY_RULES
        .iter()
        .find(|rule| rule.every.iter().all(|group| contains_any(text, group)))
        .map(|rule| rule.category)
}

/// 优先级级联（text 须已小写）
pub fn infer_priority(text: &str, category: Category) -> Priority {
    if contains_any(text, URGENCY)
        || (category.is_account_related() && contains_any(text, ACCOUNT_COMPROMISE))
    {
        return Priority::P0;
    }
    if category.is_high_value() {
        return Priority::P1;
    }
    match category {
        Category::BusinessOperations
        | Category::CustomerSupport
        | Category::PlatformAccount
        | Category::CreatorCollaboration
        | Category::UgcContentRequest
        | Category::CommunityFanMail => Priority::P2,
        Category::SpamPhishing => Priority::P4,
        _ => Priority::P3,
    }
}

/// 工单建议：高价值分类先判定并短路，其次 P0 安全工单；最多一条
pub fn suggest_ticket(category: Category, priority: Priority) -> Option<TicketSuggestion> {
    if category.is_high_value() {
        return Some(TicketSuggestion {
            needed: true,
            ticket_type: "Follow-up".to_string(),
            reason: format!("Important opportunity: {}", category),
            suggested_priority: priority,
        });
    }
    if priority == Priority::P0 {
        return Some(TicketSuggestion {
            needed: true,
            ticket_type: "Account / Security".to_string(),
            reason: "Critical issue or deadline detected".to_string(),
            suggested_priority: Priority::P0,
        });
    }
    None
}

pub struct TriageAgent {
    store: Arc<dyn TableStore>,
    kb: Arc<KnowledgeBase>,
    fallback_top_k: usize,
    fallback_min_score: f64,
}

impl TriageAgent {
    pub fn new(store: Arc<dyn TableStore>, kb: Arc<KnowledgeBase>) -> Self {
        Self {
            store,
            kb,
            fallback_top_k: 3,
            fallback_min_score: 0.1,
        }
    }

    pub fn with_fallback(mut self, top_k: usize, min_score: f64) -> Self {
        self.fallback_top_k = top_k;
        self.fallback_min_score = min_score;
        self
    }

    fn infer_category(&self, text: &str) -> InboxResult<Category> {
        if let Some(category) = match_category_rules(text) {
            return Ok(category);
        }
        // 空文本无法检索，直接归为 Other
        if text.trim().is_empty() {
            return Ok(Category::Other);
        }

        let hits = self
            .kb
            .search(text, self.fallback_top_k, self.fallback_min_score)?;
        let spam_like = hits.iter().any(|hit| {
            hit.field("category")
                .map(|c| c.to_lowercase().starts_with("spam"))
                .unwrap_or(false)
        });
        if spam_like {
            tracing::debug!(hits = hits.len(), "KB fallback flagged spam");
            return Ok(Category::SpamPhishing);
        }
        Ok(Category::Other)
    }

    /// 只分类不落库
    pub fn classify(&self, email: &Email) -> InboxResult<TriageResult> {
        let text = email.triage_text();
        let category = self.infer_category(&text)?;
        let priority = infer_priority(&text, category);
        let ticket_suggestion = suggest_ticket(category, priority);
        Ok(TriageResult {
            email_id: email.email_id,
            category,
            priority,
            ticket_suggestion,
        })
    }

    /// 分类并写回 inbox 行
    pub fn run(&self, email: &Email) -> InboxResult<TriageResult> {
        let result = self.classify(email)?;
        self.update_inbox_row(email.email_id, result.category, result.priority)?;
        tracing::info!(
            email_id = email.email_id,
            category = %result.category,
            priority = %result.priority,
            "triage complete"
        );
        Ok(result)
    }

    fn update_inbox_row(&self, email_id: i64, category: Category, priority: Priority) -> InboxResult<()> {
        let mut rows = self.store.read(INBOX_TABLE)?;
        if !rows.is_empty() && !rows.iter().any(|r| r.contains_key("email_id")) {
            return Err(InboxError::Schema("inbox is missing 'email_id' column".to_string()));
        }

        let mut matched = false;
        for row in rows.iter_mut() {
            if field_i64(row, "email_id")? == Some(email_id) {
                row.insert("category".to_string(), category.label().into());
                row.insert("priority".to_string(), priority.as_str().into());
                matched = true;
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::table_store::{record_from_json, MemoryTableStore};
    use serde_json::json;

    fn agent_with(inbox: Vec<serde_json::Value>, kb: Vec<serde_json::Value>) -> (TriageAgent, Arc<MemoryTableStore>) {
        let store = Arc::new(
            MemoryTableStore::new()
                .with_table("inbox", inbox.into_iter().map(record_from_json).collect())
                .unwrap()
                .with_table("knowledge_base", kb.into_iter().map(record_from_json).collect())
                .unwrap(),
        );
        let kb = Arc::new(KnowledgeBase::new(store.clone()));
        (TriageAgent::new(store.clone(), kb), store)
    }

    fn email(id: i64, subject: &str, body: &str) -> Email {
        Email::from_record(&record_from_json(json!({
            "email_id": id, "thread_id": id, "creator_id": "c1",
            "subject": subject, "body_text": body
        })))
        .unwrap()
    }

    #[test]
    fn test_rule_order_sponsorship_before_collaboration() {
        let a = match_category_rules("let's collab on a sponsorship");
        let b = match_category_rules("sponsorship idea: let's collab");
        assert_eq!(a, Some(Category::SponsorshipInquiry));
        assert_eq!(b, Some(Category::SponsorshipInquiry));
    }

    #[test]
    fn test_negotiation_requires_sponsorship_language() {
        assert_eq!(
            match_category_rules("following our campaign, can we renegotiate?"),
            Some(Category::SponsorshipNegotiation)
        );
        // 只有谈判用语、没有赞助词：不算赞助谈判
        assert_eq!(match_category_rules("can we renegotiate the invoice"), Some(Category::BusinessOperations));
    }

    #[test]
    fn test_category_cascade_samples() {
        let cases = [
            ("would you do a duet with me", Category::CreatorCollaboration),
            ("need ugc videos with usage rights", Category::UgcContentRequest),
            ("podcast guest request", Category::PrMedia),
            ("keynote at our conference", Category::EventsSpeaking),
            ("talent manager offering representation", Category::ManagementLegal),
            ("suspicious login detected", Category::PlatformAccount),
            ("your payout is ready", Category::BusinessOperations),
            ("where is my refund", Category::CustomerSupport),
            ("you won the lottery", Category::SpamPhishing),
        ];
        for (text, expected) in cases {
            assert_eq!(match_category_rules(text), Some(expected), "{}", text);
        }
        assert_eq!(match_category_rules("hello there"), None);
    }

    #[test]
    fn test_priority_cascade() {
        assert_eq!(infer_priority("urgent: reply", Category::Other), Priority::P0);
        assert_eq!(infer_priority("urgent spam", Category::SpamPhishing), Priority::P0);
        assert_eq!(
            infer_priority("my account was hacked", Category::PlatformAccount),
            Priority::P0
        );
        // 非账号分类中的 hacked 不触发 P0
        assert_eq!(infer_priority("we hacked together a refund", Category::CustomerSupport), Priority::P2);
        assert_eq!(infer_priority("rates?", Category::SponsorshipInquiry), Priority::P1);
        assert_eq!(infer_priority("hi", Category::UgcContentRequest), Priority::P2);
        assert_eq!(infer_priority("hi", Category::SpamPhishing), Priority::P4);
        assert_eq!(infer_priority("hi", Category::Other), Priority::P3);
    }

    #[test]
    fn test_single_ticket_suggestion() {
        let s = suggest_ticket(Category::PrMedia, Priority::P0).unwrap();
        assert_eq!(s.ticket_type, "Follow-up");
        assert_eq!(s.suggested_priority, Priority::P0);
        assert_eq!(s.reason, "Important opportunity: PR / Media / Interviews");

        let s = suggest_ticket(Category::PlatformAccount, Priority::P0).unwrap();
        assert_eq!(s.ticket_type, "Account / Security");

        assert!(suggest_ticket(Category::CustomerSupport, Priority::P2).is_none());
    }

    #[test]
    fn test_run_persists_category_and_priority() {
        let (agent, store) = agent_with(
            vec![
                json!({"email_id": 1, "thread_id": 1, "subject": "Sponsorship inquiry",
                       "body_text": "We'd like to discuss a brand deal", "category": null, "priority": null}),
                json!({"email_id": 2, "thread_id": 2, "subject": "other", "body_text": "x",
                       "category": null, "priority": null}),
            ],
            vec![json!({"category": "FAQ", "content": "rates"})],
        );
        let result = agent
            .run(&email(1, "Sponsorship inquiry", "We'd like to discuss a brand deal"))
            .unwrap();
        assert_eq!(result.category, Category::SponsorshipInquiry);
        assert_eq!(result.priority, Priority::P1);
        assert_eq!(result.ticket_suggestion.unwrap().ticket_type, "Follow-up");

        let rows = store.read("inbox").unwrap();
        assert_eq!(rows[0]["category"], json!("Brand/Sponsorship – New Inquiry"));
        assert_eq!(rows[0]["priority"], json!("P1"));
        assert_eq!(rows[1]["category"], serde_json::Value::Null);
    }

    #[test]
    fn test_kb_fallback_flags_spam() {
        let (agent, _) = agent_with(
            vec![json!({"email_id": 5, "thread_id": 5})],
            vec![
                json!({"category": "Spam", "content": "crypto giveaway winner claim reward"}),
                json!({"category": "FAQ", "content": "media kit rates"}),
            ],
        );
        let result = agent
            .classify(&email(5, "Claim your reward", "crypto giveaway winner"))
            .unwrap();
        assert_eq!(result.category, Category::SpamPhishing);
        assert_eq!(result.priority, Priority::P4);
        assert!(result.ticket_suggestion.is_none());

        let result = agent.classify(&email(5, "hello", "just saying hi")).unwrap();
        assert_eq!(result.category, Category::Other);
        assert_eq!(result.priority, Priority::P3);
    }

    #[test]
    fn test_run_missing_row_is_not_found() {
        let (agent, _) = agent_with(
            vec![json!({"email_id": 1, "thread_id": 1})],
            vec![json!({"content": "x"})],
        );
        let err = agent.run(&email(9, "refund please", "")).unwrap_err();
        assert!(matches!(err, InboxError::NotFound(_)));
    }
}
