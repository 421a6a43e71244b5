//! 流水线数据模型：Email、TriageResult、KbContext、ReplyResult
//!
//! 存储层的弱类型 Record 在这里转换为强类型结构；标识字段不可变，分类字段由分诊写回。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{InboxError, InboxResult};
use crate::knowledge::ScoredEntry;
use crate::tools::table_store::{field_i64, field_str, Record};
use crate::tools::ticket_logger::TicketPayload;

/// 固定分类体系（按规则求值顺序排列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Brand/Sponsorship – Negotiation & Follow-up")]
    SponsorshipNegotiation,
    #[serde(rename = "Brand/Sponsorship – New Inquiry")]
    SponsorshipInquiry,
    #[serde(rename = "Creator Collaboration")]
    CreatorCollaboration,
    #[serde(rename = "UGC / Content Creation Request")]
    UgcContentRequest,
    #[serde(rename = "PR / Media / Interviews")]
    PrMedia,
    #[serde(rename = "Events / Speaking / Appearances")]
    EventsSpeaking,
    #[serde(rename = "Management / Representation / Legal")]
    ManagementLegal,
    #[serde(rename = "Platform / Account Notifications")]
    PlatformAccount,
    #[serde(rename = "Business Operations / Admin")]
    BusinessOperations,
    #[serde(rename = "Customer Support (for creators selling products)")]
    CustomerSupport,
    #[serde(rename = "Spam / Phishing / Irrelevant")]
    SpamPhishing,
    #[serde(rename = "Community / Fan Mail")]
    CommunityFanMail,
    #[serde(rename = "Other / Uncategorized")]
    Other,
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::SponsorshipNegotiation,
        Category::SponsorshipInquiry,
        Category::CreatorCollaboration,
        Category::UgcContentRequest,
        Category::PrMedia,
        Category::EventsSpeaking,
        Category::ManagementLegal,
        Category::PlatformAccount,
        Category::BusinessOperations,
        Category::CustomerSupport,
        Category::SpamPhishing,
        Category::CommunityFanMail,
        Category::Other,
    ];

    /// 写入 inbox 的展示标签
    pub fn label(&self) -> &'static str {
        match self {
            Category::SponsorshipNegotiation => "Brand/Sponsorship – Negotiation & Follow-up",
            Category::SponsorshipInquiry => "Brand/Sponsorship – New Inquiry",
            Category::CreatorCollaboration => "Creator Collaboration",
            Category::UgcContentRequest => "UGC / Content Creation Request",
            Category::PrMedia => "PR / Media / Interviews",
            Category::EventsSpeaking => "Events / Speaking / Appearances",
            Category::ManagementLegal => "Management / Representation / Legal",
            Category::PlatformAccount => "Platform / Account Notifications",
            Category::BusinessOperations => "Business Operations / Admin",
            Category::CustomerSupport => "Customer Support (for creators selling products)",
            Category::SpamPhishing => "Spam / Phishing / Irrelevant",
            Category::CommunityFanMail => "Community / Fan Mail",
            Category::Other => "Other / Uncategorized",
        }
    }

    pub fn from_label(label: &str) -> Option<Category> {
        let label = label.trim();
        Category::ALL.iter().copied().find(|c| c.label() == label)
    }

    /// 高价值分类：赞助、PR、活动、经纪/法务（P1，且总是建议跟进工单）
    pub fn is_high_value(&self) -> bool {
        matches!(
            self,
            Category::SponsorshipInquiry
                | Category::SponsorshipNegotiation
                | Category::PrMedia
                | Category::EventsSpeaking
                | Category::ManagementLegal
        )
    }

    /// 账号相关分类（标签含 account）
    pub fn is_account_related(&self) -> bool {
        self.label().to_lowercase().contains("account")
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// 优先级：P0 最紧急，P4 忽略
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
    P4,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
            Priority::P4 => "P4",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = InboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "P0" => Ok(Priority::P0),
            "P1" => Ok(Priority::P1),
            "P2" => Ok(Priority::P2),
            "P3" => Ok(Priority::P3),
            "P4" => Ok(Priority::P4),
            other => Err(InboxError::Schema(format!("unknown priority '{}'", other))),
        }
    }
}

/// inbox 表的核心列；其余列（接收时间、来源、指派、最近动作、关联工单……）进入 metadata
pub const CORE_COLUMNS: [&str; 12] = [
    "email_id",
    "thread_id",
    "creator_id",
    "from_name",
    "from_email",
    "to_email",
    "subject",
    "body_text",
    "category",
    "priority",
    "status",
    "notes",
];

/// inbox 行的强类型视图
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Email {
    pub email_id: i64,
    pub thread_id: i64,
    pub creator_id: String,
    pub from_name: String,
    pub from_email: String,
    pub to_email: String,
    pub subject: String,
    pub body_text: String,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
    /// 辅助元数据（接收时间、来源、指派、最近动作、关联工单等）
    pub metadata: Record,
}

impl Email {
    /// 从 inbox 行构造；email_id / thread_id 缺失或非整数时返回 Schema
    pub fn from_record(record: &Record) -> InboxResult<Email> {
        let email_id = field_i64(record, "email_id")?
            .ok_or_else(|| InboxError::Schema("inbox row is missing 'email_id'".to_string()))?;
        let thread_id = field_i64(record, "thread_id")?.ok_or_else(|| {
            InboxError::Schema(format!("inbox row {} is missing 'thread_id'", email_id))
        })?;
        let text = |key: &str| field_str(record, key).unwrap_or_default();

        let metadata: Record = record
            .iter()
            .filter(|(k, _)| !CORE_COLUMNS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Email {
            email_id,
            thread_id,
            creator_id: text("creator_id"),
            from_name: text("from_name"),
            from_email: text("from_email"),
            to_email: text("to_email"),
            subject: text("subject"),
            body_text: text("body_text"),
            category: field_str(record, "category"),
            priority: field_str(record, "priority"),
            status: field_str(record, "status"),
            notes: field_str(record, "notes"),
            metadata,
        })
    }

    /// 分诊用文本：subject + 空格 + body，统一小写
    pub fn triage_text(&self) -> String {
        format!("{} {}", self.subject, self.body_text).to_lowercase()
    }

    /// 线程排序键：可解析的时间在前，其次按原始字符串，缺失的排最后
    pub fn received_key(&self) -> ReceivedKey {
        let raw = match field_str(&self.metadata, "received_datetime_utc") {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => return ReceivedKey::Missing,
        };
        match parse_received(raw.trim()) {
            Some(at) => ReceivedKey::At(at),
            None => ReceivedKey::Raw(raw.trim().to_string()),
        }
    }

    /// 已关联的工单 id（用于保证每封邮件只建一次工单）；ticket_id 不是整数时返回 Schema
    pub fn linked_ticket_id(&self) -> InboxResult<Option<i64>> {
        field_i64(&self.metadata, "ticket_id")
    }
}

const NAIVE_RECEIVED_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

fn parse_received(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_RECEIVED_FORMATS.iter().find_map(|fmt| {
        chrono::NaiveDateTime::parse_from_str(raw, fmt)
            .ok()
            .map(|naive| naive.and_utc())
    })
}

/// 接收时间排序键（变体顺序即排序顺序）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReceivedKey {
    At(DateTime<Utc>),
    Raw(String),
    Missing,
}

/// 工单建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketSuggestion {
    pub needed: bool,
    #[serde(rename = "type")]
    pub ticket_type: String,
    pub reason: String,
    pub suggested_priority: Priority,
}

/// 分诊结果（每次分诊产生一个新的结果）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageResult {
    pub email_id: i64,
    pub category: Category,
    pub priority: Priority,
    pub ticket_suggestion: Option<TicketSuggestion>,
}

/// 检索上下文的调试信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KbDebugInfo {
    pub query: String,
    pub hit_count: usize,
    pub thread_length: usize,
}

/// 知识库检索上下文：按相似度降序
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KbContext {
    pub email_id: i64,
    pub kb_entries: Vec<ScoredEntry>,
    pub debug_info: KbDebugInfo,
}

/// 回复阶段请求的后续动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpAction {
    pub create_ticket: bool,
    #[serde(default)]
    pub ticket_payload: Option<TicketPayload>,
}

/// 回复草稿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyResult {
    pub email_id: i64,
    pub reply_subject: String,
    pub reply_body: String,
    #[serde(default)]
    pub follow_up_action: Option<FollowUpAction>,
    /// 写回 inbox.notes
    #[serde(default)]
    pub notes: Option<String>,
}
