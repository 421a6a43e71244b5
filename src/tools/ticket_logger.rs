//! 工单台账
//!
//! 校验工单载荷 → 分配递增 ticket_id → 补默认字段 → 追加到 tickets 表并整表写回。
//! id 分配为「全表扫描最大值 + 1」，读改写非事务：仅适用于单进程单写者。
//! 台账另在进程内记录已分配的最大 id，外部删除末尾行后也不会复用。

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::{InboxError, InboxResult};
use crate::tools::table_store::{field_i64, field_str, Record, TableStore, TICKETS_TABLE};

/// 必填字段（校验错误按此顺序列出缺失项）
pub const REQUIRED_FIELDS: [&str; 6] = [
    "creator_id",
    "email_id",
    "type",
    "title",
    "description",
    "priority",
];

/// 接受数字或数字字符串
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("email_id must be an integer")),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom("email_id must be an integer")),
        Some(_) => Err(serde::de::Error::custom("email_id must be an integer")),
    }
}

/// 工单载荷：调用方提供，ticket_id 永远由台账分配
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketPayload {
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub email_id: Option<i64>,
    #[serde(default, rename = "type")]
    pub ticket_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_datetime_utc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_datetime_utc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_datetime_utc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl TicketPayload {
    /// 缺失或为空的必填字段（按 REQUIRED_FIELDS 顺序）
    pub fn missing_fields(&self) -> Vec<String> {
        let present = [
            non_empty(&self.creator_id).is_some(),
            self.email_id.is_some(),
            non_empty(&self.ticket_type).is_some(),
            non_empty(&self.title).is_some(),
            non_empty(&self.description).is_some(),
            non_empty(&self.priority).is_some(),
        ];
        REQUIRED_FIELDS
            .iter()
            .zip(present)
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

/// 落库后的工单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: i64,
    pub creator_id: String,
    pub email_id: i64,
    #[serde(rename = "type")]
    pub ticket_type: String,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub status: String,
    pub created_by: String,
    pub assigned_to: String,
    pub created_datetime_utc: String,
    pub updated_datetime_utc: String,
    pub due_datetime_utc: Option<String>,
    pub resolution_notes: Option<String>,
}

impl Ticket {
    /// 按 tickets 表列顺序输出
    pub fn to_record(&self) -> Record {
        let opt = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
        let mut r = Record::new();
        r.insert("ticket_id".into(), Value::from(self.ticket_id));
        r.insert("creator_id".into(), Value::String(self.creator_id.clone()));
        r.insert("email_id".into(), Value::from(self.email_id));
        r.insert("type".into(), Value::String(self.ticket_type.clone()));
        r.insert("title".into(), Value::String(self.title.clone()));
        r.insert("description".into(), Value::String(self.description.clone()));
        r.insert("priority".into(), Value::String(self.priority.clone()));
        r.insert("status".into(), Value::String(self.status.clone()));
        r.insert("created_by".into(), Value::String(self.created_by.clone()));
        r.insert("assigned_to".into(), Value::String(self.assigned_to.clone()));
        r.insert(
            "created_datetime_utc".into(),
            Value::String(self.created_datetime_utc.clone()),
        );
        r.insert(
            "updated_datetime_utc".into(),
            Value::String(self.updated_datetime_utc.clone()),
        );
        r.insert("due_datetime_utc".into(), opt(&self.due_datetime_utc));
        r.insert("resolution_notes".into(), opt(&self.resolution_notes));
        r
    }

    pub fn from_record(record: &Record) -> InboxResult<Ticket> {
        let ticket_id = field_i64(record, "ticket_id")?
            .ok_or_else(|| InboxError::Schema("ticket row is missing 'ticket_id'".to_string()))?;
        let email_id = field_i64(record, "email_id")?.ok_or_else(|| {
            InboxError::Schema(format!("ticket {} is missing 'email_id'", ticket_id))
        })?;
        let text = |key: &str| field_str(record, key).unwrap_or_default();
        Ok(Ticket {
            ticket_id,
            creator_id: text("creator_id"),
            email_id,
            ticket_type: text("type"),
            title: text("title"),
            description: text("description"),
            priority: text("priority"),
            status: text("status"),
            created_by: text("created_by"),
            assigned_to: text("assigned_to"),
            created_datetime_utc: text("created_datetime_utc"),
            updated_datetime_utc: text("updated_datetime_utc"),
            due_datetime_utc: field_str(record, "due_datetime_utc"),
            resolution_notes: field_str(record, "resolution_notes"),
        })
    }
}

/// UTC ISO-8601，秒精度，Z 结尾
pub fn utc_now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// 载荷未提供时使用的默认值
#[derive(Debug, Clone)]
pub struct TicketDefaults {
    pub status: String,
    pub created_by: String,
    pub assigned_to: String,
}

impl Default for TicketDefaults {
    fn default() -> Self {
        Self {
            status: "open".to_string(),
            created_by: "orchestrator_agent".to_string(),
            assigned_to: "inbox_manager".to_string(),
        }
    }
}

pub struct TicketLedger {
    store: Arc<dyn TableStore>,
    defaults: TicketDefaults,
    /// 本进程已分配的最大 id
    high_water: AtomicI64,
}

impl TicketLedger {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self::with_defaults(store, TicketDefaults::default())
    }

    pub fn with_defaults(store: Arc<dyn TableStore>, defaults: TicketDefaults) -> Self {
        Self {
            store,
            defaults,
            high_water: AtomicI64::new(0),
        }
    }

    /// 读取 tickets 表；文件尚不存在时视为空台账
    fn load_rows(&self) -> InboxResult<Vec<Record>> {
        match self.store.read(TICKETS_TABLE) {
            Ok(rows) => Ok(rows),
            Err(InboxError::NotFound(reason)) => {
                tracing::warn!(%reason, "tickets table missing, starting an empty ledger");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn next_id(&self, rows: &[Record]) -> InboxResult<i64> {
        let mut max_id = 0;
        for row in rows {
            if let Some(id) = field_i64(row, "ticket_id")? {
                max_id = max_id.max(id);
            }
        }
        Ok(max_id.max(self.high_water.load(Ordering::SeqCst)) + 1)
    }

    /// 校验并追加一条工单，返回完整落库的 Ticket（含分配的 id）
    pub fn log(&self, payload: &TicketPayload) -> InboxResult<Ticket> {
        let missing = payload.missing_fields();
        if !missing.is_empty() {
            tracing::warn!(?missing, "ticket payload rejected");
            return Err(InboxError::Validation { missing });
        }

        let mut rows = self.load_rows()?;
        let ticket_id = self.next_id(&rows)?;
        let now = utc_now_iso();
        let or_default = |v: &Option<String>, d: &str| {
            non_empty(v).map(str::to_string).unwrap_or_else(|| d.to_string())
        };

        let ticket = Ticket {
            ticket_id,
            creator_id: or_default(&payload.creator_id, ""),
            email_id: payload.email_id.unwrap_or_default(),
            ticket_type: or_default(&payload.ticket_type, ""),
            title: or_default(&payload.title, ""),
            description: or_default(&payload.description, ""),
            priority: or_default(&payload.priority, ""),
            status: or_default(&payload.status, self.defaults.status.as_str()),
            created_by: or_default(&payload.created_by, self.defaults.created_by.as_str()),
            assigned_to: or_default(&payload.assigned_to, self.defaults.assigned_to.as_str()),
            created_datetime_utc: or_default(&payload.created_datetime_utc, now.as_str()),
            updated_datetime_utc: or_default(&payload.updated_datetime_utc, now.as_str()),
            due_datetime_utc: non_empty(&payload.due_datetime_utc).map(str::to_string),
            resolution_notes: non_empty(&payload.resolution_notes).map(str::to_string),
        };

        rows.push(ticket.to_record());
        self.store.write(TICKETS_TABLE, &rows)?;
        self.high_water.fetch_max(ticket_id, Ordering::SeqCst);

        tracing::info!(ticket_id, email_id = ticket.email_id, "Ticket logged");
        Ok(ticket)
    }

    pub fn list(&self) -> InboxResult<Vec<Ticket>> {
        self.load_rows()?.iter().map(Ticket::from_record).collect()
    }

    pub fn get(&self, ticket_id: i64) -> InboxResult<Ticket> {
        self.list()?
            .into_iter()
            .find(|t| t.ticket_id == ticket_id)
            .ok_or_else(|| InboxError::NotFound(format!("no ticket with ticket_id={}", ticket_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::table_store::{record_from_json, MemoryTableStore};
    use serde_json::json;

    fn payload(email_id: i64) -> TicketPayload {
        TicketPayload {
            creator_id: Some("creator_1".to_string()),
            email_id: Some(email_id),
            ticket_type: Some("Follow-up".to_string()),
            title: Some("Follow up on sponsorship".to_string()),
            description: Some("Brand wants rates".to_string()),
            priority: Some("P1".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_sequential_ids_from_empty_ledger() {
        let store = Arc::new(MemoryTableStore::new());
        let ledger = TicketLedger::new(store);
        let ids: Vec<i64> = (1..=4).map(|i| ledger.log(&payload(i)).unwrap().ticket_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_next_id_follows_existing_max() {
        let store = Arc::new(
            MemoryTableStore::new()
                .with_table(
                    "tickets",
                    vec![
                        record_from_json(json!({"ticket_id": 3, "email_id": 1})),
                        record_from_json(json!({"ticket_id": "41", "email_id": 2})),
                        record_from_json(json!({"ticket_id": 7, "email_id": 3})),
                    ],
                )
                .unwrap(),
        );
        let ledger = TicketLedger::new(store.clone());
        assert_eq!(ledger.log(&payload(9)).unwrap().ticket_id, 42);
        assert_eq!(store.read("tickets").unwrap().len(), 4);
    }

    #[test]
    fn test_ids_not_reused_after_external_removal() {
        let store = Arc::new(MemoryTableStore::new());
        let ledger = TicketLedger::new(store.clone());
        ledger.log(&payload(1)).unwrap();
        ledger.log(&payload(2)).unwrap();
        // 外部删除最后一行
        let mut rows = store.read("tickets").unwrap();
        rows.pop();
        store.write("tickets", &rows).unwrap();
        assert_eq!(ledger.log(&payload(3)).unwrap().ticket_id, 3);
    }

    #[test]
    fn test_validation_names_exactly_missing_fields() {
        let ledger = TicketLedger::new(Arc::new(MemoryTableStore::new()));
        let mut p = payload(1);
        p.title = Some("   ".to_string());
        p.priority = None;
        p.email_id = None;
        match ledger.log(&p) {
            Err(InboxError::Validation { missing }) => {
                assert_eq!(missing, vec!["email_id", "title", "priority"]);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(
            TicketPayload::default().missing_fields(),
            REQUIRED_FIELDS.iter().map(|s| s.to_string()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_defaults_filled() {
        let ledger = TicketLedger::new(Arc::new(MemoryTableStore::new()));
        let ticket = ledger.log(&payload(1)).unwrap();
        assert_eq!(ticket.status, "open");
        assert_eq!(ticket.created_by, "orchestrator_agent");
        assert_eq!(ticket.assigned_to, "inbox_manager");
        assert_eq!(ticket.created_datetime_utc, ticket.updated_datetime_utc);
        assert!(ticket.created_datetime_utc.ends_with('Z'));
        assert_eq!(ticket.created_datetime_utc.len(), "2024-01-01T00:00:00Z".len());
        assert_eq!(ticket.due_datetime_utc, None);

        let mut p = payload(2);
        p.status = Some("in_progress".to_string());
        p.assigned_to = Some("ops".to_string());
        let ticket = ledger.log(&p).unwrap();
        assert_eq!(ticket.status, "in_progress");
        assert_eq!(ticket.assigned_to, "ops");
    }

    #[test]
    fn test_write_then_read_back_matches() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::tools::table_store::CsvTableStore::new(dir.path()));
        let ledger = TicketLedger::new(store);
        let mut p = payload(5);
        p.creator_id = Some("00123".to_string());
        let logged = ledger.log(&p).unwrap();
        assert_eq!(ledger.get(logged.ticket_id).unwrap(), logged);
        assert!(matches!(ledger.get(99), Err(InboxError::NotFound(_))));
    }

    #[test]
    fn test_payload_accepts_string_email_id() {
        let p: TicketPayload = serde_json::from_value(json!({
            "creator_id": "c", "email_id": "12", "type": "Follow-up",
            "title": "t", "description": "d", "priority": "P2"
        }))
        .unwrap();
        assert_eq!(p.email_id, Some(12));
        assert!(p.missing_fields().is_empty());
    }
}
