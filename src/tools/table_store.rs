//! 表格存储网关
//!
//! TableStore 只允许访问白名单内的三张表（inbox / knowledge_base / tickets），其余表名一律 Permission 拒绝。
//! CsvTableStore 绑定数据目录，表名映射为 `<table>.csv`；MemoryTableStore 供测试使用。
//! 每次读写输出一行结构化审计日志（JSON）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_json::Value;

use crate::core::{InboxError, InboxResult};

/// 一行记录：列名 -> 值（保持列插入顺序，边界处为弱类型）
pub type Record = serde_json::Map<String, Value>;

pub const INBOX_TABLE: &str = "inbox";
pub const KNOWLEDGE_BASE_TABLE: &str = "knowledge_base";
pub const TICKETS_TABLE: &str = "tickets";

/// 允许访问的表名白名单
pub const ALLOWED_TABLES: [&str; 3] = [INBOX_TABLE, KNOWLEDGE_BASE_TABLE, TICKETS_TABLE];

/// 将表名规范化为白名单中的名字（接受 `inbox` 与 `inbox.csv` 两种写法）
pub fn resolve_table(name: &str) -> InboxResult<&'static str> {
    let stem = name.trim().trim_end_matches(".csv");
    ALLOWED_TABLES
        .iter()
        .copied()
        .find(|t| *t == stem)
        .ok_or_else(|| {
            InboxError::Permission(format!(
                "table '{}' not allowed, must be one of: {}",
                name,
                ALLOWED_TABLES.join(", ")
            ))
        })
}

/// 存储网关 trait：按表名整表读、整表写
pub trait TableStore: Send + Sync {
    /// 读取整张表，保持行顺序；表不存在返回 NotFound
    fn read(&self, table: &str) -> InboxResult<Vec<Record>>;

    /// 用给定记录整表覆盖
    fn write(&self, table: &str, records: &[Record]) -> InboxResult<()>;
}

fn audit(table: &str, op: &str, rows: usize, ok: bool) {
    let audit = serde_json::json!({
        "event": "table_audit",
        "table": table,
        "op": op,
        "rows": rows,
        "ok": ok,
    });
    tracing::info!(audit = %audit.to_string(), "table");
}

/// CSV 单元格类型推断：空 -> null，规范整数 -> 整数，其余保持字符串
pub fn infer_cell(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    match raw.parse::<i64>() {
        // 仅当回写后字面一致时才视为整数（"007"、"+1" 保持字符串）
        Ok(n) if n.to_string() == raw => Value::from(n),
        _ => Value::String(raw.to_string()),
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// 读取弱类型字段为字符串；缺失或 null 返回 None
pub fn field_str(record: &Record, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(render_cell(other)),
    }
}

/// 读取弱类型字段为整数；缺失 / null / 空串返回 Ok(None)，无法解析返回 Schema
pub fn field_i64(record: &Record, key: &str) -> InboxResult<Option<i64>> {
    let bad = |v: &Value| InboxError::Schema(format!("column '{}' is not an integer: {}", key, v));
    match record.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| bad(v)),
        Some(v @ Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(None);
            }
            s.parse::<i64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.fract() == 0.0)
                        .map(|f| f as i64)
                })
                .map(Some)
                .ok_or_else(|| bad(v))
        }
        Some(v) => Err(bad(v)),
    }
}

/// CSV 文件存储：绑定数据目录，表名映射为 `<root>/<table>.csv`
#[derive(Debug, Clone)]
pub struct CsvTableStore {
    root_dir: PathBuf,
}

impl CsvTableStore {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn path_for(&self, table: &str) -> InboxResult<(&'static str, PathBuf)> {
        let table = resolve_table(table)?;
        Ok((table, self.root_dir.join(format!("{}.csv", table))))
    }
}

impl TableStore for CsvTableStore {
    fn read(&self, table: &str) -> InboxResult<Vec<Record>> {
        let (table, path) = self.path_for(table)?;
        if !path.exists() {
            audit(table, "read", 0, false);
            return Err(InboxError::NotFound(format!("{} does not exist", path.display())));
        }

        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| InboxError::Storage(format!("open {}: {}", path.display(), e)))?;
        let headers = reader
            .headers()
            .map_err(|e| InboxError::Storage(format!("read headers of {}: {}", table, e)))?
            .clone();

        let mut rows = Vec::new();
        for row in reader.records() {
            let row = row.map_err(|e| InboxError::Storage(format!("read {}: {}", table, e)))?;
            let mut record = Record::new();
            for (column, cell) in headers.iter().zip(row.iter()) {
                record.insert(column.to_string(), infer_cell(cell));
            }
            rows.push(record);
        }

        audit(table, "read", rows.len(), true);
        Ok(rows)
    }

    fn write(&self, table: &str, records: &[Record]) -> InboxResult<()> {
        let (table, path) = self.path_for(table)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| InboxError::Storage(format!("create {}: {}", parent.display(), e)))?;
        }

        // 列为所有行键的并集，按首次出现顺序
        let mut columns: Vec<&str> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !columns.contains(&key.as_str()) {
                    columns.push(key.as_str());
                }
            }
        }

        let storage = |e: csv::Error| InboxError::Storage(format!("write {}: {}", table, e));
        let mut writer = csv::Writer::from_path(&path).map_err(storage)?;
        if !columns.is_empty() {
            writer.write_record(&columns).map_err(storage)?;
        }
        for record in records {
            let cells: Vec<String> = columns
                .iter()
                .map(|c| record.get(*c).map(render_cell).unwrap_or_default())
                .collect();
            writer.write_record(&cells).map_err(storage)?;
        }
        writer
            .flush()
            .map_err(|e| InboxError::Storage(format!("flush {}: {}", table, e)))?;

        audit(table, "write", records.len(), true);
        Ok(())
    }
}

/// 内存存储：测试与演示用，缺表时与文件缺失一致返回 NotFound
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: RwLock<HashMap<&'static str, Vec<Record>>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置整张表（表名须在白名单内）
    pub fn with_table(self, table: &str, records: Vec<Record>) -> InboxResult<Self> {
        self.write(table, &records)?;
        Ok(self)
    }
}

impl TableStore for MemoryTableStore {
    fn read(&self, table: &str) -> InboxResult<Vec<Record>> {
        let table = resolve_table(table)?;
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let rows = tables
            .get(table)
            .cloned()
            .ok_or_else(|| InboxError::NotFound(format!("table '{}' has no data", table)))?;
        audit(table, "read", rows.len(), true);
        Ok(rows)
    }

    fn write(&self, table: &str, records: &[Record]) -> InboxResult<()> {
        let table = resolve_table(table)?;
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.insert(table, records.to_vec());
        audit(table, "write", records.len(), true);
        Ok(())
    }
}

/// 由 JSON 对象字面量构造 Record（测试与 CLI 便捷函数）；非对象返回空记录
pub fn record_from_json(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_table_allow_list() {
        assert_eq!(resolve_table("inbox").unwrap(), "inbox");
        assert_eq!(resolve_table("tickets.csv").unwrap(), "tickets");
        assert!(matches!(resolve_table("secrets.csv"), Err(InboxError::Permission(_))));
        assert!(matches!(resolve_table("../inbox"), Err(InboxError::Permission(_))));
    }

    #[test]
    fn test_infer_cell() {
        assert_eq!(infer_cell(""), Value::Null);
        assert_eq!(infer_cell("42"), json!(42));
        assert_eq!(infer_cell("007"), json!("007"));
        assert_eq!(infer_cell("1.5"), json!("1.5"));
        assert_eq!(infer_cell("P1"), json!("P1"));
    }

    #[test]
    fn test_field_helpers() {
        let record = record_from_json(json!({
            "a": 3, "b": "4", "c": "", "d": null, "e": "x", "f": "2.0"
        }));
        assert_eq!(field_i64(&record, "a").unwrap(), Some(3));
        assert_eq!(field_i64(&record, "b").unwrap(), Some(4));
        assert_eq!(field_i64(&record, "c").unwrap(), None);
        assert_eq!(field_i64(&record, "d").unwrap(), None);
        assert_eq!(field_i64(&record, "missing").unwrap(), None);
        assert_eq!(field_i64(&record, "f").unwrap(), Some(2));
        assert!(matches!(field_i64(&record, "e"), Err(InboxError::Schema(_))));
        assert_eq!(field_str(&record, "a").as_deref(), Some("3"));
        assert_eq!(field_str(&record, "d"), None);
    }

    #[test]
    fn test_csv_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvTableStore::new(dir.path());
        let rows = vec![
            record_from_json(json!({"ticket_id": 1, "title": "Hello, world", "due": null})),
            record_from_json(json!({"ticket_id": 2, "title": "Second", "extra": "x"})),
        ];
        store.write("tickets", &rows).unwrap();

        let back = store.read("tickets.csv").unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].get("ticket_id"), Some(&json!(1)));
        assert_eq!(back[0].get("title"), Some(&json!("Hello, world")));
        assert_eq!(back[0].get("due"), Some(&Value::Null));
        assert_eq!(back[0].get("extra"), Some(&Value::Null));
        assert_eq!(back[1].get("extra"), Some(&json!("x")));
        let columns: Vec<&String> = back[0].keys().collect();
        assert_eq!(columns, vec!["ticket_id", "title", "due", "extra"]);
    }

    #[test]
    fn test_csv_store_missing_file_and_disallowed_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvTableStore::new(dir.path());
        assert!(matches!(store.read("inbox"), Err(InboxError::NotFound(_))));
        assert!(matches!(store.read("passwords"), Err(InboxError::Permission(_))));
        assert!(matches!(store.write("passwords", &[]), Err(InboxError::Permission(_))));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTableStore::new()
            .with_table("inbox", vec![record_from_json(json!({"email_id": 1}))])
            .unwrap();
        assert_eq!(store.read("inbox").unwrap().len(), 1);
        assert!(matches!(store.read("tickets"), Err(InboxError::NotFound(_))));
        assert!(matches!(store.read("other"), Err(InboxError::Permission(_))));
    }
}
