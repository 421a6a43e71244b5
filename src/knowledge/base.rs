//! 知识库检索引擎
//!
//! KnowledgeBase 持有存储网关与缓存的 TfIdfIndex：首次检索时延迟构建，之后整个进程复用；
//! 存储侧没有失效通知，知识库被外部修改后需调用方显式 rebuild()。

use std::sync::{Arc, RwLock};

use crate::core::InboxResult;
use crate::knowledge::index::{ScoredEntry, TfIdfIndex};
use crate::tools::table_store::{TableStore, KNOWLEDGE_BASE_TABLE};

pub struct KnowledgeBase {
    store: Arc<dyn TableStore>,
    index: RwLock<Option<Arc<TfIdfIndex>>>,
}

impl KnowledgeBase {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self {
            store,
            index: RwLock::new(None),
        }
    }

    /// 用已构建好的索引初始化（不读存储）
    pub fn with_index(store: Arc<dyn TableStore>, index: TfIdfIndex) -> Self {
        Self {
            store,
            index: RwLock::new(Some(Arc::new(index))),
        }
    }

    pub fn is_built(&self) -> bool {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// 返回缓存索引，未构建时从 knowledge_base 表构建
    pub fn index(&self) -> InboxResult<Arc<TfIdfIndex>> {
        if let Some(index) = self.index.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            return Ok(index.clone());
        }
        let mut slot = self.index.write().unwrap_or_else(|e| e.into_inner());
        // 拿到写锁后再确认一次，避免重复构建
        if let Some(index) = slot.as_ref() {
            return Ok(index.clone());
        }
        let index = Arc::new(self.load()?);
        *slot = Some(index.clone());
        Ok(index)
    }

    /// 强制从存储重新构建索引（知识库被外部修改后调用）
    pub fn rebuild(&self) -> InboxResult<Arc<TfIdfIndex>> {
        let index = Arc::new(self.load()?);
        *self.index.write().unwrap_or_else(|e| e.into_inner()) = Some(index.clone());
        tracing::info!(rows = index.len(), vocabulary = index.vocabulary_len(), "KB index rebuilt");
        Ok(index)
    }

    fn load(&self) -> InboxResult<TfIdfIndex> {
        tracing::info!(table = KNOWLEDGE_BASE_TABLE, "Loading KB");
        let rows = self.store.read(KNOWLEDGE_BASE_TABLE)?;
        let index = TfIdfIndex::build(rows)?;
        tracing::info!(rows = index.len(), vocabulary = index.vocabulary_len(), "KB index built");
        Ok(index)
    }

    pub fn search(&self, query: &str, top_k: usize, min_score: f64) -> InboxResult<Vec<ScoredEntry>> {
        self.index()?.search(query, top_k, min_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::InboxError;
    use crate::tools::table_store::{record_from_json, MemoryTableStore};
    use serde_json::json;

    fn store_with(rows: Vec<serde_json::Value>) -> Arc<MemoryTableStore> {
        Arc::new(
            MemoryTableStore::new()
                .with_table("knowledge_base", rows.into_iter().map(record_from_json).collect())
                .unwrap(),
        )
    }

    #[test]
    fn test_lazy_build_and_cache() {
        let store = store_with(vec![json!({"title": "Refund policy", "content": "refund within 30 days"})]);
        let kb = KnowledgeBase::new(store.clone());
        assert!(!kb.is_built());
        assert_eq!(kb.search("refund", 5, 0.1).unwrap().len(), 1);
        assert!(kb.is_built());

        // 外部修改后未 rebuild：仍使用旧索引
        store
            .write("knowledge_base", &[record_from_json(json!({"title": "Shipping", "content": "ship"}))])
            .unwrap();
        assert_eq!(kb.search("refund", 5, 0.1).unwrap().len(), 1);

        kb.rebuild().unwrap();
        assert!(kb.search("refund", 5, 0.1).unwrap().is_empty());
        assert_eq!(kb.search("shipping", 5, 0.1).unwrap().len(), 1);
    }

    #[test]
    fn test_prebuilt_index_skips_store_until_rebuild() {
        let rows = vec![record_from_json(json!({"title": "Refund policy", "content": "refund within 30 days"}))];
        let index = TfIdfIndex::build(rows).unwrap();
        assert!(index.vocabulary_len() > 0);

        // 存储里没有 knowledge_base 表，预置索引照样可检索
        let kb = KnowledgeBase::with_index(Arc::new(MemoryTableStore::new()), index);
        assert!(kb.is_built());
        assert_eq!(kb.search("refund", 5, 0.1).unwrap().len(), 1);
        assert!(matches!(kb.rebuild(), Err(InboxError::NotFound(_))));
    }

    #[test]
    fn test_missing_kb_table_propagates() {
        let kb = KnowledgeBase::new(Arc::new(MemoryTableStore::new()));
        assert!(matches!(kb.search("anything", 3, 0.0), Err(InboxError::NotFound(_))));
        assert!(!kb.is_built());
    }
}
