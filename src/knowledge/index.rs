//! TF-IDF 索引
//!
//! 对知识库每行拼接 title / category / tags / content 得到 search_text，
//! 去停用词后做 TF-IDF（平滑 idf，L2 归一化），检索时用余弦相似度排序。
//! 索引构建后不可变；查询中未出现在词表里的词权重为 0，不会触发重建。

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::core::{InboxError, InboxResult};
use crate::knowledge::tokenizer::analyze;
use crate::tools::table_store::{field_str, Record};

/// 参与检索文本拼接的列（按拼接顺序）
pub const TEXT_COLUMNS: [&str; 4] = ["title", "category", "tags", "content"];

/// 稀疏向量：(词 id, 权重)，按词 id 升序
type SparseVec = Vec<(usize, f64)>;

/// 知识库条目：原始行 + 预计算的 search_text
#[derive(Debug, Clone)]
pub struct KbEntry {
    pub row: Record,
    pub search_text: String,
}

/// 检索命中：知识库行的只读副本 + 相似度
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEntry {
    #[serde(flatten)]
    pub row: Record,
    pub similarity_score: f64,
}

impl ScoredEntry {
    pub fn field(&self, key: &str) -> Option<String> {
        field_str(&self.row, key)
    }
}

/// 不可变 TF-IDF 索引
#[derive(Debug, Clone)]
pub struct TfIdfIndex {
    entries: Vec<KbEntry>,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
    doc_vectors: Vec<SparseVec>,
}

fn l2_normalize(vec: &mut SparseVec) {
    let norm = vec.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
    if norm > 0.0 {
        for (_, w) in vec.iter_mut() {
            *w /= norm;
        }
    }
}

fn term_counts(tokens: &[String]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for t in tokens {
        *counts.entry(t.as_str()).or_insert(0) += 1;
    }
    counts
}

impl TfIdfIndex {
    /// 从知识库行构建索引；一行都没有预期文本列时返回 Schema
    pub fn build(rows: Vec<Record>) -> InboxResult<Self> {
        let text_columns: Vec<&str> = TEXT_COLUMNS
            .iter()
            .copied()
            .filter(|c| rows.iter().any(|r| r.contains_key(*c)))
            .collect();
        if text_columns.is_empty() && !rows.is_empty() {
            return Err(InboxError::Schema(format!(
                "knowledge base has none of the expected text columns: {}",
                TEXT_COLUMNS.join(", ")
            )));
        }

        let entries: Vec<KbEntry> = rows
            .into_iter()
            .map(|row| {
                let search_text = text_columns
                    .iter()
                    .map(|c| field_str(&row, c).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(" ");
                KbEntry { row, search_text }
            })
            .collect();

        let analyzed: Vec<Vec<String>> = entries.iter().map(|e| analyze(&e.search_text)).collect();

        // 词表按字典序分配 id，保证同一语料构建结果确定
        let mut doc_freq: BTreeMap<&str, usize> = BTreeMap::new();
        for tokens in &analyzed {
            for term in term_counts(tokens).keys() {
                *doc_freq.entry(*term).or_insert(0) += 1;
            }
        }
        let vocabulary: HashMap<String, usize> = doc_freq
            .keys()
            .enumerate()
            .map(|(i, t)| (t.to_string(), i))
            .collect();

        let n_docs = entries.len() as f64;
        let idf: Vec<f64> = doc_freq
            .values()
            .map(|df| ((1.0 + n_docs) / (1.0 + *df as f64)).ln() + 1.0)
            .collect();

        let doc_vectors: Vec<SparseVec> = analyzed
            .iter()
            .map(|tokens| {
                let mut vec: SparseVec = term_counts(tokens)
                    .into_iter()
                    .filter_map(|(t, tf)| vocabulary.get(t).map(|&id| (id, tf as f64 * idf[id])))
                    .collect();
                vec.sort_by_key(|(id, _)| *id);
                l2_normalize(&mut vec);
                vec
            })
            .collect();

        tracing::info!(
            rows = entries.len(),
            features = vocabulary.len(),
            "KB index built"
        );

        Ok(Self {
            entries,
            vocabulary,
            idf,
            doc_vectors,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn entries(&self) -> &[KbEntry] {
        &self.entries
    }

    pub fn idf(&self, term: &str) -> Option<f64> {
        self.vocabulary.get(term).map(|&id| self.idf[id])
    }

    /// 按现有词表向量化查询（未知词忽略）
    fn vectorize(&self, query: &str) -> HashMap<usize, f64> {
        let tokens = analyze(query);
        let mut vec: SparseVec = term_counts(&tokens)
            .into_iter()
            .filter_map(|(t, tf)| {
                self.vocabulary
                    .get(t)
                    .map(|&id| (id, tf as f64 * self.idf[id]))
            })
            .collect();
        l2_normalize(&mut vec);
        vec.into_iter().collect()
    }

    /// 每个文档与查询的余弦相似度（按文档原始顺序）
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let q = self.vectorize(query);
        self.doc_vectors
            .iter()
            .map(|doc| {
                let dot: f64 = doc
                    .iter()
                    .filter_map(|(id, w)| q.get(id).map(|qw| qw * w))
                    .sum();
                dot.clamp(0.0, 1.0)
            })
            .collect()
    }

    /// 检索：按分数降序（同分保持原始行序），先截断到 top_k，再丢弃 score < min_score 的条目
    pub fn search(&self, query: &str, top_k: usize, min_score: f64) -> InboxResult<Vec<ScoredEntry>> {
        if query.trim().is_empty() {
            return Err(InboxError::InvalidQuery(
                "query must be a non-empty string".to_string(),
            ));
        }

        let scores = self.scores(query);
        let mut ranked: Vec<usize> = (0..scores.len()).collect();
        // sort_by 为稳定排序，同分时保持原始顺序
        ranked.sort_by(|a, b| {
            scores[*b]
                .partial_cmp(&scores[*a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let results: Vec<ScoredEntry> = ranked
            .into_iter()
            .take(top_k)
            .filter(|&i| scores[i] >= min_score)
            .map(|i| ScoredEntry {
                row: self.entries[i].row.clone(),
                similarity_score: scores[i],
            })
            .collect();

        tracing::info!(query = %query, top_k, min_score, hits = results.len(), "KB search");
        Ok(results)
    }
}
