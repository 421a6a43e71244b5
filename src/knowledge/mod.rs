//! 知识库检索：分词、停用词、TF-IDF 索引与带缓存的检索引擎

pub mod base;
pub mod index;
pub mod stop_words;
pub mod tokenizer;

pub use base::KnowledgeBase;
pub use index::{KbEntry, ScoredEntry, TfIdfIndex, TEXT_COLUMNS};
