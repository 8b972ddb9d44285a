//! Knowledge model - statements, queries, and the indexed store
//!
//! A [`Statement`] is the unit of long-term knowledge: a weighted, tagged
//! piece of text with a stable id. The [`KnowledgeStore`] keeps statements
//! behind a readers-writer lock together with an inverted index, per-document
//! term frequencies and corpus statistics, and serves BM25-ranked search
//! with optional MMR diversification.

mod statement;
mod store;

pub use statement::{
    current_millis, Query, RetrievalReport, RetrievalStep, ScoredStatement, Statement,
};
pub use store::{KnowledgeStore, StoreConfig, StoreStats};

pub(crate) use store::sort_ranked;

use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Knowledge-layer error type
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Statement id is empty or blank
    #[error("statement id must not be blank")]
    BlankId,
    /// Statement text is empty or blank
    #[error("statement text must not be blank (id: {0})")]
    BlankText(String),
    /// Malformed JSONL line
    #[error("invalid statement line: {0}")]
    InvalidLine(#[from] serde_json::Error),
}

/// Knowledge-layer result type
pub type Result<T> = std::result::Result<T, KnowledgeError>;
