//! Relevance scoring - query/statement overlap
//!
//! A [`Scorer`] turns a (query, text) pair into a relevance score in [0, 1].
//! The retriever and evaluator only depend on the trait, so alternative
//! scorers can be plugged in; the crate ships [`TokenOverlapScorer`], a
//! BM25-flavored term-frequency saturation over the shared tokenizer.

use thiserror::Error;

use crate::text::Tokenizer;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Scoring error type
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ScoreError {
    /// Warmup failed; callers degrade rather than abort
    #[error("scorer preparation failed: {0}")]
    Prepare(String),
}

// ============================================================================
// SCORER TRAIT
// ============================================================================

/// Deterministic query/text relevance
pub trait Scorer: Send + Sync {
    /// Relevance of `text` to `query`, in [0, 1]
    fn score(&self, query: &str, text: &str) -> f64;

    /// Score a batch of texts against one query, preserving order
    fn score_batch(&self, query: &str, texts: &[&str]) -> Vec<f64> {
        texts.iter().map(|t| self.score(query, t)).collect()
    }

    /// Token view of a text, if this scorer has one
    ///
    /// The retriever uses this for its candidate gate; scorers without a
    /// token view fall back to substring matching there.
    fn tokens(&self, _text: &str) -> Option<Vec<String>> {
        None
    }

    /// One-shot warmup; called lazily by the retriever before first use
    fn prepare(&self) -> Result<(), ScoreError> {
        Ok(())
    }
}

// ============================================================================
// TOKEN OVERLAP SCORER
// ============================================================================

/// Nominal document length for term-frequency saturation, in tokens
const AVG_DOC_TOKENS: f64 = 32.0;

/// BM25-flavored token overlap
///
/// Per query term: saturated term frequency in the text, normalized by the
/// number of query terms, so a text containing every query term once scores
/// near 1 and partial overlap degrades smoothly.
#[derive(Debug, Clone)]
pub struct TokenOverlapScorer {
    tokenizer: Tokenizer,
    k1: f64,
    b: f64,
}

impl Default for TokenOverlapScorer {
    fn default() -> Self {
        Self::new(Tokenizer::default())
    }
}

impl TokenOverlapScorer {
    /// Create a scorer sharing the given tokenizer
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self {
            tokenizer,
            k1: 1.2,
            b: 0.75,
        }
    }
}

impl Scorer for TokenOverlapScorer {
    fn score(&self, query: &str, text: &str) -> f64 {
        let query_tokens = self.tokenizer.tokenize(query);
        if query_tokens.is_empty() {
            return 0.0;
        }
        let text_tokens = self.tokenizer.tokenize(text);
        if text_tokens.is_empty() {
            return 0.0;
        }

        let doc_len = text_tokens.len() as f64;
        let mut sum = 0.0;
        for q in &query_tokens {
            let tf = text_tokens.iter().filter(|t| *t == q).count() as f64;
            if tf > 0.0 {
                let denom = tf + self.k1 * (1.0 - self.b + self.b * doc_len / AVG_DOC_TOKENS);
                sum += tf * (self.k1 + 1.0) / denom;
            }
        }

        (sum / query_tokens.len() as f64).clamp(0.0, 1.0)
    }

    fn tokens(&self, text: &str) -> Option<Vec<String>> {
        Some(self.tokenizer.tokenize(text))
    }
}

// ============================================================================
// TESTS
// ============================================================================
