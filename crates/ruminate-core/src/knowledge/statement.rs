//! Statement - the unit of long-term knowledge
//!
//! Statements carry a stable id, weighted text, tags and timestamps. They are
//! created by ingestion, learning or recall, mutated only through
//! [`crate::knowledge::KnowledgeStore::upsert`], and dropped only on explicit
//! deletion or expiry filtering during retrieval.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{KnowledgeError, Result};

/// Current wall-clock time in epoch milliseconds
pub fn current_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// STATEMENT
// ============================================================================

/// A unit of long-term knowledge
///
/// One statement serializes to one JSON object per line; snapshots are
/// sorted by id so exports diff cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Statement {
    /// Stable identifier (never blank after validation)
    pub id: String,
    /// The statement text (never blank after validation)
    pub text: String,
    /// Normalized lowercase type tag ("fact", "episode", ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Relevance weight, >= 0
    pub weight: f64,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Priority in [0, 1]
    pub priority: f64,
    /// Ordered unique lowercase tags
    pub tags: Vec<String>,
    /// Provenance (free-form)
    pub source: String,
    /// Creation time, epoch milliseconds
    pub created_at: i64,
    /// Last mutation time, epoch milliseconds (>= created_at)
    pub updated_at: i64,
    /// Expiry time, epoch milliseconds; 0 = never expires
    pub expires_at: i64,
    /// Free-form metadata
    pub metadata: BTreeMap<String, String>,
}

impl Default for Statement {
    fn default() -> Self {
        Self {
            id: String::new(),
            text: String::new(),
            kind: "fact".to_string(),
            weight: 1.0,
            confidence: 1.0,
            priority: 0.5,
            tags: Vec::new(),
            source: String::new(),
            created_at: 0,
            updated_at: 0,
            expires_at: 0,
            metadata: BTreeMap::new(),
        }
    }
}

impl Statement {
    /// Create a statement with the given id and text
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    /// Validate and normalize in place against the wall clock
    pub fn validate(&mut self) -> Result<()> {
        self.validate_at(current_millis())
    }

    /// Validate and normalize in place at a fixed instant
    ///
    /// Enforces non-blank id/text, normalizes the type tag and tags,
    /// clamps numeric ranges, and settles timestamps so that
    /// `updated_at >= created_at`.
    pub fn validate_at(&mut self, now_ms: i64) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(KnowledgeError::BlankId);
        }
        if self.text.trim().is_empty() {
            return Err(KnowledgeError::BlankText(self.id.clone()));
        }

        self.kind = self.kind.trim().to_lowercase();
        if self.kind.is_empty() {
            self.kind = "fact".to_string();
        }

        self.weight = self.weight.max(0.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self.priority = self.priority.clamp(0.0, 1.0);
        self.expires_at = self.expires_at.max(0);

        self.tags = normalize_tags(&self.tags);

        if self.created_at <= 0 {
            self.created_at = now_ms;
        }
        if self.updated_at < self.created_at {
            self.updated_at = self.created_at;
        }

        Ok(())
    }

    /// Whether the statement is expired at the given instant
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at > 0 && now_ms > self.expires_at
    }

    /// `weight * confidence`
    pub fn effective_weight(&self) -> f64 {
        self.weight * self.confidence
    }

    /// Serialize to a single JSONL line (no trailing newline)
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a single JSONL line and validate it
    pub fn from_json_line(line: &str) -> Result<Self> {
        let mut st: Statement = serde_json::from_str(line)?;
        st.validate()?;
        Ok(st)
    }
}

/// Lowercase, trim, drop empties, dedup preserving first occurrence
fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for tag in tags {
        let t = tag.trim().to_lowercase();
        if !t.is_empty() && seen.insert(t.clone()) {
            out.push(t);
        }
    }
    out
}

// ============================================================================
// QUERY & RESULT TYPES
// ============================================================================

/// A retrieval query: token and tag sets
///
/// Both sets are ordered so iteration (and therefore scoring) is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    tokens: BTreeSet<String>,
    tags: BTreeSet<String>,
}

impl Query {
    /// Build a query from token and tag iterators
    pub fn new<T, U>(tokens: T, tags: U) -> Self
    where
        T: IntoIterator<Item = String>,
        U: IntoIterator<Item = String>,
    {
        Self {
            tokens: tokens.into_iter().collect(),
            tags: tags.into_iter().collect(),
        }
    }

    /// Query tokens, in lexicographic order
    pub fn tokens(&self) -> &BTreeSet<String> {
        &self.tokens
    }

    /// Query tags, in lexicographic order
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Copy with the token set capped to the first `max` tokens
    pub fn capped(&self, max: usize) -> Self {
        Self {
            tokens: self.tokens.iter().take(max).cloned().collect(),
            tags: self.tags.clone(),
        }
    }

    /// Add tokens, keeping the set unique
    pub fn extend_tokens<I: IntoIterator<Item = String>>(&mut self, tokens: I) {
        self.tokens.extend(tokens);
    }

    /// Add tags, keeping the set unique
    pub fn extend_tags<I: IntoIterator<Item = String>>(&mut self, tags: I) {
        self.tags.extend(tags);
    }

    /// Whether the query carries no tokens
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// A statement with its retrieval score and per-signal breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredStatement {
    /// The scored statement
    pub statement: Statement,
    /// Combined score
    pub score: f64,
    /// Per-signal contributions, for explainability
    pub features: BTreeMap<String, f64>,
}

impl ScoredStatement {
    /// Canonical key for deterministic tie-breaking
    pub fn stable_key(&self) -> &str {
        &self.statement.id
    }
}

/// One iteration of iterative retrieval: the query used and its evidence
#[derive(Debug, Clone)]
pub struct RetrievalStep {
    /// The (possibly expanded) query this step searched with
    pub query: Query,
    /// Ranked evidence for this step
    pub evidence: Vec<ScoredStatement>,
}

/// Ordered steps of an iterative retrieval run
#[derive(Debug, Clone, Default)]
pub struct RetrievalReport {
    /// Per-iteration steps, in execution order
    pub steps: Vec<RetrievalStep>,
}

impl RetrievalReport {
    /// Evidence of the final step, if any
    pub fn final_evidence(&self) -> &[ScoredStatement] {
        self.steps.last().map(|s| s.evidence.as_slice()).unwrap_or(&[])
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_normalizes() {
        let mut st = Statement::new("s1", "some text");
        st.kind = " Fact ".to_string();
        st.confidence = 3.0;
        st.priority = -1.0;
        st.weight = -2.0;
        st.tags = vec!["  Alpha".into(), "beta".into(), "alpha".into(), "".into()];
        st.validate_at(1_000).unwrap();

        assert_eq!(st.kind, "fact");
        assert_eq!(st.confidence, 1.0);
        assert_eq!(st.priority, 0.0);
        assert_eq!(st.weight, 0.0);
        assert_eq!(st.tags, vec!["alpha", "beta"]);
        assert_eq!(st.created_at, 1_000);
        assert!(st.updated_at >= st.created_at);
    }

    #[test]
    fn test_validate_rejects_blank() {
        assert!(Statement::new("  ", "text").validate().is_err());
        assert!(Statement::new("id", " \t").validate().is_err());
    }

    #[test]
    fn test_expiry() {
        let mut st = Statement::new("s1", "text");
        st.validate_at(100).unwrap();
        assert!(!st.is_expired(10_000));

        st.expires_at = 5_000;
        assert!(!st.is_expired(5_000));
        assert!(st.is_expired(5_001));
    }

    #[test]
    fn test_effective_weight() {
        let mut st = Statement::new("s1", "text");
        st.weight = 2.0;
        st.confidence = 0.5;
        assert_eq!(st.effective_weight(), 1.0);
    }

    #[test]
    fn test_json_line_round_trip() {
        let mut st = Statement::new("s1", "the quick brown fox");
        st.tags = vec!["animal".into()];
        st.metadata.insert("origin".into(), "test".into());
        st.validate_at(42).unwrap();

        let line = st.to_json_line().unwrap();
        let back = Statement::from_json_line(&line).unwrap();
        assert_eq!(back, st);
        // "type" is the wire name for the kind field
        assert!(line.contains("\"type\":\"fact\""));
    }

    #[test]
    fn test_query_cap_is_deterministic() {
        let q = Query::new(
            ["delta", "alpha", "charlie", "bravo"].map(String::from),
            [],
        );
        let capped = q.capped(2);
        let tokens: Vec<&str> = capped.tokens().iter().map(String::as_str).collect();
        assert_eq!(tokens, vec!["alpha", "bravo"]);
    }
}
