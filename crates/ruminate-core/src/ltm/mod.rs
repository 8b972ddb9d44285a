//! Long-term memory - bounded episodic store of high-groundedness evidence
//!
//! The engine writes compact evidence units here when a request terminates
//! with a well-grounded best draft, and recalls the top-scoring entries to
//! widen the context of later requests. The store is bounded: at capacity
//! the entry with the oldest `updated_at` is evicted first.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::knowledge::{current_millis, Statement};
use crate::scoring::Scorer;
use crate::text::sentences;

// ============================================================================
// CONFIG
// ============================================================================

/// Long-term memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LtmConfig {
    /// Master switch
    pub enabled: bool,
    /// Maximum entries, in [0, 200000]; 0 disables writes
    pub capacity: usize,
    /// Entries recalled per request, in [0, 128]
    pub recall_k: usize,
    /// Minimum best-draft groundedness required to write
    pub write_min_groundedness: f64,
    /// Sentences kept when compacting a draft into an evidence unit
    pub compress_sentences: usize,
    /// Character cap per compacted evidence unit
    pub compress_max_chars: usize,
}

impl Default for LtmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 512,
            recall_k: 4,
            write_min_groundedness: 0.55,
            compress_sentences: 2,
            compress_max_chars: 280,
        }
    }
}

impl LtmConfig {
    /// Copy with out-of-range values clamped into their documented ranges
    pub fn normalized(mut self) -> Self {
        self.capacity = self.capacity.min(200_000);
        self.recall_k = self.recall_k.min(128);
        self.write_min_groundedness = self.write_min_groundedness.clamp(0.0, 1.0);
        self.compress_sentences = self.compress_sentences.max(1);
        self.compress_max_chars = self.compress_max_chars.max(32);
        self
    }
}

// ============================================================================
// LONG-TERM MEMORY
// ============================================================================

#[derive(Debug, Default)]
struct LtmInner {
    entries: BTreeMap<String, Statement>,
    text_hashes: BTreeSet<u32>,
}

/// Bounded episodic memory with scorer-ranked recall
pub struct LongTermMemory {
    cfg: LtmConfig,
    scorer: Arc<dyn Scorer>,
    inner: RwLock<LtmInner>,
}

impl LongTermMemory {
    /// Create an empty memory
    pub fn new(cfg: LtmConfig, scorer: Arc<dyn Scorer>) -> Self {
        Self {
            cfg: cfg.normalized(),
            scorer,
            inner: RwLock::new(LtmInner::default()),
        }
    }

    /// Current configuration
    pub fn config(&self) -> &LtmConfig {
        &self.cfg
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.len()
    }

    /// Whether the memory is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top entries for a prompt, ranked by the scorer
    ///
    /// The entry snapshot is copied out before scoring so no lock is held
    /// across scorer calls.
    pub fn recall(&self, prompt: &str, k: usize) -> Vec<Statement> {
        if !self.cfg.enabled || k == 0 {
            return Vec::new();
        }
        let snapshot: Vec<Statement> = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner.entries.values().cloned().collect()
        };

        let mut scored: Vec<(f64, Statement)> = snapshot
            .into_iter()
            .map(|st| (self.scorer.score(prompt, &st.text), st))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        scored.into_iter().take(k).map(|(_, st)| st).collect()
    }

    /// Write a compacted evidence unit if it clears the groundedness gate
    ///
    /// Returns whether anything was stored. Duplicates (by compacted text
    /// hash) and sub-threshold evidence are dropped silently.
    pub fn write(&self, text: &str, groundedness: f64, tag: &str) -> bool {
        if !self.cfg.enabled
            || self.cfg.capacity == 0
            || groundedness < self.cfg.write_min_groundedness
        {
            return false;
        }

        let compact = self.compact(text);
        if compact.is_empty() {
            return false;
        }
        let hash = crc32fast::hash(compact.as_bytes());

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !inner.text_hashes.insert(hash) {
            return false; // duplicate evidence
        }

        while inner.entries.len() >= self.cfg.capacity {
            // evict the entry with the oldest updated_at, id as tie-break
            let oldest = inner
                .entries
                .values()
                .min_by(|a, b| {
                    a.updated_at
                        .cmp(&b.updated_at)
                        .then_with(|| a.id.cmp(&b.id))
                })
                .map(|st| st.id.clone());
            let Some(id) = oldest else { break };
            if let Some(evicted) = inner.entries.remove(&id) {
                inner
                    .text_hashes
                    .remove(&crc32fast::hash(evicted.text.as_bytes()));
            }
        }

        let mut st = Statement::new(format!("ltm:{hash:08x}"), compact);
        st.kind = "episode".to_string();
        st.confidence = groundedness.clamp(0.0, 1.0);
        st.tags = vec!["ltm".to_string(), tag.to_string()];
        st.source = "ltm".to_string();
        if st.validate_at(current_millis()).is_err() {
            return false;
        }

        tracing::info!(id = %st.id, groundedness, "long-term memory write");
        inner.entries.insert(st.id.clone(), st);
        true
    }

    /// First sentences of the text, capped to the configured budget
    fn compact(&self, text: &str) -> String {
        let joined = sentences(text)
            .into_iter()
            .take(self.cfg.compress_sentences)
            .collect::<Vec<_>>()
            .join(" ");
        joined.chars().take(self.cfg.compress_max_chars).collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::TokenOverlapScorer;

    fn ltm(cfg: LtmConfig) -> LongTermMemory {
        LongTermMemory::new(cfg, Arc::new(TokenOverlapScorer::default()))
    }

    #[test]
    fn test_write_gated_on_groundedness() {
        let memory = ltm(LtmConfig::default());
        assert!(!memory.write("weak evidence here", 0.2, "chat"));
        assert!(memory.write("strong evidence about foxes.", 0.8, "chat"));
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn test_duplicate_text_not_written_twice() {
        let memory = ltm(LtmConfig::default());
        assert!(memory.write("the same evidence.", 0.9, "chat"));
        assert!(!memory.write("the same evidence.", 0.9, "chat"));
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn test_recall_ranks_by_relevance() {
        let memory = ltm(LtmConfig::default());
        memory.write("foxes hunt at dusk with quick reflexes.", 0.9, "a");
        memory.write("the garden needs watering in summer.", 0.9, "b");
        let hits = memory.recall("quick foxes", 1);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("foxes"));
    }

    #[test]
    fn test_recall_disabled_or_zero_k() {
        let memory = ltm(LtmConfig {
            enabled: false,
            ..Default::default()
        });
        memory.write("anything.", 0.9, "a");
        assert!(memory.recall("anything", 4).is_empty());

        let memory = ltm(LtmConfig::default());
        memory.write("anything relevant.", 0.9, "a");
        assert!(memory.recall("anything relevant", 0).is_empty());
    }

    #[test]
    fn test_capacity_eviction_oldest_first() {
        let memory = ltm(LtmConfig {
            capacity: 2,
            ..Default::default()
        });
        assert!(memory.write("first evidence unit.", 0.9, "a"));
        assert!(memory.write("second evidence unit.", 0.9, "a"));
        assert!(memory.write("third evidence unit.", 0.9, "a"));
        assert_eq!(memory.len(), 2);
        // the store keeps absorbing fresh evidence at capacity
        assert!(memory.write("fourth evidence unit.", 0.9, "a"));
        assert_eq!(memory.len(), 2);
    }

    #[test]
    fn test_compaction_trims_long_drafts() {
        let memory = ltm(LtmConfig {
            compress_sentences: 1,
            compress_max_chars: 40,
            ..Default::default()
        });
        let long = "This is the first sentence of many words. Second sentence here. Third.";
        assert!(memory.write(long, 0.9, "a"));
        let entry = memory.recall("first sentence words", 1);
        assert_eq!(entry.len(), 1);
        assert!(entry[0].text.chars().count() <= 40);
    }
}
