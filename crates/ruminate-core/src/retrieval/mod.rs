//! Multi-iteration retrieval
//!
//! The retriever runs a small retrieve/refine loop over a store snapshot:
//! gate candidates by token intersection, score them, aggregate across
//! iterations with decay, refine the query from the top band, and finally
//! hand the aggregated ranking to the exploration selector. Results are
//! memoized in a bounded LRU cache keyed by `(seed, query)`.

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, Once};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::explore::{mix64, stable_hash64, ExplorationStrategy};
use crate::knowledge::{KnowledgeStore, ScoredStatement, Statement};
use crate::scoring::Scorer;
use crate::text::Tokenizer;

// ============================================================================
// CONFIG
// ============================================================================

/// Retriever configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrieverConfig {
    /// Retrieve/refine iterations per request
    pub iterations: usize,
    /// Aggregated scores below this are dropped from the final ranking
    pub min_score: f64,
    /// Per-iteration weight decay, in (0, 1]
    pub iteration_decay: f64,
    /// Tokens appended to the query per refinement
    pub refine_terms: usize,
    /// Minimum token length admitted to the candidate gate
    pub candidate_gate_min_token_len: usize,
    /// Candidate cap per iteration
    pub max_candidates_per_iter: usize,
    /// Below this confidence the requested k is halved; 0 disables
    pub quality_floor: f64,
    /// Top-1 dominance confidence that stops iterating early; 0 disables
    pub early_stop_confidence: f64,
    /// Score candidates on scoped worker threads
    pub parallel: bool,
    /// Worker count for parallel scoring; 0 = available parallelism
    pub parallelism: usize,
    /// Entries kept in the request cache
    pub cache_capacity: usize,
    /// Re-score the top N of the final ranking against the original query;
    /// 0 disables reranking
    pub rerank_n: usize,
    /// Keep only the top M after reranking; 0 keeps the full ranking
    pub rerank_m: usize,
    /// Refinement terms appearing in more than this fraction of the
    /// candidate pool are too common to refine with, in [0, 1]
    pub refine_df_cut: f64,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            iterations: 2,
            min_score: 0.0,
            iteration_decay: 0.85,
            refine_terms: 3,
            candidate_gate_min_token_len: 3,
            max_candidates_per_iter: 256,
            quality_floor: 0.0,
            early_stop_confidence: 0.0,
            parallel: false,
            parallelism: 0,
            cache_capacity: 128,
            rerank_n: 0,
            rerank_m: 0,
            refine_df_cut: 0.5,
        }
    }
}

impl RetrieverConfig {
    /// Copy with out-of-range values clamped into their documented ranges
    pub fn normalized(mut self) -> Self {
        self.iterations = self.iterations.clamp(1, 8);
        self.min_score = self.min_score.max(0.0);
        self.iteration_decay = if self.iteration_decay > 0.0 && self.iteration_decay <= 1.0 {
            self.iteration_decay
        } else {
            0.85
        };
        self.candidate_gate_min_token_len = self.candidate_gate_min_token_len.max(1);
        self.max_candidates_per_iter = self.max_candidates_per_iter.max(1);
        self.quality_floor = self.quality_floor.max(0.0);
        self.early_stop_confidence = self.early_stop_confidence.max(0.0);
        self.cache_capacity = self.cache_capacity.max(1);
        self.refine_df_cut = self.refine_df_cut.clamp(0.0, 1.0);
        self
    }
}

// ============================================================================
// TRACE
// ============================================================================

/// Telemetry for one retrieval iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationTrace {
    /// Query text this iteration searched with
    pub query: String,
    /// Gated candidate count
    pub candidates: usize,
    /// Best local score
    pub top_score: f64,
    /// Whether dominance stopped the loop here
    pub early_stop: bool,
}

/// Telemetry for a whole retrieval run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieverTrace {
    /// Per-iteration telemetry, in execution order
    pub iterations: Vec<IterationTrace>,
    /// Final dominance-based confidence estimate, in [0, 1]
    pub confidence: f64,
    /// Whether the result came from the request cache
    pub from_cache: bool,
}

// ============================================================================
// RETRIEVER
// ============================================================================

/// Iterative retriever over a [`KnowledgeStore`] snapshot
pub struct Retriever {
    scorer: Arc<dyn Scorer>,
    explorer: Arc<dyn ExplorationStrategy>,
    tokenizer: Tokenizer,
    cfg: RetrieverConfig,
    cache: Mutex<LruCache<u64, Vec<Statement>>>,
    prepare_once: Once,
}

impl Retriever {
    /// Create a retriever
    pub fn new(
        scorer: Arc<dyn Scorer>,
        explorer: Arc<dyn ExplorationStrategy>,
        tokenizer: Tokenizer,
        cfg: RetrieverConfig,
    ) -> Self {
        let cfg = cfg.normalized();
        let capacity = NonZeroUsize::new(cfg.cache_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            scorer,
            explorer,
            tokenizer,
            cfg,
            cache: Mutex::new(LruCache::new(capacity)),
            prepare_once: Once::new(),
        }
    }

    /// Current configuration
    pub fn config(&self) -> &RetrieverConfig {
        &self.cfg
    }

    /// Retrieve up to `k` statements for a query
    pub fn retrieve(
        &self,
        store: &KnowledgeStore,
        query: &str,
        k: usize,
        seed: u64,
    ) -> Vec<Statement> {
        self.retrieve_trace(store, query, k, seed).0
    }

    /// Retrieve with per-iteration telemetry
    pub fn retrieve_trace(
        &self,
        store: &KnowledgeStore,
        query: &str,
        k: usize,
        seed: u64,
    ) -> (Vec<Statement>, RetrieverTrace) {
        let key = mix64(seed, stable_hash64(query));
        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(&key) {
                return (hit.clone(), RetrieverTrace {
                    from_cache: true,
                    ..Default::default()
                });
            }
        }

        // one-shot lazy warmup; failure degrades to cold scoring
        self.prepare_once.call_once(|| {
            if let Err(e) = self.scorer.prepare() {
                tracing::warn!("scorer warmup failed, continuing cold: {e}");
            }
        });

        let now = crate::knowledge::current_millis();
        let live: Vec<Statement> = store
            .snapshot_sorted()
            .into_iter()
            .filter(|st| !st.is_expired(now))
            .collect();
        let snapshot = dedup_by_text(live);
        let original_tokens = self.gated_tokens(query);
        let mut statement_tokens: Vec<Option<BTreeSet<String>>> = vec![None; snapshot.len()];

        let mut trace = RetrieverTrace::default();
        let mut aggregated: HashMap<usize, f64> = HashMap::new();
        // term -> (accumulated weight, first-seen iteration)
        let mut term_weights: HashMap<String, (f64, usize)> = HashMap::new();
        let mut iter_query = query.to_string();
        let mut iter_weight = 1.0_f64;

        for iteration in 0..self.cfg.iterations {
            let q_tokens = self.gated_tokens(&iter_query);

            let candidates =
                self.gate_candidates(&snapshot, &q_tokens, &mut statement_tokens);
            let texts: Vec<&str> = candidates
                .iter()
                .map(|&i| snapshot[i].text.as_str())
                .collect();
            let scores = self.score_all(&iter_query, &texts);

            let mut ranked: Vec<(usize, f64)> = candidates
                .iter()
                .copied()
                .zip(scores)
                .collect();
            ranked.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| snapshot[a.0].id.cmp(&snapshot[b.0].id))
            });

            for &(idx, score) in &ranked {
                *aggregated.entry(idx).or_default() += score * iter_weight;
            }

            // document frequency over the candidate pool, for the refine cut
            let mut pool_df: HashMap<String, usize> = HashMap::new();
            if self.cfg.refine_df_cut < 1.0 {
                for &(idx, _) in &ranked {
                    let tokens = statement_token_set(
                        &mut statement_tokens,
                        &snapshot,
                        idx,
                        &*self.scorer,
                        &self.tokenizer,
                    );
                    for token in tokens {
                        *pool_df.entry(token).or_default() += 1;
                    }
                }
            }

            let top_band = ranked.len().min((4 * k).max(16));
            for &(idx, score) in &ranked[..top_band] {
                let tokens = statement_token_set(
                    &mut statement_tokens,
                    &snapshot,
                    idx,
                    &*self.scorer,
                    &self.tokenizer,
                );
                for token in tokens.iter() {
                    if token.chars().count() < self.cfg.candidate_gate_min_token_len
                        || original_tokens.contains(token)
                    {
                        continue;
                    }
                    if self.cfg.refine_df_cut < 1.0 && !ranked.is_empty() {
                        let ratio = pool_df.get(token).copied().unwrap_or(0) as f64
                            / ranked.len() as f64;
                        if ratio > self.cfg.refine_df_cut {
                            continue; // ubiquitous in the pool, no signal
                        }
                    }
                    let entry = term_weights
                        .entry(token.clone())
                        .or_insert((0.0, iteration));
                    entry.0 += score;
                }
            }

            let top_score = ranked.first().map(|r| r.1).unwrap_or(0.0);
            let early_stop = self.cfg.early_stop_confidence > 0.0 && {
                let s1 = ranked.first().map(|r| r.1).unwrap_or(0.0);
                let s2 = ranked.get(1).map(|r| r.1).unwrap_or(0.0);
                let gap = (s1 - s2).max(0.0);
                gap / (gap + 1.0) >= self.cfg.early_stop_confidence
            };

            trace.iterations.push(IterationTrace {
                query: iter_query.clone(),
                candidates: ranked.len(),
                top_score,
                early_stop,
            });

            if early_stop {
                tracing::debug!(iteration, top_score, "retrieval stopped on dominance");
                break;
            }

            if iteration + 1 < self.cfg.iterations && self.cfg.refine_terms > 0 {
                iter_query = refine_query(query, &term_weights, self.cfg.refine_terms);
                iter_weight *= self.cfg.iteration_decay;
            }
        }

        // final ranking: aggregated score desc, id asc
        let mut ranked: Vec<ScoredStatement> = aggregated
            .into_iter()
            .filter(|&(_, score)| score >= self.cfg.min_score)
            .map(|(idx, score)| {
                let mut features = std::collections::BTreeMap::new();
                features.insert("aggregate".to_string(), score);
                ScoredStatement {
                    statement: snapshot[idx].clone(),
                    score,
                    features,
                }
            })
            .collect();
        crate::knowledge::sort_ranked(&mut ranked);

        // optional two-stage rerank of the head against the original query
        if self.cfg.rerank_n > 0 && !ranked.is_empty() {
            let n = ranked.len().min(self.cfg.rerank_n);
            let mut head: Vec<ScoredStatement> = ranked.drain(..n).collect();
            for item in &mut head {
                let rescored = self.scorer.score(query, &item.statement.text);
                item.features.insert("rerank".to_string(), rescored);
                item.score = rescored;
            }
            crate::knowledge::sort_ranked(&mut head);
            if self.cfg.rerank_m > 0 {
                head.truncate(self.cfg.rerank_m);
                ranked = head;
            } else {
                head.append(&mut ranked);
                ranked = head;
            }
        }

        trace.confidence = dominance_confidence(&ranked);

        let mut effective_k = k;
        if self.cfg.quality_floor > 0.0 && trace.confidence < self.cfg.quality_floor {
            effective_k = (k / 2).max(1);
            tracing::debug!(
                confidence = trace.confidence,
                effective_k,
                "low retrieval confidence, narrowing selection"
            );
        }

        let selected: Vec<Statement> = self
            .explorer
            .select(&ranked, effective_k, seed)
            .into_iter()
            .map(|s| s.statement)
            .collect();

        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(key, selected.clone());

        (selected, trace)
    }

    /// Tokenize and drop tokens below the gate length
    fn gated_tokens(&self, text: &str) -> BTreeSet<String> {
        let tokens = self
            .scorer
            .tokens(text)
            .unwrap_or_else(|| self.tokenizer.tokenize(text));
        tokens
            .into_iter()
            .filter(|t| t.chars().count() >= self.cfg.candidate_gate_min_token_len)
            .collect()
    }

    /// Indices of snapshot statements passing the token-intersection gate
    fn gate_candidates(
        &self,
        snapshot: &[Statement],
        q_tokens: &BTreeSet<String>,
        statement_tokens: &mut [Option<BTreeSet<String>>],
    ) -> Vec<usize> {
        let has_token_view = self.scorer.tokens("").is_some();
        let mut out = Vec::new();
        for (i, st) in snapshot.iter().enumerate() {
            if out.len() >= self.cfg.max_candidates_per_iter {
                break;
            }
            let passes = if q_tokens.is_empty() {
                false
            } else if has_token_view {
                let tokens = statement_token_set(
                    statement_tokens,
                    snapshot,
                    i,
                    &*self.scorer,
                    &self.tokenizer,
                );
                q_tokens.iter().any(|t| tokens.contains(t))
            } else {
                // substring fallback for scorers without a token view
                let lowered = st.text.to_lowercase();
                q_tokens.iter().any(|t| lowered.contains(t.as_str()))
            };
            if passes {
                out.push(i);
            }
        }
        out
    }

    /// Score texts, optionally on scoped threads with order-preserving writes
    fn score_all(&self, query: &str, texts: &[&str]) -> Vec<f64> {
        if !self.cfg.parallel || texts.len() < 2 {
            return self.scorer.score_batch(query, texts);
        }

        let workers = if self.cfg.parallelism > 0 {
            self.cfg.parallelism
        } else {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        }
        .min(texts.len());

        let mut scores = vec![0.0_f64; texts.len()];
        let chunk = texts.len().div_ceil(workers);
        let scorer = &*self.scorer;
        std::thread::scope(|scope| {
            for (chunk_index, slots) in scores.chunks_mut(chunk).enumerate() {
                let base = chunk_index * chunk;
                scope.spawn(move || {
                    for (offset, slot) in slots.iter_mut().enumerate() {
                        *slot = scorer.score(query, texts[base + offset]);
                    }
                });
            }
        });
        scores
    }
}

/// Keep the first statement (lowest id) for each distinct text
fn dedup_by_text(snapshot: Vec<Statement>) -> Vec<Statement> {
    let mut seen = BTreeSet::new();
    snapshot
        .into_iter()
        .filter(|st| seen.insert(st.text.clone()))
        .collect()
}

/// Token set of a snapshot statement, computed once
fn statement_token_set(
    cache: &mut [Option<BTreeSet<String>>],
    snapshot: &[Statement],
    i: usize,
    scorer: &dyn Scorer,
    tokenizer: &Tokenizer,
) -> BTreeSet<String> {
    if cache[i].is_none() {
        let tokens = scorer
            .tokens(&snapshot[i].text)
            .unwrap_or_else(|| tokenizer.tokenize(&snapshot[i].text));
        cache[i] = Some(tokens.into_iter().collect());
    }
    cache[i].clone().unwrap_or_default()
}

/// Original query plus the strongest refinement terms
///
/// Terms rank by accumulated weight descending, then first-seen iteration
/// ascending, then lexicographically.
fn refine_query(
    original: &str,
    term_weights: &HashMap<String, (f64, usize)>,
    refine_terms: usize,
) -> String {
    let mut terms: Vec<(&String, &(f64, usize))> = term_weights.iter().collect();
    terms.sort_by(|a, b| {
        b.1 .0
            .partial_cmp(&a.1 .0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1 .1.cmp(&b.1 .1))
            .then_with(|| a.0.cmp(b.0))
    });

    let mut out = original.to_string();
    for (term, _) in terms.into_iter().take(refine_terms) {
        out.push(' ');
        out.push_str(term);
    }
    out
}

/// Confidence from top-1 dominance over the top of the ranking
fn dominance_confidence(ranked: &[ScoredStatement]) -> f64 {
    let top: f64 = ranked.first().map(|s| s.score).unwrap_or(0.0);
    let sum: f64 = ranked.iter().take(16).map(|s| s.score).sum();
    if sum <= 0.0 {
        return 0.0;
    }
    let dominance = top / sum;
    1.0 - (-3.0 * dominance).exp()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::explore::SoftmaxSampler;
    use crate::scoring::TokenOverlapScorer;

    fn retriever(cfg: RetrieverConfig) -> Retriever {
        Retriever::new(
            Arc::new(TokenOverlapScorer::default()),
            Arc::new(SoftmaxSampler::default()),
            Tokenizer::default(),
            cfg,
        )
    }

    fn seeded_store() -> KnowledgeStore {
        let store = KnowledgeStore::default();
        for (id, text) in [
            ("a", "the quick brown fox jumps high"),
            ("b", "lazy dogs sleep in the sun"),
            ("c", "quick reflexes help the brown fox hunt"),
            ("d", "the sun warms the garden"),
        ] {
            store.upsert(Statement::new(id, text)).unwrap();
        }
        store
    }

    #[test]
    fn test_retrieve_relevant_statements() {
        let store = seeded_store();
        let r = retriever(RetrieverConfig::default());
        let hits = r.retrieve(&store, "quick brown fox", 2, 1);
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|s| s.id == "a" || s.id == "c"));
    }

    #[test]
    fn test_retrieve_respects_k() {
        let store = seeded_store();
        let r = retriever(RetrieverConfig::default());
        assert!(r.retrieve(&store, "the sun fox dogs", 2, 1).len() <= 2);
    }

    #[test]
    fn test_retrieve_is_deterministic() {
        let store = seeded_store();
        let r = retriever(RetrieverConfig::default());
        let a: Vec<String> = r
            .retrieve(&store, "quick fox", 3, 9)
            .into_iter()
            .map(|s| s.id)
            .collect();
        let b: Vec<String> = r
            .retrieve(&store, "quick fox", 3, 9)
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_hit_marked_in_trace() {
        let store = seeded_store();
        let r = retriever(RetrieverConfig::default());
        let (_, cold) = r.retrieve_trace(&store, "quick fox", 2, 3);
        assert!(!cold.from_cache);
        let (_, warm) = r.retrieve_trace(&store, "quick fox", 2, 3);
        assert!(warm.from_cache);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let store = seeded_store();
        let sequential = retriever(RetrieverConfig::default());
        let parallel = retriever(RetrieverConfig {
            parallel: true,
            parallelism: 3,
            ..Default::default()
        });
        let a: Vec<String> = sequential
            .retrieve(&store, "quick brown sun", 3, 5)
            .into_iter()
            .map(|s| s.id)
            .collect();
        let b: Vec<String> = parallel
            .retrieve(&store, "quick brown sun", 3, 5)
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_early_stop_on_dominant_match() {
        let store = KnowledgeStore::default();
        store
            .upsert(Statement::new("a", "the quick brown fox"))
            .unwrap();
        store.upsert(Statement::new("b", "unrelated text here")).unwrap();
        let r = retriever(RetrieverConfig {
            early_stop_confidence: 0.4,
            iterations: 4,
            ..Default::default()
        });
        let (_, trace) = r.retrieve_trace(&store, "quick brown", 2, 1);
        assert!(trace.iterations.len() < 4);
        assert!(trace.iterations.last().unwrap().early_stop);
    }

    #[test]
    fn test_expired_statements_never_retrieved() {
        let store = KnowledgeStore::default();
        let mut st = Statement::new("old", "quick brown fox from long ago");
        st.expires_at = 1; // expired well before any present instant
        store.upsert(st).unwrap();
        store
            .upsert(Statement::new("new", "quick brown fox still fresh"))
            .unwrap();

        let r = retriever(RetrieverConfig::default());
        let hits = r.retrieve(&store, "quick brown fox", 4, 1);
        assert!(hits.iter().all(|s| s.id != "old"));
        assert!(hits.iter().any(|s| s.id == "new"));
    }

    #[test]
    fn test_empty_store_returns_nothing() {
        let store = KnowledgeStore::default();
        let r = retriever(RetrieverConfig::default());
        assert!(r.retrieve(&store, "anything at all", 4, 1).is_empty());
    }

    #[test]
    fn test_rerank_head_prefers_query_relevance() {
        let store = KnowledgeStore::default();
        for (id, text) in [
            ("a", "quick quick quick quick padding words everywhere here"),
            ("b", "the quick brown fox"),
        ] {
            store.upsert(Statement::new(id, text)).unwrap();
        }
        let r = retriever(RetrieverConfig {
            rerank_n: 2,
            rerank_m: 1,
            iterations: 1,
            ..Default::default()
        });
        let hits = r.retrieve(&store, "quick brown fox", 2, 1);
        // reranking against the full query keeps the statement covering it
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[test]
    fn test_refine_df_cut_skips_ubiquitous_terms() {
        let store = KnowledgeStore::default();
        // "shared" appears everywhere; "unique" only once
        for (id, text) in [
            ("a", "shared topic with unique detail about foxes"),
            ("b", "shared topic covering gardens"),
            ("c", "shared topic covering weather"),
        ] {
            store.upsert(Statement::new(id, text)).unwrap();
        }
        let r = retriever(RetrieverConfig {
            refine_df_cut: 0.5,
            iterations: 2,
            ..Default::default()
        });
        let (_, trace) = r.retrieve_trace(&store, "topic foxes", 2, 1);
        // the refined second-iteration query never picks up "shared"
        if let Some(second) = trace.iterations.get(1) {
            assert!(
                !second.query.contains("shared"),
                "ubiquitous term leaked into {}",
                second.query
            );
        }
    }

    #[test]
    fn test_duplicate_texts_collapse() {
        let store = KnowledgeStore::default();
        store.upsert(Statement::new("a", "same text body")).unwrap();
        store.upsert(Statement::new("b", "same text body")).unwrap();
        let r = retriever(RetrieverConfig::default());
        let hits = r.retrieve(&store, "same text body", 4, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }
}
