//! In-memory knowledge store with BM25 search and MMR diversification
//!
//! The store keeps statements in a readers-writer-locked index: a sorted
//! statement map, an inverted index of term postings, per-document term
//! frequencies and corpus counters. Many readers may search concurrently;
//! an upsert re-indexes atomically, so a concurrent search observes either
//! the old posting contributions or the new ones, never a mix.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::text::Tokenizer;

use super::statement::current_millis;
use super::{Query, Result, RetrievalReport, RetrievalStep, ScoredStatement, Statement};

// ============================================================================
// CONFIG
// ============================================================================

/// Knowledge store configuration: BM25 parameters, signal weights,
/// MMR diversification and query-building caps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// BM25 term-frequency saturation
    pub k1: f64,
    /// BM25 length normalization
    pub b: f64,
    /// Weight of the BM25 signal in the combined score
    pub w_bm25: f64,
    /// Weight of the tag-similarity signal
    pub w_tag: f64,
    /// Weight of the recency signal
    pub w_recency: f64,
    /// Weight of the statement-strength signal (weight * confidence)
    pub w_strength: f64,
    /// Apply MMR diversification in iterative retrieval
    pub mmr_enabled: bool,
    /// MMR relevance/diversity trade-off, in [0, 1]
    pub mmr_lambda: f64,
    /// Recency half-life in milliseconds
    pub recency_half_life_ms: i64,
    /// Hard cap on the candidate set size per search
    pub candidate_cap: usize,
    /// Maximum tokens kept when building a query from a prompt
    pub max_query_tokens: usize,
    /// Tokens added to the query per iterative-retrieval step
    pub expand_tokens_per_step: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            w_bm25: 1.0,
            w_tag: 0.2,
            w_recency: 0.1,
            w_strength: 0.15,
            mmr_enabled: true,
            mmr_lambda: 0.7,
            recency_half_life_ms: 14 * 24 * 3600 * 1000,
            candidate_cap: 2048,
            max_query_tokens: 32,
            expand_tokens_per_step: 4,
        }
    }
}

impl StoreConfig {
    /// Copy with out-of-range values clamped into their documented ranges
    pub fn normalized(mut self) -> Self {
        self.k1 = self.k1.max(0.0);
        self.b = self.b.clamp(0.0, 1.0);
        self.mmr_lambda = self.mmr_lambda.clamp(0.0, 1.0);
        self.recency_half_life_ms = self.recency_half_life_ms.max(1);
        self.candidate_cap = self.candidate_cap.max(1);
        self.max_query_tokens = self.max_query_tokens.max(1);
        self
    }
}

/// Corpus statistics snapshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Number of statements
    pub statements: usize,
    /// Total indexed token occurrences
    pub tokens: u64,
    /// Distinct indexed terms
    pub distinct_terms: usize,
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Debug, Default)]
struct StoreInner {
    /// id -> statement, sorted by id so snapshots are stable
    statements: BTreeMap<String, Statement>,
    /// id -> term -> term frequency
    tf_by_id: HashMap<String, HashMap<String, u32>>,
    /// term -> ids containing the term; document frequency is the set size
    postings: HashMap<String, BTreeSet<String>>,
    /// total token occurrences across all documents
    total_tokens: u64,
}

/// In-memory statement index with BM25-ranked search
pub struct KnowledgeStore {
    cfg: StoreConfig,
    tokenizer: Tokenizer,
    inner: RwLock<StoreInner>,
}

impl Default for KnowledgeStore {
    fn default() -> Self {
        Self::new(StoreConfig::default(), Tokenizer::default())
    }
}

impl KnowledgeStore {
    /// Create an empty store
    pub fn new(cfg: StoreConfig, tokenizer: Tokenizer) -> Self {
        Self {
            cfg: cfg.normalized(),
            tokenizer,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Current configuration
    pub fn config(&self) -> &StoreConfig {
        &self.cfg
    }

    /// Tokenizer shared with query building
    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Insert or update a statement; returns whether anything changed
    ///
    /// The statement is validated first. An upsert that changes none of
    /// text/type/weight/confidence/tags/metadata/expiry is a no-op and does
    /// not touch `updated_at`.
    pub fn upsert(&self, mut st: Statement) -> Result<bool> {
        let now = current_millis();
        st.validate_at(now)?;

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = inner.statements.get(&st.id) {
            if existing.text == st.text
                && existing.kind == st.kind
                && existing.weight == st.weight
                && existing.confidence == st.confidence
                && existing.tags == st.tags
                && existing.metadata == st.metadata
                && existing.expires_at == st.expires_at
            {
                return Ok(false);
            }
            // keep original creation time, touch mutation time
            st.created_at = existing.created_at;
            st.updated_at = now.max(st.created_at);
            Self::unindex(&mut inner, &st.id);
        }

        let tf = term_frequencies(&self.tokenizer.tokenize(&st.text));
        let total: u64 = tf.values().map(|&c| u64::from(c)).sum();
        for term in tf.keys() {
            inner
                .postings
                .entry(term.clone())
                .or_default()
                .insert(st.id.clone());
        }
        inner.total_tokens += total;
        inner.tf_by_id.insert(st.id.clone(), tf);
        inner.statements.insert(st.id.clone(), st);
        Ok(true)
    }

    /// Remove a statement by id
    pub fn remove(&self, id: &str) -> Option<Statement> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.statements.contains_key(id) {
            Self::unindex(&mut inner, id);
            inner.tf_by_id.remove(id);
            inner.statements.remove(id)
        } else {
            None
        }
    }

    /// Fetch a statement by id
    pub fn get(&self, id: &str) -> Option<Statement> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.statements.get(id).cloned()
    }

    /// Stable snapshot of all statements, sorted by id
    pub fn snapshot_sorted(&self) -> Vec<Statement> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.statements.values().cloned().collect()
    }

    /// Number of statements
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.statements.len()
    }

    /// Whether the store holds no statements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Corpus statistics
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        StoreStats {
            statements: inner.statements.len(),
            tokens: inner.total_tokens,
            distinct_terms: inner.postings.len(),
        }
    }

    /// Tokenize a prompt into a tagless query, capped to the configured size
    pub fn build_query_from_prompt(&self, prompt: &str) -> Query {
        let tokens = self.tokenizer.tokenize(prompt);
        Query::new(
            tokens.into_iter().take(self.cfg.max_query_tokens),
            std::iter::empty(),
        )
    }

    /// Ranked search against the wall clock
    pub fn search(&self, query: &Query) -> Vec<ScoredStatement> {
        self.search_at(query, current_millis())
    }

    /// Ranked search at a fixed instant (deterministic form)
    ///
    /// Candidates are the union of inverted-index postings over the query
    /// tokens, cut at the candidate cap by ascending id. Expired statements
    /// are skipped. Each survivor is scored as
    /// `w_bm25*bm25 + w_tag*tag_sim + w_recency*recency + w_strength*(weight*confidence)`
    /// and results are sorted by score descending, id ascending.
    pub fn search_at(&self, query: &Query, now_ms: i64) -> Vec<ScoredStatement> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());

        let mut candidates: BTreeSet<&String> = BTreeSet::new();
        for token in query.tokens() {
            if let Some(ids) = inner.postings.get(token) {
                candidates.extend(ids.iter());
            }
        }

        let total_docs = inner.statements.len().max(1) as f64;
        let avg_len = inner.total_tokens as f64 / total_docs;

        let mut scored: Vec<ScoredStatement> = Vec::new();
        for id in candidates.into_iter().take(self.cfg.candidate_cap) {
            let Some(st) = inner.statements.get(id) else {
                continue;
            };
            if st.is_expired(now_ms) {
                continue;
            }
            let Some(tf) = inner.tf_by_id.get(id) else {
                continue;
            };

            let doc_len: u64 = tf.values().map(|&c| u64::from(c)).sum();
            let mut bm25 = 0.0;
            for token in query.tokens() {
                let Some(&freq) = tf.get(token) else { continue };
                let df = inner.postings.get(token).map(BTreeSet::len).unwrap_or(0) as f64;
                let idf = ((total_docs - df + 0.5) / (df + 0.5) + 1.0).ln();
                let f = f64::from(freq);
                let denom = f
                    + self.cfg.k1
                        * (1.0 - self.cfg.b + self.cfg.b * doc_len as f64 / avg_len.max(1.0));
                bm25 += idf * f * (self.cfg.k1 + 1.0) / denom;
            }

            let tag_sim = tag_similarity(query.tags(), &st.tags);
            let age = (now_ms - st.updated_at).max(0) as f64;
            let recency = (-age / self.cfg.recency_half_life_ms as f64).exp();
            let strength = st.effective_weight();

            let score = self.cfg.w_bm25 * bm25
                + self.cfg.w_tag * tag_sim
                + self.cfg.w_recency * recency
                + self.cfg.w_strength * strength;

            let mut features = BTreeMap::new();
            features.insert("bm25".to_string(), bm25);
            features.insert("tag".to_string(), tag_sim);
            features.insert("recency".to_string(), recency);
            features.insert("strength".to_string(), strength);

            scored.push(ScoredStatement {
                statement: st.clone(),
                score,
                features,
            });
        }
        drop(inner);

        sort_ranked(&mut scored);
        scored
    }

    /// Multi-iteration retrieval with query expansion
    ///
    /// Each iteration searches with the current query (token set capped),
    /// MMR-selects the evidence, then widens the query with evidence tags
    /// and the highest-IDF evidence tokens.
    pub fn retrieve_iterative(
        &self,
        prompt: &str,
        iterations: usize,
        top_k: usize,
    ) -> RetrievalReport {
        let now = current_millis();
        let mut query = self.build_query_from_prompt(prompt);
        let mut report = RetrievalReport::default();

        for _ in 0..iterations.max(1) {
            let capped = query.capped(self.cfg.max_query_tokens);
            let ranked = self.search_at(&capped, now);
            let evidence = if self.cfg.mmr_enabled {
                self.mmr_select(&ranked, top_k, self.cfg.mmr_lambda)
            } else {
                ranked.into_iter().take(top_k).collect()
            };

            // widen: evidence tags join the query tags
            let tags: Vec<String> = evidence
                .iter()
                .flat_map(|s| s.statement.tags.iter().cloned())
                .collect();
            query.extend_tags(tags);

            // widen: IDF-ranked evidence tokens join the query tokens
            let expansion = self.expansion_tokens(&query, &evidence);
            query.extend_tokens(expansion);

            report.steps.push(RetrievalStep {
                query: capped,
                evidence,
            });
        }

        report
    }

    /// Deterministic MMR selection over a ranked list
    ///
    /// The top-ranked item is always picked first; every further pick
    /// maximizes `lambda*rel - (1-lambda)*max_sim(candidate, selected)`
    /// with token-set cosine similarity. Ties break by ascending id.
    pub fn mmr_select(
        &self,
        ranked: &[ScoredStatement],
        k: usize,
        lambda: f64,
    ) -> Vec<ScoredStatement> {
        if ranked.is_empty() || k == 0 {
            return Vec::new();
        }

        let token_sets: Vec<BTreeSet<String>> = ranked
            .iter()
            .map(|s| self.tokenizer.tokenize(&s.statement.text).into_iter().collect())
            .collect();

        let mut picked: Vec<usize> = vec![0];
        let mut remaining: Vec<usize> = (1..ranked.len()).collect();

        while picked.len() < k.min(ranked.len()) {
            let mut best: Option<(usize, f64)> = None;
            for (slot, &i) in remaining.iter().enumerate() {
                let max_sim = picked
                    .iter()
                    .map(|&j| set_cosine(&token_sets[i], &token_sets[j]))
                    .fold(0.0, f64::max);
                let value = lambda * ranked[i].score - (1.0 - lambda) * max_sim;
                let better = match best {
                    None => true,
                    Some((best_slot, best_value)) => {
                        value > best_value
                            || (value == best_value
                                && ranked[i].statement.id
                                    < ranked[remaining[best_slot]].statement.id)
                    }
                };
                if better {
                    best = Some((slot, value));
                }
            }
            match best {
                Some((slot, _)) => {
                    let i = remaining.remove(slot);
                    picked.push(i);
                }
                None => break,
            }
        }

        picked.into_iter().map(|i| ranked[i].clone()).collect()
    }

    /// Inverse document frequency of a term under the current corpus
    pub fn idf(&self, term: &str) -> f64 {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let total_docs = inner.statements.len().max(1) as f64;
        let df = inner.postings.get(term).map(BTreeSet::len).unwrap_or(0) as f64;
        ((total_docs - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Highest-IDF evidence tokens not already in the query
    fn expansion_tokens(&self, query: &Query, evidence: &[ScoredStatement]) -> Vec<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for s in evidence {
            for token in self.tokenizer.tokenize(&s.statement.text) {
                if !query.tokens().contains(&token) {
                    seen.insert(token);
                }
            }
        }

        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let total_docs = inner.statements.len().max(1) as f64;
        let mut ranked: Vec<(String, f64)> = seen
            .into_iter()
            .map(|t| {
                let df = inner.postings.get(&t).map(BTreeSet::len).unwrap_or(0) as f64;
                let idf = ((total_docs - df + 0.5) / (df + 0.5) + 1.0).ln();
                (t, idf)
            })
            .collect();
        drop(inner);

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked
            .into_iter()
            .take(self.cfg.expand_tokens_per_step)
            .map(|(t, _)| t)
            .collect()
    }

    /// Subtract a statement's contributions from the inverted index
    fn unindex(inner: &mut StoreInner, id: &str) {
        if let Some(tf) = inner.tf_by_id.remove(id) {
            let total: u64 = tf.values().map(|&c| u64::from(c)).sum();
            inner.total_tokens = inner.total_tokens.saturating_sub(total);
            for term in tf.keys() {
                if let Some(ids) = inner.postings.get_mut(term) {
                    ids.remove(id);
                    if ids.is_empty() {
                        inner.postings.remove(term);
                    }
                }
            }
        }
    }
}

// ============================================================================
// SCORING HELPERS
// ============================================================================

/// Sort by score descending, id ascending
pub(crate) fn sort_ranked(scored: &mut [ScoredStatement]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.statement.id.cmp(&b.statement.id))
    });
}

/// `|a ∩ b| / sqrt(|a| * |b|)` over tag lists
fn tag_similarity(query_tags: &BTreeSet<String>, tags: &[String]) -> f64 {
    if query_tags.is_empty() || tags.is_empty() {
        return 0.0;
    }
    let statement_tags: BTreeSet<&String> = tags.iter().collect();
    let common = query_tags.iter().filter(|t| statement_tags.contains(t)).count();
    common as f64 / ((query_tags.len() * statement_tags.len()) as f64).sqrt()
}

/// Cosine similarity on set indicators
fn set_cosine(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let common = a.intersection(b).count();
    common as f64 / ((a.len() * b.len()) as f64).sqrt()
}

fn term_frequencies(tokens: &[String]) -> HashMap<String, u32> {
    let mut tf: HashMap<String, u32> = HashMap::new();
    for t in tokens {
        *tf.entry(t.clone()).or_default() += 1;
    }
    tf
}

// ============================================================================
// TESTS
// ============================================================================
