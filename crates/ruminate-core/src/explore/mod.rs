//! Deterministic exploration - scored selection with diversity
//!
//! Given a pre-ranked list, an [`ExplorationStrategy`] picks k items. The
//! [`SoftmaxSampler`] maximizes relevance minus a Jaccard diversity penalty,
//! perturbed by Gumbel noise that is derived purely from
//! `(seed, stable key)` - no RNG state, so the same inputs always select
//! the same items.

mod hashing;

pub use hashing::{mix64, stable_hash64, unit_from_hash};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::knowledge::ScoredStatement;

// ============================================================================
// CONFIG
// ============================================================================

/// Exploration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExploreConfig {
    /// Softmax temperature, > 0; lower sharpens toward the top of the ranking
    pub temperature: f64,
    /// Default number of items to select
    pub top_k: usize,
    /// Pool size multiplier: selection considers the first k * multiplier items
    pub candidate_multiplier: usize,
    /// Diversity penalty strength, in [0, 1]
    pub diversity: f64,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 8,
            candidate_multiplier: 4,
            diversity: 0.25,
        }
    }
}

impl ExploreConfig {
    /// Copy with out-of-range values clamped into their documented ranges
    pub fn normalized(mut self) -> Self {
        self.temperature = if self.temperature > 0.0 {
            self.temperature
        } else {
            0.7
        };
        self.top_k = self.top_k.max(1);
        self.candidate_multiplier = self.candidate_multiplier.max(1);
        self.diversity = self.diversity.clamp(0.0, 1.0);
        self
    }
}

// ============================================================================
// STRATEGY TRAIT
// ============================================================================

/// Deterministic pick of k items from a ranked list
pub trait ExplorationStrategy: Send + Sync {
    /// Select up to `k` items; repeated calls with the same inputs return
    /// the same items in the same order
    fn select(&self, ranked: &[ScoredStatement], k: usize, seed: u64) -> Vec<ScoredStatement>;
}

// ============================================================================
// SOFTMAX SAMPLER
// ============================================================================

/// Minimum length of words counted for the diversity token sets
const DIVERSITY_TOKEN_MIN_LEN: usize = 3;

/// Gumbel-argmax selection with a Jaccard diversity penalty
#[derive(Debug, Clone, Default)]
pub struct SoftmaxSampler {
    cfg: ExploreConfig,
}

impl SoftmaxSampler {
    /// Create a sampler with the given configuration
    pub fn new(cfg: ExploreConfig) -> Self {
        Self {
            cfg: cfg.normalized(),
        }
    }

    /// Current configuration
    pub fn config(&self) -> &ExploreConfig {
        &self.cfg
    }
}

impl ExplorationStrategy for SoftmaxSampler {
    fn select(&self, ranked: &[ScoredStatement], k: usize, seed: u64) -> Vec<ScoredStatement> {
        if ranked.is_empty() || k == 0 {
            return Vec::new();
        }

        let pool_len = ranked
            .len()
            .min(k.max(1).saturating_mul(self.cfg.candidate_multiplier));
        let pool = &ranked[..pool_len];

        // per-item Gumbel noise and lazily-built diversity token sets
        let noise: Vec<f64> = pool
            .iter()
            .map(|item| {
                let u = unit_from_hash(mix64(seed, stable_hash64(item.stable_key())));
                -(-u.ln()).ln()
            })
            .collect();
        let mut token_sets: Vec<Option<BTreeSet<String>>> = vec![None; pool_len];

        let mut picked: Vec<usize> = Vec::new();
        let mut remaining: Vec<usize> = (0..pool_len).collect();

        while picked.len() < k && !remaining.is_empty() {
            let mut best_slot = 0;
            let mut best_value = f64::NEG_INFINITY;
            for (slot, &i) in remaining.iter().enumerate() {
                let mut value = pool[i].score / self.cfg.temperature + noise[i];
                if self.cfg.diversity > 0.0 && !picked.is_empty() {
                    let tokens_i = diversity_tokens(&mut token_sets, pool, i);
                    let max_sim = picked
                        .iter()
                        .map(|&j| {
                            let tokens_j = diversity_tokens(&mut token_sets, pool, j);
                            jaccard(&tokens_i, &tokens_j)
                        })
                        .fold(0.0, f64::max);
                    value -= self.cfg.diversity * max_sim;
                }
                // strict comparison keeps the first-encountered item on ties
                if value > best_value {
                    best_value = value;
                    best_slot = slot;
                }
            }
            picked.push(remaining.remove(best_slot));
        }

        picked.into_iter().map(|i| pool[i].clone()).collect()
    }
}

/// Lowercased word-character runs of minimum length, cached per pool index
fn diversity_tokens(
    cache: &mut [Option<BTreeSet<String>>],
    pool: &[ScoredStatement],
    i: usize,
) -> BTreeSet<String> {
    if cache[i].is_none() {
        let mut set = BTreeSet::new();
        let mut word = String::new();
        for c in pool[i].statement.text.chars() {
            if c.is_alphanumeric() || c == '_' {
                word.extend(c.to_lowercase());
            } else if !word.is_empty() {
                if word.chars().count() >= DIVERSITY_TOKEN_MIN_LEN {
                    set.insert(std::mem::take(&mut word));
                } else {
                    word.clear();
                }
            }
        }
        if word.chars().count() >= DIVERSITY_TOKEN_MIN_LEN {
            set.insert(word);
        }
        cache[i] = Some(set);
    }
    cache[i].clone().unwrap_or_default()
}

/// Jaccard similarity of two token sets
fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let common = a.intersection(b).count();
    let union = a.len() + b.len() - common;
    if union == 0 {
        0.0
    } else {
        common as f64 / union as f64
    }
}

// ============================================================================
// TESTS
// ============================================================================
