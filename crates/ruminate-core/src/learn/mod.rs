//! Learning - durable statement extraction from raw text
//!
//! Splits text into sentences, gates out noise, scores what survives with
//! deterministic heuristics, and upserts the best candidates into the
//! knowledge store. Re-learning the same sentence reinforces its weight
//! instead of duplicating it; signatures are CRC32 of the normalized
//! sentence, so reinforcement is stable across runs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::knowledge::{KnowledgeStore, Result, Statement};
use crate::text::{sentences, split_clauses, Tokenizer};

// ============================================================================
// CONFIG
// ============================================================================

/// Learner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LearnerConfig {
    /// Shortest sentence worth keeping, in characters
    pub min_sentence_chars: usize,
    /// Sentences longer than this are split into clauses
    pub max_sentence_chars: usize,
    /// Minimum token count per candidate
    pub min_tokens: usize,
    /// Maximum digit character ratio
    pub max_digit_ratio: f64,
    /// Maximum punctuation character ratio
    pub max_punct_ratio: f64,
    /// Selection rounds
    pub rounds: usize,
    /// Candidates selected per round
    pub top_k_per_round: usize,
    /// Minimum heuristic score for selection
    pub min_score: f64,
    /// Weight given to a newly learned statement
    pub new_weight: f64,
    /// Weight step applied on reinforcement
    pub reinforce_step: f64,
    /// Weight ceiling
    pub max_weight: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            min_sentence_chars: 20,
            max_sentence_chars: 280,
            min_tokens: 4,
            max_digit_ratio: 0.3,
            max_punct_ratio: 0.3,
            rounds: 2,
            top_k_per_round: 4,
            min_score: 0.35,
            new_weight: 1.0,
            reinforce_step: 0.25,
            max_weight: 5.0,
        }
    }
}

impl LearnerConfig {
    /// Copy with out-of-range values clamped into their documented ranges
    pub fn normalized(mut self) -> Self {
        self.min_sentence_chars = self.min_sentence_chars.max(1);
        self.max_sentence_chars = self.max_sentence_chars.max(self.min_sentence_chars);
        self.min_tokens = self.min_tokens.max(1);
        self.rounds = self.rounds.max(1);
        self.top_k_per_round = self.top_k_per_round.max(1);
        self.min_score = self.min_score.clamp(0.0, 1.0);
        self.new_weight = self.new_weight.max(0.0);
        self.reinforce_step = self.reinforce_step.max(0.0);
        self.max_weight = self.max_weight.max(self.new_weight);
        self
    }
}

// ============================================================================
// LEARNER
// ============================================================================

/// Words whose presence suggests a sentence carries durable structure
const STRUCTURE_WORDS: [&str; 9] = [
    "because", "therefore", "means", "is", "are", "results", "causes", "defines", "requires",
];

#[derive(Debug, Clone)]
struct LearnCandidate {
    text: String,
    signature: u32,
    score: f64,
}

/// Extracts durable statements from raw text
///
/// Stateless across calls: re-learning a sentence reaches the store's
/// existing entry and reinforces its weight.
pub struct Learner {
    cfg: LearnerConfig,
    tokenizer: Tokenizer,
}

impl Default for Learner {
    fn default() -> Self {
        Self::new(LearnerConfig::default(), Tokenizer::default())
    }
}

impl Learner {
    /// Create a learner
    pub fn new(cfg: LearnerConfig, tokenizer: Tokenizer) -> Self {
        Self {
            cfg: cfg.normalized(),
            tokenizer,
        }
    }

    /// Current configuration
    pub fn config(&self) -> &LearnerConfig {
        &self.cfg
    }

    /// Learn durable statements from `text`, tagged with `tag`
    ///
    /// `context` (when given) boosts sentences that share vocabulary with
    /// the surrounding conversation. Returns the statements upserted into
    /// the store, in selection order.
    pub fn learn_from_text(
        &self,
        store: &KnowledgeStore,
        text: &str,
        tag: &str,
        context: Option<&str>,
    ) -> Result<Vec<Statement>> {
        let normalized = normalize(text, tag == "assistant");
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        let context_tokens: BTreeSet<String> = context
            .map(|c| self.tokenizer.tokenize(c).into_iter().collect())
            .unwrap_or_default();

        let mut candidates = Vec::new();
        let mut local_sigs = BTreeSet::new();
        for sentence in self.split(&normalized) {
            let Some(candidate) = self.score_candidate(&sentence, &context_tokens) else {
                continue;
            };
            // keep the first occurrence within this text
            if local_sigs.insert(candidate.signature) {
                candidates.push(candidate);
            }
        }

        let selected = self.select_rounds(candidates);

        let mut learned = Vec::new();
        for candidate in selected {
            let statement = self.upsert_candidate(store, &candidate, tag)?;
            learned.push(statement);
        }
        if !learned.is_empty() {
            tracing::debug!(count = learned.len(), tag, "learned statements");
        }
        Ok(learned)
    }

    /// Sentences, with over-long ones split into clauses
    fn split(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        for sentence in sentences(text) {
            if sentence.chars().count() > self.cfg.max_sentence_chars {
                out.extend(
                    split_clauses(&sentence)
                        .into_iter()
                        .filter(|c| c.chars().count() <= self.cfg.max_sentence_chars),
                );
            } else {
                out.push(sentence);
            }
        }
        out
    }

    /// Gate and score one sentence; None when it fails a hard gate
    fn score_candidate(
        &self,
        sentence: &str,
        context_tokens: &BTreeSet<String>,
    ) -> Option<LearnCandidate> {
        let trimmed = sentence.trim();
        if trimmed.chars().count() < self.cfg.min_sentence_chars {
            return None;
        }

        let tokens = self.tokenizer.tokenize(trimmed);
        if tokens.len() < self.cfg.min_tokens {
            return None;
        }

        let total_chars = trimmed.chars().filter(|c| !c.is_whitespace()).count().max(1);
        let digits = trimmed.chars().filter(char::is_ascii_digit).count();
        let punct = trimmed.chars().filter(|c| c.is_ascii_punctuation()).count();
        let letters = trimmed.chars().filter(|c| c.is_alphabetic()).count();
        if digits as f64 / total_chars as f64 > self.cfg.max_digit_ratio {
            return None;
        }
        if punct as f64 / total_chars as f64 > self.cfg.max_punct_ratio {
            return None;
        }

        // heuristic score in [0, 1]: a clean prose sentence lands around 0.5
        let mut score = 0.35 + 0.3 * (tokens.len() as f64 / 10.0).min(1.0);
        if tokens.iter().any(|t| STRUCTURE_WORDS.contains(&t.as_str())) {
            score += 0.15;
        }
        if !context_tokens.is_empty() {
            let shared = tokens.iter().filter(|t| context_tokens.contains(*t)).count();
            if shared >= 2 {
                score += 0.15;
            }
        }
        if (letters as f64 / total_chars as f64) < 0.6 {
            score -= 0.2;
        }
        if has_punct_run(trimmed) {
            score -= 0.1;
        }
        if trimmed.ends_with('?') {
            score -= 0.2;
        }
        // length normalization: saturate toward 1 as sentences grow
        score *= tokens.len() as f64 / (tokens.len() as f64 + 4.0) + 0.4;
        let score = score.clamp(0.0, 1.0);

        let canonical = trimmed.to_lowercase();
        Some(LearnCandidate {
            text: trimmed.to_string(),
            signature: crc32fast::hash(canonical.as_bytes()),
            score,
        })
    }

    /// R rounds of top-K selection over the scored candidates
    ///
    /// Candidates arrive deduplicated by signature, and selected ones leave
    /// the pool, so a sentence is picked at most once per call.
    fn select_rounds(&self, mut candidates: Vec<LearnCandidate>) -> Vec<LearnCandidate> {
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.signature.cmp(&b.signature))
        });

        let mut selected = Vec::new();
        let mut pool = candidates;
        for _ in 0..self.cfg.rounds {
            let mut rest = Vec::new();
            let mut taken = 0;
            for candidate in pool {
                if taken < self.cfg.top_k_per_round && candidate.score >= self.cfg.min_score {
                    selected.push(candidate);
                    taken += 1;
                } else {
                    rest.push(candidate);
                }
            }
            pool = rest;
            if pool.is_empty() {
                break;
            }
        }
        selected
    }

    /// Insert a new statement or reinforce an existing one
    fn upsert_candidate(
        &self,
        store: &KnowledgeStore,
        candidate: &LearnCandidate,
        tag: &str,
    ) -> Result<Statement> {
        let id = format!("learn:{}:{:08x}", tag, candidate.signature);

        let statement = match store.get(&id) {
            Some(mut existing) => {
                let step = self.cfg.reinforce_step * (0.6 + 0.4 * candidate.score);
                existing.weight = (existing.weight + step).clamp(0.0, self.cfg.max_weight);
                existing
            }
            None => {
                let mut st = Statement::new(id, candidate.text.clone());
                st.weight = self.cfg.new_weight;
                st.confidence = 0.5 + 0.5 * candidate.score;
                st.source = "learner".to_string();
                st.tags = vec!["learned".to_string(), tag.to_string()];
                st
            }
        };

        store.upsert(statement.clone())?;
        // hand back the stored view (validated, timestamps settled)
        Ok(store.get(&statement.id).unwrap_or(statement))
    }
}

/// Strip control characters and collapse runs of blanks; optionally strip
/// markdown scaffolding (assistant-sourced text)
fn normalize(text: &str, strip_markdown: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for raw_line in text.lines() {
        let mut line = raw_line.trim();
        if strip_markdown {
            line = line
                .trim_start_matches(|c: char| c == '#' || c == '>' || c == '*' || c == '-')
                .trim_start();
        }
        let line: String = line
            .chars()
            .filter(|c| !c.is_control())
            .map(|c| if strip_markdown && c == '`' { ' ' } else { c })
            .collect();
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&collapsed);
        }
    }
    out
}

/// Double punctuation runs ("!!", "??", ",,") mark noisy prose
fn has_punct_run(text: &str) -> bool {
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if c.is_ascii_punctuation() {
            if prev == Some(c) {
                return true;
            }
            prev = Some(c);
        } else {
            prev = None;
        }
    }
    false
}

// ============================================================================
// TESTS
// ============================================================================
