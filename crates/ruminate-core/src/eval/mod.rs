//! Candidate evaluation - multi-signal draft scoring
//!
//! Scores a draft against the user query and the retrieved context:
//! groundedness, query coverage, structure, novelty/unsupported risk,
//! repetition, echo, contradiction risk, and a multi-channel
//! coherence/entropy overlay. Everything is lexical and deterministic;
//! a draft that fails hard gates comes back as an invalid [`Evaluation`]
//! with a negative score, never as an error.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::knowledge::Statement;
use crate::scoring::Scorer;
use crate::text::Tokenizer;

// ============================================================================
// CONFIG
// ============================================================================

/// Evaluator thresholds and overlay weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluatorConfig {
    /// Minimum groundedness for a valid draft (context mode)
    pub min_groundedness: f64,
    /// Maximum tolerated contradiction risk
    pub max_contradiction: f64,
    /// Minimum query coverage
    pub min_query_coverage: f64,
    /// Maximum tolerated novelty (context mode)
    pub max_novelty: f64,
    /// Maximum tolerated repetition
    pub max_repetition: f64,
    /// Hard character budget; longer drafts are rejected outright
    pub max_chars_hard: usize,
    /// Minimum characters for a context-mode draft
    pub min_chars: usize,
    /// Weight of the coherence overlay term
    pub coherence_weight: f64,
    /// Weight of the entropy overlay term
    pub entropy_weight: f64,
    /// Weight of the risk overlay term
    pub risk_weight: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            min_groundedness: 0.25,
            max_contradiction: 0.6,
            min_query_coverage: 0.2,
            max_novelty: 0.6,
            max_repetition: 0.5,
            max_chars_hard: 4000,
            min_chars: 40,
            coherence_weight: 0.10,
            entropy_weight: 0.05,
            risk_weight: 0.10,
        }
    }
}

impl EvaluatorConfig {
    /// Copy with out-of-range values clamped into their documented ranges
    pub fn normalized(mut self) -> Self {
        self.min_groundedness = self.min_groundedness.clamp(0.0, 1.0);
        self.max_contradiction = self.max_contradiction.clamp(0.0, 1.0);
        self.min_query_coverage = self.min_query_coverage.clamp(0.0, 1.0);
        self.max_novelty = self.max_novelty.clamp(0.0, 1.0);
        self.max_repetition = self.max_repetition.clamp(0.0, 1.0);
        self.max_chars_hard = self.max_chars_hard.max(1);
        self
    }

    /// Tightened thresholds for the beam verify pass
    pub fn strict(&self) -> Self {
        Self {
            min_groundedness: (self.min_groundedness + 0.15).min(1.0),
            max_contradiction: (self.max_contradiction - 0.10).max(0.0),
            min_query_coverage: (self.min_query_coverage + 0.10).min(1.0),
            max_novelty: (self.max_novelty - 0.10).max(0.0),
            ..self.clone()
        }
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

/// The full signal breakdown for one draft
///
/// All [0, 1]-valued fields are clamped; `score` and `effective_score` may
/// go negative for rejected drafts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Evaluation {
    /// Base weighted score (pre-overlay)
    pub score: f64,
    /// Base score plus the coherence/entropy/risk overlay
    pub effective_score: f64,
    /// Support by retrieved context
    pub groundedness: f64,
    /// Heuristic contradiction risk
    pub contradiction_risk: f64,
    /// Sectioning and actionability
    pub structure_score: f64,
    /// Fraction of query tokens present in the draft
    pub coverage: f64,
    /// Mean per-statement support
    pub context_support: f64,
    /// Echo and style penalty
    pub style_penalty: f64,
    /// Fraction of draft tokens absent from the context
    pub novelty: f64,
    /// Token repetition pressure
    pub repetition: f64,
    /// 1 minus the channel-score standard deviation
    pub coherence: f64,
    /// Whether the draft passed the validity schema
    pub valid: bool,
    /// Human-readable gate failures (never fed back into hints)
    pub validation_notes: Vec<String>,
    /// Draft token count
    pub tokens: usize,
    /// Evaluation wall time in nanoseconds
    pub nanos: u64,
}

impl Evaluation {
    /// Sentinel for drafts rejected before scoring
    fn rejected(score: f64, note: &str, nanos: u64) -> Self {
        Self {
            score,
            effective_score: score,
            valid: false,
            validation_notes: vec![note.to_string()],
            nanos,
            ..Default::default()
        }
    }

    /// Numeric critique fragment for the generation-hint grammar
    ///
    /// Keys and two-decimal fixed-point values only; no free text, so the
    /// hint stays retrieval-safe.
    pub fn critique(&self) -> String {
        format!(
            "v={};g={:.2};r={:.2};st={:.2};cov={:.2};cs={:.2};sp={:.2};tok={}",
            u8::from(self.valid),
            self.groundedness,
            self.contradiction_risk,
            self.structure_score,
            self.coverage,
            self.context_support,
            self.style_penalty,
            self.tokens,
        )
    }
}

// ============================================================================
// STRUCTURE SIGNALS
// ============================================================================

/// Caps for the contradiction-risk density terms
const NUMERIC_DENSITY_CAP: f64 = 0.18;
const PUNCT_DENSITY_CAP: f64 = 0.22;

#[derive(Debug, Clone, Copy)]
struct StructureSignals {
    sectioned: bool,
    structure_score: f64,
    actionability: f64,
}

/// Detect numbered sections ("1) ..."), markdown headings and bullets
fn structure_signals(text: &str) -> StructureSignals {
    let mut numbered: BTreeSet<String> = BTreeSet::new();
    let mut headings = 0usize;
    let mut action_lines = 0usize;
    let mut lines = 0usize;

    for raw in text.lines() {
        let line = raw.trim_start();
        if line.is_empty() {
            continue;
        }
        lines += 1;

        let digits: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() && line[digits.len()..].starts_with(')') {
            numbered.insert(digits);
            action_lines += 1;
        } else if line.starts_with("## ") || line.starts_with("### ") {
            headings += 1;
        } else if line.starts_with("- ") || line.starts_with("* ") || line.starts_with("\u{2022} ")
        {
            action_lines += 1;
        }
    }

    let sectioned = numbered.len() >= 3 || headings >= 3;
    let actionability = (action_lines as f64 / 8.0).min(1.0);
    let structure_penalty = if sectioned {
        0.0
    } else if lines > 1 || action_lines > 0 {
        0.35
    } else {
        0.7
    };
    let structure_score = (0.8 * (1.0 - structure_penalty)
        + 0.2 * actionability
        + if sectioned { 0.05 } else { 0.0 })
    .clamp(0.0, 1.0);

    StructureSignals {
        sectioned,
        structure_score,
        actionability,
    }
}

// ============================================================================
// EVALUATOR
// ============================================================================

/// Deterministic multi-signal draft evaluator
pub struct MultiCriteriaEvaluator {
    cfg: EvaluatorConfig,
    tokenizer: Tokenizer,
    scorer: Arc<dyn Scorer>,
}

impl MultiCriteriaEvaluator {
    /// Create an evaluator
    pub fn new(cfg: EvaluatorConfig, tokenizer: Tokenizer, scorer: Arc<dyn Scorer>) -> Self {
        Self {
            cfg: cfg.normalized(),
            tokenizer,
            scorer,
        }
    }

    /// Current configuration
    pub fn config(&self) -> &EvaluatorConfig {
        &self.cfg
    }

    /// Copy of this evaluator with the strict verification thresholds
    pub fn strict_variant(&self) -> Self {
        Self {
            cfg: self.cfg.strict(),
            tokenizer: self.tokenizer.clone(),
            scorer: Arc::clone(&self.scorer),
        }
    }

    /// Score one draft against the query and retrieved context
    pub fn evaluate(&self, user_text: &str, candidate: &str, context: &[Statement]) -> Evaluation {
        let start = Instant::now();
        let context_mode = !context.is_empty();
        let chars = candidate.chars().count();

        // hard gates, cheapest first
        if candidate.trim().is_empty() {
            return Evaluation::rejected(-1.0, "empty draft", elapsed(start));
        }
        if context_mode && chars < self.cfg.min_chars {
            return Evaluation::rejected(-0.8, "draft below minimum length", elapsed(start));
        }
        if chars > self.cfg.max_chars_hard {
            return Evaluation::rejected(-0.6, "draft over hard length budget", elapsed(start));
        }

        let answer_tokens = self.tokenizer.tokenize(candidate);
        let answer_set: BTreeSet<&String> = answer_tokens.iter().collect();
        let query_tokens: BTreeSet<String> = self.tokenizer.tokenize(user_text).into_iter().collect();

        // groundedness: 0.7 * best statement overlap + 0.3 * mean of top K
        let mut overlaps: Vec<f64> = context
            .iter()
            .map(|st| self.scorer.score(candidate, &st.text).clamp(0.0, 1.0))
            .collect();
        overlaps.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let top_k = overlaps.len().min(4);
        let (groundedness, context_support) = if overlaps.is_empty() {
            (0.0, 0.0)
        } else {
            let max = overlaps[0];
            let mean_top: f64 = overlaps[..top_k].iter().sum::<f64>() / top_k as f64;
            let mean_all: f64 = overlaps.iter().sum::<f64>() / overlaps.len() as f64;
            ((0.7 * max + 0.3 * mean_top).clamp(0.0, 1.0), mean_all)
        };

        // query coverage
        let coverage = if query_tokens.is_empty() {
            0.0
        } else {
            let hit = query_tokens.iter().filter(|t| answer_set.contains(t)).count();
            (hit as f64 / query_tokens.len() as f64).clamp(0.0, 1.0)
        };

        let structure = structure_signals(candidate);

        // novelty: answer tokens unsupported by the context token set
        let novelty = if context_mode && !answer_tokens.is_empty() {
            let mut context_tokens: BTreeSet<String> = BTreeSet::new();
            for st in context {
                context_tokens.extend(self.tokenizer.tokenize(&st.text));
            }
            let absent = answer_tokens
                .iter()
                .filter(|t| !context_tokens.contains(*t))
                .count();
            (absent as f64 / answer_tokens.len() as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };

        // repetition: dominant token count against an expected ceiling
        let repetition = if answer_tokens.is_empty() {
            0.0
        } else {
            let mut counts: std::collections::HashMap<&String, usize> =
                std::collections::HashMap::new();
            for t in &answer_tokens {
                *counts.entry(t).or_default() += 1;
            }
            let max_count = counts.values().copied().max().unwrap_or(0) as f64;
            (max_count / (answer_tokens.len() as f64 / 6.0).max(1.0)).clamp(0.0, 1.0)
        };

        // echo penalty only applies when there is no context to ground on
        let style_penalty = if context_mode {
            0.0
        } else {
            let answer_owned: BTreeSet<&str> = answer_set.iter().map(|s| s.as_str()).collect();
            let query_ref: BTreeSet<&str> = query_tokens.iter().map(String::as_str).collect();
            let common = answer_owned.intersection(&query_ref).count();
            let union = answer_owned.len() + query_ref.len() - common;
            if union == 0 {
                0.0
            } else {
                (common as f64 / union as f64).clamp(0.0, 1.0)
            }
        };

        // contradiction risk from surface densities
        let numeric_density = char_density(candidate, |c| c.is_ascii_digit());
        let punct_density = char_density(candidate, |c| c.is_ascii_punctuation());
        let contradiction_risk = (0.15
            + 0.40 * (numeric_density / NUMERIC_DENSITY_CAP).min(1.0)
            + 0.15 * (punct_density / PUNCT_DENSITY_CAP).min(1.0)
            + 0.225 * (novelty / self.cfg.max_novelty.max(f64::EPSILON)).min(1.0)
            + if structure.sectioned { 0.0 } else { 0.10 }
            - 0.55 * groundedness)
            .clamp(0.0, 1.0);

        // multi-channel overlay
        let channels = [
            groundedness,
            structure.structure_score,
            coverage,
            structure.actionability,
        ];
        let (coherence, entropy) = coherence_entropy(&channels);

        // validity schema; relaxed when there is no context to check against
        let mut notes = Vec::new();
        if context_mode {
            if !structure.sectioned {
                notes.push("missing sections".to_string());
            }
            if structure.structure_score < 0.35 {
                notes.push("structure below floor".to_string());
            }
            if groundedness < self.cfg.min_groundedness {
                notes.push("insufficient groundedness".to_string());
            }
            if novelty > self.cfg.max_novelty {
                notes.push("novelty over budget".to_string());
            }
        }
        if contradiction_risk > self.cfg.max_contradiction {
            notes.push("contradiction risk over budget".to_string());
        }
        if coverage < self.cfg.min_query_coverage {
            notes.push("query coverage below floor".to_string());
        }
        if repetition > self.cfg.max_repetition {
            notes.push("repetitive".to_string());
        }
        let valid = notes.is_empty();

        // weighted base score
        let mut score = 0.50 * groundedness + 0.25 * coverage
            + 0.15 * structure.structure_score
            + 0.10 * structure.actionability
            - 0.55 * contradiction_risk
            - 0.55 * style_penalty
            - 0.35 * novelty
            - 0.35 * repetition;
        if context_mode && !structure.sectioned {
            score -= 0.35;
        }

        let effective_score = score + self.cfg.coherence_weight * coherence
            - self.cfg.entropy_weight * entropy
            - self.cfg.risk_weight * contradiction_risk;

        Evaluation {
            score,
            effective_score,
            groundedness,
            contradiction_risk,
            structure_score: structure.structure_score,
            coverage,
            context_support,
            style_penalty,
            novelty,
            repetition,
            coherence,
            valid,
            validation_notes: notes,
            tokens: answer_tokens.len(),
            nanos: elapsed(start),
        }
    }
}

/// Fraction of non-whitespace characters matching the predicate
fn char_density(text: &str, pred: impl Fn(char) -> bool) -> f64 {
    let mut total = 0usize;
    let mut hits = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        total += 1;
        if pred(c) {
            hits += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Coherence (1 - stddev) and normalized entropy over the channel vector
fn coherence_entropy(channels: &[f64]) -> (f64, f64) {
    let n = channels.len() as f64;
    let mean = channels.iter().sum::<f64>() / n;
    let variance = channels.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    let coherence = (1.0 - variance.sqrt()).clamp(0.0, 1.0);

    let sum: f64 = channels.iter().sum();
    let entropy = if sum <= 0.0 {
        0.0
    } else {
        let h: f64 = channels
            .iter()
            .filter(|&&c| c > 0.0)
            .map(|&c| {
                let p = c / sum;
                -p * p.ln()
            })
            .sum();
        (h / n.ln()).clamp(0.0, 1.0)
    };

    (coherence, entropy)
}

fn elapsed(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

// ============================================================================
// TESTS
// ============================================================================
