//! Per-request thought state and candidate bookkeeping

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::eval::Evaluation;
use crate::knowledge::Statement;

use super::Intent;

// ============================================================================
// PHASES
// ============================================================================

/// Where the engine is in its explore/exploit arc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Early iterations: cast a wide net
    #[default]
    Explore,
    /// Middle iterations: sharpen the best line
    Exploit,
    /// Final iteration: consolidate and check
    Verify,
    /// Stagnation detected: push away from the stuck draft
    Repair,
}

impl Phase {
    /// Numeric code for the generation-hint grammar
    pub fn code(self) -> u8 {
        match self {
            Phase::Explore => 0,
            Phase::Exploit => 1,
            Phase::Verify => 2,
            Phase::Repair => 3,
        }
    }
}

/// How much draft variety the generator should aim for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiversityLevel {
    /// Stay close to the best draft
    Low,
    /// Moderate variation
    #[default]
    Med,
    /// Maximum variation between drafts
    High,
}

impl DiversityLevel {
    /// Numeric code for the generation-hint grammar
    pub fn code(self) -> u8 {
        match self {
            DiversityLevel::Low => 0,
            DiversityLevel::Med => 1,
            DiversityLevel::High => 2,
        }
    }
}

// ============================================================================
// CANDIDATE
// ============================================================================

/// One evaluated draft
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Query the draft answered
    pub query: String,
    /// Draft text
    pub text: String,
    /// Iteration that produced it
    pub iteration: u32,
    /// Seed in effect when it was generated
    pub seed: u64,
    /// Index within its iteration's draft batch
    pub draft_index: u32,
    /// Full evaluation
    pub evaluation: Evaluation,
    /// Effective score shortcut (mirrors `evaluation.effective_score`)
    pub score: f64,
    /// Numeric critique of the evaluation
    pub critique: String,
}

impl Candidate {
    /// Wrap an evaluated draft
    pub fn new(
        query: &str,
        text: String,
        iteration: u32,
        seed: u64,
        draft_index: u32,
        evaluation: Evaluation,
    ) -> Self {
        let score = evaluation.effective_score;
        let critique = evaluation.critique();
        Self {
            query: query.to_string(),
            text,
            iteration,
            seed,
            draft_index,
            evaluation,
            score,
            critique,
        }
    }
}

// ============================================================================
// THOUGHT STATE
// ============================================================================

/// Mutable per-request state, owned by one engine invocation
///
/// `copy_for_draft` hands each draft its own value: tags are deep-copied,
/// recalled evidence stays shared read-only behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct ThoughtState {
    /// Current mixing seed
    pub seed: u64,
    /// Current iteration (0-based)
    pub iteration: u32,
    /// Index of the draft being generated
    pub draft_index: u32,
    /// Current phase
    pub phase: Phase,
    /// Requested draft diversity
    pub diversity: DiversityLevel,
    /// Detected intent of the user text
    pub intent: Intent,
    /// Numeric generation hint (`key=value;...`)
    pub generation_hint: String,
    /// Free-form request tags
    pub tags: BTreeMap<String, String>,
    /// Evidence recalled from long-term memory (shared read-only)
    pub recalled: Arc<Vec<Statement>>,
    /// Best candidate so far
    pub best: Option<Candidate>,
    /// Evaluation of the best candidate
    pub best_evaluation: Option<Evaluation>,
    /// Most recent candidate
    pub last_candidate: Option<Candidate>,
    /// Evaluation of the most recent candidate
    pub last_evaluation: Option<Evaluation>,
    /// Critique of the last best-of-iteration
    pub last_critique: String,
    /// Iterations since the best score improved
    pub stagnation: u32,
    /// Score improvement of the latest best-update
    pub score_delta: f64,
}

impl ThoughtState {
    /// Value copy for one draft: tags deep-copied, evidence shared
    pub fn copy_for_draft(&self, draft_index: u32) -> Self {
        Self {
            draft_index,
            tags: self.tags.clone(),
            recalled: Arc::clone(&self.recalled),
            ..self.clone()
        }
    }

    /// Record a new best candidate
    pub fn promote(&mut self, candidate: Candidate) {
        let previous = self
            .best_evaluation
            .as_ref()
            .map(|e| e.effective_score)
            .unwrap_or(f64::NEG_INFINITY);
        self.score_delta = candidate.score - previous;
        self.best_evaluation = Some(candidate.evaluation.clone());
        self.last_critique = candidate.critique.clone();
        self.best = Some(candidate);
        self.stagnation = 0;
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// What `think` hands back to the host
#[derive(Debug, Clone)]
pub struct ThoughtResult {
    /// Best draft text (may be empty only on catastrophic emptiness)
    pub answer: String,
    /// Evaluation of the returned answer
    pub evaluation: Evaluation,
    /// Iterations actually run
    pub iterations: u32,
    /// Compact per-iteration trace lines
    pub trace: Vec<String>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_for_draft_isolates_tags() {
        let mut state = ThoughtState::default();
        state.tags.insert("topic".into(), "foxes".into());
        let mut draft_state = state.copy_for_draft(3);

        assert_eq!(draft_state.draft_index, 3);
        draft_state.tags.insert("mutated".into(), "yes".into());
        assert!(!state.tags.contains_key("mutated"));
    }

    #[test]
    fn test_copy_for_draft_shares_evidence() {
        let mut state = ThoughtState::default();
        state.recalled = Arc::new(vec![Statement::new("m1", "remembered fact")]);
        let draft_state = state.copy_for_draft(0);
        assert!(Arc::ptr_eq(&state.recalled, &draft_state.recalled));
    }

    #[test]
    fn test_promote_resets_stagnation() {
        let mut state = ThoughtState {
            stagnation: 3,
            ..Default::default()
        };
        let eval = Evaluation {
            effective_score: 0.4,
            ..Default::default()
        };
        state.promote(Candidate::new("q", "text".into(), 0, 1, 0, eval));
        assert_eq!(state.stagnation, 0);
        assert!(state.best.is_some());
        assert!(state.score_delta.is_infinite() || state.score_delta > 0.0);
    }
}
