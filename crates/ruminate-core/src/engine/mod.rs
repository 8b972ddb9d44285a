//! Thinking engines - iterative and beam orchestration
//!
//! An engine turns one user utterance into a grounded answer by looping
//! retrieve -> draft -> evaluate -> refine until a target score, a patience
//! budget or the iteration cap ends the request. The per-request
//! [`ThoughtState`] is owned by a single engine invocation; the knowledge
//! store and long-term memory are the only shared resources it touches.

mod beam;
mod hint;
mod intent;
mod iterative;
mod pool;
mod state;

pub use beam::BeamEngine;
pub use hint::{parse_hint, HintBuilder};
pub use intent::Intent;
pub use iterative::IterativeEngine;
pub use pool::EvalPool;
pub use state::{Candidate, DiversityLevel, Phase, ThoughtResult, ThoughtState};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::eval::MultiCriteriaEvaluator;
use crate::generate::Generator;
use crate::knowledge::KnowledgeStore;
use crate::ltm::LongTermMemory;
use crate::retrieval::Retriever;

// ============================================================================
// CONFIG
// ============================================================================

/// Which orchestration variant drives a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orchestrator {
    /// Single-track iterative refinement
    #[default]
    Iterative,
    /// Beam search over candidate drafts
    Beam,
}

impl std::str::FromStr for Orchestrator {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to the iterative engine
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "beam" => Orchestrator::Beam,
            _ => Orchestrator::Iterative,
        })
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Orchestration variant
    pub orchestrator: Orchestrator,
    /// Maximum refinement iterations, in [1, 8]
    pub iterations: u32,
    /// Statements retrieved per iteration, in [1, 128]
    pub retrieve_k: usize,
    /// Drafts generated per iteration, in [1, 32]
    pub drafts_per_iteration: usize,
    /// Stagnant iterations tolerated before giving up, in [0, 6]
    pub patience: u32,
    /// Stop as soon as the best effective score reaches this
    pub target_score: f64,
    /// Query refinement rounds between iterations, in [0, 8]
    pub refine_rounds: u32,
    /// Token budget for a refined retriever query, in [1, 128]
    pub refine_query_budget: usize,
    /// Evaluator pool worker threads
    pub pool_parallelism: usize,
    /// Evaluator pool queue bound
    pub pool_queue: usize,
    /// Evaluator pool shutdown timeout in milliseconds
    pub pool_shutdown_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            orchestrator: Orchestrator::Iterative,
            iterations: 3,
            retrieve_k: 8,
            drafts_per_iteration: 3,
            patience: 2,
            target_score: 0.75,
            refine_rounds: 1,
            refine_query_budget: 16,
            pool_parallelism: 2,
            pool_queue: 8,
            pool_shutdown_ms: 1_000,
        }
    }
}

impl EngineConfig {
    /// Copy with out-of-range values clamped into their documented ranges
    pub fn normalized(mut self) -> Self {
        self.iterations = self.iterations.clamp(1, 8);
        self.retrieve_k = self.retrieve_k.clamp(1, 128);
        self.drafts_per_iteration = self.drafts_per_iteration.clamp(1, 32);
        self.patience = self.patience.min(6);
        self.refine_rounds = self.refine_rounds.min(8);
        self.refine_query_budget = self.refine_query_budget.clamp(1, 128);
        self.pool_parallelism = self.pool_parallelism.max(1);
        self.pool_queue = self.pool_queue.max(1);
        self
    }
}

/// Beam-search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeamConfig {
    /// Beam width, in [1, 32]
    pub beam_width: usize,
    /// Children expanded per beam entry, in [1, 16]
    pub drafts_per_beam: usize,
    /// Hard cap on drafts per iteration, in [1, 256]
    pub max_drafts_per_iter: usize,
    /// Score penalty applied to insufficiently diverse siblings, in [0, 1]
    pub diversity_penalty: f64,
    /// Minimum Jaccard distance demanded between siblings, in [0, 1]
    pub min_diversity_jaccard: f64,
    /// Re-evaluate the final beam with strict thresholds
    pub verify_pass_enabled: bool,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            beam_width: 4,
            drafts_per_beam: 2,
            max_drafts_per_iter: 16,
            diversity_penalty: 0.3,
            min_diversity_jaccard: 0.35,
            verify_pass_enabled: true,
        }
    }
}

impl BeamConfig {
    /// Copy with out-of-range values clamped into their documented ranges
    pub fn normalized(mut self) -> Self {
        self.beam_width = self.beam_width.clamp(1, 32);
        self.drafts_per_beam = self.drafts_per_beam.clamp(1, 16);
        self.max_drafts_per_iter = self.max_drafts_per_iter.clamp(1, 256);
        self.diversity_penalty = self.diversity_penalty.clamp(0.0, 1.0);
        self.min_diversity_jaccard = self.min_diversity_jaccard.clamp(0.0, 1.0);
        self
    }
}

// ============================================================================
// ENGINE TRAIT & DISPATCH
// ============================================================================

/// One request in, one grounded result out
///
/// Engines always return a [`ThoughtResult`]; catastrophic emptiness comes
/// back as the best attempt with `valid = false` and an annotated trace.
pub trait ThinkingEngine: Send + Sync {
    /// Produce an answer for the user text under the given seed
    fn think(&self, user_text: &str, seed: u64) -> ThoughtResult;
}

/// Shared collaborators handed to either engine variant
#[derive(Clone)]
pub struct EngineParts {
    /// The process-wide knowledge store
    pub store: Arc<KnowledgeStore>,
    /// Retriever over the store
    pub retriever: Arc<Retriever>,
    /// Draft evaluator
    pub evaluator: Arc<MultiCriteriaEvaluator>,
    /// Pluggable text generator
    pub generator: Arc<dyn Generator>,
    /// Long-term memory, if enabled
    pub ltm: Option<Arc<LongTermMemory>>,
}

/// Build the engine selected by `cfg.orchestrator`
///
/// The config value alone decides the variant; anything unrecognized parses
/// to [`Orchestrator::Iterative`].
pub fn build_engine(
    cfg: EngineConfig,
    beam_cfg: BeamConfig,
    parts: EngineParts,
) -> Arc<dyn ThinkingEngine> {
    match cfg.orchestrator {
        Orchestrator::Iterative => Arc::new(IterativeEngine::new(cfg, parts)),
        Orchestrator::Beam => Arc::new(BeamEngine::new(cfg, beam_cfg, parts)),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_parse_falls_back() {
        assert_eq!("beam".parse::<Orchestrator>().unwrap(), Orchestrator::Beam);
        assert_eq!(
            "ITERATIVE".parse::<Orchestrator>().unwrap(),
            Orchestrator::Iterative
        );
        assert_eq!(
            "something-else".parse::<Orchestrator>().unwrap(),
            Orchestrator::Iterative
        );
    }

    #[test]
    fn test_config_clamps() {
        let cfg = EngineConfig {
            iterations: 99,
            retrieve_k: 0,
            drafts_per_iteration: 1000,
            patience: 20,
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.iterations, 8);
        assert_eq!(cfg.retrieve_k, 1);
        assert_eq!(cfg.drafts_per_iteration, 32);
        assert_eq!(cfg.patience, 6);
    }

    #[test]
    fn test_beam_config_clamps() {
        let cfg = BeamConfig {
            beam_width: 0,
            drafts_per_beam: 99,
            diversity_penalty: 7.0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.beam_width, 1);
        assert_eq!(cfg.drafts_per_beam, 16);
        assert_eq!(cfg.diversity_penalty, 1.0);
    }
}
