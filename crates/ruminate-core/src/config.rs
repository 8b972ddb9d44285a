//! Umbrella configuration
//!
//! One struct per component, aggregated here so a host can deserialize the
//! whole pipeline configuration from a single JSON object. Every option has
//! a default and a documented clamp; `normalized()` applies all clamps in
//! one pass. Parsing and file handling belong to the host.

use serde::{Deserialize, Serialize};

use crate::engine::{BeamConfig, EngineConfig};
use crate::eval::EvaluatorConfig;
use crate::explore::ExploreConfig;
use crate::knowledge::StoreConfig;
use crate::learn::LearnerConfig;
use crate::ltm::LtmConfig;
use crate::retrieval::RetrieverConfig;
use crate::text::TokenizerConfig;

/// Full pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThinkConfig {
    /// Tokenizer options
    pub tokenizer: TokenizerConfig,
    /// Knowledge store options (BM25, MMR, weights)
    pub store: StoreConfig,
    /// Retriever options
    pub retriever: RetrieverConfig,
    /// Exploration/selection options
    pub explore: ExploreConfig,
    /// Evaluator thresholds
    pub evaluator: EvaluatorConfig,
    /// Learner options
    pub learner: LearnerConfig,
    /// Long-term memory options
    pub ltm: LtmConfig,
    /// Engine options
    pub engine: EngineConfig,
    /// Beam-variant options
    pub beam: BeamConfig,
}

impl ThinkConfig {
    /// Copy with every component clamped into its documented ranges
    pub fn normalized(self) -> Self {
        Self {
            tokenizer: self.tokenizer.normalized(),
            store: self.store.normalized(),
            retriever: self.retriever.normalized(),
            explore: self.explore.normalized(),
            evaluator: self.evaluator.normalized(),
            learner: self.learner.normalized(),
            ltm: self.ltm.normalized(),
            engine: self.engine.normalized(),
            beam: self.beam.normalized(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Orchestrator;

    #[test]
    fn test_default_round_trips_through_json() {
        let cfg = ThinkConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ThinkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.engine.iterations, cfg.engine.iterations);
        assert_eq!(back.store.k1, cfg.store.k1);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: ThinkConfig =
            serde_json::from_str(r#"{"engine":{"orchestrator":"beam","iterations":5}}"#).unwrap();
        assert_eq!(cfg.engine.orchestrator, Orchestrator::Beam);
        assert_eq!(cfg.engine.iterations, 5);
        // untouched sections keep their defaults
        assert_eq!(cfg.ltm.recall_k, LtmConfig::default().recall_k);
    }

    #[test]
    fn test_normalized_clamps_everything() {
        let cfg: ThinkConfig = serde_json::from_str(
            r#"{
                "engine": {"iterations": 99, "retrieveK": 0},
                "retriever": {"iterationDecay": 5.0},
                "explore": {"temperature": -1.0},
                "ltm": {"capacity": 999999999}
            }"#,
        )
        .unwrap();
        let cfg = cfg.normalized();
        assert_eq!(cfg.engine.iterations, 8);
        assert_eq!(cfg.engine.retrieve_k, 1);
        assert!(cfg.retriever.iteration_decay <= 1.0);
        assert!(cfg.explore.temperature > 0.0);
        assert!(cfg.ltm.capacity <= 200_000);
    }
}
