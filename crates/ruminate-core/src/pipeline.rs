//! Pipeline facade - one constructor for the whole thinking stack
//!
//! Wires tokenizer, store, scorer, retriever, evaluator, generator, learner
//! and long-term memory from a single [`ThinkConfig`], then exposes the
//! host boundary: `think`, `learn`, and the store handle.

use std::sync::Arc;

use crate::config::ThinkConfig;
use crate::engine::{build_engine, EngineParts, ThinkingEngine, ThoughtResult};
use crate::eval::MultiCriteriaEvaluator;
use crate::explore::SoftmaxSampler;
use crate::generate::{ExtractiveGenerator, Generator};
use crate::knowledge::{KnowledgeStore, Result, Statement};
use crate::learn::Learner;
use crate::ltm::LongTermMemory;
use crate::retrieval::Retriever;
use crate::scoring::{Scorer, TokenOverlapScorer};
use crate::text::Tokenizer;

/// Fully wired thinking pipeline
pub struct Pipeline {
    store: Arc<KnowledgeStore>,
    ltm: Option<Arc<LongTermMemory>>,
    learner: Learner,
    engine: Arc<dyn ThinkingEngine>,
}

impl Pipeline {
    /// Build a pipeline with the built-in extractive generator
    pub fn new(cfg: ThinkConfig) -> Self {
        let tokenizer = Tokenizer::new(cfg.tokenizer.clone());
        Self::with_generator(cfg, Arc::new(ExtractiveGenerator::new(tokenizer)))
    }

    /// Build a pipeline around a custom generator backend
    pub fn with_generator(cfg: ThinkConfig, generator: Arc<dyn Generator>) -> Self {
        let cfg = cfg.normalized();
        let tokenizer = Tokenizer::new(cfg.tokenizer.clone());
        let scorer: Arc<dyn Scorer> = Arc::new(TokenOverlapScorer::new(tokenizer.clone()));

        let store = Arc::new(KnowledgeStore::new(cfg.store.clone(), tokenizer.clone()));
        let ltm = cfg
            .ltm
            .enabled
            .then(|| Arc::new(LongTermMemory::new(cfg.ltm.clone(), Arc::clone(&scorer))));
        let retriever = Arc::new(Retriever::new(
            Arc::clone(&scorer),
            Arc::new(SoftmaxSampler::new(cfg.explore.clone())),
            tokenizer.clone(),
            cfg.retriever.clone(),
        ));
        let evaluator = Arc::new(MultiCriteriaEvaluator::new(
            cfg.evaluator.clone(),
            tokenizer.clone(),
            Arc::clone(&scorer),
        ));
        let learner = Learner::new(cfg.learner.clone(), tokenizer);

        let engine = build_engine(cfg.engine.clone(), cfg.beam.clone(), EngineParts {
            store: Arc::clone(&store),
            retriever,
            evaluator,
            generator,
            ltm: ltm.clone(),
        });

        Self {
            store,
            ltm,
            learner,
            engine,
        }
    }

    /// Produce a grounded answer for one user utterance
    pub fn think(&self, user_text: &str, seed: u64) -> ThoughtResult {
        self.engine.think(user_text, seed)
    }

    /// Learn durable statements from text into the store
    pub fn learn(&self, text: &str, tag: &str, context: Option<&str>) -> Result<Vec<Statement>> {
        self.learner.learn_from_text(&self.store, text, tag, context)
    }

    /// The process-wide knowledge store
    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// The long-term memory, when enabled
    pub fn ltm(&self) -> Option<&Arc<LongTermMemory>> {
        self.ltm.as_ref()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_wires_and_thinks() {
        let pipeline = Pipeline::new(ThinkConfig::default());
        pipeline
            .store()
            .upsert(Statement::new("a", "the quick brown fox jumps over the lazy dog"))
            .unwrap();
        let result = pipeline.think("quick brown fox", 1);
        assert!(!result.answer.is_empty());
    }

    #[test]
    fn test_pipeline_learn_feeds_think() {
        let pipeline = Pipeline::new(ThinkConfig::default());
        let learned = pipeline
            .learn("Brown foxes hunt with quick reflexes at dusk.", "doc", None)
            .unwrap();
        assert!(!learned.is_empty());
        let result = pipeline.think("how do foxes hunt", 1);
        assert!(!result.answer.is_empty());
    }

    #[test]
    fn test_ltm_disabled_by_config() {
        let cfg = ThinkConfig {
            ltm: crate::ltm::LtmConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let pipeline = Pipeline::new(cfg);
        assert!(pipeline.ltm().is_none());
    }
}
