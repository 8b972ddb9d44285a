//! # Ruminate Core
//!
//! Deterministic retrieval-augmented thinking engine. One user utterance
//! plus an in-memory corpus of weighted statements becomes a grounded
//! answer through a closed loop of retrieve -> refine -> draft -> evaluate
//! -> self-correct:
//!
//! - **Knowledge store**: inverted-index BM25 search with MMR
//!   diversification over validated, weighted statements
//! - **Retriever**: multi-iteration RAG with query refinement, decayed
//!   aggregation and dominance-based early stopping
//! - **Exploration**: Gumbel-argmax selection with Jaccard diversity,
//!   seeded purely from `(seed, stable key)` - bit-identical reruns
//! - **Evaluator**: multi-signal draft scoring (groundedness, coverage,
//!   structure, novelty, repetition, contradiction risk, coherence/entropy)
//! - **Engines**: iterative refinement and beam search, terminating on
//!   target score or patience
//! - **Learning & memory**: durable statement extraction with
//!   reinforcement, and a bounded long-term memory of grounded evidence
//!
//! Everything is lexical and deterministic: no network, no disk, no RNG.
//!
//! ## Quick Start
//!
//! ```rust
//! use ruminate_core::prelude::*;
//!
//! let pipeline = Pipeline::new(ThinkConfig::default());
//! pipeline
//!     .store()
//!     .upsert(Statement::new("fox", "The quick brown fox jumps over the lazy dog."))
//!     .unwrap();
//!
//! let result = pipeline.think("what does the fox do", 42);
//! assert!(!result.answer.is_empty());
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod engine;
pub mod eval;
pub mod explore;
pub mod generate;
pub mod knowledge;
pub mod learn;
pub mod ltm;
pub mod pipeline;
pub mod retrieval;
pub mod scoring;
pub mod text;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::ThinkConfig;
pub use engine::{
    build_engine, BeamConfig, BeamEngine, Candidate, DiversityLevel, EngineConfig, EngineParts,
    EvalPool, HintBuilder, Intent, IterativeEngine, Orchestrator, Phase, ThinkingEngine,
    ThoughtResult, ThoughtState, parse_hint,
};
pub use eval::{Evaluation, EvaluatorConfig, MultiCriteriaEvaluator};
pub use explore::{
    mix64, stable_hash64, unit_from_hash, ExplorationStrategy, ExploreConfig, SoftmaxSampler,
};
pub use generate::{ExtractiveGenerator, Generator};
pub use knowledge::{
    current_millis, KnowledgeError, KnowledgeStore, Query, RetrievalReport, RetrievalStep,
    ScoredStatement, Statement, StoreConfig, StoreStats,
};
pub use learn::{Learner, LearnerConfig};
pub use ltm::{LongTermMemory, LtmConfig};
pub use pipeline::Pipeline;
pub use retrieval::{IterationTrace, Retriever, RetrieverConfig, RetrieverTrace};
pub use scoring::{ScoreError, Scorer, TokenOverlapScorer};
pub use text::{sentences, split_clauses, Tokenizer, TokenizerConfig};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Evaluation, Generator, Intent, KnowledgeStore, Learner, LongTermMemory, Pipeline, Query,
        Retriever, ScoredStatement, Statement, ThinkConfig, ThinkingEngine, ThoughtResult,
        ThoughtState, Tokenizer,
    };
}
