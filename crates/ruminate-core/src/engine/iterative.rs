//! Iterative thinking engine
//!
//! State machine per request:
//! INIT -> RETRIEVE -> DRAFT -> EVALUATE -> UPDATE -> (REFINE | TERMINATE).
//! Terminates on target score, exhausted patience, or the iteration cap;
//! on termination a sufficiently grounded best draft is compacted into
//! long-term memory.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::explore::mix64;
use crate::knowledge::Statement;

use super::state::{Candidate, DiversityLevel, Phase, ThoughtResult, ThoughtState};
use super::{EngineConfig, EngineParts, EvalPool, HintBuilder, Intent, ThinkingEngine};

/// Single-track iterative refinement engine
pub struct IterativeEngine {
    cfg: EngineConfig,
    parts: EngineParts,
    pool: EvalPool,
}

impl IterativeEngine {
    /// Create an engine; spawns its evaluator pool immediately
    pub fn new(cfg: EngineConfig, parts: EngineParts) -> Self {
        let cfg = cfg.normalized();
        let pool = EvalPool::new(
            cfg.pool_parallelism,
            cfg.pool_queue,
            Duration::from_millis(cfg.pool_shutdown_ms),
        );
        Self { cfg, parts, pool }
    }

    /// Current configuration
    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }
}

impl ThinkingEngine for IterativeEngine {
    fn think(&self, user_text: &str, seed: u64) -> ThoughtResult {
        let mut state = ThoughtState {
            seed,
            intent: Intent::detect(user_text),
            ..Default::default()
        };
        if let Some(ltm) = &self.parts.ltm {
            state.recalled = Arc::new(ltm.recall(user_text, ltm.config().recall_k));
        }

        let mut trace: Vec<String> = Vec::new();
        let mut query = user_text.to_string();
        let mut iterations_run = 0u32;

        for iteration in 0..self.cfg.iterations {
            iterations_run = iteration + 1;
            state.iteration = iteration;
            state.seed = if iteration == 0 {
                seed
            } else {
                mix64(seed, u64::from(iteration))
            };
            state.phase = phase_for(iteration, self.cfg.iterations, state.stagnation);
            state.diversity = diversity_for(state.phase);

            let retrieved = self.parts.retriever.retrieve(
                &self.parts.store,
                &query,
                self.cfg.retrieve_k,
                state.seed,
            );
            let context = merge_context(retrieved, &state.recalled, self.cfg.retrieve_k);

            state.generation_hint = self.hint(&state);
            let drafts = self.parts.generator.generate_n(
                user_text,
                &context,
                &state,
                self.cfg.drafts_per_iteration,
            );
            if drafts.iter().all(|d| d.trim().is_empty()) {
                tracing::warn!(iteration, "generator produced no usable drafts");
            }

            let evaluations = {
                let evaluator = Arc::clone(&self.parts.evaluator);
                let user_text: Arc<str> = Arc::from(user_text);
                let context = Arc::new(context.clone());
                let drafts = Arc::new(drafts.clone());
                self.pool.map_ordered(drafts.len(), move |i| {
                    evaluator.evaluate(&user_text, &drafts[i], &context)
                })
            };

            // best of iteration: highest effective score, first index on ties
            let mut best_of_iter: Option<Candidate> = None;
            for (i, (draft, evaluation)) in
                drafts.into_iter().zip(evaluations).enumerate()
            {
                let candidate = Candidate::new(
                    &query,
                    draft,
                    iteration,
                    state.seed,
                    i as u32,
                    evaluation,
                );
                let better = best_of_iter
                    .as_ref()
                    .map(|b| candidate.score > b.score)
                    .unwrap_or(true);
                if better {
                    best_of_iter = Some(candidate);
                }
            }
            let Some(best_of_iter) = best_of_iter else {
                trace.push(format!("iter={iteration} no-drafts"));
                continue;
            };

            state.last_evaluation = Some(best_of_iter.evaluation.clone());
            state.last_candidate = Some(best_of_iter.clone());

            let improved = state
                .best
                .as_ref()
                .map(|b| best_of_iter.score > b.score)
                .unwrap_or(true);
            if improved {
                state.promote(best_of_iter);
            } else {
                state.stagnation += 1;
            }

            let best_score = state.best.as_ref().map(|b| b.score).unwrap_or(f64::MIN);
            trace.push(format!(
                "iter={iteration} best={best_score:.3} stag={} phase={}",
                state.stagnation,
                state.phase.code(),
            ));
            tracing::debug!(
                iteration,
                best_score,
                stagnation = state.stagnation,
                "iteration complete"
            );

            if best_score >= self.cfg.target_score {
                trace.push(format!("terminate=target iter={iteration}"));
                break;
            }
            if state.stagnation > self.cfg.patience {
                trace.push(format!("terminate=patience iter={iteration}"));
                break;
            }
            if iteration + 1 >= self.cfg.iterations {
                trace.push(format!("terminate=budget iter={iteration}"));
                break;
            }

            query = self.refine(user_text, &state, iteration);
        }

        self.finish(state, iterations_run, trace)
    }
}

impl IterativeEngine {
    /// Numeric hint for the next draft batch
    fn hint(&self, state: &ThoughtState) -> String {
        let mut builder = HintBuilder::new();
        if !state.last_critique.is_empty() {
            builder = builder.fragment(&state.last_critique);
        }
        builder
            .int("phase", i64::from(state.phase.code()))
            .int("div", i64::from(state.diversity.code()))
            .uint("seed", state.seed)
            .int("drafts", self.cfg.drafts_per_iteration as i64)
            .int("intent", i64::from(state.intent.code()))
            .uint("iter", u64::from(state.iteration))
            .render()
    }

    /// Replace the retriever query with user text plus top evidence terms
    fn refine(&self, user_text: &str, state: &ThoughtState, iteration: u32) -> String {
        if self.cfg.refine_rounds == 0 {
            return user_text.to_string();
        }

        // each round takes a fresh look at the store under the refined query
        let mut query = user_text.to_string();
        for round in 0..self.cfg.refine_rounds {
            let evidence = self.parts.retriever.retrieve(
                &self.parts.store,
                &query,
                self.cfg.retrieve_k,
                mix64(state.seed, 0x5eed_0000 + u64::from(round)),
            );
            query = self.refined_query(user_text, &evidence);
        }
        tracing::debug!(iteration, query = %query, "refined retrieval query");
        query
    }

    /// User text extended with the highest-IDF evidence terms within budget
    fn refined_query(&self, user_text: &str, evidence: &[Statement]) -> String {
        let tokenizer = self.parts.store.tokenizer();
        let user_tokens: BTreeSet<String> = tokenizer.tokenize(user_text).into_iter().collect();

        let mut candidates: BTreeSet<String> = BTreeSet::new();
        for st in evidence {
            for token in tokenizer.tokenize(&st.text) {
                if !user_tokens.contains(&token) {
                    candidates.insert(token);
                }
            }
        }

        let mut ranked: Vec<(String, f64)> = candidates
            .into_iter()
            .map(|t| {
                let idf = self.parts.store.idf(&t);
                (t, idf)
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let budget = self
            .cfg
            .refine_query_budget
            .saturating_sub(user_tokens.len());
        let mut query = user_text.to_string();
        for (term, _) in ranked.into_iter().take(budget) {
            query.push(' ');
            query.push_str(&term);
        }
        query
    }

    /// Assemble the result and run the terminate-time LTM write
    fn finish(
        &self,
        state: ThoughtState,
        iterations: u32,
        mut trace: Vec<String>,
    ) -> ThoughtResult {
        let Some(best) = state.best else {
            // catastrophic emptiness: report the failure, never panic
            trace.push("terminate=empty".to_string());
            return ThoughtResult {
                answer: String::new(),
                evaluation: crate::eval::Evaluation {
                    score: -1.0,
                    effective_score: -1.0,
                    valid: false,
                    validation_notes: vec!["no candidates produced".to_string()],
                    ..Default::default()
                },
                iterations,
                trace,
            };
        };

        if let Some(ltm) = &self.parts.ltm {
            let groundedness = best.evaluation.groundedness;
            if ltm.write(&best.text, groundedness, "think") {
                trace.push(format!("ltm-write g={groundedness:.2}"));
            }
        }

        ThoughtResult {
            answer: best.text,
            evaluation: best.evaluation,
            iterations,
            trace,
        }
    }
}

/// Phase schedule: explore first, exploit the middle, verify last,
/// repair whenever the best score is stuck
fn phase_for(iteration: u32, max_iterations: u32, stagnation: u32) -> Phase {
    if stagnation > 0 {
        Phase::Repair
    } else if iteration == 0 {
        Phase::Explore
    } else if iteration + 1 >= max_iterations {
        Phase::Verify
    } else {
        Phase::Exploit
    }
}

fn diversity_for(phase: Phase) -> DiversityLevel {
    match phase {
        Phase::Explore => DiversityLevel::Med,
        Phase::Exploit | Phase::Verify => DiversityLevel::Low,
        Phase::Repair => DiversityLevel::High,
    }
}

/// Retrieved evidence first, then LTM recall, deduped by id, capped to k
fn merge_context(
    retrieved: Vec<Statement>,
    recalled: &[Statement],
    k: usize,
) -> Vec<Statement> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut out = Vec::new();
    for st in retrieved.into_iter().chain(recalled.iter().cloned()) {
        if out.len() >= k {
            break;
        }
        if seen.insert(st.id.clone()) {
            out.push(st);
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{EvaluatorConfig, MultiCriteriaEvaluator};
    use crate::explore::SoftmaxSampler;
    use crate::generate::{ExtractiveGenerator, Generator};
    use crate::knowledge::KnowledgeStore;
    use crate::ltm::{LongTermMemory, LtmConfig};
    use crate::retrieval::{Retriever, RetrieverConfig};
    use crate::scoring::TokenOverlapScorer;
    use crate::text::Tokenizer;

    fn parts(store: KnowledgeStore, generator: Arc<dyn Generator>) -> EngineParts {
        let scorer = Arc::new(TokenOverlapScorer::default());
        EngineParts {
            store: Arc::new(store),
            retriever: Arc::new(Retriever::new(
                scorer.clone(),
                Arc::new(SoftmaxSampler::default()),
                Tokenizer::default(),
                RetrieverConfig::default(),
            )),
            evaluator: Arc::new(MultiCriteriaEvaluator::new(
                EvaluatorConfig::default(),
                Tokenizer::default(),
                scorer.clone(),
            )),
            generator,
            ltm: Some(Arc::new(LongTermMemory::new(LtmConfig::default(), scorer))),
        }
    }

    fn seeded_store() -> KnowledgeStore {
        let store = KnowledgeStore::default();
        for (id, text) in [
            ("a", "The quick brown fox jumps over the lazy dog."),
            ("b", "Brown foxes hunt with quick reflexes at dusk."),
            ("c", "The lazy dog sleeps through the warm afternoon."),
            ("d", "Gardens need regular watering through summer."),
        ] {
            store
                .upsert(crate::knowledge::Statement::new(id, text))
                .unwrap();
        }
        store
    }

    /// Generator that always returns the same draft
    struct ConstantGenerator(String);

    impl Generator for ConstantGenerator {
        fn generate(&self, _: &str, _: &[Statement], _: &ThoughtState) -> String {
            self.0.clone()
        }
    }

    fn engine_with(cfg: EngineConfig, store: KnowledgeStore) -> IterativeEngine {
        IterativeEngine::new(
            cfg,
            parts(store, Arc::new(ExtractiveGenerator::default())),
        )
    }

    #[test]
    fn test_think_returns_nonempty_answer() {
        let engine = engine_with(EngineConfig::default(), seeded_store());
        let result = engine.think("tell me about the quick brown fox", 7);
        assert!(!result.answer.is_empty());
        assert!(result.iterations >= 1);
        assert!(!result.trace.is_empty());
    }

    #[test]
    fn test_think_on_empty_store_degrades() {
        let engine = engine_with(
            EngineConfig {
                iterations: 2,
                retrieve_k: 4,
                ..Default::default()
            },
            KnowledgeStore::default(),
        );
        let result = engine.think("hello world", 1);
        assert!(!result.answer.is_empty());
        assert_eq!(result.evaluation.groundedness, 0.0);
    }

    #[test]
    fn test_think_is_deterministic() {
        let a = engine_with(EngineConfig::default(), seeded_store())
            .think("quick brown fox", 11);
        let b = engine_with(EngineConfig::default(), seeded_store())
            .think("quick brown fox", 11);
        assert_eq!(a.answer, b.answer);
        assert_eq!(a.iterations, b.iterations);
        assert_eq!(a.evaluation.effective_score, b.evaluation.effective_score);
    }

    #[test]
    fn test_patience_terminates_constant_generator() {
        let constant = "1) A fixed draft that never changes its content at all.\n\
                        2) It repeats the same sections every single iteration.\n\
                        3) The engine should stop waiting for improvement.\n";
        let engine = IterativeEngine::new(
            EngineConfig {
                iterations: 8,
                patience: 1,
                target_score: 99.0, // unreachable
                refine_rounds: 0,   // fixed context keeps evaluations constant
                ..Default::default()
            },
            parts(
                seeded_store(),
                Arc::new(ConstantGenerator(constant.to_string())),
            ),
        );
        let result = engine.think("quick fox", 3);
        // iteration 0 sets the best; two stagnant iterations exhaust patience
        assert!(result.iterations <= 3);
        assert!(result
            .trace
            .iter()
            .any(|line| line.contains("terminate=patience")));
    }

    #[test]
    fn test_best_score_monotone_in_trace() {
        let engine = engine_with(
            EngineConfig {
                iterations: 4,
                target_score: 99.0,
                patience: 6,
                ..Default::default()
            },
            seeded_store(),
        );
        let result = engine.think("quick brown fox hunting", 5);
        let mut last = f64::MIN;
        for line in result.trace.iter().filter(|l| l.contains("best=")) {
            let value: f64 = line
                .split("best=")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.parse().ok())
                .expect("trace line carries best score");
            assert!(value >= last, "best score regressed in {line}");
            last = value;
        }
    }

    #[test]
    fn test_ltm_written_on_grounded_terminate() {
        let scorer = Arc::new(TokenOverlapScorer::default());
        let ltm = Arc::new(LongTermMemory::new(
            LtmConfig {
                write_min_groundedness: 0.05,
                ..Default::default()
            },
            scorer.clone(),
        ));
        let mut parts = parts(seeded_store(), Arc::new(ExtractiveGenerator::default()));
        parts.ltm = Some(Arc::clone(&ltm));
        let engine = IterativeEngine::new(EngineConfig::default(), parts);

        let result = engine.think("quick brown fox", 2);
        if result.evaluation.groundedness >= 0.05 {
            assert!(!ltm.is_empty(), "grounded result should be remembered");
        }
    }

    #[test]
    fn test_phase_schedule() {
        assert_eq!(phase_for(0, 4, 0), Phase::Explore);
        assert_eq!(phase_for(1, 4, 0), Phase::Exploit);
        assert_eq!(phase_for(3, 4, 0), Phase::Verify);
        assert_eq!(phase_for(2, 4, 2), Phase::Repair);
    }

    #[test]
    fn test_merge_context_dedups_and_caps() {
        let retrieved = vec![
            Statement::new("a", "one"),
            Statement::new("b", "two"),
        ];
        let recalled = vec![
            Statement::new("a", "one"),
            Statement::new("c", "three"),
        ];
        let merged = merge_context(retrieved, &recalled, 2);
        let ids: Vec<&str> = merged.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
