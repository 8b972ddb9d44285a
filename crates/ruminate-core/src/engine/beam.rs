//! Beam thinking engine
//!
//! Keeps a beam of the best evaluated drafts across iterations. Every
//! iteration expands each beam entry into children, penalizes siblings that
//! are too similar to each other, prunes back to the beam width, and applies
//! the same target/patience/budget termination as the iterative engine. An
//! optional final verify pass re-scores the surviving beam with the strict
//! evaluator thresholds.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::explore::mix64;
use crate::knowledge::Statement;

use super::state::{Candidate, ThoughtResult, ThoughtState};
use super::{BeamConfig, EngineConfig, EngineParts, EvalPool, HintBuilder, Intent, ThinkingEngine};

/// Beam-search engine over candidate drafts
pub struct BeamEngine {
    cfg: EngineConfig,
    beam_cfg: BeamConfig,
    parts: EngineParts,
    pool: EvalPool,
}

impl BeamEngine {
    /// Create an engine; spawns its evaluator pool immediately
    pub fn new(cfg: EngineConfig, beam_cfg: BeamConfig, parts: EngineParts) -> Self {
        let cfg = cfg.normalized();
        let pool = EvalPool::new(
            cfg.pool_parallelism,
            cfg.pool_queue,
            Duration::from_millis(cfg.pool_shutdown_ms),
        );
        Self {
            cfg,
            beam_cfg: beam_cfg.normalized(),
            parts,
            pool,
        }
    }

    /// Current beam configuration
    pub fn beam_config(&self) -> &BeamConfig {
        &self.beam_cfg
    }
}

impl ThinkingEngine for BeamEngine {
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
        let mut beam: Vec<Candidate> = Vec::new();
        let mut iterations_run = 0u32;

        for iteration in 0..self.cfg.iterations {
            iterations_run = iteration + 1;
            state.iteration = iteration;
            state.seed = if iteration == 0 {
                seed
            } else {
                mix64(seed, u64::from(iteration))
            };

            let retrieved = self.parts.retriever.retrieve(
                &self.parts.store,
                user_text,
                self.cfg.retrieve_k,
                state.seed,
            );
            let context = merge(retrieved, &state.recalled, self.cfg.retrieve_k);

            state.generation_hint = HintBuilder::new()
                .fragment(&state.last_critique)
                .int("beam", self.beam_cfg.beam_width as i64)
                .int("drafts", self.beam_cfg.drafts_per_beam as i64)
                .uint("seed", state.seed)
                .int("intent", i64::from(state.intent.code()))
                .uint("iter", u64::from(iteration))
                .render();

            // expand: each beam slot (or one virtual root) yields children
            let parents = beam.len().max(1);
            let total = (parents * self.beam_cfg.drafts_per_beam)
                .min(self.beam_cfg.max_drafts_per_iter);
            let drafts =
                self.parts
                    .generator
                    .generate_n(user_text, &context, &state, total);

            let evaluations = {
                let evaluator = Arc::clone(&self.parts.evaluator);
                let user_text: Arc<str> = Arc::from(user_text);
                let context = Arc::new(context);
                let drafts = Arc::new(drafts.clone());
                self.pool.map_ordered(drafts.len(), move |i| {
                    evaluator.evaluate(&user_text, &drafts[i], &context)
                })
            };

            let mut children: Vec<Candidate> = drafts
                .into_iter()
                .zip(evaluations)
                .enumerate()
                .map(|(i, (draft, evaluation))| {
                    Candidate::new(
                        user_text,
                        draft,
                        iteration,
                        state.seed,
                        i as u32,
                        evaluation,
                    )
                })
                .collect();
            self.penalize_similar_siblings(&mut children);

            // merge children into the beam, prune to width
            beam.extend(children);
            beam.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.iteration.cmp(&b.iteration))
                    .then_with(|| a.draft_index.cmp(&b.draft_index))
            });
            let mut seen_texts: BTreeSet<String> = BTreeSet::new();
            beam.retain(|c| seen_texts.insert(c.text.clone()));
            beam.truncate(self.beam_cfg.beam_width);

            let Some(head) = beam.first().cloned() else {
                trace.push(format!("iter={iteration} no-drafts"));
                continue;
            };
            state.last_critique = head.critique.clone();

            let improved = state
                .best
                .as_ref()
                .map(|b| head.score > b.score)
                .unwrap_or(true);
            if improved {
                state.promote(head);
            } else {
                state.stagnation += 1;
            }

            let best_score = state.best.as_ref().map(|b| b.score).unwrap_or(f64::MIN);
            trace.push(format!(
                "iter={iteration} best={best_score:.3} stag={} beam={}",
                state.stagnation,
                beam.len(),
            ));

            if best_score >= self.cfg.target_score {
                trace.push(format!("terminate=target iter={iteration}"));
                break;
            }
            if state.stagnation > self.cfg.patience {
                trace.push(format!("terminate=patience iter={iteration}"));
                break;
            }
        }

        if self.beam_cfg.verify_pass_enabled {
            if let Some(verified) = self.verify_pass(user_text, &beam) {
                trace.push(format!("verify-pass best={:.3}", verified.score));
                state.best_evaluation = Some(verified.evaluation.clone());
                state.best = Some(verified);
            }
        }

        let Some(best) = state.best else {
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
                iterations: iterations_run,
                trace,
            };
        };

        if let Some(ltm) = &self.parts.ltm {
            if ltm.write(&best.text, best.evaluation.groundedness, "think") {
                trace.push(format!("ltm-write g={:.2}", best.evaluation.groundedness));
            }
        }

        ThoughtResult {
            answer: best.text,
            evaluation: best.evaluation,
            iterations: iterations_run,
            trace,
        }
    }
}

impl BeamEngine {
    /// Penalize children whose Jaccard distance to an earlier sibling falls
    /// below the configured minimum
    fn penalize_similar_siblings(&self, children: &mut [Candidate]) {
        if self.beam_cfg.diversity_penalty <= 0.0 {
            return;
        }
        let tokenizer = self.parts.store.tokenizer();
        let token_sets: Vec<BTreeSet<String>> = children
            .iter()
            .map(|c| tokenizer.tokenize(&c.text).into_iter().collect())
            .collect();

        for i in 1..children.len() {
            let min_distance = token_sets[..i]
                .iter()
                .map(|earlier| 1.0 - jaccard(&token_sets[i], earlier))
                .fold(f64::INFINITY, f64::min);
            if min_distance < self.beam_cfg.min_diversity_jaccard {
                children[i].score -= self.beam_cfg.diversity_penalty;
                children[i].evaluation.effective_score -= self.beam_cfg.diversity_penalty;
            }
        }
    }

    /// Re-score the surviving beam with strict thresholds; returns the best
    /// strictly-valid candidate, if any
    fn verify_pass(&self, user_text: &str, beam: &[Candidate]) -> Option<Candidate> {
        let strict = self.parts.evaluator.strict_variant();
        // verification grounds against a fresh, fixed-seed retrieval
        let context = self.parts.retriever.retrieve(
            &self.parts.store,
            user_text,
            self.cfg.retrieve_k,
            mix64(0x7e11_f1ed, 0),
        );
        let mut best: Option<Candidate> = None;
        for candidate in beam {
            let evaluation = strict.evaluate(user_text, &candidate.text, &context);
            if !evaluation.valid {
                continue;
            }
            let verified = Candidate::new(
                &candidate.query,
                candidate.text.clone(),
                candidate.iteration,
                candidate.seed,
                candidate.draft_index,
                evaluation,
            );
            let better = best
                .as_ref()
                .map(|b| verified.score > b.score)
                .unwrap_or(true);
            if better {
                best = Some(verified);
            }
        }
        best
    }
}

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

/// Retrieved evidence first, then LTM recall, deduped by id, capped to k
fn merge(retrieved: Vec<Statement>, recalled: &[Statement], k: usize) -> Vec<Statement> {
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
