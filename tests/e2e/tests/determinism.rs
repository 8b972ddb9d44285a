//! Bit-identical reruns: the whole pipeline is a pure function of
//! (store contents, user text, seed, config)

use ruminate_core::{EngineConfig, Orchestrator, ThinkConfig};
use ruminate_e2e_tests::pipeline_with;

fn run(cfg: ThinkConfig, prompt: &str, seed: u64) -> (String, f64, u32, Vec<String>) {
    let pipeline = pipeline_with(cfg);
    let result = pipeline.think(prompt, seed);
    (
        result.answer,
        result.evaluation.effective_score,
        result.iterations,
        result.trace,
    )
}

#[test]
fn identical_runs_identical_results() {
    let a = run(ThinkConfig::default(), "tell me about the quick brown fox", 42);
    let b = run(ThinkConfig::default(), "tell me about the quick brown fox", 42);
    assert_eq!(a, b);
}

#[test]
fn identical_beam_runs_identical_results() {
    let cfg = || ThinkConfig {
        engine: EngineConfig {
            orchestrator: Orchestrator::Beam,
            ..Default::default()
        },
        ..Default::default()
    };
    let a = run(cfg(), "summarize the garden evidence", 7);
    let b = run(cfg(), "summarize the garden evidence", 7);
    assert_eq!(a, b);
}

#[test]
fn different_seeds_may_differ_but_stay_valid() {
    for seed in [1u64, 2, 3, 99, 12345] {
        let (answer, _, iterations, _) =
            run(ThinkConfig::default(), "quick brown fox", seed);
        assert!(!answer.is_empty(), "seed {seed} produced an empty answer");
        assert!(iterations >= 1);
    }
}

#[test]
fn parallel_scoring_does_not_change_results() {
    let sequential = ThinkConfig::default();
    let mut parallel = ThinkConfig::default();
    parallel.retriever.parallel = true;
    parallel.retriever.parallelism = 4;

    let a = run(sequential, "garden watering in summer", 17);
    let b = run(parallel, "garden watering in summer", 17);
    assert_eq!(a, b, "parallel scoring must be order-preserving");
}
