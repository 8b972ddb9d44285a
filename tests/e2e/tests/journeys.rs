//! Complete user workflows: learn, think, remember

use ruminate_core::{
    EngineConfig, LtmConfig, Orchestrator, Pipeline, Statement, ThinkConfig,
};
use ruminate_e2e_tests::{corpus_pipeline, pipeline_with};

/// Learn from raw text, then answer a question grounded in what was learned
#[test]
fn journey_learn_then_think() {
    let pipeline = Pipeline::new(ThinkConfig::default());

    let learned = pipeline
        .learn(
            "Brown foxes hunt with quick reflexes at dusk. \
             The quick brown fox jumps over the lazy dog when startled.",
            "doc",
            None,
        )
        .unwrap();
    assert!(learned.len() >= 2, "expected both sentences learned");

    let result = pipeline.think("how do brown foxes hunt", 5);
    assert!(!result.answer.is_empty());
    assert!(
        result.evaluation.groundedness > 0.0,
        "answer should be grounded in learned statements"
    );
}

/// A grounded session leaves a trace in long-term memory; later requests
/// recall it
#[test]
fn journey_ltm_write_and_recall() {
    let pipeline = pipeline_with(ThinkConfig {
        ltm: LtmConfig {
            write_min_groundedness: 0.05,
            ..Default::default()
        },
        ..Default::default()
    });

    let first = pipeline.think("tell me about the quick brown fox", 11);
    let ltm = pipeline.ltm().expect("ltm enabled by default");

    if first.evaluation.groundedness >= 0.05 {
        assert!(!ltm.is_empty(), "grounded answer should be remembered");
        let recalled = ltm.recall("quick brown fox", 4);
        assert!(!recalled.is_empty());
        assert!(recalled.iter().all(|st| st.kind == "episode"));
    }
}

/// The beam engine completes the same journey as the iterative one
#[test]
fn journey_beam_orchestrator() {
    let pipeline = pipeline_with(ThinkConfig {
        engine: EngineConfig {
            orchestrator: Orchestrator::Beam,
            ..Default::default()
        },
        ..Default::default()
    });

    let result = pipeline.think("quick brown fox", 9);
    assert!(!result.answer.is_empty());
    assert!(result.iterations >= 1);
}

/// Snapshot round-trip: JSONL out, JSONL in, identical ids and search
#[test]
fn journey_snapshot_round_trip() {
    let pipeline = corpus_pipeline();
    let store = pipeline.store();

    let lines: Vec<String> = store
        .snapshot_sorted()
        .iter()
        .map(|st| st.to_json_line().unwrap())
        .collect();

    let restored = Pipeline::new(ThinkConfig::default());
    for line in &lines {
        let st = Statement::from_json_line(line).unwrap();
        restored.store().upsert(st).unwrap();
    }

    let original_ids: Vec<String> = store.snapshot_sorted().into_iter().map(|s| s.id).collect();
    let restored_ids: Vec<String> = restored
        .store()
        .snapshot_sorted()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(original_ids, restored_ids);

    let query = store.build_query_from_prompt("quick brown fox garden");
    let a: Vec<(String, bool)> = store
        .search_at(&query, 10_000_000_000_000)
        .into_iter()
        .map(|s| (s.statement.id, s.score > 0.0))
        .collect();
    let b: Vec<(String, bool)> = restored
        .store()
        .search_at(&query, 10_000_000_000_000)
        .into_iter()
        .map(|s| (s.statement.id, s.score > 0.0))
        .collect();
    assert_eq!(a, b, "restored store must rank identically");
}

/// Statements past their expiry vanish from retrieval but stay addressable
#[test]
fn journey_expiry_filtering() {
    let pipeline = Pipeline::new(ThinkConfig::default());
    let store = pipeline.store();

    let mut fresh = Statement::new("fresh", "garden soil stays moist in spring");
    fresh.expires_at = 0;
    store.upsert(fresh).unwrap();

    let mut stale = Statement::new("stale", "garden soil numbers from last year");
    stale.expires_at = 1_000;
    store.upsert(stale).unwrap();

    let query = store.build_query_from_prompt("garden soil");
    let hits = store.search_at(&query, 2_000);
    let ids: Vec<&str> = hits.iter().map(|s| s.statement.id.as_str()).collect();
    assert!(ids.contains(&"fresh"));
    assert!(!ids.contains(&"stale"), "expired statement retrieved");

    // still addressable directly until explicitly removed
    assert!(store.get("stale").is_some());
}
