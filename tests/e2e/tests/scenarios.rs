//! Core behavioral scenarios, end to end

use std::sync::Arc;

use ruminate_core::{
    EngineConfig, Generator, KnowledgeStore, Pipeline, Retriever, RetrieverConfig,
    SoftmaxSampler, Statement, ThinkConfig, ThoughtState, TokenOverlapScorer, Tokenizer,
};
use ruminate_e2e_tests::{corpus_pipeline, empty_pipeline};

/// Empty store: the engine must still answer, ungrounded
#[test]
fn scenario_empty_store_answers_without_grounding() {
    let pipeline = empty_pipeline();
    let result = pipeline.think("hello world", 1);

    assert!(!result.answer.trim().is_empty());
    assert_eq!(result.evaluation.groundedness, 0.0);
    assert!(result.iterations >= 1);
}

/// Exact match: search finds the statement, retrieval can stop early
#[test]
fn scenario_exact_match_search_and_early_stop() {
    let store = KnowledgeStore::default();
    let mut st = Statement::new("a", "the quick brown fox");
    st.weight = 1.0;
    st.confidence = 1.0;
    store.upsert(st).unwrap();

    let query = store.build_query_from_prompt("quick brown");
    let hits = store.search(&query);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].statement.id, "a");
    assert!(hits[0].score > 0.0);

    let scorer = Arc::new(TokenOverlapScorer::default());
    let retriever = Retriever::new(
        scorer,
        Arc::new(SoftmaxSampler::default()),
        Tokenizer::default(),
        RetrieverConfig {
            early_stop_confidence: 0.5,
            iterations: 4,
            ..Default::default()
        },
    );
    let (selected, trace) = retriever.retrieve_trace(&store, "quick brown", 2, 1);
    assert_eq!(selected.len(), 1);
    assert!(trace.iterations.last().unwrap().early_stop);
}

/// MMR diversity: near-duplicates do not crowd out distinct evidence
#[test]
fn scenario_mmr_prefers_diverse_evidence() {
    let store = KnowledgeStore::default();
    for (id, text) in [
        ("a", "alpha beta gamma"),
        ("b", "alpha beta gamma"),
        ("c", "delta epsilon zeta alpha"),
    ] {
        store.upsert(Statement::new(id, text)).unwrap();
    }

    let query = store.build_query_from_prompt("alpha");
    let ranked = store.search(&query);
    let picked = store.mmr_select(&ranked, 2, 0.5);

    assert_eq!(picked.len(), 2);
    let ids: Vec<&str> = picked.iter().map(|s| s.statement.id.as_str()).collect();
    assert!(ids.contains(&"c"), "diverse statement missing from {ids:?}");
    assert!(
        !(ids.contains(&"a") && ids.contains(&"b")),
        "both near-duplicates selected: {ids:?}"
    );
}

/// Learning reinforcement: the same sentence learned twice through one
/// pipeline keeps its id and strengthens its weight
#[test]
fn scenario_learning_reinforcement() {
    let pipeline = Pipeline::new(ThinkConfig::default());
    let sentence = "Systems age like fine wine.";

    let first = pipeline.learn(sentence, "doc", None).unwrap();
    assert_eq!(first.len(), 1);
    let id = first[0].id.clone();
    assert!(id.starts_with("learn:doc:"));
    let w1 = first[0].weight;

    let second = pipeline.learn(sentence, "doc", None).unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, id, "reinforcement must keep the id");
    assert!(second[0].weight > w1, "weight must strictly increase");
    assert!(second[0].weight <= 5.0);

    // the reinforced weight is what the store now serves
    assert_eq!(pipeline.store().get(&id).unwrap().weight, second[0].weight);
}

/// Retriever cache determinism: identical requests, identical lists
#[test]
fn scenario_retrieve_twice_identical() {
    let pipeline = corpus_pipeline();
    let store = pipeline.store();
    let retriever = Retriever::new(
        Arc::new(TokenOverlapScorer::default()),
        Arc::new(SoftmaxSampler::default()),
        Tokenizer::default(),
        RetrieverConfig::default(),
    );

    let first: Vec<String> = retriever
        .retrieve(store, "quick brown fox", 3, 77)
        .into_iter()
        .map(|s| s.id)
        .collect();
    let second: Vec<String> = retriever
        .retrieve(store, "quick brown fox", 3, 77)
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(first, second);
}

/// Patience: a generator that never improves terminates the loop early
#[test]
fn scenario_patience_terminates_stagnant_engine() {
    struct ConstantGenerator;

    impl Generator for ConstantGenerator {
        fn generate(&self, _: &str, _: &[Statement], _: &ThoughtState) -> String {
            "1) A fixed draft that never changes between iterations at all.\n\
             2) The evaluator sees the same signals every single time.\n\
             3) Stagnation should therefore exhaust the patience budget.\n"
                .to_string()
        }
    }

    let cfg = ThinkConfig {
        engine: EngineConfig {
            iterations: 8,
            patience: 1,
            target_score: 99.0,
            refine_rounds: 0, // keep the context fixed so stagnation is exact
            ..Default::default()
        },
        ..Default::default()
    };
    let pipeline = Pipeline::with_generator(cfg, Arc::new(ConstantGenerator));
    for (id, text) in ruminate_e2e_tests::CORPUS {
        pipeline.store().upsert(Statement::new(id, text)).unwrap();
    }

    let result = pipeline.think("quick fox", 3);
    assert!(
        result.iterations <= 3,
        "expected early termination, ran {} iterations",
        result.iterations
    );
    assert!(result
        .trace
        .iter()
        .any(|line| line.contains("terminate=patience")));
}
