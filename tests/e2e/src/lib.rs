//! Shared harness for the end-to-end suites
//!
//! Builders for seeded pipelines and stores so the scenario tests stay
//! focused on behavior rather than setup.

use ruminate_core::{Pipeline, Statement, ThinkConfig};

/// A small fox-and-garden corpus used across suites
pub const CORPUS: [(&str, &str); 5] = [
    ("fox-1", "The quick brown fox jumps over the lazy dog."),
    ("fox-2", "Brown foxes hunt with quick reflexes at dusk."),
    ("dog-1", "The lazy dog sleeps through the warm afternoon."),
    ("garden-1", "Gardens need regular watering through the summer months."),
    ("garden-2", "Summer heat dries garden soil within days."),
];

/// Pipeline over the default config with the shared corpus loaded
pub fn corpus_pipeline() -> Pipeline {
    pipeline_with(ThinkConfig::default())
}

/// Pipeline over a custom config with the shared corpus loaded
pub fn pipeline_with(cfg: ThinkConfig) -> Pipeline {
    let pipeline = Pipeline::new(cfg);
    for (id, text) in CORPUS {
        pipeline
            .store()
            .upsert(Statement::new(id, text))
            .expect("corpus statement is valid");
    }
    pipeline
}

/// Pipeline with an empty store
pub fn empty_pipeline() -> Pipeline {
    Pipeline::new(ThinkConfig::default())
}
