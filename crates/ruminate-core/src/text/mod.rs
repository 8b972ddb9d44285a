//! Text analysis - deterministic tokenization and sentence splitting
//!
//! Everything downstream (indexing, scoring, evaluation, learning) consumes
//! the token stream produced here, so the tokenizer is the determinism
//! anchor of the whole pipeline: one pass, no locale surprises, no RNG.

mod sentences;
mod tokenizer;

pub use sentences::{sentences, split_clauses};
pub use tokenizer::{Tokenizer, TokenizerConfig};
