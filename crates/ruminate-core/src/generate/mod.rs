//! Generation contract and the built-in extractive backend
//!
//! The engine only depends on the [`Generator`] trait: deterministic text
//! for identical `(user_text, context, state)`. The crate ships
//! [`ExtractiveGenerator`], which stitches sectioned answers out of the
//! retrieved evidence with seed/draft-index conditioned variation - enough
//! to run the whole pipeline, its tests and demos without any model backend.

use crate::engine::{parse_hint, ThoughtState};
use crate::explore::mix64;
use crate::knowledge::Statement;
use crate::text::{sentences, Tokenizer};

// ============================================================================
// GENERATOR TRAIT
// ============================================================================

/// Deterministic draft producer
pub trait Generator: Send + Sync {
    /// Produce one draft for the user text over the given context
    ///
    /// Must be deterministic for identical inputs; `state.seed` and
    /// `state.draft_index` are the only sanctioned sources of variation.
    fn generate(&self, user_text: &str, context: &[Statement], state: &ThoughtState) -> String;

    /// Produce `n` drafts, one per draft index
    fn generate_n(
        &self,
        user_text: &str,
        context: &[Statement],
        state: &ThoughtState,
        n: usize,
    ) -> Vec<String> {
        (0..n)
            .map(|i| {
                let draft_state = state.copy_for_draft(i as u32);
                self.generate(user_text, context, &draft_state)
            })
            .collect()
    }
}

// ============================================================================
// EXTRACTIVE GENERATOR
// ============================================================================

/// Sections assembled per draft
const SECTIONS_PER_DRAFT: usize = 3;

/// Maximum characters lifted from one evidence sentence
const MAX_SECTION_CHARS: usize = 240;

/// Evidence-stitching generator
///
/// Context mode: numbered sections quoting evidence sentences, rotated by
/// `(seed, draft_index)` so sibling drafts differ, closed with focus bullets
/// carrying the query terms. No-context mode: a short sectioned notice that
/// names the topic without echoing the whole question.
#[derive(Debug, Clone, Default)]
pub struct ExtractiveGenerator {
    tokenizer: Tokenizer,
}

impl ExtractiveGenerator {
    /// Create a generator sharing the pipeline tokenizer
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self { tokenizer }
    }

    fn context_draft(&self, user_text: &str, context: &[Statement], state: &ThoughtState) -> String {
        // one candidate line per evidence sentence, in snapshot order
        let mut lines: Vec<String> = Vec::new();
        for st in context {
            for sentence in sentences(&st.text) {
                let trimmed: String = sentence.chars().take(MAX_SECTION_CHARS).collect();
                lines.push(trimmed);
            }
            if lines.len() >= SECTIONS_PER_DRAFT * 4 {
                break;
            }
        }
        if lines.is_empty() {
            return self.fallback_draft(user_text, state);
        }

        // seed picks the starting point, the draft index walks the rotation,
        // so sibling drafts always start from different evidence
        let base = (mix64(state.seed, 0xd4af7) % lines.len() as u64) as usize;
        let offset = (base + state.draft_index as usize) % lines.len();

        let mut out = String::new();
        let take = lines.len().min(SECTIONS_PER_DRAFT.max(3));
        for section in 0..take {
            let line = &lines[(offset + section) % lines.len()];
            out.push_str(&format!("{}) {}\n", section + 1, line));
        }
        // pad to three sections so short evidence still reads as an answer
        for section in take..SECTIONS_PER_DRAFT {
            out.push_str(&format!(
                "{}) The indexed evidence covers this only partially.\n",
                section + 1
            ));
        }

        let focus: Vec<String> = self
            .tokenizer
            .tokenize(user_text)
            .into_iter()
            .take(4)
            .collect();
        if !focus.is_empty() {
            out.push_str(&format!("- focus: {}\n", focus.join(" ")));
            out.push_str("- grounded in the statements above\n");
        }
        out
    }

    fn fallback_draft(&self, user_text: &str, state: &ThoughtState) -> String {
        let topic: Vec<String> = self
            .tokenizer
            .tokenize(user_text)
            .into_iter()
            .take(2)
            .collect();
        let topic = if topic.is_empty() {
            "this topic".to_string()
        } else {
            topic.join(" ")
        };

        // mild deterministic variation between sibling drafts
        let variant = (mix64(state.seed, 0xfa11) + u64::from(state.draft_index)) % 3;
        let opener = match variant {
            0 => "Nothing indexed speaks to",
            1 => "The knowledge store holds no evidence about",
            _ => "No grounded material exists yet for",
        };

        format!(
            "1) {opener} {topic}.\n\
             2) An answer here would be speculation rather than grounded recall.\n\
             3) Ingesting relevant statements first would let future passes ground a reply.\n\
             - add source material\n\
             - then ask again\n"
        )
    }
}

impl Generator for ExtractiveGenerator {
    fn generate(&self, user_text: &str, context: &[Statement], state: &ThoughtState) -> String {
        let hints = parse_hint(&state.generation_hint);
        if hints.get("noGen").copied().unwrap_or(0.0) >= 1.0 {
            return String::new();
        }

        if context.is_empty() {
            self.fallback_draft(user_text, state)
        } else {
            self.context_draft(user_text, context, state)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
