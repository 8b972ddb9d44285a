//! Intent detection - why is the user saying this?
//!
//! Deterministic keyword heuristics only. The detected intent steers the
//! engine's phase schedule and rides into the generation hint as a numeric
//! code.

use serde::{Deserialize, Serialize};

/// Detected intent of a user utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// An information question ("what is...", "...?")
    Question,
    /// An imperative request ("list", "summarize", "explain")
    Command,
    /// A short keyword probe with no verb shape
    Lookup,
    /// Greeting or social filler
    Smalltalk,
    /// A declarative statement offering information
    #[default]
    Statement,
}

/// Leading words that mark a question
const QUESTION_LEADS: [&str; 8] = ["what", "how", "why", "when", "who", "where", "which", "is"];

/// Leading verbs that mark an imperative request
const COMMAND_LEADS: [&str; 8] = [
    "list", "show", "find", "give", "explain", "summarize", "describe", "compare",
];

/// Greeting tokens
const SMALLTALK_WORDS: [&str; 6] = ["hello", "hi", "hey", "thanks", "thank", "goodbye"];

impl Intent {
    /// Numeric code for the generation-hint grammar
    pub fn code(self) -> u8 {
        match self {
            Intent::Question => 0,
            Intent::Command => 1,
            Intent::Lookup => 2,
            Intent::Smalltalk => 3,
            Intent::Statement => 4,
        }
    }

    /// Classify a user utterance
    pub fn detect(text: &str) -> Self {
        let lowered = text.trim().to_lowercase();
        if lowered.is_empty() {
            return Intent::Smalltalk;
        }

        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let first = words.first().copied().unwrap_or("");

        if words.len() <= 2 && words.iter().all(|w| SMALLTALK_WORDS.contains(w)) {
            return Intent::Smalltalk;
        }
        if lowered.ends_with('?') || QUESTION_LEADS.contains(&first) {
            return Intent::Question;
        }
        if COMMAND_LEADS.contains(&first) {
            return Intent::Command;
        }
        if words.len() <= 3 {
            return Intent::Lookup;
        }
        Intent::Statement
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_detection() {
        assert_eq!(Intent::detect("What is BM25?"), Intent::Question);
        assert_eq!(Intent::detect("does this terminate?"), Intent::Question);
        assert_eq!(Intent::detect("how do foxes hunt"), Intent::Question);
    }

    #[test]
    fn test_command_detection() {
        assert_eq!(
            Intent::detect("summarize the retrieval pipeline"),
            Intent::Command
        );
        assert_eq!(Intent::detect("list open issues"), Intent::Command);
    }

    #[test]
    fn test_lookup_detection() {
        assert_eq!(Intent::detect("brown fox"), Intent::Lookup);
    }

    #[test]
    fn test_smalltalk_detection() {
        assert_eq!(Intent::detect("hello"), Intent::Smalltalk);
        assert_eq!(Intent::detect("  "), Intent::Smalltalk);
    }

    #[test]
    fn test_statement_default() {
        assert_eq!(
            Intent::detect("the quick brown fox jumps over the lazy dog"),
            Intent::Statement
        );
    }

    #[test]
    fn test_codes_distinct() {
        let codes = [
            Intent::Question.code(),
            Intent::Command.code(),
            Intent::Lookup.code(),
            Intent::Smalltalk.code(),
            Intent::Statement.code(),
        ];
        let unique: std::collections::BTreeSet<u8> = codes.iter().copied().collect();
        assert_eq!(unique.len(), codes.len());
    }
}
