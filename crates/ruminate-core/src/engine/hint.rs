//! Generation-hint grammar
//!
//! The engine steers the generator with a compact `key=value;...` string.
//! Values are integers or two-decimal fixed point, never free text, so a
//! hint can be logged, cached or embedded in telemetry without leaking
//! retrieval content. Recognized keys:
//!
//! `v g r st cov cs sp tok phase div seed drafts beam maxTok evs reqSec
//! noGen format intent iter`

use std::collections::BTreeMap;

/// Builder for hint strings; keys render in insertion order
#[derive(Debug, Clone, Default)]
pub struct HintBuilder {
    parts: Vec<(String, String)>,
}

impl HintBuilder {
    /// Start an empty hint
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an integer-valued key
    pub fn int(mut self, key: &str, value: i64) -> Self {
        self.parts.push((key.to_string(), value.to_string()));
        self
    }

    /// Append an unsigned key (seeds, counters)
    pub fn uint(mut self, key: &str, value: u64) -> Self {
        self.parts.push((key.to_string(), value.to_string()));
        self
    }

    /// Append a two-decimal fixed-point key
    pub fn fixed(mut self, key: &str, value: f64) -> Self {
        self.parts.push((key.to_string(), format!("{value:.2}")));
        self
    }

    /// Append a pre-rendered numeric fragment (e.g. an evaluation critique)
    pub fn fragment(mut self, fragment: &str) -> Self {
        for part in fragment.split(';').filter(|p| !p.is_empty()) {
            if let Some((k, v)) = part.split_once('=') {
                self.parts.push((k.to_string(), v.to_string()));
            }
        }
        self
    }

    /// Render the `key=value;...` string
    pub fn render(&self) -> String {
        self.parts
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Parse a hint back into a key -> numeric value map
///
/// Malformed fragments are skipped; generators treat missing keys as
/// defaults.
pub fn parse_hint(hint: &str) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for part in hint.split(';') {
        if let Some((k, v)) = part.split_once('=') {
            if let Ok(value) = v.parse::<f64>() {
                out.insert(k.to_string(), value);
            }
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
