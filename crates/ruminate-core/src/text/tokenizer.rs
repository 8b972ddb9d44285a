//! Deterministic tokenizer
//!
//! Turns raw text into an ordered sequence of normalized tokens:
//!
//! 1. Unicode NFKC normalization, root-locale lowercasing
//! 2. URLs (`http`/`https`/`www.`) and email-like runs kept as whole tokens
//! 3. `#tag` / `@mention` emitted as single tokens
//! 4. Maximal letter/digit runs with inner connectors `- _ ' ’`
//!    (`foo-bar`, `it's`, `o'neill`, `snake_case` survive intact)
//! 5. Length gates: short tokens dropped, long tokens truncated
//!
//! Single pass, no backtracking beyond a bounded lookahead for connectors.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// CONFIG
// ============================================================================

/// Tokenizer configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenizerConfig {
    /// Tokens shorter than this are dropped
    pub min_len: usize,
    /// Tokens longer than this are truncated (by character count)
    pub max_len: usize,
    /// Strip combining marks after NFKC normalization
    pub strip_marks: bool,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            min_len: 2,
            max_len: 40,
            strip_marks: true,
        }
    }
}

impl TokenizerConfig {
    /// Copy with out-of-range values clamped into their documented ranges
    pub fn normalized(mut self) -> Self {
        self.min_len = self.min_len.max(1);
        self.max_len = self.max_len.max(self.min_len);
        self
    }
}

// ============================================================================
// TOKENIZER
// ============================================================================

/// Deterministic text tokenizer
///
/// Cheap to clone; carries only its configuration.
#[derive(Debug, Clone, Default)]
pub struct Tokenizer {
    cfg: TokenizerConfig,
}

/// Inner connectors accepted when surrounded by token characters
const CONNECTORS: [char; 4] = ['-', '_', '\'', '\u{2019}'];

/// Punctuation trimmed from the tail of email tokens
const EMAIL_TRAILERS: [char; 5] = ['.', ',', ';', ':', '!'];

impl Tokenizer {
    /// Create a tokenizer with the given configuration
    pub fn new(cfg: TokenizerConfig) -> Self {
        Self {
            cfg: cfg.normalized(),
        }
    }

    /// Current configuration
    pub fn config(&self) -> &TokenizerConfig {
        &self.cfg
    }

    /// Tokenize text into an ordered token list
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let normalized = self.normalize(text);
        let chars: Vec<char> = normalized.chars().collect();
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];

            // URL: consume to the next whitespace as one token
            if Self::url_starts_at(&chars, i) {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() {
                    i += 1;
                }
                self.push(&mut tokens, chars[start..i].iter().collect());
                continue;
            }

            // #tag / @mention followed by a token character
            if (c == '#' || c == '@')
                && i + 1 < chars.len()
                && Self::is_token_char(chars[i + 1])
            {
                let start = i;
                i += 1;
                while i < chars.len() && Self::is_token_char(chars[i]) {
                    i += 1;
                }
                self.push(&mut tokens, chars[start..i].iter().collect());
                continue;
            }

            if Self::is_token_char(c) {
                let (token, next, was_email) = Self::consume_run(&chars, i);
                i = next;
                let token = if was_email {
                    token.trim_end_matches(EMAIL_TRAILERS).to_string()
                } else {
                    token
                };
                self.push(&mut tokens, token);
                continue;
            }

            i += 1;
        }

        tokens
    }

    /// NFKC normalize, lowercase, optionally strip combining marks
    fn normalize(&self, text: &str) -> String {
        let nfkc: String = text.nfkc().collect();
        let lowered = nfkc.to_lowercase();
        if self.cfg.strip_marks {
            lowered.nfd().filter(|c| !is_combining_mark(*c)).collect()
        } else {
            lowered
        }
    }

    fn push(&self, tokens: &mut Vec<String>, token: String) {
        if token.chars().count() < self.cfg.min_len {
            return;
        }
        if token.chars().count() > self.cfg.max_len {
            tokens.push(token.chars().take(self.cfg.max_len).collect());
        } else {
            tokens.push(token);
        }
    }

    fn is_token_char(c: char) -> bool {
        c.is_alphanumeric()
    }

    fn url_starts_at(chars: &[char], i: usize) -> bool {
        for prefix in ["http://", "https://", "www."] {
            let p: Vec<char> = prefix.chars().collect();
            if chars.len() - i >= p.len() && chars[i..i + p.len()] == p[..] {
                return true;
            }
        }
        false
    }

    /// Consume a maximal run of token characters, accepting inner connectors
    /// and a single `@`/`.` sequence that makes the run email-like.
    ///
    /// Returns (token, next index, looked-like-email).
    fn consume_run(chars: &[char], start: usize) -> (String, usize, bool) {
        let mut i = start;
        let mut out = String::new();
        let mut saw_at = false;

        while i < chars.len() {
            let c = chars[i];
            if Self::is_token_char(c) {
                out.push(c);
                i += 1;
            } else if CONNECTORS.contains(&c)
                && i > start
                && i + 1 < chars.len()
                && Self::is_token_char(chars[i + 1])
            {
                // inner connector between two token chars
                out.push(c);
                i += 1;
            } else if (c == '@' || (c == '.' && saw_at))
                && i > start
                && i + 1 < chars.len()
                && Self::is_token_char(chars[i + 1])
            {
                // email-like run: local@domain.tld consumed whole
                saw_at = true;
                out.push(c);
                i += 1;
            } else if c == '.' && !saw_at && Self::email_ahead(chars, i) {
                // local part may contain dots before the @
                out.push(c);
                i += 1;
            } else {
                break;
            }
        }

        (out, i, saw_at)
    }

    /// Look ahead from a dot inside a run for an `@` before the run ends
    fn email_ahead(chars: &[char], mut i: usize) -> bool {
        while i < chars.len() {
            let c = chars[i];
            if c == '@' {
                return true;
            }
            if !Self::is_token_char(c) && c != '.' && !CONNECTORS.contains(&c) {
                return false;
            }
            i += 1;
        }
        false
    }
}

// ============================================================================
// TESTS
// ============================================================================
