//! Security utilities for sanitization and redaction.
//!
//! These functions prevent credentials (the API password, the image root password)
//! from leaking into logs, error messages, or the run report.
//!
//! The redactor is built once from the secrets the probe was configured with and
//! uses an Aho-Corasick automaton for single-pass multi-pattern replacement.

use std::borrow::Cow;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

/// Values shorter than this are not redacted.
/// Avoids mangling output on trivial values ("root", "1").
const MIN_SECRET_LENGTH: usize = 6;

const REDACTED: &str = "[REDACTED]";

/// Secret redactor built from known credential values.
///
/// Secrets are never logged or exposed via Debug.
pub struct SecretRedactor {
    secrets: Vec<String>,
    automaton: Option<AhoCorasick>,
}

impl std::fmt::Debug for SecretRedactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRedactor")
            .field("secret_count", &self.secrets.len())
            .finish_non_exhaustive() // Omit automaton contents
    }
}

impl Default for SecretRedactor {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

impl SecretRedactor {
    #[must_use]
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut secrets: Vec<String> = secrets
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| s.len() >= MIN_SECRET_LENGTH)
            .collect();

        // Ensure deterministic order, and ensure fallback redaction prefers longer matches.
        secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        secrets.dedup();

        let secret_count = secrets.len();
        let automaton = if secrets.is_empty() {
            None
        } else {
            match AhoCorasickBuilder::new()
                .match_kind(MatchKind::LeftmostLongest)
                .build(&secrets)
            {
                Ok(ac) => Some(ac),
                Err(e) => {
                    tracing::warn!(
                        secret_count,
                        "SecretRedactor automaton build failed; using fallback redaction ({e})"
                    );
                    None
                }
            }
        };

        tracing::debug!(secret_count, "SecretRedactor initialized");
        Self { secrets, automaton }
    }

    /// Returns the input with all known secrets replaced by `[REDACTED]`.
    #[must_use]
    pub fn redact<'a>(&self, input: &'a str) -> Cow<'a, str> {
        if self.secrets.is_empty() {
            return Cow::Borrowed(input);
        }

        if let Some(ac) = &self.automaton {
            if !ac.is_match(input) {
                return Cow::Borrowed(input);
            }
            let mut result = String::with_capacity(input.len());
            ac.replace_all_with(input, &mut result, |_, _, dst| {
                dst.push_str(REDACTED);
                true
            });
            return Cow::Owned(result);
        }

        // Fail-closed fallback: sequential replacement (longest-first order already ensured).
        let mut output: Option<String> = None;
        for secret in &self.secrets {
            let haystack = output.as_deref().unwrap_or(input);
            if !haystack.contains(secret.as_str()) {
                continue;
            }
            output = Some(haystack.replace(secret.as_str(), REDACTED));
        }

        output.map_or(Cow::Borrowed(input), Cow::Owned)
    }

    #[must_use]
    pub fn secret_count(&self) -> usize {
        self.secrets.len()
    }
}

/// Strip terminal escape sequences and control characters from remote output
/// before it is logged or reported.
///
/// CSI (`ESC [ ... final`) and OSC (`ESC ] ... BEL` or `ESC ] ... ESC \`)
/// sequences are removed whole, as are other `ESC` sequences (intermediate
/// bytes plus one final byte). Newlines and tabs survive; every other control
/// character (and DEL) is dropped.
#[must_use]
pub fn sanitize_display_text(input: &str) -> Cow<'_, str> {
    let is_unsafe = |c: char| (c.is_control() && c != '\n' && c != '\t') || c == '\u{7f}';
    if !input.chars().any(is_unsafe) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\x1b' {
            if !is_unsafe(c) {
                out.push(c);
            }
            continue;
        }
        match chars.next() {
            // CSI: parameter and intermediate bytes, then one final byte.
            Some('[') => {
                for c in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&c) {
                        break;
                    }
                }
            }
            // OSC: runs to BEL or ST.
            Some(']') => {
                while let Some(c) = chars.next() {
                    if c == '\x07' {
                        break;
                    }
                    if c == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            // Intermediate bytes, then one final byte (`ESC ( B`).
            Some(c) if ('\x20'..='\x2f').contains(&c) => {
                for c in chars.by_ref() {
                    if !('\x20'..='\x2f').contains(&c) {
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    Cow::Owned(out)
}
