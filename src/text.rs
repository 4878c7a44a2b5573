//! # Context Preparer
//! Normalizes raw usage examples into token sequences and locates the scored
//! term inside them.
//!
//! Tokens are lower-cased runs of letters/digits; a hyphen or apostrophe is kept
//! only when it sits between two such runs (`in-group`, `don't`). Everything else
//! is treated as a separator.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::ScoringError;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+(?:['\-][\p{L}\p{N}]+)*").expect("token regex"));

static SENTENCE_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+\s+").expect("sentence regex"));

/// One usage example, scoped to a single scoring request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Context {
    pub raw: String,
    pub tokens: Vec<String>,
    /// Token index of every (possibly overlapping) term occurrence.
    pub occurrences: Vec<usize>,
}

impl Context {
    pub fn new(raw: &str, term_tokens: &[String]) -> Self {
        let tokens = normalize(raw);
        let occurrences = locate(term_tokens, &tokens);
        Self {
            raw: raw.to_string(),
            tokens,
            occurrences,
        }
    }

    /// True when the term occurs at least once.
    pub fn is_anchored(&self) -> bool {
        !self.occurrences.is_empty()
    }
}

/// Validated, tokenized input for one scoring pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedInput {
    /// Canonical term (tokens joined by a single space).
    pub term: String,
    pub term_tokens: Vec<String>,
    pub contexts: Vec<Context>,
}

impl PreparedInput {
    pub fn anchored_count(&self) -> usize {
        self.contexts.iter().filter(|c| c.is_anchored()).count()
    }
}

/// Lowercase, strip punctuation except internal hyphen/apostrophe, keep order.
pub fn normalize(text: &str) -> Vec<String> {
    let decoded = html_escape::decode_html_entities(text);
    let lowered = decoded.replace(['\u{2018}', '\u{2019}'], "'").to_lowercase();
    TOKEN_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Canonical form of a term; falls back to the trimmed lowercase input when
/// nothing tokenizes (e.g. pure punctuation).
pub fn normalize_term(term: &str) -> String {
    let tokens = normalize(term);
    if tokens.is_empty() {
        term.trim().to_lowercase()
    } else {
        tokens.join(" ")
    }
}

/// Start positions of `term_tokens` as a contiguous subsequence of `tokens`.
pub fn locate(term_tokens: &[String], tokens: &[String]) -> Vec<usize> {
    if term_tokens.is_empty() || term_tokens.len() > tokens.len() {
        return Vec::new();
    }
    tokens
        .windows(term_tokens.len())
        .enumerate()
        .filter(|(_, w)| *w == term_tokens)
        .map(|(i, _)| i)
        .collect()
}

pub fn contains_sequence(tokens: &[String], term_tokens: &[String]) -> bool {
    !locate(term_tokens, tokens).is_empty()
}

/// Split free text after `.`, `!` or `?` followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut last = 0;
    for m in SENTENCE_END_RE.find_iter(text) {
        let punct_end = m.start() + m.as_str().trim_end().len();
        push_trimmed(&mut out, &text[last..punct_end]);
        last = m.end();
    }
    push_trimmed(&mut out, &text[last..]);
    out
}

fn push_trimmed(out: &mut Vec<String>, chunk: &str) {
    let t = chunk.trim();
    if !t.is_empty() {
        out.push(t.to_string());
    }
}

/// Validate and tokenize a scoring request.
///
/// Whitespace-only contexts are dropped before the emptiness check.
pub fn prepare(term: &str, contexts: &[String]) -> Result<PreparedInput, ScoringError> {
    let term_tokens = normalize(term);
    if term_tokens.is_empty() {
        return Err(ScoringError::InvalidInput(
            "term must contain at least one word".to_string(),
        ));
    }

    let contexts: Vec<Context> = contexts
        .iter()
        .filter(|c| !c.trim().is_empty())
        .map(|c| Context::new(c, &term_tokens))
        .collect();
    if contexts.is_empty() {
        return Err(ScoringError::InvalidInput(
            "at least one non-empty context is required".to_string(),
        ));
    }

    Ok(PreparedInput {
        term: term_tokens.join(" "),
        term_tokens,
        contexts,
    })
}

/// Short anonymized id for a context, safe to log.
pub fn context_digest(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &[&str]) -> Vec<String> {
        s.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn normalize_keeps_internal_hyphen_and_apostrophe() {
        let t = normalize("We're an IN-GROUP -- 'quoted' word!");
        assert_eq!(t, toks(&["we're", "an", "in-group", "quoted", "word"]));
    }

    #[test]
    fn normalize_decodes_entities_and_curly_quotes() {
        let t = normalize("Tom&amp;Jerry don\u{2019}t");
        assert_eq!(t, toks(&["tom", "jerry", "don't"]));
    }

    #[test]
    fn locate_multi_token_term() {
        let tokens = normalize("those people and those people again");
        let term = normalize("Those People");
        assert_eq!(locate(&term, &tokens), vec![0, 3]);
        assert!(locate(&toks(&["missing"]), &tokens).is_empty());
    }

    #[test]
    fn locate_does_not_match_partial_tokens() {
        let tokens = normalize("examples are not an example-like example");
        assert_eq!(locate(&toks(&["example"]), &tokens), vec![5]);
    }

    #[test]
    fn split_sentences_on_terminal_punctuation() {
        let s = split_sentences("You are an example. We reclaimed it!  Really?no split");
        assert_eq!(
            s,
            vec![
                "You are an example.".to_string(),
                "We reclaimed it!".to_string(),
                "Really?no split".to_string()
            ]
        );
    }

    #[test]
    fn prepare_rejects_empty_term_and_contexts() {
        assert!(matches!(
            prepare("  !! ", &["x".to_string()]),
            Err(ScoringError::InvalidInput(_))
        ));
        assert!(matches!(
            prepare("term", &[]),
            Err(ScoringError::InvalidInput(_))
        ));
        assert!(matches!(
            prepare("term", &["   ".to_string()]),
            Err(ScoringError::InvalidInput(_))
        ));
    }

    #[test]
    fn prepare_flags_unanchored_contexts() {
        let p = prepare(
            "History-Term",
            &["a history-term here".to_string(), "nothing".to_string()],
        )
        .unwrap();
        assert_eq!(p.term, "history-term");
        assert!(p.contexts[0].is_anchored());
        assert!(!p.contexts[1].is_anchored());
        assert_eq!(p.anchored_count(), 1);
    }

    #[test]
    fn digest_is_stable_and_short() {
        assert_eq!(context_digest("abc"), context_digest("abc"));
        assert_eq!(context_digest("abc").len(), 12);
    }
}
