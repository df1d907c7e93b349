//! Prompt normalization and lexical similarity.
//!
//! Stored prompts are always kept in normalized form, so both the exact
//! lookup and the smart match compare normalized text.

use sha2::{Digest, Sha256};

const STOP_WORDS: [&str; 8] = ["in", "the", "is", "a", "an", "of", "to", "for"];

/// Lowercase, drop everything outside `[a-z0-9\s]`, collapse whitespace runs
/// and trim.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized tokens longer than two characters, stop-words removed.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split(' ')
        .filter(|token| token.len() > 2 && !STOP_WORDS.contains(token))
        .map(str::to_owned)
        .collect()
}

/// Share of the user's words matched by a token of the stored prompt.
///
/// Only significant tokens (see [`tokenize`]) can match, but every word of
/// the normalized user prompt counts towards the denominator, so stop-words
/// dilute the score. Repeated user tokens count every time they appear, which
/// makes the score asymmetric.
pub fn score(stored: &str, user: &str) -> f64 {
    let stored_tokens = tokenize(stored);
    let user_words = word_count(user);

    let matches = tokenize(user)
        .iter()
        .filter(|token| stored_tokens.contains(token))
        .count();

    matches as f64 / user_words.max(1) as f64
}

/// Hex SHA-256 of a normalized prompt, a fixed-size key for exact lookups.
pub fn prompt_digest(normalized: &str) -> String {
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}

fn word_count(text: &str) -> usize {
    normalize(text).split_whitespace().count()
}
