//! Tokenization, stop-words, and the curated action-verb set shared by
//! trigger extraction (`extract.rs`) and query matching (`match_.rs`).

use std::collections::HashSet;

/// Verbs used to recognize verb+object trigger phrases in preceding user
/// turns (spec.md §4.5 step 8). Deliberately small and curated rather than
/// a full POS tagger — matches the scale of the rest of the extraction
/// pipeline, which has no NLP dependency beyond tokenization.
pub const ACTION_VERBS: &[&str] = &[
    "read", "write", "edit", "create", "delete", "search", "run", "build", "test", "fix",
    "deploy", "fetch", "parse", "analyze", "refactor", "install", "configure", "commit", "push",
    "review",
];

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "to", "of", "and", "or", "in", "on", "for", "with", "that", "this",
    "it", "please", "can", "you",
];

pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

pub fn tokenize_without_stopwords(text: &str) -> Vec<String> {
    let stop: HashSet<&str> = STOP_WORDS.iter().copied().collect();
    tokenize(text).into_iter().filter(|tok| !stop.contains(tok.as_str())).collect()
}

/// Extracts verb+object bigrams and verb+object+object trigrams from a
/// token stream, keeping only those anchored on a curated action verb.
pub fn extract_verb_phrases(tokens: &[String]) -> Vec<String> {
    let verbs: HashSet<&str> = ACTION_VERBS.iter().copied().collect();
    let mut phrases = Vec::new();
    for (i, tok) in tokens.iter().enumerate() {
        if !verbs.contains(tok.as_str()) {
            continue;
        }
        if let Some(obj) = tokens.get(i + 1) {
            phrases.push(format!("{tok} {obj}"));
            if let Some(obj2) = tokens.get(i + 2) {
                phrases.push(format!("{tok} {obj} {obj2}"));
            }
        }
    }
    phrases
}

/// Jaccard similarity between two token sets.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}
