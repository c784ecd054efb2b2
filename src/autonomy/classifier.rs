//! ErrorClassifier (C1) — spec.md §4.1, supplemented by SPEC_FULL.md §4.1.
//!
//! Pure function over a failure message. Grounded in
//! `safety::SafetyGuard::check_tool_safety`'s pattern-match-then-default
//! style: an ordered list of phrase rules, transient checked before fatal,
//! falling through to `Unknown`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Fatal,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub backoff_hint_ms: Option<u64>,
    pub reason: String,
}

const TRANSIENT_PHRASES: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "rate limit",
    "429",
    "econnreset",
    "etimedout",
];

const FATAL_PHRASES: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "invalid schema",
    "malformed",
    "policy denied",
    "policy violation",
    "cancelled",
];

pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn classify(message: &str) -> Classification {
        classify(message)
    }
}

fn looks_like_5xx(lower: &str) -> bool {
    // A bare 3-digit token in [500, 599] anywhere in the message.
    lower.split(|c: char| !c.is_ascii_digit()).any(|tok| {
        tok.len() == 3
            && tok
                .parse::<u32>()
                .map(|n| (500..=599).contains(&n))
                .unwrap_or(false)
    })
}

fn looks_like_4xx_other_than_429(lower: &str) -> bool {
    lower.split(|c: char| !c.is_ascii_digit()).any(|tok| {
        tok.len() == 3
            && tok
                .parse::<u32>()
                .map(|n| (400..=499).contains(&n) && n != 429)
                .unwrap_or(false)
    })
}

pub fn classify(message: &str) -> Classification {
    let lower = message.to_lowercase();

    if TRANSIENT_PHRASES.iter().any(|p| lower.contains(p)) || looks_like_5xx(&lower) {
        return Classification {
            kind: ErrorKind::Transient,
            retryable: true,
            backoff_hint_ms: None,
            reason: format!("matched transient pattern in: {message}"),
        };
    }

    if FATAL_PHRASES.iter().any(|p| lower.contains(p)) || looks_like_4xx_other_than_429(&lower) {
        return Classification {
            kind: ErrorKind::Fatal,
            retryable: false,
            backoff_hint_ms: None,
            reason: format!("matched fatal pattern in: {message}"),
        };
    }

    Classification {
        kind: ErrorKind::Unknown,
        retryable: true,
        backoff_hint_ms: None,
        reason: format!("no known pattern matched: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_as_transient() {
        let c = classify("HTTP 429: rate limit exceeded");
        assert_eq!(c.kind, ErrorKind::Transient);
        assert!(c.retryable);
    }

    #[test]
    fn classifies_5xx_as_transient() {
        let c = classify("upstream returned 503");
        assert_eq!(c.kind, ErrorKind::Transient);
    }

    #[test]
    fn classifies_auth_as_fatal() {
        let c = classify("401 unauthorized");
        assert_eq!(c.kind, ErrorKind::Fatal);
        assert!(!c.retryable);
    }

    #[test]
    fn classifies_malformed_schema_as_fatal() {
        let c = classify("invalid schema for tool arguments");
        assert_eq!(c.kind, ErrorKind::Fatal);
    }

    #[test]
    fn unmatched_error_is_unknown() {
        let c = classify("something weird happened");
        assert_eq!(c.kind, ErrorKind::Unknown);
        assert!(c.retryable);
    }
}
