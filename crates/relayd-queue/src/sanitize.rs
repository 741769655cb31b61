//! Scrubbing of error messages before they reach logs, tracers or results
//!
//! Downstream errors routinely echo the request back: raw signed
//! transactions, signatures, sometimes a key pasted into a config string.
//! Everything that leaves the engine goes through [`sanitize_message`].

use once_cell::sync::Lazy;
use regex::Regex;
use relayd_resilience::{ErrorKind, ResilienceError};
use std::fmt;

/// Longest message kept, ellipsis included
pub const MAX_MESSAGE_CHARS: usize = 256;

const ELLIPSIS: &str = "...";

static ASSIGNMENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(private_?key|secret|signature|mnemonic|seed|password|api_?key|key)\s*[=:]\s*("[^"]*"|'[^']*'|\S+)"#,
    )
    .expect("ASSIGNMENT_REGEX should compile - this is a bug")
});

static HEX_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:0x)?[0-9a-fA-F]{40,}\b").expect("HEX_REGEX should compile - this is a bug")
});

static BLOB_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9+/_-]{44,}={0,2}").expect("BLOB_REGEX should compile - this is a bug")
});

static WHITESPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("WHITESPACE_REGEX should compile - this is a bug"));

/// Redact secrets and payload fragments, collapse whitespace, truncate
pub fn sanitize_message(raw: &str) -> String {
    let redacted = ASSIGNMENT_REGEX.replace_all(raw, "$1=[REDACTED]");
    let redacted = HEX_REGEX.replace_all(&redacted, "[REDACTED_HEX]");
    let redacted = BLOB_REGEX.replace_all(&redacted, "[REDACTED_BLOB]");
    let collapsed = WHITESPACE_REGEX.replace_all(&redacted, " ");
    truncate(collapsed.trim())
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message.to_string();
    }
    let keep = MAX_MESSAGE_CHARS - ELLIPSIS.len();
    let mut out: String = message.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Failure description safe to hand to tracers and callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedError {
    /// Job the failure belongs to
    pub job_id: String,
    /// Error class
    pub kind: ErrorKind,
    /// Scrubbed, truncated message
    pub message: String,
}

impl SanitizedError {
    /// Build from a resilience error
    pub fn new(job_id: impl Into<String>, error: &ResilienceError) -> Self {
        Self {
            job_id: job_id.into(),
            kind: error.kind(),
            message: sanitize_message(&error.to_string()),
        }
    }
}

impl fmt::Display for SanitizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {} failed ({}): {}", self.job_id, self.kind, self.message)
    }
}

impl std::error::Error for SanitizedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_message_untouched() {
        assert_eq!(sanitize_message("connection refused"), "connection refused");
    }

    #[test]
    fn test_hex_payload_redacted() {
        let raw = format!("rejected tx 0x{} by node", "ab".repeat(60));
        assert_eq!(sanitize_message(&raw), "rejected tx [REDACTED_HEX] by node");
    }

    #[test]
    fn test_short_hex_kept() {
        assert_eq!(sanitize_message("nonce 0x1f too low"), "nonce 0x1f too low");
    }

    #[test]
    fn test_assignment_redacted() {
        let out = sanitize_message("bad request: private_key=5Kb8kLf9zgWQnogidDA76Mz signature: 'abc'");
        assert_eq!(out, "bad request: private_key=[REDACTED] signature=[REDACTED]");
    }

    #[test]
    fn test_base64_blob_redacted() {
        let blob = "QUJDREVGR0hJSktMTU5PUFFSU1RVVldYWVphYmNkZWZnaGlqa2xtbm9w";
        let out = sanitize_message(&format!("payload {} invalid", blob));
        assert_eq!(out, "payload [REDACTED_BLOB] invalid");
    }

    #[test]
    fn test_whitespace_collapsed() {
        assert_eq!(sanitize_message("  upstream\n\n  timed   out "), "upstream timed out");
    }

    #[test]
    fn test_truncated_with_ellipsis() {
        let out = sanitize_message(&"word ".repeat(200));
        assert_eq!(out.chars().count(), MAX_MESSAGE_CHARS);
        assert!(out.ends_with(ELLIPSIS));
    }

    #[test]
    fn test_sanitized_error_from_resilience_error() {
        let err = ResilienceError::client(format!("signature={}", "f".repeat(130)));
        let sanitized = SanitizedError::new("tx-9", &err);
        assert_eq!(sanitized.kind, ErrorKind::Client);
        assert_eq!(sanitized.message, "client error: signature=[REDACTED]");
        assert!(sanitized.to_string().contains("tx-9"));
    }
}
