//! Idempotency token generation
//!
//! A token is generated once, when a job is first enqueued, and stays on the
//! job for every retry so the receiving node can deduplicate resubmissions.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Prefix carried by every generated token
pub const TOKEN_PREFIX: &str = "idem-";

/// Hex characters kept from the digest
const TOKEN_HEX_LEN: usize = 32;

/// Source of idempotency tokens
pub trait IdempotencyKeys: Send + Sync {
    /// Produce a new token for the job identified by `hint`
    fn generate(&self, hint: &str) -> String;
}

/// `idem-` followed by 32 hex chars of `sha256(hint || uuid-v4)`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultIdempotencyKeys;

impl IdempotencyKeys for DefaultIdempotencyKeys {
    fn generate(&self, hint: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(hint.as_bytes());
        hasher.update(Uuid::new_v4().as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{}{}", TOKEN_PREFIX, &digest[..TOKEN_HEX_LEN])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_format() {
        let token = DefaultIdempotencyKeys.generate("tx-1");
        assert!(token.starts_with(TOKEN_PREFIX));
        let hex_part = &token[TOKEN_PREFIX.len()..];
        assert_eq!(hex_part.len(), TOKEN_HEX_LEN);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_are_unique_per_call() {
        let keys = DefaultIdempotencyKeys;
        assert_ne!(keys.generate("tx-1"), keys.generate("tx-1"));
    }

    #[test]
    fn test_token_does_not_leak_hint() {
        let token = DefaultIdempotencyKeys.generate("sender-wallet");
        assert!(!token.contains("sender"));
    }
}
