//! Transaction job model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use uuid::Uuid;

/// Opaque data handed to the downstream; never inspected for control flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// Raw bytes, e.g. a signed transaction
    Bytes(Vec<u8>),
    /// Structured request body
    Json(serde_json::Value),
}

impl Payload {
    /// Raw byte payload
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(data.into())
    }

    /// Structured payload
    pub fn json(value: serde_json::Value) -> Self {
        Self::Json(value)
    }

    /// Hex encoding of a byte payload, as expected by `eth_sendRawTransaction` style calls
    pub fn to_hex(&self) -> Option<String> {
        match self {
            Self::Bytes(data) => Some(format!("0x{}", hex::encode(data))),
            Self::Json(_) => None,
        }
    }
}

/// A unit of work awaiting submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionJob {
    id: String,
    payload: Payload,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    #[serde(default)]
    attempts: u32,
    #[serde(skip)]
    next_available_at: Option<Instant>,
    #[serde(default)]
    idempotency_token: Option<String>,
    #[serde(default)]
    errors: Vec<String>,
}

impl TransactionJob {
    /// Create a job with a generated id
    pub fn new(payload: Payload) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), payload)
    }

    /// Create a job with a caller-supplied id
    pub fn with_id(id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            payload,
            metadata: BTreeMap::new(),
            attempts: 0,
            next_available_at: None,
            idempotency_token: None,
            errors: Vec::new(),
        }
    }

    /// Attach a non-sensitive metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Job id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Payload to submit
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Descriptive fields safe for logs and tracers
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Single metadata value
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Failed dispatch attempts so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Earliest instant the job may be dequeued; `None` means immediately
    pub fn next_available_at(&self) -> Option<Instant> {
        self.next_available_at
    }

    /// Token presented to the downstream on every attempt
    pub fn idempotency_token(&self) -> Option<&str> {
        self.idempotency_token.as_deref()
    }

    /// Sanitized failure history, oldest first
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Check if the job may be dequeued at `now`
    pub fn is_available(&self, now: Instant) -> bool {
        self.next_available_at.map_or(true, |at| at <= now)
    }

    pub(crate) fn assign_token(&mut self, token: String) {
        if self.idempotency_token.is_none() {
            self.idempotency_token = Some(token);
        }
    }

    pub(crate) fn record_attempt_failure(&mut self, sanitized: String) -> u32 {
        self.errors.push(sanitized);
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    pub(crate) fn set_next_available_at(&mut self, at: Instant) {
        self.next_available_at = Some(at);
    }
}
