//! Outcome of one dispatch cycle

use crate::job::TransactionJob;
use crate::sanitize::SanitizedError;
use serde::{Deserialize, Serialize};

/// Downstream acknowledgement of an accepted job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Transaction hash reported by the node, if any
    pub tx_hash: Option<String>,
}

impl Receipt {
    /// Receipt carrying a transaction hash
    pub fn with_hash(tx_hash: impl Into<String>) -> Self {
        Self {
            tx_hash: Some(tx_hash.into()),
        }
    }
}

/// A job the downstream accepted
#[derive(Debug, Clone, PartialEq)]
pub struct SucceededJob {
    /// The job as dispatched
    pub job: TransactionJob,
    /// Downstream acknowledgement
    pub receipt: Receipt,
}

/// A job whose attempt failed
#[derive(Debug, Clone, PartialEq)]
pub struct FailedJob {
    /// The job after its failure was recorded
    pub job: TransactionJob,
    /// Sanitized cause
    pub error: SanitizedError,
    /// True when the job was dropped from the queue
    pub terminal: bool,
}

/// Successes and failures of the jobs attempted in one cycle
///
/// The two lists are disjoint and together hold every dispatched job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    /// Accepted jobs
    pub successful_jobs: Vec<SucceededJob>,
    /// Failed jobs
    pub failed_jobs: Vec<FailedJob>,
}

impl BatchResult {
    /// Empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accepted jobs
    pub fn success_count(&self) -> usize {
        self.successful_jobs.len()
    }

    /// Number of failed jobs
    pub fn failure_count(&self) -> usize {
        self.failed_jobs.len()
    }

    /// Jobs attempted in the cycle
    pub fn len(&self) -> usize {
        self.success_count() + self.failure_count()
    }

    /// Check if nothing was dispatched
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// No job failed
    pub fn is_full_success(&self) -> bool {
        self.failed_jobs.is_empty()
    }

    /// No job succeeded
    pub fn is_full_failure(&self) -> bool {
        self.successful_jobs.is_empty()
    }

    /// Failed jobs that were dropped from the queue
    pub fn terminal_failures(&self) -> impl Iterator<Item = &FailedJob> {
        self.failed_jobs.iter().filter(|f| f.terminal)
    }

    pub(crate) fn push_success(&mut self, job: TransactionJob, receipt: Receipt) {
        self.successful_jobs.push(SucceededJob { job, receipt });
    }

    pub(crate) fn push_failure(&mut self, job: TransactionJob, error: SanitizedError, terminal: bool) {
        self.failed_jobs.push(FailedJob {
            job,
            error,
            terminal,
        });
    }
}
