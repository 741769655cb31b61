//! The remote endpoint jobs are submitted to

use crate::batch::Receipt;
use crate::job::TransactionJob;
use async_trait::async_trait;
use relayd_resilience::{ResilienceError, Result};

/// One network round trip to a chain node
///
/// Implementations must forward [`TransactionJob::idempotency_token`] with
/// every request so the node can deduplicate retries, and should map their
/// failures onto `ResilienceError::Transient` or `ResilienceError::Client`
/// (see `ResilienceError::from_http_status`).
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Endpoint name for logs
    fn name(&self) -> &str;

    /// Submit a single job
    async fn submit(&self, job: &TransactionJob) -> Result<Receipt>;

    /// Whether the endpoint accepts several jobs in one request
    fn supports_batching(&self) -> bool {
        false
    }

    /// Submit jobs in one request and return one result per job, in order
    ///
    /// An outer `Err` means the request as a whole failed.
    async fn submit_batch(&self, jobs: &[TransactionJob]) -> Result<Vec<Result<Receipt>>> {
        Err(ResilienceError::client(format!(
            "{} does not support native batching ({} jobs)",
            self.name(),
            jobs.len()
        )))
    }
}
