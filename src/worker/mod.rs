//! Review processing: worker pool and the per-job state machine.

pub mod pool;
pub mod review;

pub use pool::{PoolError, PoolStats, Worker, WorkerPool, WorkerPoolConfig};
pub use review::ReviewHandler;

use async_trait::async_trait;
use thiserror::Error;

use crate::queue::ReviewJob;

/// How a job failed, which decides what the queue does next.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Worth retrying: network trouble, rate limits, storage hiccups.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Retrying cannot help: bad configuration, unparseable response.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl WorkerError {
    /// Permanent failures skip the retry budget and go straight to the dead
    /// letter list.
    pub fn is_permanent(&self) -> bool {
        matches!(self, WorkerError::Permanent(_))
    }
}

/// Processes one dequeued job. The worker pool is generic over this seam so
/// tests can drive it without a database or an LLM.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &ReviewJob) -> Result<(), WorkerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_error_classification() {
        assert!(WorkerError::Permanent("bad config".to_string()).is_permanent());
        assert!(!WorkerError::Transient("timeout".to_string()).is_permanent());
    }

    #[test]
    fn test_worker_error_display() {
        let err = WorkerError::Transient("connection reset".to_string());
        assert!(err.to_string().contains("transient"));
        assert!(err.to_string().contains("connection reset"));

        let err = WorkerError::Permanent("unknown provider".to_string());
        assert!(err.to_string().contains("permanent"));
    }
}
