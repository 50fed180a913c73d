//! Durable job queue for review work.

pub mod job;
pub mod queue;

pub use job::{QueueLane, ReviewJob, DEFAULT_MAX_ATTEMPTS};
pub use queue::{QueueError, QueueStats, ReviewQueue};

use async_trait::async_trait;
use uuid::Uuid;

/// Enqueue-side seam between ingestion and the queue.
///
/// Lets webhook ingestion be exercised without a Redis instance.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Enqueues a job, returning its id.
    async fn dispatch(&self, job: ReviewJob) -> Result<Uuid, QueueError>;
}

#[async_trait]
impl JobDispatcher for ReviewQueue {
    async fn dispatch(&self, job: ReviewJob) -> Result<Uuid, QueueError> {
        self.enqueue(&job).await?;
        Ok(job.id)
    }
}
