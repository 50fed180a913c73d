//! Redis-backed review queue with reliable dequeue.
//!
//! # Key layout
//!
//! Under a configurable prefix, one Redis list per priority lane plus two
//! bookkeeping lists:
//!
//! - `{prefix}:critical`, `{prefix}:default`, `{prefix}:low`: waiting jobs
//! - `{prefix}:processing`: jobs a worker is holding (crash recovery)
//! - `{prefix}:dead_letter`: jobs that exhausted their retry budget
//!
//! # Reliability
//!
//! Dequeue moves a job atomically from a lane into the processing list
//! (RPOPLPUSH/BRPOPLPUSH). A worker crash leaves the job in the processing
//! list, from which [`ReviewQueue::recover_pending`] requeues it on startup.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use uuid::Uuid;

use super::job::{QueueLane, ReviewJob};

/// Errors from queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// A Redis command failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Job payload could not be (de)serialized.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Redis-backed priority queue for review jobs.
pub struct ReviewQueue {
    /// Connection manager, reconnects automatically.
    redis: ConnectionManager,
    prefix: String,
    processing_key: String,
    dead_letter_key: String,
}

impl ReviewQueue {
    /// Connects to Redis and creates a queue under the given prefix.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, prefix))
    }

    /// Creates a queue from an existing connection manager.
    pub fn from_connection(redis: ConnectionManager, prefix: &str) -> Self {
        Self {
            redis,
            prefix: prefix.to_string(),
            processing_key: format!("{}:processing", prefix),
            dead_letter_key: format!("{}:dead_letter", prefix),
        }
    }

    fn lane_key(&self, lane: QueueLane) -> String {
        format!("{}:{}", self.prefix, lane.as_str())
    }

    /// Enqueues a job on its lane.
    pub async fn enqueue(&self, job: &ReviewJob) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(self.lane_key(job.lane), serialized)
            .await?;
        Ok(())
    }

    /// Dequeues the next job, blocking up to `timeout` when all lanes are empty.
    ///
    /// Lanes are drained non-blockingly in priority order; the blocking wait
    /// happens on the default lane, where webhook-driven jobs land.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the timeout expires with no job available.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<ReviewJob>, QueueError> {
        let mut conn = self.redis.clone();

        for lane in QueueLane::all() {
            let result: Option<String> = redis::cmd("RPOPLPUSH")
                .arg(self.lane_key(lane))
                .arg(&self.processing_key)
                .query_async(&mut conn)
                .await?;

            if let Some(data) = result {
                return Ok(Some(serde_json::from_str(&data)?));
            }
        }

        let timeout_secs = timeout.as_secs().max(1) as usize;
        let result: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(self.lane_key(QueueLane::Default))
            .arg(&self.processing_key)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        match result {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    /// Removes a finished job from the processing list.
    pub async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.remove_from_processing(job_id).await
    }

    /// Returns a job to its lane for another attempt.
    ///
    /// The caller increments the attempt counter before requeueing.
    pub async fn requeue(&self, job: &ReviewJob) -> Result<(), QueueError> {
        self.remove_from_processing(job.id).await?;

        // RPUSH puts the retry at the head of FIFO order.
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(self.lane_key(job.lane), serialized)
            .await?;
        Ok(())
    }

    /// Moves a job to the dead letter list with its final error.
    pub async fn dead_letter(&self, job: &ReviewJob, error: &str) -> Result<(), QueueError> {
        self.remove_from_processing(job.id).await?;

        let entry = serde_json::json!({
            "job": job,
            "error": error,
            "moved_at": chrono::Utc::now().to_rfc3339(),
        });
        let serialized = serde_json::to_string(&entry)?;

        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.dead_letter_key, serialized)
            .await?;
        Ok(())
    }

    /// Number of jobs waiting on a lane.
    pub async fn lane_len(&self, lane: QueueLane) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(self.lane_key(lane)).await?;
        Ok(len)
    }

    /// Number of jobs currently held by workers.
    pub async fn processing_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.processing_key).await?;
        Ok(len)
    }

    /// Number of jobs in the dead letter list.
    pub async fn dead_letter_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.dead_letter_key).await?;
        Ok(len)
    }

    /// Snapshot of queue depths.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (critical, default, low, processing, dead_letter) = tokio::try_join!(
            self.lane_len(QueueLane::Critical),
            self.lane_len(QueueLane::Default),
            self.lane_len(QueueLane::Low),
            self.processing_len(),
            self.dead_letter_len(),
        )?;

        Ok(QueueStats {
            pending: critical + default + low,
            processing,
            dead_letter,
        })
    }

    /// Requeues jobs stranded in the processing list by crashed workers.
    ///
    /// Each recovered job consumes an attempt; jobs over budget move to the
    /// dead letter list instead. Call on worker startup.
    ///
    /// # Returns
    ///
    /// The number of jobs returned to their lanes.
    pub async fn recover_pending(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let mut recovered = 0;

        let entries: Vec<String> = conn.lrange(&self.processing_key, 0, -1).await?;

        for entry in entries {
            let Ok(mut job) = serde_json::from_str::<ReviewJob>(&entry) else {
                continue;
            };

            job.increment_attempts();

            if job.should_retry() {
                let serialized = serde_json::to_string(&job)?;
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .lrem(&self.processing_key, 1, &entry)
                    .rpush(self.lane_key(job.lane), &serialized);
                pipe.query_async::<_, ()>(&mut conn).await?;
                recovered += 1;
            } else {
                self.dead_letter(&job, "recovered from processing after max attempts")
                    .await?;
            }
        }

        Ok(recovered)
    }

    /// Peeks at dead letter entries without removing them.
    pub async fn peek_dead_letter(
        &self,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, QueueError> {
        let mut conn = self.redis.clone();
        let data: Vec<String> = conn
            .lrange(&self.dead_letter_key, 0, limit as isize - 1)
            .await?;

        let entries: Result<Vec<serde_json::Value>, _> =
            data.iter().map(|s| serde_json::from_str(s)).collect();
        Ok(entries?)
    }

    /// Deletes all lists under the prefix. Intended for tests and tooling.
    pub async fn clear(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        for lane in QueueLane::all() {
            pipe.del(self.lane_key(lane));
        }
        pipe.del(&self.processing_key).del(&self.dead_letter_key);
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn remove_from_processing(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let entries: Vec<String> = conn.lrange(&self.processing_key, 0, -1).await?;

        for entry in entries {
            if let Ok(job) = serde_json::from_str::<ReviewJob>(&entry) {
                if job.id == job_id {
                    conn.lrem::<_, _, ()>(&self.processing_key, 1, &entry)
                        .await?;
                    return Ok(());
                }
            }
        }

        // Already removed is fine.
        Ok(())
    }
}

/// Queue depth snapshot.
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub dead_letter: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.dead_letter
    }
}
