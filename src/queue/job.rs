//! Review job envelope.
//!
//! A job carries only the review row id plus queue bookkeeping. All review
//! state lives in PostgreSQL; the queue message is a pointer, so a redelivered
//! or recovered job always re-reads current state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default retry budget for review jobs.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Priority lane for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueLane {
    Critical,
    Default,
    Low,
}

impl QueueLane {
    /// Lanes in descending priority order.
    pub fn all() -> [QueueLane; 3] {
        [Self::Critical, Self::Default, Self::Low]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Default => "default",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for QueueLane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A queued review job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewJob {
    /// Unique id for this job instance.
    pub id: Uuid,
    /// The review row this job processes.
    pub review_id: i64,
    pub lane: QueueLane,
    pub created_at: DateTime<Utc>,
    /// Attempts consumed so far.
    pub attempts: u32,
    pub max_attempts: u32,
}

impl ReviewJob {
    /// Creates a job for a review on the default lane.
    pub fn new(review_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            review_id,
            lane: QueueLane::Default,
            created_at: Utc::now(),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the priority lane.
    pub fn with_lane(mut self, lane: QueueLane) -> Self {
        self.lane = lane;
        self
    }

    /// Sets the retry budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Consumes one attempt.
    pub fn increment_attempts(&mut self) {
        self.attempts += 1;
    }

    /// Whether the job still has attempts left.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Attempts remaining in the budget.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }
}
