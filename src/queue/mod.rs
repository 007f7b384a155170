//! Redis-backed job queue
//!
//! Four named queues carry the dispatch workload:
//!
//! - `whatsapp-campaign`: campaign-level jobs (start, resume, completion checks)
//! - `campaign-messages`: per-recipient send jobs
//! - `campaign-stats`: statistics recomputation jobs
//! - `campaign-conflict`: conflict pause/resume follow-ups
//!
//! Each queue is a ready list plus a `scheduled` sorted set (score is the
//! run-at time) and a `leased` sorted set (score is the lease deadline).
//! Dequeue atomically moves a job from the ready list into the leased set,
//! so a crash between pop and lease cannot lose work. A maintenance loop
//! promotes due scheduled jobs and requeues expired leases.

pub mod worker;

pub use worker::{JobHandler, WorkerPool};

use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Queue Names
// ============================================================================

/// Campaign-level jobs: start, resume, completion checks
pub const QUEUE_CAMPAIGNS: &str = "whatsapp-campaign";

/// Per-recipient send jobs
pub const QUEUE_MESSAGES: &str = "campaign-messages";

/// Statistics recomputation jobs
pub const QUEUE_STATS: &str = "campaign-stats";

/// Conflict pause/resume follow-ups
pub const QUEUE_CONFLICT: &str = "campaign-conflict";

/// All queues, in the order workers drain them
pub const ALL_QUEUES: [&str; 4] = [QUEUE_CONFLICT, QUEUE_CAMPAIGNS, QUEUE_MESSAGES, QUEUE_STATS];

// ============================================================================
// Errors
// ============================================================================

/// Errors from the queue runtime
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Failed to encode job: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode job: {0}")]
    Decode(#[source] serde_json::Error),
}

impl QueueError {
    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Redis(_) | Self::Pool(_) => true,
            Self::Encode(_) | Self::Decode(_) => false,
        }
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// Work item carried through a queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique job id
    pub id: Uuid,

    /// What to do
    pub payload: JobPayload,

    /// Delivery attempts consumed so far
    pub attempt: u32,

    /// When the job was first enqueued
    pub enqueued_at: DateTime<Utc>,
}

/// Job payloads, one per kind of background work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Start or continue dispatching a campaign
    CampaignDispatch { campaign_id: Uuid },

    /// Send one claimed log
    LogSend { campaign_id: Uuid, log_id: Uuid },

    /// Recompute a campaign's aggregate statistics
    StatsRefresh { campaign_id: Uuid },

    /// Re-check a paused session and resume its campaigns when clear
    ConflictCheck { session_id: String, attempt: u32 },
}

impl Job {
    pub fn new(payload: JobPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            attempt: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// Queue this payload belongs on
    pub fn queue(&self) -> &'static str {
        match self.payload {
            JobPayload::CampaignDispatch { .. } => QUEUE_CAMPAIGNS,
            JobPayload::LogSend { .. } => QUEUE_MESSAGES,
            JobPayload::StatsRefresh { .. } => QUEUE_STATS,
            JobPayload::ConflictCheck { .. } => QUEUE_CONFLICT,
        }
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self.payload {
            JobPayload::CampaignDispatch { .. } => "campaign_dispatch",
            JobPayload::LogSend { .. } => "log_send",
            JobPayload::StatsRefresh { .. } => "stats_refresh",
            JobPayload::ConflictCheck { .. } => "conflict_check",
        }
    }
}

/// A dequeued job plus the raw member string its lease is keyed on
#[derive(Debug)]
pub struct ClaimedJob {
    pub job: Job,
    pub queue: &'static str,
    raw: String,
}

/// Delay before re-delivering a job that failed with a recoverable error
pub fn redelivery_delay(attempt: u32) -> chrono::Duration {
    let secs = 30i64.saturating_mul(1 << attempt.min(5));
    chrono::Duration::seconds(secs.min(900))
}

// ============================================================================
// Queue
// ============================================================================

/// Redis queue client shared by producers, workers and the maintenance loop
#[derive(Clone)]
pub struct Queue {
    pool: Pool,
    prefix: String,
    lease_secs: u64,
    max_attempts: u32,
}

impl Queue {
    pub fn new(pool: Pool, prefix: impl Into<String>, lease_secs: u64, max_attempts: u32) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            lease_secs,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Maximum delivery attempts before a job is parked
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    // =========================================================================
    // Key Generation
    // =========================================================================

    fn ready_key(&self, queue: &str) -> String {
        format!("{}:queue:{}", self.prefix, queue)
    }

    fn scheduled_key(&self, queue: &str) -> String {
        format!("{}:queue:{}:scheduled", self.prefix, queue)
    }

    fn leased_key(&self, queue: &str) -> String {
        format!("{}:queue:{}:leased", self.prefix, queue)
    }

    fn dead_key(&self, queue: &str) -> String {
        format!("{}:queue:{}:dead", self.prefix, queue)
    }

    // =========================================================================
    // Producing
    // =========================================================================

    /// Enqueue a job for immediate delivery
    pub async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let raw = serde_json::to_string(job).map_err(QueueError::Encode)?;
        let mut conn = self.pool.get().await?;

        let _: () = conn.lpush(self.ready_key(job.queue()), &raw).await?;

        tracing::debug!(job_id = %job.id, kind = job.kind(), "Enqueued job");
        Ok(())
    }

    /// Enqueue a job to become ready at `run_at`
    pub async fn enqueue_at(&self, job: &Job, run_at: DateTime<Utc>) -> Result<(), QueueError> {
        let raw = serde_json::to_string(job).map_err(QueueError::Encode)?;
        let mut conn = self.pool.get().await?;

        let _: () = conn
            .zadd(self.scheduled_key(job.queue()), &raw, run_at.timestamp_millis())
            .await?;

        tracing::debug!(job_id = %job.id, kind = job.kind(), run_at = %run_at, "Scheduled job");
        Ok(())
    }

    /// Enqueue a job to become ready after `delay`
    pub async fn enqueue_in(&self, job: &Job, delay: chrono::Duration) -> Result<(), QueueError> {
        self.enqueue_at(job, Utc::now() + delay).await
    }

    // =========================================================================
    // Consuming
    // =========================================================================

    /// Pop one job from a queue and lease it.
    ///
    /// The pop and the lease registration run as one script, so a worker
    /// crash can never leave a job outside both structures.
    pub async fn dequeue(&self, queue: &'static str) -> Result<Option<ClaimedJob>, QueueError> {
        let deadline = Utc::now().timestamp_millis() + (self.lease_secs as i64) * 1000;
        let mut conn = self.pool.get().await?;

        let script = redis::Script::new(
            r#"
            local job = redis.call('RPOP', KEYS[1])
            if job then
                redis.call('ZADD', KEYS[2], ARGV[1], job)
            end
            return job
            "#,
        );

        let raw: Option<String> = script
            .key(self.ready_key(queue))
            .key(self.leased_key(queue))
            .arg(deadline)
            .invoke_async(&mut *conn)
            .await?;

        match raw {
            Some(raw) => {
                let job: Job = serde_json::from_str(&raw).map_err(QueueError::Decode)?;
                Ok(Some(ClaimedJob { job, queue, raw }))
            }
            None => Ok(None),
        }
    }

    /// Drop a finished job's lease
    pub async fn ack(&self, claimed: &ClaimedJob) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.zrem(self.leased_key(claimed.queue), &claimed.raw).await?;
        Ok(())
    }

    /// Return a failed job to its queue for another attempt after `delay`.
    /// Returns `false` when its attempts are exhausted and it was parked
    /// on the dead letter list instead.
    ///
    /// The retry lands before the lease is dropped. A crash in between
    /// leaves a duplicate, which downstream claim checks absorb; the
    /// reverse order could lose the job entirely.
    pub async fn nack(
        &self,
        claimed: &ClaimedJob,
        delay: chrono::Duration,
    ) -> Result<bool, QueueError> {
        let mut retried = claimed.job.clone();
        retried.attempt += 1;

        let exhausted = retried.attempt >= self.max_attempts;
        if exhausted {
            self.park(&retried).await?;
        } else {
            self.enqueue_in(&retried, delay).await?;
        }

        self.ack(claimed).await?;
        Ok(!exhausted)
    }

    /// Park a job on the dead letter list
    pub async fn park(&self, job: &Job) -> Result<(), QueueError> {
        let raw = serde_json::to_string(job).map_err(QueueError::Encode)?;
        let mut conn = self.pool.get().await?;

        let _: () = conn.lpush(self.dead_key(job.queue()), &raw).await?;

        tracing::warn!(
            job_id = %job.id,
            kind = job.kind(),
            attempts = job.attempt,
            "Job exhausted its attempts, parked on dead letter list"
        );
        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Move due scheduled jobs onto the ready list. Returns how many moved.
    pub async fn promote_due(&self, queue: &str, limit: usize) -> Result<u64, QueueError> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.pool.get().await?;

        let script = redis::Script::new(
            r#"
            local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
            for _, job in ipairs(due) do
                redis.call('LPUSH', KEYS[2], job)
            end
            if #due > 0 then
                redis.call('ZREM', KEYS[1], unpack(due))
            end
            return #due
            "#,
        );

        let moved: u64 = script
            .key(self.scheduled_key(queue))
            .key(self.ready_key(queue))
            .arg(now)
            .arg(limit)
            .invoke_async(&mut *conn)
            .await?;

        Ok(moved)
    }

    /// Requeue jobs whose lease deadline has passed.
    ///
    /// Each expired member is removed with a single ZREM first; only the
    /// remover that got it requeues, so two maintenance loops cannot
    /// duplicate a job.
    pub async fn reclaim_expired(&self, queue: &str, limit: usize) -> Result<u64, QueueError> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.pool.get().await?;

        let expired: Vec<String> = conn
            .zrangebyscore_limit(self.leased_key(queue), "-inf", now, 0, limit as isize)
            .await?;

        let mut reclaimed = 0u64;
        for raw in expired {
            let removed: u32 = conn.zrem(self.leased_key(queue), &raw).await?;
            if removed == 0 {
                continue;
            }

            let mut job: Job = match serde_json::from_str(&raw) {
                Ok(job) => job,
                Err(err) => {
                    tracing::error!(queue, error = %err, "Dropping undecodable leased job");
                    continue;
                }
            };

            job.attempt += 1;
            if job.attempt >= self.max_attempts {
                self.park(&job).await?;
            } else {
                tracing::warn!(
                    job_id = %job.id,
                    kind = job.kind(),
                    attempt = job.attempt,
                    "Lease expired, requeueing job"
                );
                let raw = serde_json::to_string(&job).map_err(QueueError::Encode)?;
                let _: () = conn.lpush(self.ready_key(queue), &raw).await?;
            }
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Depths of one queue's structures
    pub async fn depth(&self, queue: &str) -> Result<QueueDepth, QueueError> {
        let mut conn = self.pool.get().await?;

        let ready: u64 = conn.llen(self.ready_key(queue)).await?;
        let scheduled: u64 = conn.zcard(self.scheduled_key(queue)).await?;
        let leased: u64 = conn.zcard(self.leased_key(queue)).await?;
        let dead: u64 = conn.llen(self.dead_key(queue)).await?;

        Ok(QueueDepth {
            ready,
            scheduled,
            leased,
            dead,
        })
    }
}

/// Point-in-time member counts for one queue
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueDepth {
    pub ready: u64,
    pub scheduled: u64,
    pub leased: u64,
    pub dead: u64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_routing() {
        let campaign_id = Uuid::new_v4();

        let job = Job::new(JobPayload::CampaignDispatch { campaign_id });
        assert_eq!(job.queue(), QUEUE_CAMPAIGNS);
        assert_eq!(job.kind(), "campaign_dispatch");

        let job = Job::new(JobPayload::LogSend {
            campaign_id,
            log_id: Uuid::new_v4(),
        });
        assert_eq!(job.queue(), QUEUE_MESSAGES);

        let job = Job::new(JobPayload::StatsRefresh { campaign_id });
        assert_eq!(job.queue(), QUEUE_STATS);

        let job = Job::new(JobPayload::ConflictCheck {
            session_id: "shard-1".to_string(),
            attempt: 0,
        });
        assert_eq!(job.queue(), QUEUE_CONFLICT);
    }

    #[test]
    fn test_job_serialization_round_trip() {
        let job = Job::new(JobPayload::LogSend {
            campaign_id: Uuid::new_v4(),
            log_id: Uuid::new_v4(),
        });

        let raw = serde_json::to_string(&job).unwrap();
        assert!(raw.contains("\"kind\":\"log_send\""));

        let back: Job = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_redelivery_delay_caps() {
        assert_eq!(redelivery_delay(0), chrono::Duration::seconds(30));
        assert_eq!(redelivery_delay(1), chrono::Duration::seconds(60));
        assert_eq!(redelivery_delay(2), chrono::Duration::seconds(120));
        // Capped at 15 minutes no matter how many attempts
        assert_eq!(redelivery_delay(10), chrono::Duration::seconds(900));
        assert_eq!(redelivery_delay(u32::MAX), chrono::Duration::seconds(900));
    }

    #[test]
    fn test_queue_error_recoverability() {
        let err = QueueError::Decode(serde_json::from_str::<Job>("{").unwrap_err());
        assert!(!err.is_recoverable());
    }

    // Live-queue tests need a running Redis instance

    async fn test_queue() -> Queue {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let cfg = deadpool_redis::Config::from_url(url);
        let pool = cfg
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .unwrap();
        Queue::new(pool, format!("herald-test-{}", Uuid::new_v4()), 60, 3)
    }

    #[tokio::test]
    #[ignore = "Requires running Redis"]
    async fn test_enqueue_dequeue_ack() {
        let queue = test_queue().await;
        let job = Job::new(JobPayload::StatsRefresh {
            campaign_id: Uuid::new_v4(),
        });

        queue.enqueue(&job).await.unwrap();

        let claimed = queue.dequeue(QUEUE_STATS).await.unwrap().unwrap();
        assert_eq!(claimed.job, job);

        let depth = queue.depth(QUEUE_STATS).await.unwrap();
        assert_eq!(depth.ready, 0);
        assert_eq!(depth.leased, 1);

        queue.ack(&claimed).await.unwrap();
        let depth = queue.depth(QUEUE_STATS).await.unwrap();
        assert_eq!(depth.leased, 0);
    }

    #[tokio::test]
    #[ignore = "Requires running Redis"]
    async fn test_scheduled_promotion() {
        let queue = test_queue().await;
        let job = Job::new(JobPayload::CampaignDispatch {
            campaign_id: Uuid::new_v4(),
        });

        queue
            .enqueue_at(&job, Utc::now() - chrono::Duration::seconds(5))
            .await
            .unwrap();

        assert!(queue.dequeue(QUEUE_CAMPAIGNS).await.unwrap().is_none());

        let moved = queue.promote_due(QUEUE_CAMPAIGNS, 100).await.unwrap();
        assert_eq!(moved, 1);

        let claimed = queue.dequeue(QUEUE_CAMPAIGNS).await.unwrap().unwrap();
        assert_eq!(claimed.job.id, job.id);
        queue.ack(&claimed).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running Redis"]
    async fn test_nack_exhaustion_parks_job() {
        let queue = test_queue().await;
        let job = Job::new(JobPayload::ConflictCheck {
            session_id: "shard-9".to_string(),
            attempt: 0,
        });

        queue.enqueue(&job).await.unwrap();

        // max_attempts is 3: two nacks redeliver, the third parks
        for _ in 0..2 {
            let claimed = queue.dequeue(QUEUE_CONFLICT).await.unwrap().unwrap();
            let retried = queue
                .nack(&claimed, chrono::Duration::seconds(0))
                .await
                .unwrap();
            assert!(retried);
            queue.promote_due(QUEUE_CONFLICT, 100).await.unwrap();
        }

        let claimed = queue.dequeue(QUEUE_CONFLICT).await.unwrap().unwrap();
        let retried = queue
            .nack(&claimed, chrono::Duration::seconds(0))
            .await
            .unwrap();
        assert!(!retried);

        let depth = queue.depth(QUEUE_CONFLICT).await.unwrap();
        assert_eq!(depth.dead, 1);
    }
}
