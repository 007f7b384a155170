//! Campaign log queries: materialization, claiming, outcomes
//!
//! The claim queries take row locks with `FOR UPDATE SKIP LOCKED` inside
//! an UPDATE, so N workers racing over the same log set each end up with
//! disjoint claims and a log can be `ongoing` in at most one worker.

use super::Store;
use crate::models::{CampaignLog, CampaignLogRetry, CampaignStats, LogStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use uuid::Uuid;

const LOG_COLUMNS: &str = "id, campaign_id, recipient_id, account_id, status, message_id, \
     error, retry_count, next_retry_at, sent_at, delivered_at, read_at, \
     created_at, updated_at";

fn map_log(row: &Row) -> Result<CampaignLog> {
    let status_raw: String = row.get("status");
    let status = LogStatus::parse(&status_raw)
        .with_context(|| format!("Unknown log status: {status_raw}"))?;

    Ok(CampaignLog {
        id: row.get("id"),
        campaign_id: row.get("campaign_id"),
        recipient_id: row.get("recipient_id"),
        account_id: row.get("account_id"),
        status,
        message_id: row.get("message_id"),
        error: row.get("error"),
        retry_count: row.get("retry_count"),
        next_retry_at: row.get("next_retry_at"),
        sent_at: row.get("sent_at"),
        delivered_at: row.get("delivered_at"),
        read_at: row.get("read_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Unresolved-work counts driving the completion decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenWork {
    /// Logs still `pending` or `ongoing`
    pub open: i64,
    /// `failed` logs with a scheduled retry
    pub awaiting_retry: i64,
}

impl OpenWork {
    /// True when nothing can send anymore
    pub fn is_resolved(&self) -> bool {
        self.open == 0 && self.awaiting_retry == 0
    }
}

impl Store {
    /// Create one log per recipient that has none yet. Running twice, or
    /// concurrently from two workers, never duplicates a recipient.
    pub async fn materialize_logs(&self, campaign_id: Uuid) -> Result<u64> {
        let client = self.pool().get().await?;

        let created = client
            .execute(
                r#"
                INSERT INTO campaign_logs (id, campaign_id, recipient_id, status)
                SELECT gen_random_uuid(), r.campaign_id, r.id, 'pending'
                FROM campaign_recipients r
                WHERE r.campaign_id = $1
                  AND NOT EXISTS (
                      SELECT 1 FROM campaign_logs l
                      WHERE l.campaign_id = r.campaign_id AND l.recipient_id = r.id
                  )
                ON CONFLICT (campaign_id, recipient_id) DO NOTHING
                "#,
                &[&campaign_id],
            )
            .await
            .context("Failed to materialize campaign logs")?;

        Ok(created)
    }

    /// Fetch one log
    pub async fn get_log(&self, id: Uuid) -> Result<Option<CampaignLog>> {
        let client = self.pool().get().await?;

        let row = client
            .query_opt(
                &format!("SELECT {LOG_COLUMNS} FROM campaign_logs WHERE id = $1"),
                &[&id],
            )
            .await
            .context("Failed to fetch log")?;

        row.as_ref().map(map_log).transpose()
    }

    /// All logs of a campaign
    pub async fn list_logs(&self, campaign_id: Uuid) -> Result<Vec<CampaignLog>> {
        let client = self.pool().get().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM campaign_logs \
                     WHERE campaign_id = $1 ORDER BY created_at"
                ),
                &[&campaign_id],
            )
            .await
            .context("Failed to list logs")?;

        rows.iter().map(map_log).collect()
    }

    /// Claim up to `limit` sendable logs, flipping them to `ongoing`.
    ///
    /// Sendable means `pending`, or `failed` with its retry time elapsed.
    /// The inner SELECT locks the rows and skips any a concurrent worker
    /// already holds, so claims never overlap.
    pub async fn claim_next_logs(
        &self,
        campaign_id: Uuid,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<CampaignLog>> {
        let client = self.pool().get().await?;

        let rows = client
            .query(
                &format!(
                    r#"
                    UPDATE campaign_logs
                    SET status = 'ongoing', updated_at = NOW()
                    WHERE id IN (
                        SELECT id FROM campaign_logs
                        WHERE campaign_id = $1
                          AND (status = 'pending'
                               OR (status = 'failed'
                                   AND next_retry_at IS NOT NULL
                                   AND next_retry_at <= $2))
                        ORDER BY created_at
                        LIMIT $3
                        FOR UPDATE SKIP LOCKED
                    )
                    RETURNING {LOG_COLUMNS}
                    "#
                ),
                &[&campaign_id, &now, &limit],
            )
            .await
            .context("Failed to claim logs")?;

        rows.iter().map(map_log).collect()
    }

    /// Claim a single log by id, used by scheduled retry jobs.
    /// Returns `None` when the log is no longer claimable.
    pub async fn claim_log(&self, log_id: Uuid, now: DateTime<Utc>) -> Result<Option<CampaignLog>> {
        let client = self.pool().get().await?;

        let row = client
            .query_opt(
                &format!(
                    r#"
                    UPDATE campaign_logs
                    SET status = 'ongoing', updated_at = NOW()
                    WHERE id = $1
                      AND (status = 'pending'
                           OR (status = 'failed'
                               AND next_retry_at IS NOT NULL
                               AND next_retry_at <= $2))
                    RETURNING {LOG_COLUMNS}
                    "#
                ),
                &[&log_id, &now],
            )
            .await
            .context("Failed to claim log")?;

        row.as_ref().map(map_log).transpose()
    }

    /// Ids of logs currently sendable, without claiming them. Used to
    /// fan individual send jobs out onto the queue.
    pub async fn list_sendable_log_ids(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let client = self.pool().get().await?;

        let rows = client
            .query(
                r#"
                SELECT id FROM campaign_logs
                WHERE campaign_id = $1
                  AND (status = 'pending'
                       OR (status = 'failed'
                           AND next_retry_at IS NOT NULL
                           AND next_retry_at <= $2))
                ORDER BY created_at
                "#,
                &[&campaign_id, &now],
            )
            .await
            .context("Failed to list sendable logs")?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    /// Hand a claimed log back without an attempt, e.g. when no account
    /// is available. The claim slot opens again for any worker.
    pub async fn release_log(&self, log_id: Uuid) -> Result<bool> {
        let client = self.pool().get().await?;

        let affected = client
            .execute(
                r#"
                UPDATE campaign_logs
                SET status = 'pending', updated_at = NOW()
                WHERE id = $1 AND status = 'ongoing'
                "#,
                &[&log_id],
            )
            .await
            .context("Failed to release log")?;

        Ok(affected > 0)
    }

    /// Record a successful send. Only moves `ongoing` logs, so a stale
    /// worker finishing after a reclaim cannot clobber a newer outcome.
    pub async fn mark_log_success(
        &self,
        log_id: Uuid,
        account_id: Uuid,
        message_id: Option<&str>,
    ) -> Result<bool> {
        let client = self.pool().get().await?;

        let affected = client
            .execute(
                r#"
                UPDATE campaign_logs
                SET status = 'success',
                    account_id = $2,
                    message_id = $3,
                    error = NULL,
                    next_retry_at = NULL,
                    sent_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1 AND status = 'ongoing'
                "#,
                &[&log_id, &account_id, &message_id],
            )
            .await
            .context("Failed to mark log success")?;

        Ok(affected > 0)
    }

    /// Record a failed attempt.
    ///
    /// With `retry_at` set, a retry-history row is appended and the log's
    /// mirror columns move in the same transaction, keeping
    /// `retry_count` equal to the history row count. With `retry_at`
    /// empty the log is terminally failed.
    pub async fn mark_log_failed(
        &self,
        log_id: Uuid,
        account_id: Option<Uuid>,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut client = self.pool().get().await?;
        let tx = client.transaction().await?;

        let affected = match retry_at {
            Some(at) => {
                let affected = tx
                    .execute(
                        r#"
                        UPDATE campaign_logs
                        SET status = 'failed',
                            account_id = COALESCE($2, account_id),
                            error = $3,
                            retry_count = retry_count + 1,
                            next_retry_at = $4,
                            updated_at = NOW()
                        WHERE id = $1 AND status = 'ongoing'
                        "#,
                        &[&log_id, &account_id, &error, &at],
                    )
                    .await
                    .context("Failed to mark log failed")?;

                if affected > 0 {
                    tx.execute(
                        r#"
                        INSERT INTO campaign_log_retries (id, log_id, error)
                        VALUES (gen_random_uuid(), $1, $2)
                        "#,
                        &[&log_id, &error],
                    )
                    .await
                    .context("Failed to append retry history")?;
                }

                affected
            }
            None => tx
                .execute(
                    r#"
                    UPDATE campaign_logs
                    SET status = 'failed',
                        account_id = COALESCE($2, account_id),
                        error = $3,
                        next_retry_at = NULL,
                        updated_at = NOW()
                    WHERE id = $1 AND status = 'ongoing'
                    "#,
                    &[&log_id, &account_id, &error],
                )
                .await
                .context("Failed to mark log failed")?,
        };

        tx.commit().await.context("Failed to commit log failure")?;

        Ok(affected > 0)
    }

    /// Retry history for a log, oldest first
    pub async fn list_log_retries(&self, log_id: Uuid) -> Result<Vec<CampaignLogRetry>> {
        let client = self.pool().get().await?;

        let rows = client
            .query(
                r#"
                SELECT id, log_id, error, created_at
                FROM campaign_log_retries
                WHERE log_id = $1 ORDER BY created_at
                "#,
                &[&log_id],
            )
            .await
            .context("Failed to list retry history")?;

        Ok(rows
            .iter()
            .map(|row| CampaignLogRetry {
                id: row.get("id"),
                log_id: row.get("log_id"),
                error: row.get("error"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Counts deciding whether a campaign can complete
    pub async fn count_open_work(&self, campaign_id: Uuid) -> Result<OpenWork> {
        let client = self.pool().get().await?;

        let row = client
            .query_one(
                r#"
                SELECT
                    COUNT(*) FILTER (WHERE status IN ('pending', 'ongoing')) AS open,
                    COUNT(*) FILTER (WHERE status = 'failed'
                                     AND next_retry_at IS NOT NULL) AS awaiting_retry
                FROM campaign_logs
                WHERE campaign_id = $1
                "#,
                &[&campaign_id],
            )
            .await
            .context("Failed to count open work")?;

        Ok(OpenWork {
            open: row.get("open"),
            awaiting_retry: row.get("awaiting_retry"),
        })
    }

    /// Recompute aggregate counters from log rows.
    ///
    /// Derives everything from the rows themselves so running it twice
    /// with no new sends yields identical numbers.
    pub async fn compute_stats(&self, campaign_id: Uuid) -> Result<CampaignStats> {
        let client = self.pool().get().await?;

        let row = client
            .query_one(
                r#"
                SELECT
                    COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE status = 'success') AS sent,
                    COUNT(*) FILTER (WHERE delivered_at IS NOT NULL) AS delivered,
                    COUNT(*) FILTER (WHERE read_at IS NOT NULL) AS read,
                    COUNT(*) FILTER (WHERE status = 'failed'
                                     AND next_retry_at IS NULL) AS failed,
                    COUNT(*) FILTER (WHERE status IN ('pending', 'ongoing')
                                     OR (status = 'failed'
                                         AND next_retry_at IS NOT NULL)) AS pending
                FROM campaign_logs
                WHERE campaign_id = $1
                "#,
                &[&campaign_id],
            )
            .await
            .context("Failed to compute stats")?;

        Ok(CampaignStats {
            total: row.get::<_, i64>("total") as i32,
            sent: row.get::<_, i64>("sent") as i32,
            delivered: row.get::<_, i64>("delivered") as i32,
            read: row.get::<_, i64>("read") as i32,
            failed: row.get::<_, i64>("failed") as i32,
            pending: row.get::<_, i64>("pending") as i32,
        })
    }

    /// Reset `ongoing` logs that have not moved since `cutoff` back to
    /// `pending`. Recovers work lost to a crashed or timed-out worker;
    /// the returned pairs let the caller re-enqueue a send per log.
    pub async fn reclaim_stuck_logs(&self, cutoff: DateTime<Utc>) -> Result<Vec<(Uuid, Uuid)>> {
        let client = self.pool().get().await?;

        let rows = client
            .query(
                r#"
                UPDATE campaign_logs
                SET status = 'pending', updated_at = NOW()
                WHERE status = 'ongoing' AND updated_at < $1
                RETURNING id, campaign_id
                "#,
                &[&cutoff],
            )
            .await
            .context("Failed to reclaim stuck logs")?;

        if !rows.is_empty() {
            tracing::warn!(count = rows.len(), "Reclaimed stuck campaign logs");
        }

        Ok(rows
            .iter()
            .map(|row| (row.get("id"), row.get("campaign_id")))
            .collect())
    }

    /// Record a delivery receipt by provider message id. Returns the
    /// campaign whose counters the receipt affects.
    pub async fn mark_delivered(&self, message_id: &str) -> Result<Option<Uuid>> {
        let client = self.pool().get().await?;

        let rows = client
            .query(
                r#"
                UPDATE campaign_logs
                SET delivered_at = COALESCE(delivered_at, NOW()), updated_at = NOW()
                WHERE message_id = $1
                RETURNING campaign_id
                "#,
                &[&message_id],
            )
            .await
            .context("Failed to mark delivered")?;

        Ok(rows.first().map(|r| r.get("campaign_id")))
    }

    /// Record a read receipt by provider message id. A read implies
    /// delivered. Returns the campaign whose counters the receipt
    /// affects.
    pub async fn mark_read(&self, message_id: &str) -> Result<Option<Uuid>> {
        let client = self.pool().get().await?;

        let rows = client
            .query(
                r#"
                UPDATE campaign_logs
                SET read_at = COALESCE(read_at, NOW()),
                    delivered_at = COALESCE(delivered_at, NOW()),
                    updated_at = NOW()
                WHERE message_id = $1
                RETURNING campaign_id
                "#,
                &[&message_id],
            )
            .await
            .context("Failed to mark read")?;

        Ok(rows.first().map(|r| r.get("campaign_id")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_work_resolution() {
        assert!(OpenWork::default().is_resolved());
        assert!(!OpenWork {
            open: 1,
            awaiting_retry: 0
        }
        .is_resolved());
        assert!(!OpenWork {
            open: 0,
            awaiting_retry: 2
        }
        .is_resolved());
    }
}
