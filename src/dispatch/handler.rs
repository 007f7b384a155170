//! Queue job handler
//!
//! The single [`JobHandler`] behind the worker pool. Routes each
//! payload to the engine, the stats refresher or the conflict resolver,
//! and applies the give-up policy when a job runs out of delivery
//! attempts: delivery state is always settled (log failed, campaign
//! failed, session resumed) rather than left behind a dead job.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::conflict::ConflictResolver;
use crate::error::Error;
use crate::metrics;
use crate::queue::{Job, JobHandler, JobPayload};
use crate::store::Store;

use super::engine::DispatchEngine;
use super::stats;

pub struct DispatchHandler {
    engine: Arc<DispatchEngine>,
    conflict: Arc<ConflictResolver>,
    store: Store,
    cache: Cache,
}

impl DispatchHandler {
    pub fn new(
        engine: Arc<DispatchEngine>,
        conflict: Arc<ConflictResolver>,
        store: Store,
        cache: Cache,
    ) -> Self {
        Self {
            engine,
            conflict,
            store,
            cache,
        }
    }
}

#[async_trait]
impl JobHandler for DispatchHandler {
    async fn handle(&self, job: &Job) -> Result<(), Error> {
        let result = match &job.payload {
            JobPayload::CampaignDispatch { campaign_id } => {
                self.engine.dispatch(*campaign_id).await.map(|_| ())
            }
            JobPayload::LogSend { campaign_id, log_id } => {
                self.engine.send_log(*campaign_id, *log_id).await.map(|_| ())
            }
            JobPayload::StatsRefresh { campaign_id } => {
                stats::refresh_stats(&self.store, &self.cache, *campaign_id)
                    .await
                    .map(|_| ())
            }
            JobPayload::ConflictCheck {
                session_id,
                attempt,
            } => self.conflict.run_check(session_id, *attempt).await.map(|_| ()),
        };

        let label = if result.is_ok() { "ok" } else { "error" };
        metrics::record_job_processed(job.queue(), label);

        result
    }

    async fn on_exhausted(&self, job: &Job, error: &Error) {
        metrics::record_job_processed(job.queue(), "exhausted");

        let settled = match &job.payload {
            JobPayload::LogSend { campaign_id, log_id } => {
                self.engine
                    .give_up_log(
                        *campaign_id,
                        *log_id,
                        &format!("job attempts exhausted: {error}"),
                    )
                    .await
            }
            JobPayload::CampaignDispatch { campaign_id } => {
                self.engine
                    .give_up_campaign(
                        *campaign_id,
                        &format!("dispatch attempts exhausted: {error}"),
                    )
                    .await
            }
            JobPayload::ConflictCheck { session_id, .. } => self
                .conflict
                .force_resume(session_id)
                .await
                .map(|_| ()),
            // Counters are derived state; the next refresh trigger
            // recomputes them from scratch
            JobPayload::StatsRefresh { campaign_id } => {
                tracing::warn!(%campaign_id, error = %error, "Stats refresh dead-lettered");
                Ok(())
            }
        };

        if let Err(err) = settled {
            tracing::error!(
                job_id = %job.id,
                kind = job.kind(),
                error = %err,
                "Failed to settle state for an exhausted job"
            );
        }
    }
}
