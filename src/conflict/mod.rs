//! Mobile-activity conflict resolver
//!
//! Simultaneous automated and manual sending from one WhatsApp account
//! is a leading cause of provider-side suspension. When a session shows
//! manual (non-web) activity, every ongoing campaign bound to it is
//! paused, and a cooldown-scheduled check resumes them once the session
//! has been quiet long enough. Checks cap out after a configured number
//! of attempts and then force the resume, trading interlock strictness
//! for campaign availability.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cache::Cache;
use crate::config::Config;
use crate::error::Result;
use crate::metrics;
use crate::models::Campaign;
use crate::notifications::{CampaignEvent, Notifier};
use crate::queue::{Job, JobPayload, Queue};
use crate::store::Store;

/// Pause reason persisted on the campaign row
const PAUSE_REASON: &str = "mobile activity detected on session";

/// Resolver tuning taken from [`crate::config::ConflictConfig`]
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Base cooldown before a resume check; scaled by speed tier
    pub base_cooldown_secs: u64,

    /// Resume checks before campaigns are force-resumed
    pub max_resume_attempts: u32,

    /// Mobile inactivity required before a resume (seconds)
    pub inactivity_window_secs: u64,
}

impl ResolverConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_cooldown_secs: config.conflict.base_cooldown_secs,
            max_resume_attempts: config.conflict.max_resume_attempts,
            inactivity_window_secs: config.conflict.inactivity_window_secs,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            base_cooldown_secs: 180,
            max_resume_attempts: 5,
            inactivity_window_secs: 300,
        }
    }
}

/// What one mobile-activity event did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PauseReport {
    /// Campaigns actually transitioned to `paused_mobile`
    pub paused: usize,

    /// A resume check was scheduled
    pub check_scheduled: bool,
}

/// Result of one resume check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Nothing is paused on this session anymore
    Idle,

    /// The session was quiet long enough; campaigns resumed
    Resumed(usize),

    /// The attempt cap was hit; campaigns resumed regardless
    Forced(usize),

    /// Still active; the check was re-queued
    Rescheduled { attempt: u32, delay_secs: u64 },
}

/// Pauses and resumes campaigns around manual session use
pub struct ConflictResolver {
    store: Store,
    cache: Cache,
    queue: Queue,
    notifier: Arc<Notifier>,
    config: ResolverConfig,
}

impl ConflictResolver {
    pub fn new(
        store: Store,
        cache: Cache,
        queue: Queue,
        notifier: Arc<Notifier>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            cache,
            queue,
            notifier,
            config,
        }
    }

    /// React to manual activity on a session: record the timestamp and
    /// pause every ongoing campaign bound to that session.
    ///
    /// Re-entrant by construction. The activity timestamp only moves
    /// forward, the pause is a conditional update per campaign, and an
    /// event landing while campaigns are already paused schedules
    /// nothing new because the pending check re-reads the timestamp.
    pub async fn handle_mobile_activity(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<PauseReport> {
        self.cache.record_mobile_activity(session_id, at).await?;
        metrics::record_mobile_activity_event();

        let campaigns = self
            .store
            .list_ongoing_campaigns_on_session(session_id)
            .await?;
        if campaigns.is_empty() {
            tracing::debug!(session_id, "Mobile activity on a session with no ongoing campaign");
            return Ok(PauseReport::default());
        }

        let mut report = PauseReport::default();

        for campaign in &campaigns {
            if self
                .store
                .pause_campaign_for_mobile(campaign.id, PAUSE_REASON, session_id)
                .await?
            {
                report.paused += 1;
                metrics::record_conflict_pause();
                tracing::info!(
                    campaign_id = %campaign.id,
                    session_id,
                    pause_count = campaign.pause_count + 1,
                    "Campaign paused for mobile activity"
                );
                self.notifier
                    .notify(CampaignEvent::paused(campaign, session_id, PAUSE_REASON))
                    .await;
            }
        }

        if report.paused > 0 {
            let delay = cooldown_secs(&campaigns, self.config.base_cooldown_secs);
            self.schedule_check(session_id, 1, delay).await?;
            report.check_scheduled = true;
        }

        Ok(report)
    }

    /// One resume check for a paused session. The entry point for
    /// `ConflictCheck` jobs.
    pub async fn run_check(&self, session_id: &str, attempt: u32) -> Result<CheckOutcome> {
        let campaigns = self
            .store
            .list_campaigns_paused_by_session(session_id)
            .await?;
        if campaigns.is_empty() {
            tracing::debug!(session_id, attempt, "Resume check found nothing paused");
            return Ok(CheckOutcome::Idle);
        }

        // A missing timestamp means the record expired, which is older
        // than any window we would check against
        let quiet = match self.cache.mobile_inactivity_secs(session_id).await? {
            Some(secs) => secs >= self.config.inactivity_window_secs as i64,
            None => true,
        };

        if quiet {
            let resumed = self.resume_all(&campaigns, false).await?;
            tracing::info!(session_id, attempt, resumed, "Session quiet, campaigns resumed");
            return Ok(CheckOutcome::Resumed(resumed));
        }

        if attempt >= self.config.max_resume_attempts {
            let resumed = self.resume_all(&campaigns, true).await?;
            tracing::warn!(
                session_id,
                attempt,
                resumed,
                "Resume attempt cap reached, campaigns force-resumed despite mobile activity"
            );
            return Ok(CheckOutcome::Forced(resumed));
        }

        let delay_secs = cooldown_secs(&campaigns, self.config.base_cooldown_secs);
        let next = attempt + 1;
        self.schedule_check(session_id, next, delay_secs).await?;
        tracing::info!(
            session_id,
            attempt,
            next_attempt = next,
            delay_secs,
            "Session still active, resume check re-queued"
        );

        Ok(CheckOutcome::Rescheduled {
            attempt: next,
            delay_secs,
        })
    }

    /// Last resort when the check job itself runs out of delivery
    /// attempts: resume whatever is still paused so campaigns never
    /// stay wedged behind a lost job.
    pub async fn force_resume(&self, session_id: &str) -> Result<usize> {
        let campaigns = self
            .store
            .list_campaigns_paused_by_session(session_id)
            .await?;
        if campaigns.is_empty() {
            return Ok(0);
        }

        let resumed = self.resume_all(&campaigns, true).await?;
        tracing::warn!(session_id, resumed, "Resume check lost, campaigns force-resumed");
        Ok(resumed)
    }

    async fn resume_all(&self, campaigns: &[Campaign], forced: bool) -> Result<usize> {
        let mut resumed = 0;

        for campaign in campaigns {
            if self.store.resume_campaign(campaign.id).await? {
                resumed += 1;
                metrics::record_conflict_resume(forced);
                self.notifier
                    .notify(CampaignEvent::resumed(campaign, forced))
                    .await;

                // Kick dispatch so the remaining logs go back out
                self.queue
                    .enqueue(&Job::new(JobPayload::CampaignDispatch {
                        campaign_id: campaign.id,
                    }))
                    .await?;
            }
        }

        Ok(resumed)
    }

    async fn schedule_check(&self, session_id: &str, attempt: u32, delay_secs: u64) -> Result<()> {
        let job = Job::new(JobPayload::ConflictCheck {
            session_id: session_id.to_string(),
            attempt,
        });
        self.queue
            .enqueue_in(&job, chrono::Duration::seconds(delay_secs as i64))
            .await?;
        Ok(())
    }
}

/// Cooldown for a batch of campaigns: the longest tier cooldown wins,
/// so a shared session is checked no sooner than its slowest campaign
/// allows.
fn cooldown_secs(campaigns: &[Campaign], base_secs: u64) -> u64 {
    campaigns
        .iter()
        .map(|c| c.speed_tier.resume_cooldown_secs(base_secs))
        .max()
        .unwrap_or(base_secs)
}
