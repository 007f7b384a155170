//! Campaign dispatch engine
//!
//! Drives a campaign from materialization through per-log sends to
//! completion. `dispatch` fans individual log sends out as queue jobs
//! so no single job outlives its lease at slow speed tiers; `drain`
//! runs the same send path in a foreground loop for the CLI. Both
//! converge on the claim in the store, so a log is sent at most once
//! no matter how many workers race for it.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use governor::{
    clock::DefaultClock,
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter,
};
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::gateway::provider::{shape_payload, OutboundMessage};
use crate::gateway::{GatewayClient, SendOutcome};
use crate::metrics;
use crate::models::{
    Account, Campaign, CampaignLog, CampaignRecipient, LogStatus, SpeedTier, Workspace,
};
use crate::notifications::{CampaignEvent, Notifier};
use crate::queue::{Job, JobPayload, Queue};
use crate::registry::AccountRegistry;
use crate::router::InstanceRouter;
use crate::selector::AccountSelector;
use crate::store::Store;
use crate::utils::error::DispatchError;
use crate::utils::{normalize_phone, parse_utc_offset, truncate_text};

use super::payload::build_message;

/// Persisted error messages are bounded to this length
const MAX_ERROR_LEN: usize = 500;

/// How often the stuck-log reclaim loop runs
const RECLAIM_INTERVAL: Duration = Duration::from_secs(60);

type KeyedLimiter = RateLimiter<Uuid, DefaultKeyedStateStore<Uuid>, DefaultClock>;

// ============================================================================
// Send pacing
// ============================================================================

/// Per-account send pacing, one limiter per speed tier.
///
/// Keyed by account id so campaigns on different accounts never wait on
/// each other, while every campaign sharing an account shares its pace.
struct SendLimiters {
    slow: KeyedLimiter,
    normal: KeyedLimiter,
    fast: KeyedLimiter,
}

impl SendLimiters {
    fn new() -> Self {
        Self {
            slow: RateLimiter::keyed(Self::per_minute(SpeedTier::Slow.messages_per_minute())),
            normal: RateLimiter::keyed(Self::per_minute(SpeedTier::Normal.messages_per_minute())),
            fast: RateLimiter::keyed(Self::per_minute(SpeedTier::Fast.messages_per_minute())),
        }
    }

    fn per_minute(count: u32) -> Quota {
        let rate = NonZeroU32::new(count).unwrap_or(NonZeroU32::new(1).unwrap());
        Quota::per_minute(rate)
    }

    async fn acquire(&self, tier: SpeedTier, account_id: Uuid) {
        match tier {
            SpeedTier::Slow => self.slow.until_key_ready(&account_id).await,
            SpeedTier::Normal => self.normal.until_key_ready(&account_id).await,
            SpeedTier::Fast => self.fast.until_key_ready(&account_id).await,
        }
    }
}

// ============================================================================
// Configuration and reports
// ============================================================================

/// Engine tuning taken from [`crate::config::DispatchConfig`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Logs claimed per foreground drain batch
    pub batch_size: usize,

    /// Age after which an `ongoing` log is reset to `pending`
    pub stuck_log_secs: u64,
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.dispatch.batch_size,
            stuck_log_secs: config.dispatch.stuck_log_secs,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            stuck_log_secs: 600,
        }
    }
}

/// What one `dispatch` call did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Log rows created by materialization
    pub materialized: u64,

    /// Send jobs fanned out onto the message queue
    pub enqueued: usize,

    /// Campaign reached `completed` during this call
    pub completed: bool,
}

/// Terminal state of one log after `send_log`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    /// An instance accepted the message
    Sent,

    /// The attempt failed and a retry was scheduled
    RetryScheduled,

    /// The log failed with no retry remaining
    FailedTerminal,

    /// Nothing to do: claim lost, campaign paused or already terminal
    Skipped,
}

/// Tally of a foreground drain
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub materialized: u64,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
    pub completed: bool,
}

impl DrainReport {
    fn tally(&mut self, outcome: LogOutcome) {
        match outcome {
            LogOutcome::Sent => self.sent += 1,
            LogOutcome::RetryScheduled => self.retried += 1,
            LogOutcome::FailedTerminal => self.failed += 1,
            LogOutcome::Skipped => self.skipped += 1,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Orchestrates selection, routing, pacing and persistence for sends
pub struct DispatchEngine {
    store: Store,
    queue: Queue,
    selector: AccountSelector,
    registry: AccountRegistry,
    router: InstanceRouter,
    gateway: Arc<GatewayClient>,
    notifier: Arc<Notifier>,
    limiters: SendLimiters,
    config: EngineConfig,
}

impl DispatchEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        queue: Queue,
        selector: AccountSelector,
        registry: AccountRegistry,
        router: InstanceRouter,
        gateway: Arc<GatewayClient>,
        notifier: Arc<Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            selector,
            registry,
            router,
            gateway,
            notifier,
            limiters: SendLimiters::new(),
            config,
        }
    }

    // =========================================================================
    // Campaign-level dispatch
    // =========================================================================

    /// Materialize a campaign and fan its sendable logs out as queue
    /// jobs. Safe to call any number of times in any state: every
    /// transition it performs is a conditional update, and duplicate
    /// send jobs are absorbed by the log claim.
    pub async fn dispatch(&self, campaign_id: Uuid) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();

        let Some(campaign) = self.prepare_campaign(campaign_id, &mut report).await? else {
            return Ok(report);
        };

        let now = Utc::now();
        let log_ids = self.store.list_sendable_log_ids(campaign_id, now).await?;

        for log_id in &log_ids {
            let job = Job::new(JobPayload::LogSend {
                campaign_id,
                log_id: *log_id,
            });
            self.queue.enqueue(&job).await?;
        }
        report.enqueued = log_ids.len();

        self.queue
            .enqueue(&Job::new(JobPayload::StatsRefresh { campaign_id }))
            .await?;

        tracing::info!(
            %campaign_id,
            materialized = report.materialized,
            enqueued = report.enqueued,
            "Campaign dispatched"
        );

        if report.enqueued == 0 {
            report.completed = self.maybe_complete(&campaign).await?;
        }

        Ok(report)
    }

    /// Foreground dispatch for the CLI: claims and sends batches until
    /// no sendable log remains. Retries land in the future, so open
    /// retry work can remain after a drain returns.
    pub async fn drain(&self, campaign_id: Uuid) -> Result<DrainReport> {
        let mut dispatch_report = DispatchReport::default();
        let mut report = DrainReport::default();

        let Some(campaign) = self
            .prepare_campaign(campaign_id, &mut dispatch_report)
            .await?
        else {
            report.materialized = dispatch_report.materialized;
            report.completed = dispatch_report.completed;
            return Ok(report);
        };
        report.materialized = dispatch_report.materialized;

        let workspace = self.workspace_for(&campaign).await?;

        loop {
            let logs = self
                .store
                .claim_next_logs(campaign_id, self.config.batch_size as i64, Utc::now())
                .await?;
            if logs.is_empty() {
                break;
            }

            for log in logs {
                let outcome = self.process_claimed(&campaign, &workspace, log).await?;
                report.tally(outcome);
            }
        }

        report.completed = self.maybe_complete(&campaign).await?;
        Ok(report)
    }

    /// Load the campaign and run everything up to the send fan-out:
    /// state gating, schedule gating, materialization, the flip to
    /// `ongoing` and the account probe. Returns `None` when there is
    /// nothing to send right now.
    async fn prepare_campaign(
        &self,
        campaign_id: Uuid,
        report: &mut DispatchReport,
    ) -> Result<Option<Campaign>> {
        let Some(campaign) = self.store.get_campaign(campaign_id).await? else {
            return Err(DispatchError::CampaignNotFound(campaign_id).into());
        };

        if campaign.status.is_terminal() {
            tracing::debug!(%campaign_id, status = %campaign.status, "Campaign already terminal");
            return Ok(None);
        }
        if !campaign.status.is_dispatchable() {
            tracing::debug!(
                %campaign_id,
                status = %campaign.status,
                "Campaign paused, the conflict resolver owns the resume"
            );
            return Ok(None);
        }

        let workspace = self.workspace_for(&campaign).await?;

        if let Some(scheduled_at) = campaign.scheduled_at {
            if !schedule_due(scheduled_at, &workspace, Utc::now()) {
                let job = Job::new(JobPayload::CampaignDispatch { campaign_id });
                self.queue.enqueue_at(&job, scheduled_at).await?;
                tracing::info!(
                    %campaign_id,
                    %scheduled_at,
                    timezone = %workspace.timezone,
                    "Campaign not due yet, dispatch re-queued for its schedule"
                );
                return Ok(None);
            }
        }

        report.materialized = self.store.materialize_logs(campaign_id).await?;

        if self.store.mark_campaign_ongoing(campaign_id).await? {
            tracing::info!(%campaign_id, "Campaign started");
            self.notifier.notify(CampaignEvent::started(&campaign)).await;
        }

        // One upfront probe so a workspace with nothing connected fails
        // the campaign instead of parking every log job individually
        if self.selector.select_best_account(&campaign).await?.is_none() {
            self.fail_whole_campaign(&campaign, "no suitable account")
                .await?;
            return Ok(None);
        }

        Ok(Some(campaign))
    }

    // =========================================================================
    // Per-log send
    // =========================================================================

    /// Claim one log and send it. The entry point for `LogSend` jobs.
    pub async fn send_log(&self, campaign_id: Uuid, log_id: Uuid) -> Result<LogOutcome> {
        let Some(campaign) = self.store.get_campaign(campaign_id).await? else {
            return Err(DispatchError::CampaignNotFound(campaign_id).into());
        };

        if !campaign.status.is_dispatchable() {
            tracing::debug!(
                %campaign_id,
                %log_id,
                status = %campaign.status,
                "Campaign not sendable, leaving the log untouched"
            );
            return Ok(LogOutcome::Skipped);
        }

        let workspace = self.workspace_for(&campaign).await?;

        let Some(log) = self.store.claim_log(log_id, Utc::now()).await? else {
            tracing::debug!(%campaign_id, %log_id, "Log claimed elsewhere or already settled");
            return Ok(LogOutcome::Skipped);
        };

        self.process_claimed(&campaign, &workspace, log).await
    }

    /// Send one already-claimed log through the account cascade.
    async fn process_claimed(
        &self,
        campaign: &Campaign,
        workspace: &Workspace,
        log: CampaignLog,
    ) -> Result<LogOutcome> {
        let Some(recipient) = self.store.get_recipient(log.recipient_id).await? else {
            tracing::warn!(log_id = %log.id, recipient_id = %log.recipient_id, "Recipient row missing");
            return self
                .finish_terminal(campaign, workspace, &log, None, None, "recipient missing")
                .await;
        };

        let phone = match normalize_phone(&recipient.phone) {
            Ok(phone) => phone,
            Err(err) => {
                return self
                    .finish_terminal(
                        campaign,
                        workspace,
                        &log,
                        Some(&recipient.phone),
                        None,
                        &err.to_string(),
                    )
                    .await;
            }
        };

        let message = match build_message(campaign, &recipient) {
            Ok(message) => message,
            Err(err) => {
                return self
                    .finish_terminal(
                        campaign,
                        workspace,
                        &log,
                        Some(&recipient.phone),
                        None,
                        &err.to_string(),
                    )
                    .await;
            }
        };

        let Some(primary) = self.selector.select_best_account(campaign).await? else {
            // Hand the claim back before failing the campaign so the row
            // is not left ongoing behind a terminal campaign
            self.store.release_log(log.id).await?;
            self.fail_whole_campaign(campaign, "no suitable account")
                .await?;
            return Ok(LogOutcome::Skipped);
        };

        let mut last_account = primary.id;
        let mut last_error;

        match self.attempt_send(campaign, &primary, &phone, &message).await? {
            SendOutcome::Sent { message_id } => {
                return self
                    .finish_sent(campaign, &log, &primary, message_id.as_deref())
                    .await;
            }
            SendOutcome::Failed { kind, message } => {
                if !kind.allows_fallback() {
                    return self
                        .finish_terminal(
                            campaign,
                            workspace,
                            &log,
                            Some(&recipient.phone),
                            Some(primary.id),
                            &message,
                        )
                        .await;
                }
                last_error = message;
            }
        }

        for fallback in self
            .selector
            .fallback_accounts(campaign, primary.id)
            .await?
        {
            metrics::record_fallback_attempt();
            tracing::info!(
                campaign_id = %campaign.id,
                log_id = %log.id,
                account_id = %fallback.id,
                "Retrying send on a fallback account"
            );

            last_account = fallback.id;
            match self.attempt_send(campaign, &fallback, &phone, &message).await? {
                SendOutcome::Sent { message_id } => {
                    return self
                        .finish_sent(campaign, &log, &fallback, message_id.as_deref())
                        .await;
                }
                SendOutcome::Failed { kind, message } => {
                    if !kind.allows_fallback() {
                        return self
                            .finish_terminal(
                                campaign,
                                workspace,
                                &log,
                                Some(&recipient.phone),
                                Some(fallback.id),
                                &message,
                            )
                            .await;
                    }
                    last_error = message;
                }
            }
        }

        self.finish_attempt_failed(campaign, workspace, &log, &recipient, last_account, &last_error)
            .await
    }

    /// One paced send through one account's routed instance
    async fn attempt_send(
        &self,
        campaign: &Campaign,
        account: &Account,
        phone: &str,
        message: &OutboundMessage,
    ) -> Result<SendOutcome> {
        self.limiters.acquire(campaign.speed_tier, account.id).await;

        let route = self.router.route_for(account.id).await?;
        let payload = shape_payload(account.provider, phone, message);

        let provider = account.provider.as_str();
        let timer = metrics::start_send_timer(provider);
        let outcome = self
            .gateway
            .send_message(&route.instance_url, &account.session_id, &payload)
            .await;
        drop(timer);

        match &outcome {
            SendOutcome::Sent { .. } => {
                metrics::record_message_sent(provider);
                self.registry.record_send(account.id, true).await?;
            }
            SendOutcome::Failed { kind, message } => {
                metrics::record_message_failed(provider, kind.as_str());
                self.registry.record_send(account.id, false).await?;
                tracing::warn!(
                    campaign_id = %campaign.id,
                    account_id = %account.id,
                    kind = kind.as_str(),
                    error = %message,
                    "Send attempt failed"
                );
            }
        }

        Ok(outcome)
    }

    // =========================================================================
    // Terminal transitions
    // =========================================================================

    async fn finish_sent(
        &self,
        campaign: &Campaign,
        log: &CampaignLog,
        account: &Account,
        message_id: Option<&str>,
    ) -> Result<LogOutcome> {
        self.store
            .mark_log_success(log.id, account.id, message_id)
            .await?;

        if campaign.account_id != Some(account.id) {
            self.store
                .set_campaign_account(campaign.id, account.id)
                .await?;
        }

        self.queue
            .enqueue(&Job::new(JobPayload::StatsRefresh {
                campaign_id: campaign.id,
            }))
            .await?;

        tracing::info!(
            campaign_id = %campaign.id,
            log_id = %log.id,
            account_id = %account.id,
            message_id = message_id.unwrap_or("-"),
            "Message sent"
        );

        self.maybe_complete(campaign).await?;
        Ok(LogOutcome::Sent)
    }

    /// Fail a log with no retry, moving the contact to the workspace's
    /// failed group when one is configured.
    async fn finish_terminal(
        &self,
        campaign: &Campaign,
        workspace: &Workspace,
        log: &CampaignLog,
        phone: Option<&str>,
        account_id: Option<Uuid>,
        error: &str,
    ) -> Result<LogOutcome> {
        let error = truncate_text(error, MAX_ERROR_LEN);
        self.store
            .mark_log_failed(log.id, account_id, &error, None)
            .await?;

        if let (Some(group_id), Some(phone)) = (workspace.failed_group_id, phone) {
            self.store.add_to_group(group_id, phone).await?;
        }

        tracing::warn!(
            campaign_id = %campaign.id,
            log_id = %log.id,
            error = %error,
            "Log failed with no retry"
        );

        self.maybe_complete(campaign).await?;
        Ok(LogOutcome::FailedTerminal)
    }

    /// Every account failed recoverably: schedule the next retry, or
    /// give the log up once the workspace's interval list is spent.
    async fn finish_attempt_failed(
        &self,
        campaign: &Campaign,
        workspace: &Workspace,
        log: &CampaignLog,
        recipient: &CampaignRecipient,
        account_id: Uuid,
        error: &str,
    ) -> Result<LogOutcome> {
        let retry_count = log.retry_count.max(0) as usize;

        let Some(delay) = workspace.retry_interval(retry_count) else {
            return self
                .finish_terminal(
                    campaign,
                    workspace,
                    log,
                    Some(&recipient.phone),
                    Some(account_id),
                    error,
                )
                .await;
        };

        let retry_at = Utc::now() + delay;
        let error = truncate_text(error, MAX_ERROR_LEN);
        self.store
            .mark_log_failed(log.id, Some(account_id), &error, Some(retry_at))
            .await?;

        let job = Job::new(JobPayload::LogSend {
            campaign_id: campaign.id,
            log_id: log.id,
        });
        self.queue.enqueue_at(&job, retry_at).await?;

        metrics::record_retry_scheduled();
        tracing::info!(
            campaign_id = %campaign.id,
            log_id = %log.id,
            attempt = retry_count + 1,
            %retry_at,
            "Retry scheduled"
        );

        Ok(LogOutcome::RetryScheduled)
    }

    /// Complete the campaign when no open or retry-eligible work
    /// remains. Conditional, so exactly one caller notifies.
    async fn maybe_complete(&self, campaign: &Campaign) -> Result<bool> {
        let open = self.store.count_open_work(campaign.id).await?;
        if !open.is_resolved() {
            return Ok(false);
        }

        if self.store.complete_campaign(campaign.id).await? {
            metrics::record_campaign_finished(true);
            tracing::info!(campaign_id = %campaign.id, "Campaign completed");
            self.notifier
                .notify(CampaignEvent::completed(campaign))
                .await;
            return Ok(true);
        }

        Ok(false)
    }

    async fn fail_whole_campaign(&self, campaign: &Campaign, reason: &str) -> Result<()> {
        if self.store.fail_campaign(campaign.id, reason).await? {
            metrics::record_campaign_finished(false);
            tracing::warn!(campaign_id = %campaign.id, reason, "Campaign failed");
            self.notifier
                .notify(CampaignEvent::failed(campaign, reason))
                .await;
        }
        Ok(())
    }

    /// Last resort for a log whose queue job ran out of delivery
    /// attempts: fail it so the row never sits behind a lost job.
    pub async fn give_up_log(&self, campaign_id: Uuid, log_id: Uuid, error: &str) -> Result<()> {
        let Some(campaign) = self.store.get_campaign(campaign_id).await? else {
            return Ok(());
        };
        let workspace = self.workspace_for(&campaign).await?;

        // Claim so a still-pending row can be failed. A row that stayed
        // ongoing is the dead job's own claim and can be failed as is.
        let log = match self.store.claim_log(log_id, Utc::now()).await? {
            Some(log) => log,
            None => match self.store.get_log(log_id).await? {
                Some(log) if log.status == LogStatus::Ongoing => log,
                _ => return Ok(()),
            },
        };

        let phone = self
            .store
            .get_recipient(log.recipient_id)
            .await?
            .map(|r| r.phone);

        self.finish_terminal(
            &campaign,
            &workspace,
            &log,
            phone.as_deref(),
            None,
            error,
        )
        .await?;
        Ok(())
    }

    /// Campaign-level counterpart of [`Self::give_up_log`].
    pub async fn give_up_campaign(&self, campaign_id: Uuid, reason: &str) -> Result<()> {
        let Some(campaign) = self.store.get_campaign(campaign_id).await? else {
            return Ok(());
        };
        self.fail_whole_campaign(&campaign, reason).await
    }

    async fn workspace_for(&self, campaign: &Campaign) -> Result<Workspace> {
        self.store
            .get_workspace(campaign.workspace_id)
            .await?
            .ok_or_else(|| DispatchError::WorkspaceNotFound(campaign.workspace_id).into())
    }

    // =========================================================================
    // Stuck-log reclaim
    // =========================================================================

    /// Reset `ongoing` logs older than the configured threshold back to
    /// `pending` and re-enqueue a send for each, so a killed worker
    /// never wedges a row. Duplicate jobs are absorbed by the claim.
    pub async fn reclaim_stuck(&self) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.stuck_log_secs as i64);
        let reclaimed = self.store.reclaim_stuck_logs(cutoff).await?;

        for (log_id, campaign_id) in &reclaimed {
            let job = Job::new(JobPayload::LogSend {
                campaign_id: *campaign_id,
                log_id: *log_id,
            });
            self.queue.enqueue(&job).await?;
        }

        let count = reclaimed.len() as u64;
        if count > 0 {
            metrics::record_logs_reclaimed(count);
            tracing::warn!(reclaimed = count, "Stuck ongoing logs reset and re-queued");
        }

        Ok(count)
    }

    /// Periodic reclaim, stopped through the shutdown channel.
    pub async fn run_reclaim_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(RECLAIM_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }

            if let Err(err) = self.reclaim_stuck().await {
                tracing::error!(error = %err, "Stuck-log reclaim failed");
            }
        }

        tracing::debug!("Reclaim loop stopped");
    }
}

/// Whether a scheduled instant has elapsed, evaluated in the
/// workspace's UTC offset. A malformed offset logs once per call and
/// gates in UTC.
fn schedule_due(scheduled_at: DateTime<Utc>, workspace: &Workspace, now: DateTime<Utc>) -> bool {
    match parse_utc_offset(&workspace.timezone) {
        Ok(offset) => now.with_timezone(&offset) >= scheduled_at.with_timezone(&offset),
        Err(err) => {
            tracing::warn!(
                workspace_id = %workspace.id,
                timezone = %workspace.timezone,
                error = %err,
                "Unparseable workspace timezone, gating the schedule in UTC"
            );
            now >= scheduled_at
        }
    }
}
