//! Session health monitor
//!
//! Sweeps the scorable accounts on a fixed interval, recomputing each
//! health score from scratch. Scores never carry over between sweeps,
//! so a recovered session is back at full health the moment its inputs
//! are clean. Sessions scoring below the reconnect threshold get an
//! automatic reconnect attempt through their owning instance; each
//! account is evaluated on its own and one failure never stops the
//! sweep.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::config::Config;
use crate::gateway::GatewayClient;
use crate::metrics;
use crate::models::{Account, AccountStatus};
use crate::registry::AccountRegistry;
use crate::router::InstanceRouter;

/// Penalty for a session that is not connected
const PENALTY_NOT_CONNECTED: i32 = 50;

/// Penalty for no observed activity within the inactivity window
const PENALTY_INACTIVE: i32 = 20;

/// Penalty per consecutive failed send
const PENALTY_PER_FAILURE: i32 = 10;

/// Cap on the accumulated failure penalty
const FAILURE_PENALTY_CAP: i32 = 30;

/// Health score for one account, recomputed from scratch.
///
/// Starts at 100. Not connected costs 50, no activity inside the
/// window costs 20, each consecutive failure costs 10 up to 30, and
/// ban risk costs up to 50 (half its [0,100] value). The result is
/// clamped to [0,100].
pub fn compute_score(account: &Account, now: DateTime<Utc>, inactivity_secs: i64) -> i32 {
    let mut score = 100;

    if account.status != AccountStatus::Connected {
        score -= PENALTY_NOT_CONNECTED;
    }

    let inactive = match account.last_activity_at {
        Some(last) => (now - last).num_seconds() > inactivity_secs,
        None => true,
    };
    if inactive {
        score -= PENALTY_INACTIVE;
    }

    score -= (account.consecutive_failures * PENALTY_PER_FAILURE).min(FAILURE_PENALTY_CAP);
    score -= account.ban_risk.clamp(0, 100) / 2;

    score.clamp(0, 100)
}

/// Health monitor settings
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sweep interval
    pub check_interval: Duration,

    /// Scores below this trigger an automatic reconnect attempt
    pub reconnect_threshold: i32,

    /// Window with no activity before the inactivity penalty applies
    pub inactivity_secs: i64,
}

impl MonitorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_interval: Duration::from_secs(config.health.check_interval_secs),
            reconnect_threshold: config.health.reconnect_threshold,
            inactivity_secs: config.health.inactivity_secs as i64,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            reconnect_threshold: 40,
            inactivity_secs: 3600,
        }
    }
}

/// Outcome of one monitoring sweep
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub scored: usize,
    pub connected: usize,
    pub reconnect_attempts: usize,
    pub reconnect_failures: usize,
}

/// Periodic health scoring and auto-reconnect
pub struct HealthMonitor {
    registry: AccountRegistry,
    router: InstanceRouter,
    gateway: GatewayClient,
    config: MonitorConfig,
}

impl HealthMonitor {
    pub fn new(
        registry: AccountRegistry,
        router: InstanceRouter,
        gateway: GatewayClient,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            router,
            gateway,
            config,
        }
    }

    /// Score every eligible account once
    pub async fn run_sweep(&self) -> Result<SweepReport> {
        let accounts = self.registry.list_scorable().await?;
        let now = Utc::now();
        let mut report = SweepReport::default();

        for account in &accounts {
            if let Err(err) = self.evaluate(account, now, &mut report).await {
                tracing::error!(
                    account_id = %account.id,
                    session_id = %account.session_id,
                    error = %err,
                    "Health evaluation failed"
                );
            }
        }

        metrics::update_connected_accounts(report.connected);

        tracing::debug!(
            scored = report.scored,
            connected = report.connected,
            reconnects = report.reconnect_attempts,
            "Health sweep finished"
        );

        Ok(report)
    }

    async fn evaluate(
        &self,
        account: &Account,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        let mut account = account.clone();

        // The instance owns the ban-risk signal; pull the latest
        // reading so an elevated risk is penalized this sweep
        if account.is_connected() {
            if let Some(risk) = self.poll_ban_risk(&account).await {
                self.registry
                    .record_ban_risk(&account.session_id, risk)
                    .await?;
                account.ban_risk = risk;
            }
        }

        let score = compute_score(&account, now, self.config.inactivity_secs);

        self.registry.persist_health(account.id, score).await?;
        metrics::update_account_health(&account.session_id, score);

        report.scored += 1;
        if account.is_connected() {
            report.connected += 1;
        }

        if score < self.config.reconnect_threshold {
            report.reconnect_attempts += 1;
            if !self.try_reconnect(&account, score).await {
                report.reconnect_failures += 1;
            }
        }

        Ok(())
    }

    /// Latest ban-risk reading from the session's instance, `None`
    /// when the instance is unreachable or reports none.
    async fn poll_ban_risk(&self, account: &Account) -> Option<i32> {
        let route = match self.router.route_for(account.id).await {
            Ok(route) => route,
            Err(err) => {
                tracing::debug!(
                    session_id = %account.session_id,
                    error = %err,
                    "No route for status poll"
                );
                return None;
            }
        };

        match self
            .gateway
            .session_status(&route.instance_url, &account.session_id)
            .await
        {
            Ok(status) => status.ban_risk,
            Err(err) => {
                tracing::debug!(
                    session_id = %account.session_id,
                    error = %err,
                    "Status poll failed during sweep"
                );
                None
            }
        }
    }

    async fn try_reconnect(&self, account: &Account, score: i32) -> bool {
        tracing::info!(
            session_id = %account.session_id,
            score,
            threshold = self.config.reconnect_threshold,
            "Attempting automatic reconnect"
        );

        let route = match self.router.route_for(account.id).await {
            Ok(route) => route,
            Err(err) => {
                tracing::warn!(
                    session_id = %account.session_id,
                    error = %err,
                    "Reconnect skipped, no route to instance"
                );
                metrics::record_reconnect_attempt(false);
                return false;
            }
        };

        match self
            .gateway
            .reconnect_session(&route.instance_url, &account.session_id)
            .await
        {
            Ok(()) => {
                metrics::record_reconnect_attempt(true);
                true
            }
            Err(err) => {
                tracing::warn!(
                    session_id = %account.session_id,
                    instance = %route.instance_url,
                    error = %err,
                    "Reconnect attempt failed"
                );
                metrics::record_reconnect_attempt(false);
                false
            }
        }
    }

    /// Sweep on the configured interval until shutdown
    pub async fn run_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.check_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }

            if let Err(err) = self.run_sweep().await {
                tracing::error!(error = %err, "Health sweep failed");
            }
        }

        tracing::debug!("Health monitor stopped");
    }
}
