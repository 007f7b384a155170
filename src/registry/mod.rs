//! Account registry
//!
//! Durable record keeper for messaging accounts. Lifecycle webhooks,
//! health persistence and send-result bookkeeping all go through here;
//! the selector and the health monitor read through its typed queries.

use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Account, AccountStatus};
use crate::store::Store;

/// Store-backed account registry
#[derive(Clone)]
pub struct AccountRegistry {
    store: Store,
}

impl AccountRegistry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    // =========================================================================
    // Lifecycle Transitions
    // =========================================================================

    /// Apply a `session_ready` event: the session is authenticated and
    /// connected. Unknown sessions are logged and skipped, they belong
    /// to no registered account.
    pub async fn handle_session_ready(&self, session_id: &str) -> Result<Option<Account>> {
        let Some(account) = self.store.get_account_by_session(session_id).await? else {
            tracing::warn!(session_id, "session_ready for unregistered session");
            return Ok(None);
        };

        self.store
            .update_account_status(account.id, AccountStatus::Connected, None)
            .await?;

        tracing::info!(
            session_id,
            account_id = %account.id,
            "Session connected"
        );

        self.store.get_account(account.id).await
    }

    /// Apply a `session_disconnected` event, keeping the reported reason
    pub async fn handle_session_disconnected(
        &self,
        session_id: &str,
        reason: Option<&str>,
    ) -> Result<Option<Account>> {
        let Some(account) = self.store.get_account_by_session(session_id).await? else {
            tracing::warn!(session_id, "session_disconnected for unregistered session");
            return Ok(None);
        };

        self.store
            .update_account_status(account.id, AccountStatus::Disconnected, reason)
            .await?;

        tracing::warn!(
            session_id,
            account_id = %account.id,
            reason = reason.unwrap_or("unknown"),
            "Session disconnected"
        );

        self.store.get_account(account.id).await
    }

    /// Record the outcome of one send attempt on an account. Success
    /// clears the consecutive-failure streak.
    pub async fn record_send(&self, account_id: Uuid, success: bool) -> Result<()> {
        self.store.record_send_result(account_id, success).await
    }

    /// Persist a recomputed health score, clamped to [0, 100]
    pub async fn persist_health(&self, account_id: Uuid, score: i32) -> Result<()> {
        self.store
            .set_health_score(account_id, score.clamp(0, 100))
            .await
    }

    /// Record the ban-risk signal reported by a worker instance
    pub async fn record_ban_risk(&self, session_id: &str, risk: i32) -> Result<()> {
        let Some(account) = self.store.get_account_by_session(session_id).await? else {
            tracing::warn!(session_id, "ban risk report for unregistered session");
            return Ok(());
        };

        self.store.set_ban_risk(account.id, risk).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get(&self, account_id: Uuid) -> Result<Option<Account>> {
        self.store.get_account(account_id).await
    }

    pub async fn get_by_session(&self, session_id: &str) -> Result<Option<Account>> {
        self.store.get_account_by_session(session_id).await
    }

    pub async fn list_for_workspace(&self, workspace_id: Uuid) -> Result<Vec<Account>> {
        self.store.list_workspace_accounts(workspace_id).await
    }

    /// Accounts the health monitor evaluates on each sweep
    pub async fn list_scorable(&self) -> Result<Vec<Account>> {
        self.store.list_scorable_accounts().await
    }

    /// Workspace-level summary used by the CLI and the health endpoint
    pub async fn summarize(&self, workspace_id: Uuid) -> Result<RegistrySummary> {
        let accounts = self.store.list_workspace_accounts(workspace_id).await?;

        let mut summary = RegistrySummary {
            total: accounts.len(),
            ..Default::default()
        };

        for account in &accounts {
            match account.status {
                AccountStatus::Connected => summary.connected += 1,
                AccountStatus::Disconnected => summary.disconnected += 1,
                AccountStatus::QrScanning => summary.qr_scanning += 1,
                AccountStatus::Authenticated => summary.authenticated += 1,
            }
            if account.is_healthy() {
                summary.healthy += 1;
            }
        }

        Ok(summary)
    }
}

/// Counts of accounts by state within one workspace
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RegistrySummary {
    pub total: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub qr_scanning: usize,
    pub authenticated: usize,
    pub healthy: usize,
}

impl RegistrySummary {
    /// Fraction of accounts currently usable for sends
    pub fn availability(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.connected as f64 / self.total as f64) * 100.0
        }
    }

    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Accounts\n\
             {:-<30}\n\
             Total: {}\n\
             - Connected: {}\n\
             - Disconnected: {}\n\
             - QR Scanning: {}\n\
             - Authenticated: {}\n\
             Healthy: {}\n\
             Availability: {:.1}%",
            "",
            self.total,
            self.connected,
            self.disconnected,
            self.qr_scanning,
            self.authenticated,
            self.healthy,
            self.availability()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_availability() {
        let summary = RegistrySummary {
            total: 4,
            connected: 3,
            disconnected: 1,
            ..Default::default()
        };

        assert!((summary.availability() - 75.0).abs() < 0.1);
    }

    #[test]
    fn test_empty_summary_availability() {
        assert_eq!(RegistrySummary::default().availability(), 0.0);
    }

    #[test]
    fn test_summary_display() {
        let summary = RegistrySummary {
            total: 2,
            connected: 2,
            healthy: 1,
            ..Default::default()
        };

        let display = summary.display();
        assert!(display.contains("Total: 2"));
        assert!(display.contains("Availability: 100.0%"));
    }
}
