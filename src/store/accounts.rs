//! Account (session) queries
//!
//! Selection-critical orderings live here: candidate listing sorts by
//! health score descending, then least-recently-used, and only ever
//! returns connected accounts.

use super::Store;
use crate::models::{Account, AccountStatus, ProviderType};
use anyhow::{Context, Result};
use tokio_postgres::Row;
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str = "id, workspace_id, session_id, provider, status, health_score, \
     instance_index, instance_url, migration_count, disconnect_reason, \
     consecutive_failures, ban_risk, last_activity_at, last_used_at, \
     created_at, updated_at";

fn map_account(row: &Row) -> Result<Account> {
    let provider_raw: String = row.get("provider");
    let provider = ProviderType::parse(&provider_raw)
        .with_context(|| format!("Unknown provider type: {provider_raw}"))?;

    let status_raw: String = row.get("status");
    let status = AccountStatus::parse(&status_raw)
        .with_context(|| format!("Unknown account status: {status_raw}"))?;

    Ok(Account {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        session_id: row.get("session_id"),
        provider,
        status,
        health_score: row.get("health_score"),
        instance_index: row.get("instance_index"),
        instance_url: row.get("instance_url"),
        migration_count: row.get("migration_count"),
        disconnect_reason: row.get("disconnect_reason"),
        consecutive_failures: row.get("consecutive_failures"),
        ban_risk: row.get("ban_risk"),
        last_activity_at: row.get("last_activity_at"),
        last_used_at: row.get("last_used_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl Store {
    /// Fetch an account by id
    pub async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        let client = self.pool().get().await?;

        let row = client
            .query_opt(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"),
                &[&id],
            )
            .await
            .context("Failed to fetch account")?;

        row.as_ref().map(map_account).transpose()
    }

    /// Fetch an account by its provider session id
    pub async fn get_account_by_session(&self, session_id: &str) -> Result<Option<Account>> {
        let client = self.pool().get().await?;

        let row = client
            .query_opt(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE session_id = $1"),
                &[&session_id],
            )
            .await
            .context("Failed to fetch account by session")?;

        row.as_ref().map(map_account).transpose()
    }

    /// All accounts in a workspace
    pub async fn list_workspace_accounts(&self, workspace_id: Uuid) -> Result<Vec<Account>> {
        let client = self.pool().get().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts \
                     WHERE workspace_id = $1 ORDER BY created_at"
                ),
                &[&workspace_id],
            )
            .await
            .context("Failed to list accounts")?;

        rows.iter().map(map_account).collect()
    }

    /// Connected accounts eligible for selection, best candidates first:
    /// health score descending, then least recently used. Accounts never
    /// used sort ahead of any used one.
    pub async fn list_candidate_accounts(
        &self,
        workspace_id: Uuid,
        provider: Option<ProviderType>,
    ) -> Result<Vec<Account>> {
        let client = self.pool().get().await?;

        let rows = match provider {
            Some(p) => {
                client
                    .query(
                        &format!(
                            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
                             WHERE workspace_id = $1 AND status = 'connected' AND provider = $2 \
                             ORDER BY health_score DESC, last_used_at ASC NULLS FIRST"
                        ),
                        &[&workspace_id, &p.as_str()],
                    )
                    .await
            }
            None => {
                client
                    .query(
                        &format!(
                            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
                             WHERE workspace_id = $1 AND status = 'connected' \
                             ORDER BY health_score DESC, last_used_at ASC NULLS FIRST"
                        ),
                        &[&workspace_id],
                    )
                    .await
            }
        }
        .context("Failed to list candidate accounts")?;

        rows.iter().map(map_account).collect()
    }

    /// Accounts the health monitor scores on each sweep
    pub async fn list_scorable_accounts(&self) -> Result<Vec<Account>> {
        let client = self.pool().get().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts \
                     WHERE status IN ('connected', 'qr_scanning') ORDER BY updated_at"
                ),
                &[],
            )
            .await
            .context("Failed to list scorable accounts")?;

        rows.iter().map(map_account).collect()
    }

    /// Register or update an account
    pub async fn upsert_account(&self, account: &Account) -> Result<()> {
        let client = self.pool().get().await?;

        client
            .execute(
                r#"
                INSERT INTO accounts (id, workspace_id, session_id, provider, status,
                                      health_score, instance_index, instance_url,
                                      migration_count, disconnect_reason,
                                      consecutive_failures, ban_risk,
                                      last_activity_at, last_used_at, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                ON CONFLICT (session_id) DO UPDATE SET
                    provider = EXCLUDED.provider,
                    status = EXCLUDED.status,
                    health_score = EXCLUDED.health_score,
                    instance_index = EXCLUDED.instance_index,
                    instance_url = EXCLUDED.instance_url,
                    disconnect_reason = EXCLUDED.disconnect_reason,
                    updated_at = NOW()
                "#,
                &[
                    &account.id,
                    &account.workspace_id,
                    &account.session_id,
                    &account.provider.as_str(),
                    &account.status.as_str(),
                    &account.health_score,
                    &account.instance_index,
                    &account.instance_url,
                    &account.migration_count,
                    &account.disconnect_reason,
                    &account.consecutive_failures,
                    &account.ban_risk,
                    &account.last_activity_at,
                    &account.last_used_at,
                    &account.created_at,
                    &account.updated_at,
                ],
            )
            .await
            .context("Failed to upsert account")?;

        Ok(())
    }

    /// Update connection status. Clears the disconnect reason when the
    /// account comes back.
    pub async fn update_account_status(
        &self,
        id: Uuid,
        status: AccountStatus,
        disconnect_reason: Option<&str>,
    ) -> Result<()> {
        let client = self.pool().get().await?;

        client
            .execute(
                r#"
                UPDATE accounts
                SET status = $2,
                    disconnect_reason = $3,
                    last_activity_at = CASE WHEN $2 = 'connected' THEN NOW()
                                            ELSE last_activity_at END,
                    updated_at = NOW()
                WHERE id = $1
                "#,
                &[&id, &status.as_str(), &disconnect_reason],
            )
            .await
            .context("Failed to update account status")?;

        Ok(())
    }

    /// Persist a recomputed health score
    pub async fn set_health_score(&self, id: Uuid, score: i32) -> Result<()> {
        let client = self.pool().get().await?;

        client
            .execute(
                "UPDATE accounts SET health_score = $2, updated_at = NOW() WHERE id = $1",
                &[&id, &score],
            )
            .await
            .context("Failed to set health score")?;

        Ok(())
    }

    /// Record the outcome of a send attempt through this account
    pub async fn record_send_result(&self, id: Uuid, success: bool) -> Result<()> {
        let client = self.pool().get().await?;

        if success {
            client
                .execute(
                    r#"
                    UPDATE accounts
                    SET consecutive_failures = 0,
                        last_used_at = NOW(),
                        last_activity_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                    &[&id],
                )
                .await
        } else {
            client
                .execute(
                    r#"
                    UPDATE accounts
                    SET consecutive_failures = consecutive_failures + 1,
                        last_used_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                    &[&id],
                )
                .await
        }
        .context("Failed to record send result")?;

        Ok(())
    }

    /// Move an account to a worker instance. Bumps the migration counter;
    /// the caller must invalidate the route cache afterwards.
    pub async fn assign_instance(&self, id: Uuid, index: i32, url: &str) -> Result<()> {
        let client = self.pool().get().await?;

        client
            .execute(
                r#"
                UPDATE accounts
                SET instance_index = $2,
                    instance_url = $3,
                    migration_count = migration_count + 1,
                    updated_at = NOW()
                WHERE id = $1
                "#,
                &[&id, &index, &url],
            )
            .await
            .context("Failed to assign instance")?;

        Ok(())
    }

    /// Update the ban-risk signal reported by the worker instance
    pub async fn set_ban_risk(&self, id: Uuid, risk: i32) -> Result<()> {
        let client = self.pool().get().await?;

        client
            .execute(
                "UPDATE accounts SET ban_risk = $2, updated_at = NOW() WHERE id = $1",
                &[&id, &risk.clamp(0, 100)],
            )
            .await
            .context("Failed to set ban risk")?;

        Ok(())
    }
}
