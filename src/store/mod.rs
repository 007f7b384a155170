//! PostgreSQL persistence layer
//!
//! The durable store is the single source of truth for workspaces,
//! accounts, campaigns and per-recipient logs. All cross-worker
//! coordination that must survive a crash goes through here; the row-level
//! claim queries in [`logs`] are what make concurrent dispatch safe.

pub mod accounts;
pub mod campaigns;
pub mod logs;
pub mod workspaces;

use anyhow::{Context, Result};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

/// Shared PostgreSQL store
#[derive(Clone)]
pub struct Store {
    /// PostgreSQL connection pool
    pool: Pool,
}

impl Store {
    /// Connect and verify the database is reachable
    pub async fn connect(database_url: &str, pool_size: usize) -> Result<Self> {
        let mut pool_config = PoolConfig::new();
        pool_config.url = Some(database_url.to_string());
        pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pool_config.pool = Some(deadpool_postgres::PoolConfig::new(pool_size));

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("Failed to create PostgreSQL connection pool")?;

        // Test connection
        let client = pool
            .get()
            .await
            .context("Failed to connect to PostgreSQL")?;
        client.simple_query("SELECT 1").await?;

        tracing::info!("Connected to PostgreSQL");

        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Initialize database schema
    pub async fn init_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS workspaces (
                    id UUID PRIMARY KEY,
                    name TEXT NOT NULL,
                    timezone VARCHAR(6) NOT NULL DEFAULT '+00:00',
                    retry_enabled BOOLEAN NOT NULL DEFAULT TRUE,
                    retry_intervals_mins INTEGER[] NOT NULL DEFAULT '{5,30,120}',
                    failed_group_id UUID,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE TABLE IF NOT EXISTS accounts (
                    id UUID PRIMARY KEY,
                    workspace_id UUID NOT NULL REFERENCES workspaces(id),
                    session_id VARCHAR(100) NOT NULL UNIQUE,
                    provider VARCHAR(10) NOT NULL,
                    status VARCHAR(20) NOT NULL DEFAULT 'disconnected',
                    health_score INTEGER NOT NULL DEFAULT 100,
                    instance_index INTEGER,
                    instance_url TEXT,
                    migration_count INTEGER NOT NULL DEFAULT 0,
                    disconnect_reason TEXT,
                    consecutive_failures INTEGER NOT NULL DEFAULT 0,
                    ban_risk INTEGER NOT NULL DEFAULT 0,
                    last_activity_at TIMESTAMPTZ,
                    last_used_at TIMESTAMPTZ,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE INDEX IF NOT EXISTS idx_accounts_workspace_status
                    ON accounts(workspace_id, status);

                CREATE TABLE IF NOT EXISTS campaigns (
                    id UUID PRIMARY KEY,
                    workspace_id UUID NOT NULL REFERENCES workspaces(id),
                    name TEXT NOT NULL,
                    campaign_type VARCHAR(10) NOT NULL,
                    status VARCHAR(20) NOT NULL DEFAULT 'pending',
                    preferred_provider VARCHAR(10),
                    speed_tier VARCHAR(10) NOT NULL DEFAULT 'normal',
                    account_id UUID REFERENCES accounts(id),
                    template_name TEXT,
                    template_language VARCHAR(10),
                    message_body TEXT,
                    scheduled_at TIMESTAMPTZ,
                    sent_count INTEGER NOT NULL DEFAULT 0,
                    delivered_count INTEGER NOT NULL DEFAULT 0,
                    read_count INTEGER NOT NULL DEFAULT 0,
                    failed_count INTEGER NOT NULL DEFAULT 0,
                    pause_reason TEXT,
                    paused_by_session VARCHAR(100),
                    pause_count INTEGER NOT NULL DEFAULT 0,
                    failure_reason TEXT,
                    completed_at TIMESTAMPTZ,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE INDEX IF NOT EXISTS idx_campaigns_workspace_status
                    ON campaigns(workspace_id, status);

                CREATE INDEX IF NOT EXISTS idx_campaigns_account
                    ON campaigns(account_id) WHERE account_id IS NOT NULL;

                CREATE TABLE IF NOT EXISTS campaign_recipients (
                    id UUID PRIMARY KEY,
                    campaign_id UUID NOT NULL REFERENCES campaigns(id),
                    phone VARCHAR(20) NOT NULL,
                    name TEXT,
                    variables JSONB
                );

                CREATE INDEX IF NOT EXISTS idx_recipients_campaign
                    ON campaign_recipients(campaign_id);

                CREATE TABLE IF NOT EXISTS campaign_logs (
                    id UUID PRIMARY KEY,
                    campaign_id UUID NOT NULL REFERENCES campaigns(id),
                    recipient_id UUID NOT NULL REFERENCES campaign_recipients(id),
                    account_id UUID REFERENCES accounts(id),
                    status VARCHAR(10) NOT NULL DEFAULT 'pending',
                    message_id TEXT,
                    error TEXT,
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    next_retry_at TIMESTAMPTZ,
                    sent_at TIMESTAMPTZ,
                    delivered_at TIMESTAMPTZ,
                    read_at TIMESTAMPTZ,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    UNIQUE (campaign_id, recipient_id)
                );

                CREATE INDEX IF NOT EXISTS idx_logs_campaign_status
                    ON campaign_logs(campaign_id, status);

                CREATE INDEX IF NOT EXISTS idx_logs_retry_due
                    ON campaign_logs(next_retry_at)
                    WHERE status = 'failed' AND next_retry_at IS NOT NULL;

                CREATE INDEX IF NOT EXISTS idx_logs_message_id
                    ON campaign_logs(message_id) WHERE message_id IS NOT NULL;

                CREATE TABLE IF NOT EXISTS campaign_log_retries (
                    id UUID PRIMARY KEY,
                    log_id UUID NOT NULL REFERENCES campaign_logs(id),
                    error TEXT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE INDEX IF NOT EXISTS idx_log_retries_log
                    ON campaign_log_retries(log_id);

                CREATE TABLE IF NOT EXISTS group_members (
                    group_id UUID NOT NULL,
                    phone VARCHAR(20) NOT NULL,
                    added_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    PRIMARY KEY (group_id, phone)
                );

                CREATE TABLE IF NOT EXISTS instance_overrides (
                    workspace_id UUID PRIMARY KEY,
                    instance_index INTEGER NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );
                "#,
            )
            .await
            .context("Failed to create schema")?;

        tracing::info!("Database schema initialized");
        Ok(())
    }

    /// Check if the database is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(true)
    }
}
