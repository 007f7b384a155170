//! Workspace queries and contact-group membership

use super::Store;
use crate::models::Workspace;
use anyhow::{Context, Result};
use tokio_postgres::Row;
use uuid::Uuid;

fn map_workspace(row: &Row) -> Workspace {
    Workspace {
        id: row.get("id"),
        name: row.get("name"),
        timezone: row.get("timezone"),
        retry_enabled: row.get("retry_enabled"),
        retry_intervals_mins: row.get("retry_intervals_mins"),
        failed_group_id: row.get("failed_group_id"),
        created_at: row.get("created_at"),
    }
}

impl Store {
    /// Fetch a workspace by id
    pub async fn get_workspace(&self, id: Uuid) -> Result<Option<Workspace>> {
        let client = self.pool().get().await?;

        let row = client
            .query_opt(
                r#"
                SELECT id, name, timezone, retry_enabled, retry_intervals_mins,
                       failed_group_id, created_at
                FROM workspaces WHERE id = $1
                "#,
                &[&id],
            )
            .await
            .context("Failed to fetch workspace")?;

        Ok(row.as_ref().map(map_workspace))
    }

    /// Create or update a workspace
    pub async fn upsert_workspace(&self, workspace: &Workspace) -> Result<()> {
        let client = self.pool().get().await?;

        client
            .execute(
                r#"
                INSERT INTO workspaces (id, name, timezone, retry_enabled,
                                        retry_intervals_mins, failed_group_id, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    timezone = EXCLUDED.timezone,
                    retry_enabled = EXCLUDED.retry_enabled,
                    retry_intervals_mins = EXCLUDED.retry_intervals_mins,
                    failed_group_id = EXCLUDED.failed_group_id
                "#,
                &[
                    &workspace.id,
                    &workspace.name,
                    &workspace.timezone,
                    &workspace.retry_enabled,
                    &workspace.retry_intervals_mins,
                    &workspace.failed_group_id,
                    &workspace.created_at,
                ],
            )
            .await
            .context("Failed to upsert workspace")?;

        Ok(())
    }

    /// Add a phone number to a contact group. Re-adding is a no-op, so
    /// moving an exhausted recipient twice cannot fail.
    pub async fn add_to_group(&self, group_id: Uuid, phone: &str) -> Result<()> {
        let client = self.pool().get().await?;

        client
            .execute(
                r#"
                INSERT INTO group_members (group_id, phone)
                VALUES ($1, $2)
                ON CONFLICT (group_id, phone) DO NOTHING
                "#,
                &[&group_id, &phone],
            )
            .await
            .context("Failed to add group member")?;

        Ok(())
    }

    /// Members of a contact group, most recent first
    pub async fn list_group_members(&self, group_id: Uuid) -> Result<Vec<String>> {
        let client = self.pool().get().await?;

        let rows = client
            .query(
                "SELECT phone FROM group_members WHERE group_id = $1 ORDER BY added_at DESC",
                &[&group_id],
            )
            .await
            .context("Failed to list group members")?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    /// Sharding override for a workspace, if one is pinned
    pub async fn get_instance_override(&self, workspace_id: Uuid) -> Result<Option<i32>> {
        let client = self.pool().get().await?;

        let row = client
            .query_opt(
                "SELECT instance_index FROM instance_overrides WHERE workspace_id = $1",
                &[&workspace_id],
            )
            .await
            .context("Failed to fetch instance override")?;

        Ok(row.map(|r| r.get(0)))
    }

    /// Pin a workspace to a specific instance, overriding the hash
    pub async fn set_instance_override(&self, workspace_id: Uuid, index: i32) -> Result<()> {
        let client = self.pool().get().await?;

        client
            .execute(
                r#"
                INSERT INTO instance_overrides (workspace_id, instance_index)
                VALUES ($1, $2)
                ON CONFLICT (workspace_id)
                DO UPDATE SET instance_index = EXCLUDED.instance_index, updated_at = NOW()
                "#,
                &[&workspace_id, &index],
            )
            .await
            .context("Failed to set instance override")?;

        Ok(())
    }

    /// Drop a workspace's pin, returning it to hash placement
    pub async fn clear_instance_override(&self, workspace_id: Uuid) -> Result<bool> {
        let client = self.pool().get().await?;

        let removed = client
            .execute(
                "DELETE FROM instance_overrides WHERE workspace_id = $1",
                &[&workspace_id],
            )
            .await
            .context("Failed to clear instance override")?;

        Ok(removed > 0)
    }
}
