//! Campaign and recipient queries
//!
//! Status transitions are conditional UPDATEs that report whether a row
//! actually moved. Callers use the returned flag to fire notifications
//! exactly once per real transition, no matter how many workers race.

use super::Store;
use crate::models::{
    Campaign, CampaignRecipient, CampaignStatus, CampaignType, ProviderType, SpeedTier,
};
use anyhow::{Context, Result};
use tokio_postgres::Row;
use uuid::Uuid;

const CAMPAIGN_COLUMNS: &str = "id, workspace_id, name, campaign_type, status, \
     preferred_provider, speed_tier, account_id, template_name, template_language, \
     message_body, scheduled_at, sent_count, delivered_count, read_count, \
     failed_count, pause_reason, paused_by_session, pause_count, failure_reason, \
     completed_at, created_at, updated_at";

fn map_campaign(row: &Row) -> Result<Campaign> {
    let type_raw: String = row.get("campaign_type");
    let campaign_type = CampaignType::parse(&type_raw)
        .with_context(|| format!("Unknown campaign type: {type_raw}"))?;

    let status_raw: String = row.get("status");
    let status = CampaignStatus::parse(&status_raw)
        .with_context(|| format!("Unknown campaign status: {status_raw}"))?;

    let provider_raw: Option<String> = row.get("preferred_provider");
    let preferred_provider = provider_raw
        .map(|raw| {
            ProviderType::parse(&raw).with_context(|| format!("Unknown provider type: {raw}"))
        })
        .transpose()?;

    let tier_raw: String = row.get("speed_tier");
    let speed_tier =
        SpeedTier::parse(&tier_raw).with_context(|| format!("Unknown speed tier: {tier_raw}"))?;

    Ok(Campaign {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        name: row.get("name"),
        campaign_type,
        status,
        preferred_provider,
        speed_tier,
        account_id: row.get("account_id"),
        template_name: row.get("template_name"),
        template_language: row.get("template_language"),
        message_body: row.get("message_body"),
        scheduled_at: row.get("scheduled_at"),
        sent_count: row.get("sent_count"),
        delivered_count: row.get("delivered_count"),
        read_count: row.get("read_count"),
        failed_count: row.get("failed_count"),
        pause_reason: row.get("pause_reason"),
        paused_by_session: row.get("paused_by_session"),
        pause_count: row.get("pause_count"),
        failure_reason: row.get("failure_reason"),
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_recipient(row: &Row) -> CampaignRecipient {
    CampaignRecipient {
        id: row.get("id"),
        campaign_id: row.get("campaign_id"),
        phone: row.get("phone"),
        name: row.get("name"),
        variables: row.get("variables"),
    }
}

impl Store {
    /// Fetch a campaign by id
    pub async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>> {
        let client = self.pool().get().await?;

        let row = client
            .query_opt(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1"),
                &[&id],
            )
            .await
            .context("Failed to fetch campaign")?;

        row.as_ref().map(map_campaign).transpose()
    }

    /// Create a campaign
    pub async fn insert_campaign(&self, campaign: &Campaign) -> Result<()> {
        let client = self.pool().get().await?;

        client
            .execute(
                r#"
                INSERT INTO campaigns (id, workspace_id, name, campaign_type, status,
                                       preferred_provider, speed_tier, account_id,
                                       template_name, template_language, message_body,
                                       scheduled_at, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
                &[
                    &campaign.id,
                    &campaign.workspace_id,
                    &campaign.name,
                    &campaign.campaign_type.as_str(),
                    &campaign.status.as_str(),
                    &campaign.preferred_provider.map(|p| p.as_str()),
                    &campaign.speed_tier.as_str(),
                    &campaign.account_id,
                    &campaign.template_name,
                    &campaign.template_language,
                    &campaign.message_body,
                    &campaign.scheduled_at,
                    &campaign.created_at,
                    &campaign.updated_at,
                ],
            )
            .await
            .context("Failed to insert campaign")?;

        Ok(())
    }

    /// Flip a pending/scheduled campaign to `ongoing`.
    /// Returns false when another worker already did.
    pub async fn mark_campaign_ongoing(&self, id: Uuid) -> Result<bool> {
        let client = self.pool().get().await?;

        let affected = client
            .execute(
                r#"
                UPDATE campaigns SET status = 'ongoing', updated_at = NOW()
                WHERE id = $1 AND status IN ('pending', 'scheduled')
                "#,
                &[&id],
            )
            .await
            .context("Failed to mark campaign ongoing")?;

        Ok(affected > 0)
    }

    /// Pause an ongoing campaign after mobile activity on its session.
    /// Increments the pause counter only on a real transition.
    pub async fn pause_campaign_for_mobile(
        &self,
        id: Uuid,
        reason: &str,
        session_id: &str,
    ) -> Result<bool> {
        let client = self.pool().get().await?;

        let affected = client
            .execute(
                r#"
                UPDATE campaigns
                SET status = 'paused_mobile',
                    pause_reason = $2,
                    paused_by_session = $3,
                    pause_count = pause_count + 1,
                    updated_at = NOW()
                WHERE id = $1 AND status = 'ongoing'
                "#,
                &[&id, &reason, &session_id],
            )
            .await
            .context("Failed to pause campaign")?;

        Ok(affected > 0)
    }

    /// Resume a mobile-paused campaign
    pub async fn resume_campaign(&self, id: Uuid) -> Result<bool> {
        let client = self.pool().get().await?;

        let affected = client
            .execute(
                r#"
                UPDATE campaigns
                SET status = 'ongoing',
                    pause_reason = NULL,
                    updated_at = NOW()
                WHERE id = $1 AND status = 'paused_mobile'
                "#,
                &[&id],
            )
            .await
            .context("Failed to resume campaign")?;

        Ok(affected > 0)
    }

    /// Mark an ongoing campaign completed
    pub async fn complete_campaign(&self, id: Uuid) -> Result<bool> {
        let client = self.pool().get().await?;

        let affected = client
            .execute(
                r#"
                UPDATE campaigns
                SET status = 'completed', completed_at = NOW(), updated_at = NOW()
                WHERE id = $1 AND status = 'ongoing'
                "#,
                &[&id],
            )
            .await
            .context("Failed to complete campaign")?;

        Ok(affected > 0)
    }

    /// Fail a campaign with an explicit reason
    pub async fn fail_campaign(&self, id: Uuid, reason: &str) -> Result<bool> {
        let client = self.pool().get().await?;

        let affected = client
            .execute(
                r#"
                UPDATE campaigns
                SET status = 'failed', failure_reason = $2, updated_at = NOW()
                WHERE id = $1 AND status NOT IN ('completed', 'failed')
                "#,
                &[&id, &reason],
            )
            .await
            .context("Failed to fail campaign")?;

        Ok(affected > 0)
    }

    /// Remember which account the campaign last sent through
    pub async fn set_campaign_account(&self, id: Uuid, account_id: Uuid) -> Result<()> {
        let client = self.pool().get().await?;

        client
            .execute(
                "UPDATE campaigns SET account_id = $2, updated_at = NOW() WHERE id = $1",
                &[&id, &account_id],
            )
            .await
            .context("Failed to set campaign account")?;

        Ok(())
    }

    /// Write recomputed aggregate counters
    pub async fn update_campaign_counters(
        &self,
        id: Uuid,
        sent: i32,
        delivered: i32,
        read: i32,
        failed: i32,
    ) -> Result<()> {
        let client = self.pool().get().await?;

        client
            .execute(
                r#"
                UPDATE campaigns
                SET sent_count = $2, delivered_count = $3,
                    read_count = $4, failed_count = $5,
                    updated_at = NOW()
                WHERE id = $1
                "#,
                &[&id, &sent, &delivered, &read, &failed],
            )
            .await
            .context("Failed to update campaign counters")?;

        Ok(())
    }

    /// Ongoing campaigns currently bound to a session, by account linkage
    pub async fn list_ongoing_campaigns_on_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<Campaign>> {
        let client = self.pool().get().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT {cols} FROM campaigns c \
                     WHERE c.status = 'ongoing' AND c.account_id IN \
                       (SELECT id FROM accounts WHERE session_id = $1)",
                    cols = prefixed_columns("c")
                ),
                &[&session_id],
            )
            .await
            .context("Failed to list ongoing campaigns on session")?;

        rows.iter().map(map_campaign).collect()
    }

    /// Campaigns paused by mobile activity on the given session
    pub async fn list_campaigns_paused_by_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<Campaign>> {
        let client = self.pool().get().await?;

        let rows = client
            .query(
                &format!(
                    "SELECT {CAMPAIGN_COLUMNS} FROM campaigns \
                     WHERE status = 'paused_mobile' AND paused_by_session = $1"
                ),
                &[&session_id],
            )
            .await
            .context("Failed to list paused campaigns")?;

        rows.iter().map(map_campaign).collect()
    }

    // =========================================================================
    // Recipients
    // =========================================================================

    /// Fetch one recipient
    pub async fn get_recipient(&self, id: Uuid) -> Result<Option<CampaignRecipient>> {
        let client = self.pool().get().await?;

        let row = client
            .query_opt(
                r#"
                SELECT id, campaign_id, phone, name, variables
                FROM campaign_recipients WHERE id = $1
                "#,
                &[&id],
            )
            .await
            .context("Failed to fetch recipient")?;

        Ok(row.as_ref().map(map_recipient))
    }

    /// All recipients of a campaign
    pub async fn list_recipients(&self, campaign_id: Uuid) -> Result<Vec<CampaignRecipient>> {
        let client = self.pool().get().await?;

        let rows = client
            .query(
                r#"
                SELECT id, campaign_id, phone, name, variables
                FROM campaign_recipients WHERE campaign_id = $1
                "#,
                &[&campaign_id],
            )
            .await
            .context("Failed to list recipients")?;

        Ok(rows.iter().map(map_recipient).collect())
    }

    /// Bulk insert recipients
    pub async fn insert_recipients(&self, recipients: &[CampaignRecipient]) -> Result<usize> {
        if recipients.is_empty() {
            return Ok(0);
        }

        let client = self.pool().get().await?;

        let statement = client
            .prepare(
                r#"
                INSERT INTO campaign_recipients (id, campaign_id, phone, name, variables)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .await?;

        let mut count = 0;
        for recipient in recipients {
            client
                .execute(
                    &statement,
                    &[
                        &recipient.id,
                        &recipient.campaign_id,
                        &recipient.phone,
                        &recipient.name,
                        &recipient.variables,
                    ],
                )
                .await
                .context("Failed to insert recipient")?;
            count += 1;
        }

        Ok(count)
    }
}

/// Campaign column list qualified with a table alias
fn prefixed_columns(alias: &str) -> String {
    CAMPAIGN_COLUMNS
        .split(", ")
        .map(|col| format!("{alias}.{}", col.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
