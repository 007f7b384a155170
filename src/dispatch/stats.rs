//! Campaign statistics refresh
//!
//! Aggregate counters are recomputed from log rows under a short Redis
//! lock, so concurrent refresh triggers for one campaign collapse into
//! a single writer. Counters are derived state: a skipped or failed
//! refresh only delays reporting, the next trigger corrects it.

use uuid::Uuid;

use crate::cache::Cache;
use crate::error::Result;
use crate::models::CampaignStats;
use crate::store::Store;

/// Recompute and persist one campaign's counters.
///
/// Returns `None` without touching anything when another worker holds
/// the stats lock.
pub async fn refresh_stats(
    store: &Store,
    cache: &Cache,
    campaign_id: Uuid,
) -> Result<Option<CampaignStats>> {
    let Some(lock) = cache.acquire_stats_lock(campaign_id).await? else {
        tracing::debug!(%campaign_id, "Stats lock busy, skipping refresh");
        return Ok(None);
    };

    let result = recompute(store, campaign_id).await;

    // The lock is released on both paths; an early return would leave
    // refreshes blocked for a full TTL
    if let Err(err) = cache.release_stats_lock(lock).await {
        tracing::warn!(%campaign_id, error = %err, "Failed to release stats lock");
    }

    let stats = result?;
    tracing::debug!(
        %campaign_id,
        sent = stats.sent,
        delivered = stats.delivered,
        read = stats.read,
        failed = stats.failed,
        "Campaign stats refreshed"
    );

    Ok(Some(stats))
}

async fn recompute(store: &Store, campaign_id: Uuid) -> Result<CampaignStats> {
    let stats = store.compute_stats(campaign_id).await?;
    store
        .update_campaign_counters(
            campaign_id,
            stats.sent,
            stats.delivered,
            stats.read,
            stats.failed,
        )
        .await?;
    Ok(stats)
}
