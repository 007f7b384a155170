use anyhow::{Context, Result};
use uuid::Uuid;

use crate::cache::{Cache, CacheConfig};
use crate::config::Config;
use crate::dispatch::refresh_stats;
use crate::store::Store;

/// Recompute a campaign's counters from its log rows and print them
pub async fn stats(config: Config, campaign_id: Uuid) -> Result<()> {
    let store = Store::connect(&config.database.postgres_url, config.database.pool_size)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let cache = Cache::new(&CacheConfig::from_config(&config))
        .await
        .context("Failed to connect to Redis")?;

    let campaign = store
        .get_campaign(campaign_id)
        .await?
        .with_context(|| format!("Campaign not found: {campaign_id}"))?;

    let Some(stats) = refresh_stats(&store, &cache, campaign_id).await? else {
        println!("Another worker holds the statistics lock; try again shortly.");
        return Ok(());
    };

    println!("Campaign Statistics");
    println!("===================");
    println!("  Name: {}", campaign.name);
    println!("  Status: {}", campaign.status);
    println!("  Recipients: {}", stats.total);
    println!("  Sent: {}", stats.sent);
    println!("  Delivered: {} ({:.1}%)", stats.delivered, stats.delivery_rate());
    println!("  Read: {} ({:.1}%)", stats.read, stats.read_rate());
    println!("  Failed: {}", stats.failed);
    println!("  Pending: {}", stats.pending);

    Ok(())
}
