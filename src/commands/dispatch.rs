use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::cache::{Cache, CacheConfig};
use crate::config::Config;
use crate::dispatch::{DispatchEngine, EngineConfig};
use crate::gateway::{ClientConfig, GatewayClient};
use crate::notifications::Notifier;
use crate::queue::{Job, JobPayload, Queue, QUEUE_CAMPAIGNS};
use crate::registry::AccountRegistry;
use crate::router::InstanceRouter;
use crate::selector::AccountSelector;
use crate::store::Store;

/// Queue a campaign for dispatch, or drain it in the foreground.
///
/// Queueing hands the campaign to the running `serve` workers. Draining
/// runs the whole send cycle in this process and needs no workers,
/// which is what you want on a one-off box or when debugging a
/// campaign.
pub async fn dispatch(config: Config, campaign_id: Uuid, drain: bool) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let store = Store::connect(&config.database.postgres_url, config.database.pool_size)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let cache = Cache::new(&CacheConfig::from_config(&config))
        .await
        .context("Failed to connect to Redis")?;
    let queue = Queue::new(
        cache.pool(),
        config.redis.key_prefix.clone(),
        config.dispatch.lease_secs,
        config.dispatch.max_job_attempts,
    );

    if !drain {
        queue
            .enqueue(&Job::new(JobPayload::CampaignDispatch { campaign_id }))
            .await?;

        let depth = queue.depth(QUEUE_CAMPAIGNS).await?;
        println!("Campaign {campaign_id} queued for dispatch");
        println!("  Campaign queue: {} ready, {} scheduled", depth.ready, depth.scheduled);
        return Ok(());
    }

    let registry = AccountRegistry::new(store.clone());
    let selector = AccountSelector::new(store.clone());
    let router = InstanceRouter::new(store.clone(), cache, config.instances.urls.clone())
        .context("Failed to build instance router")?;
    let gateway = Arc::new(
        GatewayClient::new(ClientConfig::from_config(&config))
            .context("Failed to build gateway client")?,
    );

    let mut notifier = Notifier::new();
    if let Some(url) = &config.notifications.webhook_url {
        notifier
            .add_webhook_channel(url)
            .context("Invalid notification webhook URL")?;
    }

    let engine = DispatchEngine::new(
        store,
        queue,
        selector,
        registry,
        router,
        gateway,
        Arc::new(notifier),
        EngineConfig::from_config(&config),
    );

    println!("Draining campaign {campaign_id}...");
    let report = engine.drain(campaign_id).await?;

    println!();
    println!("Drain Complete");
    println!("==============");
    println!("  Logs materialized: {}", report.materialized);
    println!("  Sent: {}", report.sent);
    println!("  Retries scheduled: {}", report.retried);
    println!("  Failed terminally: {}", report.failed);
    println!("  Skipped: {}", report.skipped);
    println!(
        "  Campaign: {}",
        if report.completed {
            "completed"
        } else {
            "still open (retries or receipts pending)"
        }
    );

    Ok(())
}
