use anyhow::{bail, Context, Result};
use uuid::Uuid;

use crate::cache::{Cache, CacheConfig};
use crate::config::Config;
use crate::registry::AccountRegistry;
use crate::router::InstanceRouter;
use crate::store::Store;

/// Summarize a workspace's accounts, optionally pinning one to an
/// instance first
pub async fn accounts(
    config: Config,
    workspace_id: Uuid,
    pin: Option<Uuid>,
    instance: Option<usize>,
) -> Result<()> {
    if pin.is_some() != instance.is_some() {
        bail!("--pin and --instance must be given together");
    }

    let store = Store::connect(&config.database.postgres_url, config.database.pool_size)
        .await
        .context("Failed to connect to PostgreSQL")?;

    if let (Some(account_id), Some(index)) = (pin, instance) {
        let cache = Cache::new(&CacheConfig::from_config(&config))
            .await
            .context("Failed to connect to Redis")?;
        let router = InstanceRouter::new(store.clone(), cache, config.instances.urls.clone())
            .context("Failed to build instance router")?;

        let route = router.assign_to_instance(account_id, index).await?;
        println!(
            "Account {account_id} pinned to instance {} ({})",
            route.instance_index, route.instance_url
        );
        println!();
    }

    let registry = AccountRegistry::new(store);
    let summary = registry.summarize(workspace_id).await?;
    println!("{}", summary.display());

    Ok(())
}
