use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::cache::{Cache, CacheConfig};
use crate::config::Config;
use crate::conflict::{ConflictResolver, ResolverConfig};
use crate::dispatch::{DispatchEngine, DispatchHandler, EngineConfig};
use crate::gateway::{ClientConfig, GatewayClient};
use crate::health::{HealthMonitor, MonitorConfig};
use crate::metrics;
use crate::notifications::Notifier;
use crate::queue::{Queue, WorkerPool, ALL_QUEUES};
use crate::registry::AccountRegistry;
use crate::router::InstanceRouter;
use crate::selector::AccountSelector;
use crate::store::Store;
use crate::webhook::{AppState, WebhookServer};

/// How often the queue depth gauges refresh
const DEPTH_INTERVAL: Duration = Duration::from_secs(15);

/// Run the full engine: webhook server, queue workers, health monitor
/// and the stuck-log reclaimer, until Ctrl+C.
pub async fn serve(config: Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    if config.server.webhook_secret.is_empty() {
        tracing::warn!("Webhook secret is empty; instance webhooks will not verify");
    }

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    println!("Starting Herald Dispatch Engine");
    println!("===============================");
    println!("  Host: {}", config.server.host);
    println!("  Port: {}", config.server.port);
    println!("  Instances: {}", config.instance_count());
    println!("  Queue workers: {}", config.dispatch.worker_concurrency);
    println!("  Health sweep: every {}s", config.health.check_interval_secs);
    println!();

    // Shared backends
    let store = Store::connect(&config.database.postgres_url, config.database.pool_size)
        .await
        .context("Failed to connect to PostgreSQL")?;
    store.init_schema().await?;

    let cache = Cache::new(&CacheConfig::from_config(&config))
        .await
        .context("Failed to connect to Redis")?;
    let queue = Queue::new(
        cache.pool(),
        config.redis.key_prefix.clone(),
        config.dispatch.lease_secs,
        config.dispatch.max_job_attempts,
    );

    // Core components
    let registry = AccountRegistry::new(store.clone());
    let selector = AccountSelector::new(store.clone());
    let router = InstanceRouter::new(store.clone(), cache.clone(), config.instances.urls.clone())
        .context("Failed to build instance router")?;
    let gateway = GatewayClient::new(ClientConfig::from_config(&config))
        .context("Failed to build gateway client")?;

    let mut notifier = Notifier::new();
    if let Some(url) = &config.notifications.webhook_url {
        notifier
            .add_webhook_channel(url)
            .context("Invalid notification webhook URL")?;
    }
    let notifier = Arc::new(notifier);

    let engine = Arc::new(DispatchEngine::new(
        store.clone(),
        queue.clone(),
        selector,
        registry.clone(),
        router.clone(),
        Arc::new(gateway.clone()),
        notifier.clone(),
        EngineConfig::from_config(&config),
    ));
    let conflict = Arc::new(ConflictResolver::new(
        store.clone(),
        cache.clone(),
        queue.clone(),
        notifier,
        ResolverConfig::from_config(&config),
    ));

    // Background loops
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handler = Arc::new(DispatchHandler::new(
        engine.clone(),
        conflict.clone(),
        store.clone(),
        cache.clone(),
    ));
    let mut pool = WorkerPool::new(
        queue.clone(),
        handler,
        config.dispatch.worker_concurrency,
    );
    pool.start();

    let monitor = HealthMonitor::new(
        registry.clone(),
        router.clone(),
        gateway,
        MonitorConfig::from_config(&config),
    );
    let monitor_handle = tokio::spawn(monitor.run_loop(shutdown_rx.clone()));

    let reclaim_engine = engine.clone();
    let reclaim_rx = shutdown_rx.clone();
    let reclaim_handle = tokio::spawn(async move {
        reclaim_engine.run_reclaim_loop(reclaim_rx).await;
    });

    let depth_queue = queue.clone();
    let depth_handle = tokio::spawn(depth_loop(depth_queue, shutdown_rx));

    // Webhook server in the foreground
    let state = AppState {
        store,
        cache,
        registry,
        router,
        conflict,
        queue,
        start_time: Instant::now(),
        config: config.server.clone(),
    };
    let server = WebhookServer::new(state);

    println!("API Endpoints:");
    println!("  POST  /webhook/events              - Signed instance event ingest");
    println!("  GET   /api/health                  - Health check");
    println!("  GET   /metrics                     - Prometheus metrics");
    println!("  GET   /api/accounts/{{id}}/instance  - Resolve an account's instance");
    println!("  PATCH /api/accounts/{{id}}/instance  - Pin an account to an instance");
    println!();
    println!(
        "Herald listening on http://{}:{}",
        config.server.host, config.server.port
    );
    println!("Press Ctrl+C to stop.\n");

    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                }
                Err(e) => {
                    tracing::error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        })
        .await?;

    // The listener is closed; stop the background loops
    let _ = shutdown_tx.send(true);
    pool.shutdown().await;
    let _ = monitor_handle.await;
    let _ = reclaim_handle.await;
    let _ = depth_handle.await;

    println!("Herald stopped.");
    Ok(())
}

/// Refresh the queue depth gauges until shutdown
async fn depth_loop(queue: Queue, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(DEPTH_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }

        for queue_name in ALL_QUEUES {
            match queue.depth(queue_name).await {
                Ok(depth) => metrics::update_queue_depth(
                    queue_name,
                    depth.ready,
                    depth.scheduled,
                    depth.leased,
                    depth.dead,
                ),
                Err(err) => {
                    tracing::debug!(queue = queue_name, error = %err, "Depth probe failed");
                }
            }
        }
    }
}
