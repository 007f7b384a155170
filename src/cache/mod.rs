//! Redis layer for coordination state
//!
//! This module holds the ephemeral state the engine coordinates through:
//! - Mobile activity: last non-web activity timestamp per session
//! - Statistics locks: per-campaign mutual exclusion for counter recomputation
//! - Route cache: account -> instance assignment lookups
//!
//! Redis here is correctness-bearing (locks, conflict timestamps, queues),
//! so construction fails fast when the server is unreachable instead of
//! degrading silently.
//!
//! # Example
//!
//! ```rust,ignore
//! use herald::cache::{Cache, CacheConfig};
//!
//! let config = CacheConfig::default();
//! let cache = Cache::new(&config).await?;
//!
//! cache.record_mobile_activity("ws-1-main", chrono::Utc::now()).await?;
//! let last = cache.last_mobile_activity("ws-1-main").await?;
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Mobile-activity timestamp TTL in seconds (default: 24 hours)
    pub mobile_ttl: u64,

    /// Route cache TTL in seconds (default: 5 minutes)
    pub route_ttl: u64,

    /// Statistics lock TTL in milliseconds (default: 10 seconds)
    pub stats_lock_ttl_ms: u64,

    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            mobile_ttl: 86400, // 24 hours
            route_ttl: 300,    // 5 minutes
            stats_lock_ttl_ms: 10_000,
            key_prefix: "herald".to_string(),
        }
    }
}

impl CacheConfig {
    /// Build from the application configuration
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            url: config.redis.url.clone(),
            pool_size: config.database.pool_size,
            stats_lock_ttl_ms: config.dispatch.stats_lock_ttl_ms,
            key_prefix: config.redis.key_prefix.clone(),
            ..Default::default()
        }
    }
}

/// Cached account route (instance assignment)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRoute {
    pub instance_index: i32,
    pub instance_url: String,
}

/// Guard for a held statistics lock
///
/// The lock is cache-based and best-effort: the TTL bounds how long a
/// crashed holder can block others, and a missed recomputation is
/// corrected on the next trigger.
#[derive(Debug, Clone)]
pub struct StatsLock {
    key: String,
    token: String,
}

/// Redis client shared across the engine
///
/// Cloning is cheap; clones share the underlying pool.
#[derive(Clone)]
pub struct Cache {
    /// Connection pool
    pool: Pool,
    /// Configuration
    config: CacheConfig,
}

impl Cache {
    /// Create a new cache instance
    pub async fn new(config: &CacheConfig) -> Result<Self> {
        let pool_config = PoolConfig::from_url(&config.url);
        let pool = pool_config
            .builder()
            .map_err(|e| anyhow::anyhow!("Failed to create pool builder: {e}"))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .context("Failed to create Redis connection pool")?;

        // Test connection
        let mut conn = pool.get().await.context("Failed to get Redis connection")?;

        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .context("Failed to ping Redis")?;

        tracing::info!(url = %config.url, "Connected to Redis");

        Ok(Self {
            pool,
            config: config.clone(),
        })
    }

    /// Clone of the underlying pool, shared with the queue runtime
    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    // =========================================================================
    // Key Generation
    // =========================================================================

    fn mobile_key(&self, session_id: &str) -> String {
        format!("{}:mobile:{}", self.config.key_prefix, session_id)
    }

    fn stats_lock_key(&self, campaign_id: Uuid) -> String {
        format!("{}:lock:stats:{}", self.config.key_prefix, campaign_id)
    }

    fn route_key(&self, account_id: Uuid) -> String {
        format!("{}:route:{}", self.config.key_prefix, account_id)
    }

    // =========================================================================
    // Mobile Activity
    // =========================================================================

    /// Record non-web activity on a session at the given instant.
    ///
    /// Only moves the timestamp forward; an out-of-order webhook cannot
    /// shrink the activity window.
    pub async fn record_mobile_activity(&self, session_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;
        let key = self.mobile_key(session_id);

        let existing: Option<i64> = conn.get(&key).await.context("Failed to read activity")?;
        let ts = at.timestamp();

        if existing.is_some_and(|prev| prev >= ts) {
            return Ok(());
        }

        conn.set_ex::<_, _, ()>(&key, ts, self.config.mobile_ttl)
            .await
            .context("Failed to record mobile activity")?;

        Ok(())
    }

    /// Last known non-web activity on a session, if any
    pub async fn last_mobile_activity(&self, session_id: &str) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;

        let ts: Option<i64> = conn
            .get(self.mobile_key(session_id))
            .await
            .context("Failed to read mobile activity")?;

        Ok(ts.and_then(|t| DateTime::from_timestamp(t, 0)))
    }

    /// Seconds of mobile inactivity, or `None` when no activity was ever seen
    pub async fn mobile_inactivity_secs(&self, session_id: &str) -> Result<Option<i64>> {
        let last = self.last_mobile_activity(session_id).await?;
        Ok(last.map(|t| (Utc::now() - t).num_seconds()))
    }

    // =========================================================================
    // Statistics Locks
    // =========================================================================

    /// Try to acquire the per-campaign statistics lock.
    ///
    /// Returns `None` when another worker holds it; concurrent triggers
    /// collapse into a single recomputation.
    pub async fn acquire_stats_lock(&self, campaign_id: Uuid) -> Result<Option<StatsLock>> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;
        let key = self.stats_lock_key(campaign_id);
        let token = Uuid::new_v4().to_string();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(self.config.stats_lock_ttl_ms)
            .query_async(&mut *conn)
            .await
            .context("Failed to acquire stats lock")?;

        if acquired.is_some() {
            Ok(Some(StatsLock { key, token }))
        } else {
            Ok(None)
        }
    }

    /// Release a held statistics lock.
    ///
    /// Only deletes the key while our token is still in it, so an
    /// expired-and-reacquired lock is never released from under its
    /// new holder.
    pub async fn release_stats_lock(&self, lock: StatsLock) -> Result<()> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;

        let current: Option<String> = conn.get(&lock.key).await.context("Failed to read lock")?;
        if current.as_deref() == Some(lock.token.as_str()) {
            let _: () = conn.del(&lock.key).await.context("Failed to release lock")?;
        }

        Ok(())
    }

    // =========================================================================
    // Route Cache
    // =========================================================================

    /// Cached instance assignment for an account
    pub async fn get_route(&self, account_id: Uuid) -> Result<Option<CachedRoute>> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;

        let raw: Option<Vec<u8>> = conn
            .get(self.route_key(account_id))
            .await
            .context("Failed to read route")?;

        match raw {
            Some(bytes) => {
                let route: CachedRoute =
                    serde_json::from_slice(&bytes).context("Failed to decode route")?;
                Ok(Some(route))
            }
            None => Ok(None),
        }
    }

    /// Cache an account's instance assignment
    pub async fn set_route(&self, account_id: Uuid, route: &CachedRoute) -> Result<()> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;

        let bytes = serde_json::to_vec(route).context("Failed to encode route")?;

        conn.set_ex::<_, _, ()>(self.route_key(account_id), bytes, self.config.route_ttl)
            .await
            .context("Failed to cache route")?;

        Ok(())
    }

    /// Drop the cached assignment. Called on migration so the very next
    /// lookup sees the new instance.
    pub async fn invalidate_route(&self, account_id: Uuid) -> Result<()> {
        let mut conn = self.pool.get().await.context("Failed to get connection")?;

        let _: () = conn
            .del(self.route_key(account_id))
            .await
            .context("Failed to invalidate route")?;

        Ok(())
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let result: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(result == "PONG")
    }

    /// Get config reference
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Stats lock TTL as a Duration
    pub fn stats_lock_ttl(&self) -> Duration {
        Duration::from_millis(self.config.stats_lock_ttl_ms)
    }
}
