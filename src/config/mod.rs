//! Configuration management for the herald dispatch engine
//!
//! This module handles loading and validating configuration from environment variables,
//! files, and command-line arguments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Webhook/API server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis configuration
    pub redis: RedisConfig,

    /// Worker instance fleet configuration
    pub instances: InstancesConfig,

    /// Dispatch engine configuration
    pub dispatch: DispatchConfig,

    /// Session health monitor configuration
    pub health: HealthConfig,

    /// Mobile-conflict resolver configuration
    pub conflict: ConflictConfig,

    /// Notification fan-out configuration
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Webhook/API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Shared secret for webhook HMAC signatures
    pub webhook_secret: String,

    /// Accepted clock skew for signed webhook timestamps (seconds)
    pub timestamp_tolerance_secs: i64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub postgres_url: String,

    /// Maximum pool size
    pub pool_size: usize,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Prefix for every key herald writes
    pub key_prefix: String,
}

/// Worker instance fleet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancesConfig {
    /// Instance base URLs; position in the list is the instance index
    /// used by the shard function.
    pub urls: Vec<String>,

    /// Request timeout for instance control calls (seconds)
    pub request_timeout_secs: u64,

    /// Bearer token for instance control calls
    pub api_token: Option<String>,
}

/// Dispatch engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Concurrent queue workers per process
    pub worker_concurrency: usize,

    /// Logs claimed per dispatch cycle
    pub batch_size: usize,

    /// Queue job lease; an expired lease makes the job reclaimable
    pub lease_secs: u64,

    /// Age after which an `ongoing` log is considered stuck and reset
    pub stuck_log_secs: u64,

    /// TTL of the per-campaign statistics lock (milliseconds)
    pub stats_lock_ttl_ms: u64,

    /// Queue attempts before a job is dead-lettered
    pub max_job_attempts: u32,
}

/// Session health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Interval between scoring sweeps (seconds)
    pub check_interval_secs: u64,

    /// Scores below this trigger an auto-reconnect attempt
    pub reconnect_threshold: i32,

    /// Inactivity span that costs score (seconds)
    pub inactivity_secs: u64,
}

/// Mobile-conflict resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// Base cooldown before a resume check; scaled by speed tier
    pub base_cooldown_secs: u64,

    /// Resume checks before campaigns are force-resumed
    pub max_resume_attempts: u32,

    /// Mobile inactivity required before a paused campaign resumes (seconds)
    pub inactivity_window_secs: u64,
}

/// Notification fan-out configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Webhook URL campaign status events are POSTed to
    pub webhook_url: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("HERALD_HOST") {
            config.server.host = host;
        }

        if let Some(port) = std::env::var("HERALD_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
        {
            config.server.port = port;
        }

        if let Ok(secret) = std::env::var("HERALD_WEBHOOK_SECRET") {
            config.server.webhook_secret = secret;
        }

        if let Ok(url) = std::env::var("POSTGRES_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            config.database.postgres_url = url;
        }

        if let Ok(url) = std::env::var("REDIS_URL") {
            config.redis.url = url;
        }

        if let Ok(urls) = std::env::var("HERALD_INSTANCE_URLS") {
            config.instances.urls = urls
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(token) = std::env::var("HERALD_INSTANCE_TOKEN") {
            config.instances.api_token = Some(token);
        }

        if let Some(concurrency) = std::env::var("HERALD_WORKER_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            config.dispatch.worker_concurrency = concurrency;
        }

        if let Ok(url) = std::env::var("HERALD_NOTIFY_WEBHOOK") {
            config.notifications.webhook_url = Some(url);
        }

        if let Ok(level) = std::env::var("HERALD_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(format) = std::env::var("HERALD_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.database.pool_size == 0 {
            anyhow::bail!("pool_size must be greater than 0");
        }

        if self.instances.urls.is_empty() {
            anyhow::bail!("at least one instance URL must be configured");
        }

        for raw in &self.instances.urls {
            url::Url::parse(raw).with_context(|| format!("invalid instance URL: {raw}"))?;
        }

        if self.dispatch.worker_concurrency == 0 {
            anyhow::bail!("worker_concurrency must be greater than 0");
        }

        if self.dispatch.batch_size == 0 {
            anyhow::bail!("batch_size must be greater than 0");
        }

        if self.server.timestamp_tolerance_secs <= 0 {
            anyhow::bail!("timestamp_tolerance_secs must be positive");
        }

        if self.conflict.max_resume_attempts == 0 {
            anyhow::bail!("max_resume_attempts must be greater than 0");
        }

        Ok(())
    }

    /// Get instance request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.instances.request_timeout_secs)
    }

    /// Number of configured worker instances
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.urls.len()
    }

    /// Base URL of the instance at `index`
    #[must_use]
    pub fn instance_url(&self, index: usize) -> Option<&str> {
        self.instances.urls.get(index).map(String::as_str)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: String::from("0.0.0.0"),
                port: 8085,
                webhook_secret: String::new(),
                timestamp_tolerance_secs: 300,
            },
            database: DatabaseConfig {
                postgres_url: String::from("postgresql://localhost/herald"),
                pool_size: 10,
            },
            redis: RedisConfig {
                url: String::from("redis://127.0.0.1:6379"),
                key_prefix: String::from("herald"),
            },
            instances: InstancesConfig {
                urls: vec![String::from("http://localhost:3020")],
                request_timeout_secs: 30,
                api_token: None,
            },
            dispatch: DispatchConfig {
                worker_concurrency: 4,
                batch_size: 20,
                lease_secs: 120,
                stuck_log_secs: 600,
                stats_lock_ttl_ms: 10_000,
                max_job_attempts: 5,
            },
            health: HealthConfig {
                check_interval_secs: 60,
                reconnect_threshold: 40,
                inactivity_secs: 3600,
            },
            conflict: ConflictConfig {
                base_cooldown_secs: 180,
                max_resume_attempts: 5,
                inactivity_window_secs: 300,
            },
            notifications: NotificationsConfig::default(),
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}
