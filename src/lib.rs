//! herald - WhatsApp Campaign Dispatch Engine
//!
//! A campaign dispatch and session orchestration system for WhatsApp
//! messaging over a fleet of worker instances.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`store`] - PostgreSQL persistence (workspaces, accounts, campaigns, logs)
//! - [`cache`] - Redis routes, mobile-activity timestamps and locks
//! - [`queue`] - Redis-backed job queues and the worker pool
//! - [`dispatch`] - The campaign send cycle: claim, render, send, settle
//! - [`selector`] - Health-ranked sending-account selection
//! - [`router`] - Workspace-to-instance sharding and account routing
//! - [`gateway`] - HTTP client for the worker-instance API
//! - [`registry`] - Account lifecycle bookkeeping
//! - [`health`] - Session health scoring and auto-reconnect
//! - [`conflict`] - Mobile-activity pause/resume resolution
//! - [`webhook`] - Signed instance webhook ingest and the control API
//! - [`notifications`] - Campaign status-change fan-out
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use herald::config::Config;
//! use herald::store::Store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Store::connect(&config.database.postgres_url, 4).await?;
//!     store.init_schema().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod commands;
pub mod config;
pub mod conflict;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod queue;
pub mod registry;
pub mod router;
pub mod selector;
pub mod store;
pub mod utils;
pub mod webhook;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::dispatch::{DispatchEngine, DispatchHandler};
    pub use crate::error::{Error, ErrorCategory, HeraldErrorTrait, Result};
    pub use crate::models::{
        Account, Campaign, CampaignLog, CampaignStats, CampaignStatus, LogStatus, Workspace,
    };
    pub use crate::queue::{Job, JobPayload, Queue, WorkerPool};
    pub use crate::store::Store;
}

// Direct re-exports for convenience
pub use models::{Account, Campaign, CampaignLog, CampaignStatus, LogStatus, Workspace};
