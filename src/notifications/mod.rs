//! Campaign status-change notifications
//!
//! Campaign transitions (started, paused, resumed, completed, failed) are
//! pushed to external consumers through pluggable channels.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │      Notifier                              │
//! │  - Event construction                      │
//! │  - Channel fan-out                         │
//! │  - Best-effort delivery                    │
//! └────────────────────────────────────────────┘
//!                     │
//!                     ▼
//!               ┌─────────┐
//!               │ Webhook │
//!               │ Channel │
//!               └─────────┘
//! ```
//!
//! Emission is tied to the conditional status UPDATEs in the store: a
//! notification fires only when the caller observed a real row
//! transition, so each transition notifies exactly once no matter how
//! many workers race over the same campaign.
//!
//! # Example
//!
//! ```rust,ignore
//! use herald::notifications::{CampaignEvent, Notifier};
//!
//! let mut notifier = Notifier::new();
//! notifier.add_webhook_channel("https://hooks.example.com/campaigns")?;
//!
//! if store.complete_campaign(campaign.id).await? {
//!     notifier.notify(CampaignEvent::completed(&campaign)).await;
//! }
//! ```

pub mod channels;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

// Re-exports
pub use channels::webhook::{WebhookChannel, WebhookConfig};
pub use channels::{Channel, ChannelError, DeliveryStatus};

use crate::models::Campaign;

/// What happened to the campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CampaignEventKind {
    /// Dispatch began and sends are being queued
    Started,
    /// Every log reached a terminal state
    Completed,
    /// The campaign failed as a whole
    Failed { reason: String },
    /// Mobile activity on the sending session halted all sends
    Paused { session_id: String, reason: String },
    /// Sends resumed after a conflict pause
    Resumed { forced: bool },
}

impl CampaignEventKind {
    /// Stable label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Paused { .. } => "paused",
            Self::Resumed { .. } => "resumed",
        }
    }
}

impl std::fmt::Display for CampaignEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single campaign status-change notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignEvent {
    /// Unique event identifier
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub workspace_id: Uuid,
    pub campaign_name: String,
    pub kind: CampaignEventKind,
    pub occurred_at: DateTime<Utc>,
}

impl CampaignEvent {
    pub fn new(campaign: &Campaign, kind: CampaignEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            workspace_id: campaign.workspace_id,
            campaign_name: campaign.name.clone(),
            kind,
            occurred_at: Utc::now(),
        }
    }

    pub fn started(campaign: &Campaign) -> Self {
        Self::new(campaign, CampaignEventKind::Started)
    }

    pub fn completed(campaign: &Campaign) -> Self {
        Self::new(campaign, CampaignEventKind::Completed)
    }

    pub fn failed(campaign: &Campaign, reason: impl Into<String>) -> Self {
        Self::new(
            campaign,
            CampaignEventKind::Failed {
                reason: reason.into(),
            },
        )
    }

    pub fn paused(
        campaign: &Campaign,
        session_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            campaign,
            CampaignEventKind::Paused {
                session_id: session_id.into(),
                reason: reason.into(),
            },
        )
    }

    pub fn resumed(campaign: &Campaign, forced: bool) -> Self {
        Self::new(campaign, CampaignEventKind::Resumed { forced })
    }
}

/// Fans campaign events out to every registered channel.
///
/// Delivery is best-effort: a channel failure is logged and never
/// propagates into the dispatch path.
#[derive(Default)]
pub struct Notifier {
    channels: Vec<Arc<dyn Channel>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    /// Register a channel
    pub fn add_channel(&mut self, channel: Arc<dyn Channel>) {
        tracing::info!(channel = channel.name(), "Registered notification channel");
        self.channels.push(channel);
    }

    /// Register a webhook channel for the given URL
    pub fn add_webhook_channel(&mut self, url: &str) -> Result<(), ChannelError> {
        let channel = WebhookChannel::from_url(url)?;
        self.add_channel(Arc::new(channel));
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Deliver an event through every channel
    pub async fn notify(&self, event: CampaignEvent) {
        if self.channels.is_empty() {
            tracing::debug!(
                campaign_id = %event.campaign_id,
                event = %event.kind,
                "Campaign event with no channels registered"
            );
            return;
        }

        for channel in &self.channels {
            match channel.send(&event).await {
                Ok(status) if status.success => {
                    tracing::debug!(
                        campaign_id = %event.campaign_id,
                        event = %event.kind,
                        channel = channel.name(),
                        "Notification delivered"
                    );
                }
                Ok(status) => {
                    tracing::warn!(
                        campaign_id = %event.campaign_id,
                        event = %event.kind,
                        channel = channel.name(),
                        detail = ?status.message,
                        "Notification delivery failed"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        campaign_id = %event.campaign_id,
                        event = %event.kind,
                        channel = channel.name(),
                        error = %err,
                        "Notification channel error"
                    );
                }
            }
        }
    }
}
