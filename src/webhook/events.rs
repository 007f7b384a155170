//! Instance event payloads
//!
//! Worker instances report session lifecycle changes, delivery receipts
//! and raw message traffic through a single webhook endpoint. The
//! `event` field discriminates the payload shape.

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InstanceEvent {
    /// Session finished pairing and is ready to send
    SessionReady { session_id: String },

    /// Session lost its connection to the phone
    SessionDisconnected {
        session_id: String,
        #[serde(default)]
        reason: Option<String>,
    },

    /// Provider-side status change for a sent message
    MessageStatusUpdated { message_id: String, status: String },

    /// Delivery receipt for a sent message
    MessageDelivered { message_id: String },

    /// Read receipt for a sent message
    MessageRead { message_id: String },

    /// A message was created on the session, including the owner's own
    /// sends. `device_type` tells which client produced it.
    MessageCreate {
        session_id: String,
        from_me: bool,
        #[serde(default)]
        device_type: Option<String>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
}

impl InstanceEvent {
    /// Label for logging and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            InstanceEvent::SessionReady { .. } => "session_ready",
            InstanceEvent::SessionDisconnected { .. } => "session_disconnected",
            InstanceEvent::MessageStatusUpdated { .. } => "message_status_updated",
            InstanceEvent::MessageDelivered { .. } => "message_delivered",
            InstanceEvent::MessageRead { .. } => "message_read",
            InstanceEvent::MessageCreate { .. } => "message_create",
        }
    }
}

/// Whether a `message_create` came from the phone as opposed to a web
/// client. Our own dispatches surface as web-client creates, and an
/// instance that omits the device field cannot be distinguished from
/// them, so only an explicit non-web device counts as manual use.
pub fn is_manual_device(device_type: Option<&str>) -> bool {
    match device_type {
        Some(device) => !device.eq_ignore_ascii_case("web"),
        None => false,
    }
}
