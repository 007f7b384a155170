//! Worker-instance gateway
//!
//! The only place that talks HTTP to the worker instances hosting
//! sessions. Session lifecycle calls return typed results; sends come
//! back as a [`SendOutcome`] so the dispatch engine reasons about
//! failure classes, never about status codes or response bodies.

pub mod client;
pub mod provider;

pub use client::{ClientConfig, GatewayClient, SessionStatus};

use serde::{Deserialize, Serialize};

/// Failure classes a send can come back with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendErrorKind {
    /// Worth retrying: network trouble, rate limiting, instance errors
    Transient,

    /// The message itself is unacceptable; retrying cannot help
    PermanentValidation,

    /// The session cannot send right now (gone, logged out, not paired)
    SessionUnavailable,
}

impl SendErrorKind {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::PermanentValidation => "permanent_validation",
            Self::SessionUnavailable => "session_unavailable",
        }
    }

    /// Whether trying another account can still salvage this send
    pub fn allows_fallback(&self) -> bool {
        match self {
            Self::Transient | Self::SessionUnavailable => true,
            Self::PermanentValidation => false,
        }
    }
}

/// Result of one send attempt through an instance
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The instance accepted the message
    Sent { message_id: Option<String> },

    /// The instance rejected it or could not be reached
    Failed { kind: SendErrorKind, message: String },
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Failed {
            kind: SendErrorKind::Transient,
            message: message.into(),
        }
    }
}

/// Failure class for an HTTP status from the send endpoint
pub(crate) fn classify_status(status: u16) -> SendErrorKind {
    match status {
        400 | 413 | 422 => SendErrorKind::PermanentValidation,
        401 | 403 | 404 | 409 | 410 => SendErrorKind::SessionUnavailable,
        _ => SendErrorKind::Transient,
    }
}
