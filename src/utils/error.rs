//! Error types for the herald dispatch engine
//!
//! This module defines custom error types used throughout the application.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur talking to a worker instance over HTTP
#[derive(Error, Debug)]
pub enum GatewayError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server error with status code
    #[error("Instance returned status {0}")]
    ServerError(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Session is not known to the instance
    #[error("Session not found on instance: {0}")]
    SessionNotFound(String),

    /// Response body could not be interpreted
    #[error("Invalid instance response: {0}")]
    InvalidResponse(String),

    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts exceeded")]
    MaxRetriesExceeded,

    /// Account has no instance assignment
    #[error("No instance assigned to session: {0}")]
    NoInstanceAssigned(String),
}

impl GatewayError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout | Self::MaxRetriesExceeded => true,
            // Rate limiting clears on its own, other 4xx do not
            Self::ServerError(status) => *status >= 500 || *status == 429,
            Self::SessionNotFound(_) | Self::InvalidResponse(_) | Self::NoInstanceAssigned(_) => {
                false
            }
        }
    }
}

/// Errors raised by the campaign dispatch cycle
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Gateway error during a send
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// No connected account matched the campaign's requirements
    #[error("No suitable account available for workspace {0}")]
    NoSuitableAccount(Uuid),

    /// Campaign row missing
    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    /// Workspace row missing
    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(Uuid),

    /// Log row missing
    #[error("Campaign log not found: {0}")]
    LogNotFound(Uuid),

    /// Another worker holds the log, or it is already terminal
    #[error("Campaign log {0} is not claimable")]
    NotClaimable(Uuid),

    /// Recipient phone failed validation
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Template rendering failed
    #[error("Template error: {0}")]
    Template(String),
}

impl DispatchError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Gateway(e) => e.is_recoverable(),
            // Claim races resolve themselves on the next cycle
            Self::NotClaimable(_) => true,
            Self::NoSuitableAccount(_)
            | Self::CampaignNotFound(_)
            | Self::WorkspaceNotFound(_)
            | Self::LogNotFound(_)
            | Self::InvalidRecipient(_)
            | Self::Template(_) => false,
        }
    }
}
