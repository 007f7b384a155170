//! Instance webhook ingest and control API
//!
//! Worker instances push session lifecycle events, delivery receipts
//! and message traffic to this server; operators use the same surface
//! for health, metrics and instance pinning. Every webhook request is
//! authenticated with an HMAC signature over the raw body before any
//! parsing happens.

pub mod api;
pub mod events;
pub mod server;
pub mod signature;

pub use api::{ApiResponse, ErrorResponse, HealthResponse};
pub use events::{is_manual_device, InstanceEvent};
pub use server::{AppState, WebhookServer};
pub use signature::{SignatureError, SIGNATURE_HEADER, TIMESTAMP_HEADER};
