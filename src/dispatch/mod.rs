//! Campaign dispatch
//!
//! The delivery pipeline: a `CampaignDispatch` job materializes logs
//! and fans out one `LogSend` job per sendable row; each send claims
//! its log, picks an account, paces itself, and settles the row as
//! sent, retry-scheduled or failed. Aggregate counters are recomputed
//! out of band under a Redis lock. Campaign status only ever moves
//! through conditional updates, so concurrent workers agree on who
//! performed a transition and notifications fire exactly once.

pub mod engine;
pub mod handler;
pub mod payload;
pub mod stats;

pub use engine::{DispatchEngine, DispatchReport, DrainReport, EngineConfig, LogOutcome};
pub use handler::DispatchHandler;
pub use stats::refresh_stats;
