pub mod accounts;
pub mod dispatch;
pub mod migrate;
pub mod serve;
pub mod stats;

// Re-export command functions for convenience
pub use accounts::accounts;
pub use dispatch::dispatch;
pub use migrate::migrate;
pub use serve::serve;
pub use stats::stats;
