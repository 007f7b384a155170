//! Integration tests module
//!
//! This module provides end-to-end integration tests for the herald
//! dispatch engine, including:
//! - The materialize -> claim -> outcome -> stats campaign pipeline
//! - Concurrency guarantees across workers (claims, leases, routing)
//! - Account selection ordering and fallback listing
//! - Webhook verification and send failure scenarios

pub mod distributed_test;
pub mod error_scenarios;
pub mod fixtures;
pub mod pipeline_test;
pub mod selection_test;
