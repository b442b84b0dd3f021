// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for the Redis operator
//!
//! This module contains unit tests for:
//! - The optimistic-concurrency record store
//! - Full reconcile passes against in-memory backends
//! - Pause, resume and wipe-out through DormantDatabase records
//! - Topology verification and convergence polling
//! - The work queue
//! - Validation, resource generation and the lifecycle state machine

#[path = "../common/mod.rs"]
mod common;

mod dormant;
mod state_machine;
mod store;
mod topology;
