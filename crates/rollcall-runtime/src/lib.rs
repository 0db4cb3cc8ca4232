//! Rollcall Runtime - Coordination and the engine facade
//!
//! This crate wires the membership engine together:
//! 1. Serialize operations per event
//! 2. Load the roster from the store
//! 3. Apply join/leave/capacity/open transitions
//! 4. Check roster invariants
//! 5. Compare-and-commit with the change events in the outbox
//! 6. Publish to the notifier and acknowledge the outbox
//!
//! Retryable failures (lost compare-and-commit, transient store errors)
//! re-run steps 2-5 with backoff.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod telemetry;

pub use config::*;
pub use coordinator::*;
pub use engine::*;
pub use telemetry::*;
