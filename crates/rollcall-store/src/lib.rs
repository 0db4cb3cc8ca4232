//! Rollcall Store - Durable roster storage
//!
//! This crate defines the store adapter the engine consumes:
//! - Per-event roster loads
//! - Atomic compare-and-commit keyed on the event version
//! - A transactional outbox of committed change events
//! - An in-memory adapter for tests and embedding

pub mod store;
pub mod memory;

pub use store::*;
pub use memory::*;
