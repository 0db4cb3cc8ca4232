//! Rollcall State - Roster transitions and client reconciliation
//!
//! This crate implements the decision and reconciliation logic:
//! - Capacity enforcement and FIFO promotion selection
//! - In-transaction roster working sets
//! - Waitlist compaction
//! - Optimistic client views reconciled by event version

pub mod enforcer;
pub mod roster;
pub mod sync;

pub use enforcer::*;
pub use roster::*;
pub use sync::*;
