//! Rollcall Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the membership engine:
//! - Identifiers (EventId, UserId, ObserverId)
//! - Time primitives (Timestamp)
//! - Event records and memberships
//! - Change events broadcast to observers
//! - Roster snapshots and operation outcomes
//! - Roster invariants and the error taxonomy

pub mod id;
pub mod time;
pub mod membership;
pub mod change;
pub mod snapshot;
pub mod invariants;
pub mod error;

pub use id::*;
pub use time::*;
pub use membership::*;
pub use change::*;
pub use snapshot::*;
pub use invariants::*;
pub use error::*;
