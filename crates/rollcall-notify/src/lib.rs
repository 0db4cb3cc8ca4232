//! Rollcall Notify - Change event fan-out
//!
//! Committed transitions reach observers through the notifier:
//! - Entitlement: who may observe which event (checked at subscribe time)
//! - Interest: which observers are subscribed to which event
//! - Propagation: the background worker that fans change events out
//!
//! # Delivery
//!
//! Publishing never blocks the caller and never fails a membership
//! mutation. Each subscriber owns a bounded channel; a full channel is
//! retried after a delay, a closed channel prunes the subscription.
//! Delivery is at-least-once: observers deduplicate by version.

pub mod interest;
pub mod propagation;

pub use interest::*;
pub use propagation::*;
