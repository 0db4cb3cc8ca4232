//! Error types for the membership engine

use thiserror::Error;

use crate::{EventId, Invariant, ObserverId, UserId};

/// Membership engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RollcallError {
    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Event not found: {0:?}")]
    EventNotFound(EventId),

    #[error("Event already exists: {0:?}")]
    EventExists(EventId),

    // Membership errors
    #[error("User {user:?} is already a member of {event:?}")]
    AlreadyMember { event: EventId, user: UserId },

    #[error("User {user:?} is not a member of {event:?}")]
    NotAMember { event: EventId, user: UserId },

    #[error("Event {0:?} is closed")]
    EventClosed(EventId),

    // Commit errors
    #[error("Concurrency conflict: expected version {expected}, found {actual}")]
    ConcurrencyConflict { expected: u64, actual: u64 },

    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Roster invariant violated: {0}")]
    InvariantViolated(Invariant),

    // Observer errors
    #[error("Observer {observer:?} is not entitled to observe {event:?}")]
    Unauthorized { observer: ObserverId, event: EventId },

    #[error("Delivery to observer {observer:?} failed at version {version}")]
    NotifierDeliveryFailure { observer: ObserverId, version: u64 },

    #[error("Notifier stopped")]
    NotifierStopped,
}

impl RollcallError {
    /// Safe to retry automatically: the operation lost a race or hit a
    /// store hiccup, and join/leave converge on re-execution.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RollcallError::ConcurrencyConflict { .. } | RollcallError::TransientStore(_)
        )
    }
}

/// Result type for membership engine operations
pub type RollcallResult<T> = Result<T, RollcallError>;
