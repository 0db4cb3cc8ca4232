//! Event records and memberships
//!
//! An event record carries the capacity bound and the version counter.
//! A membership is the single row relating one user to one event; it is
//! mutated in place on every transition and never deleted.

use serde::{Deserialize, Serialize};

use crate::{EventId, RollcallError, RollcallResult, Timestamp, UserId};

/// Capacity-bounded event row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    /// Maximum number of Joined members (always positive)
    pub capacity: u32,
    /// Closed events accept no new joins
    pub is_open: bool,
    /// Incremented once per committed mutation
    pub version: u64,
}

impl EventRecord {
    pub fn new(id: EventId, capacity: u32) -> RollcallResult<Self> {
        id.validate()?;
        validate_capacity(capacity)?;
        Ok(EventRecord {
            id,
            capacity,
            is_open: true,
            version: 0,
        })
    }

    pub fn closed(mut self) -> Self {
        self.is_open = false;
        self
    }
}

/// Reject a zero capacity
pub fn validate_capacity(capacity: u32) -> RollcallResult<u32> {
    if capacity == 0 {
        return Err(RollcallError::InvalidRequest(
            "capacity must be positive".into(),
        ));
    }
    Ok(capacity)
}

/// Membership state
///
/// The waitlist position only exists while waitlisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MembershipState {
    Joined,
    /// 1-based FIFO position, unique per event
    Waitlisted { position: u32 },
    /// Terminal for this membership instance; a later join revives the row
    Left,
}

impl MembershipState {
    /// Joined or Waitlisted
    #[inline]
    pub fn is_active(self) -> bool {
        !matches!(self, MembershipState::Left)
    }

    #[inline]
    pub fn is_joined(self) -> bool {
        matches!(self, MembershipState::Joined)
    }

    #[inline]
    pub fn waitlist_position(self) -> Option<u32> {
        match self {
            MembershipState::Waitlisted { position } => Some(position),
            _ => None,
        }
    }
}

/// One user's membership of one event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub event_id: EventId,
    pub user_id: UserId,
    pub state: MembershipState,
    pub last_changed_at: Timestamp,
}

impl Membership {
    pub fn new(event_id: EventId, user_id: UserId, state: MembershipState, now: Timestamp) -> Self {
        Membership {
            event_id,
            user_id,
            state,
            last_changed_at: now,
        }
    }

    /// Move to a new state, stamping the change time
    pub fn transition(&mut self, state: MembershipState, now: Timestamp) {
        self.state = state;
        self.last_changed_at = now;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    #[inline]
    pub fn waitlist_position(&self) -> Option<u32> {
        self.state.waitlist_position()
    }
}
