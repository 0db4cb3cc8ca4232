//! Change events
//!
//! A change event is an immutable record of one committed transition.
//! Several change events may share one `resulting_version` when a single
//! commit produces more than one transition (leave + promotion, capacity
//! increase + promotions).

use serde::{Deserialize, Serialize};

use crate::{EventId, Timestamp, UserId};

/// Committed transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    /// User took a seat directly
    Joined,
    /// User was appended to the waitlist
    Waitlisted { position: u32 },
    /// User left (from a seat or the waitlist)
    Left,
    /// Waitlist head moved into a freed seat
    Promoted,
    /// Capacity was updated by the event metadata provider
    CapacityChanged { capacity: u32 },
    /// Event stopped accepting joins
    Closed,
    /// Event started accepting joins again
    Reopened,
}

/// Fieldless transition classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransitionType {
    Joined = 0x01,
    Waitlisted = 0x02,
    Left = 0x03,
    Promoted = 0x04,
    CapacityChanged = 0x10,
    Closed = 0x11,
    Reopened = 0x12,
}

impl Transition {
    pub fn transition_type(self) -> TransitionType {
        match self {
            Transition::Joined => TransitionType::Joined,
            Transition::Waitlisted { .. } => TransitionType::Waitlisted,
            Transition::Left => TransitionType::Left,
            Transition::Promoted => TransitionType::Promoted,
            Transition::CapacityChanged { .. } => TransitionType::CapacityChanged,
            Transition::Closed => TransitionType::Closed,
            Transition::Reopened => TransitionType::Reopened,
        }
    }
}

impl TransitionType {
    /// Does this transition concern a single member (vs the event itself)?
    pub fn is_member_transition(self) -> bool {
        (self as u8) < 0x10
    }
}

/// Change event - broadcast to every subscriber of the event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_id: EventId,
    /// Affected member; `None` for event-level transitions
    pub user_id: Option<UserId>,
    pub transition: Transition,
    /// Event version after the commit that produced this change
    pub resulting_version: u64,
    /// Number of change events committed at `resulting_version`
    pub commit_size: u32,
    pub occurred_at: Timestamp,
}

impl ChangeEvent {
    pub fn member(
        event_id: EventId,
        user_id: UserId,
        transition: Transition,
        resulting_version: u64,
        occurred_at: Timestamp,
    ) -> Self {
        ChangeEvent {
            event_id,
            user_id: Some(user_id),
            transition,
            resulting_version,
            commit_size: 1,
            occurred_at,
        }
    }

    pub fn event_level(
        event_id: EventId,
        transition: Transition,
        resulting_version: u64,
        occurred_at: Timestamp,
    ) -> Self {
        ChangeEvent {
            event_id,
            user_id: None,
            transition,
            resulting_version,
            commit_size: 1,
            occurred_at,
        }
    }

    /// Mark this change as one of `size` changes of the same commit
    pub fn in_commit_of(mut self, size: u32) -> Self {
        self.commit_size = size.max(1);
        self
    }

    #[inline]
    pub fn transition_type(&self) -> TransitionType {
        self.transition.transition_type()
    }

    /// Identity of this change within its version (used for deduplication)
    #[inline]
    pub fn key(&self) -> ChangeKey {
        ChangeKey {
            version: self.resulting_version,
            transition: self.transition_type(),
            user_id: self.user_id,
        }
    }
}

/// Deduplication key of a change event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChangeKey {
    pub version: u64,
    pub transition: TransitionType,
    pub user_id: Option<UserId>,
}
