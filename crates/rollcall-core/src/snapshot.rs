//! Roster snapshots and operation outcomes

use serde::{Deserialize, Serialize};

use crate::{EventId, EventRecord, Membership, MembershipState, UserId};

/// Point-in-time view of one event's roster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub event_id: EventId,
    pub capacity: u32,
    pub is_open: bool,
    /// Joined members, in the order they took their seat
    pub joined: Vec<UserId>,
    /// Waitlisted members with their position, ascending
    pub waitlist: Vec<(UserId, u32)>,
    pub version: u64,
}

impl RosterSnapshot {
    /// Build a snapshot from an event row and its membership rows
    pub fn from_rows<'a>(
        event: &EventRecord,
        memberships: impl IntoIterator<Item = &'a Membership>,
    ) -> Self {
        let mut joined = Vec::new();
        let mut waitlist = Vec::new();

        for m in memberships {
            match m.state {
                MembershipState::Joined => joined.push((m.last_changed_at, m.user_id)),
                MembershipState::Waitlisted { position } => waitlist.push((m.user_id, position)),
                MembershipState::Left => {}
            }
        }

        joined.sort();
        waitlist.sort_by_key(|(_, position)| *position);

        RosterSnapshot {
            event_id: event.id,
            capacity: event.capacity,
            is_open: event.is_open,
            joined: joined.into_iter().map(|(_, user)| user).collect(),
            waitlist,
            version: event.version,
        }
    }

    /// State of a user as seen by this snapshot
    pub fn state_of(&self, user: UserId) -> Option<MembershipState> {
        if self.joined.contains(&user) {
            return Some(MembershipState::Joined);
        }
        self.waitlist
            .iter()
            .find(|(u, _)| *u == user)
            .map(|(_, position)| MembershipState::Waitlisted {
                position: *position,
            })
    }

    #[inline]
    pub fn joined_count(&self) -> usize {
        self.joined.len()
    }
}

/// Seat outcome of a join
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinState {
    Joined,
    Waitlisted,
}

/// Authoritative result of a join
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOutcome {
    pub state: JoinState,
    /// Waitlist position when waitlisted
    pub position: Option<u32>,
    pub version: u64,
}

impl JoinOutcome {
    /// Convert an active membership state into a join outcome
    pub fn from_state(state: MembershipState, version: u64) -> Option<Self> {
        match state {
            MembershipState::Joined => Some(JoinOutcome {
                state: JoinState::Joined,
                position: None,
                version,
            }),
            MembershipState::Waitlisted { position } => Some(JoinOutcome {
                state: JoinState::Waitlisted,
                position: Some(position),
                version,
            }),
            MembershipState::Left => None,
        }
    }

    /// Membership state this outcome describes
    pub fn membership_state(&self) -> MembershipState {
        match (self.state, self.position) {
            (JoinState::Joined, _) => MembershipState::Joined,
            (JoinState::Waitlisted, Some(position)) => MembershipState::Waitlisted { position },
            (JoinState::Waitlisted, None) => MembershipState::Waitlisted { position: 0 },
        }
    }
}

/// Authoritative result of a leave
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveOutcome {
    pub version: u64,
    /// Member promoted into the freed seat by the same commit
    pub promoted: Option<UserId>,
}
