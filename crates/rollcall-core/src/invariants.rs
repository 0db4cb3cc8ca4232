//! Roster invariants
//!
//! These hold after every committed transaction. A roster that violates
//! any of them must never be committed.
//!
//! ```rust
//! use rollcall_core::{check_roster, EventId, EventRecord, Membership, MembershipState, Timestamp, UserId};
//!
//! let event = EventRecord::new(EventId::new(1), 1).unwrap();
//! let rows = vec![Membership::new(
//!     event.id,
//!     UserId::new(1),
//!     MembershipState::Joined,
//!     Timestamp::ZERO,
//! )];
//! assert!(check_roster(&event, &rows).is_ok());
//! ```

use std::collections::HashSet;
use std::fmt;

use crate::{EventRecord, Membership, MembershipState};

/// The roster invariants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Invariant {
    /// Joined count never exceeds capacity
    CapacityBound = 1,

    /// At most one row per (event, user)
    UniqueMembership = 2,

    /// Waitlist positions are exactly 1..=n
    GaplessWaitlist = 3,

    /// An open event never commits a free seat next to a non-empty waitlist
    NoStrandedOpening = 4,
}

impl Invariant {
    /// Short machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Invariant::CapacityBound => "capacity_bound",
            Invariant::UniqueMembership => "unique_membership",
            Invariant::GaplessWaitlist => "gapless_waitlist",
            Invariant::NoStrandedOpening => "no_stranded_opening",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Invariant::CapacityBound => "Occupancy Never Exceeds Capacity",
            Invariant::UniqueMembership => "One Membership Per User",
            Invariant::GaplessWaitlist => "Waitlist Is Gapless",
            Invariant::NoStrandedOpening => "Openings Are Filled Immediately",
        }
    }

    pub fn all() -> &'static [Invariant] {
        &[
            Invariant::CapacityBound,
            Invariant::UniqueMembership,
            Invariant::GaplessWaitlist,
            Invariant::NoStrandedOpening,
        ]
    }
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.name())
    }
}

/// Invariant violation with context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub invariant: Invariant,
    pub context: String,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "roster invariant violated: {} - {}", self.invariant, self.context)
    }
}

impl std::error::Error for InvariantViolation {}

/// Check every invariant against one event's rows, returning all violations
pub fn roster_violations(event: &EventRecord, memberships: &[Membership]) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    let rows: Vec<&Membership> = memberships
        .iter()
        .filter(|m| m.event_id == event.id)
        .collect();

    let joined = rows.iter().filter(|m| m.state.is_joined()).count();
    if joined > event.capacity as usize {
        violations.push(InvariantViolation {
            invariant: Invariant::CapacityBound,
            context: format!("{} joined, capacity {}", joined, event.capacity),
        });
    }

    let mut seen = HashSet::new();
    for m in &rows {
        if !seen.insert(m.user_id) {
            violations.push(InvariantViolation {
                invariant: Invariant::UniqueMembership,
                context: format!("duplicate row for {:?}", m.user_id),
            });
        }
    }

    let mut positions: Vec<u32> = rows
        .iter()
        .filter_map(|m| match m.state {
            MembershipState::Waitlisted { position } => Some(position),
            _ => None,
        })
        .collect();
    positions.sort_unstable();
    if positions.iter().enumerate().any(|(i, &p)| p != i as u32 + 1) {
        violations.push(InvariantViolation {
            invariant: Invariant::GaplessWaitlist,
            context: format!("positions {:?}", positions),
        });
    }

    if event.is_open && joined < event.capacity as usize && !positions.is_empty() {
        violations.push(InvariantViolation {
            invariant: Invariant::NoStrandedOpening,
            context: format!(
                "{} free seats with {} waitlisted",
                event.capacity as usize - joined,
                positions.len()
            ),
        });
    }

    violations
}

/// First violated invariant, if any
pub fn check_roster(event: &EventRecord, memberships: &[Membership]) -> Result<(), InvariantViolation> {
    match roster_violations(event, memberships).into_iter().next() {
        Some(violation) => Err(violation),
        None => Ok(()),
    }
}

/// Assert the roster invariants, panicking on the first violation.
///
/// Meant for tests and harnesses.
#[track_caller]
pub fn assert_roster(event: &EventRecord, memberships: &[Membership]) {
    if let Err(violation) = check_roster(event, memberships) {
        panic!("{}", violation);
    }
}
