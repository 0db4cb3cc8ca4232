//! Roster working set
//!
//! A roster is one event's rows loaded inside a transaction. Operations
//! mutate it in place and record the transitions they produce; the caller
//! then turns the accumulated delta into a single commit that advances the
//! event version by exactly one.

use std::collections::{BTreeSet, HashMap};

use rollcall_core::{
    check_roster, ChangeEvent, EventRecord, InvariantViolation, Membership, MembershipState,
    RollcallError, RollcallResult, RosterSnapshot, Timestamp, Transition, UserId,
};

use crate::enforcer;

/// Effect of a join on the working set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinEffect {
    /// User already held this active state; nothing changed
    Existing(MembershipState),
    /// User was admitted into this state
    Admitted(MembershipState),
}

impl JoinEffect {
    pub fn state(self) -> MembershipState {
        match self {
            JoinEffect::Existing(state) | JoinEffect::Admitted(state) => state,
        }
    }
}

/// Rows and change events produced by the operations on a roster
#[derive(Clone, Debug)]
pub struct RosterDelta {
    pub expected_version: u64,
    /// Event row with its version advanced by one
    pub event: EventRecord,
    pub memberships: Vec<Membership>,
    pub changes: Vec<ChangeEvent>,
}

/// Mutable working copy of one event's roster
#[derive(Clone, Debug)]
pub struct Roster {
    event: EventRecord,
    base_version: u64,
    members: HashMap<UserId, Membership>,
    dirty: BTreeSet<UserId>,
    event_dirty: bool,
    transitions: Vec<(Option<UserId>, Transition)>,
    now: Timestamp,
}

impl Roster {
    pub fn new(event: EventRecord, memberships: Vec<Membership>, now: Timestamp) -> Self {
        let event_id = event.id;
        Roster {
            base_version: event.version,
            members: memberships
                .into_iter()
                .filter(|m| m.event_id == event_id)
                .map(|m| (m.user_id, m))
                .collect(),
            event,
            dirty: BTreeSet::new(),
            event_dirty: false,
            transitions: Vec::new(),
            now,
        }
    }

    pub fn event(&self) -> &EventRecord {
        &self.event
    }

    pub fn membership(&self, user: UserId) -> Option<&Membership> {
        self.members.get(&user)
    }

    pub fn joined_count(&self) -> usize {
        self.members.values().filter(|m| m.state.is_joined()).count()
    }

    /// Waitlisted rows in FIFO order
    pub fn waitlist(&self) -> Vec<&Membership> {
        let mut list: Vec<&Membership> = self
            .members
            .values()
            .filter(|m| m.waitlist_position().is_some())
            .collect();
        list.sort_by_key(|m| m.waitlist_position());
        list
    }

    /// Largest waitlist position in use (0 when empty)
    pub fn waitlist_tail(&self) -> u32 {
        self.members
            .values()
            .filter_map(|m| m.waitlist_position())
            .max()
            .unwrap_or(0)
    }

    /// Has any operation changed the working set?
    pub fn is_dirty(&self) -> bool {
        self.event_dirty || !self.dirty.is_empty()
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot::from_rows(&self.event, self.members.values())
    }

    /// Check every roster invariant against the working set
    pub fn check(&self) -> Result<(), InvariantViolation> {
        let rows: Vec<Membership> = self.members.values().cloned().collect();
        check_roster(&self.event, &rows)
    }

    /// Admit a user, or report the active state they already hold
    pub fn join(&mut self, user: UserId) -> RollcallResult<JoinEffect> {
        if !self.event.is_open {
            return Err(RollcallError::EventClosed(self.event.id));
        }

        if let Some(existing) = self.members.get(&user) {
            if existing.is_active() {
                return Ok(JoinEffect::Existing(existing.state));
            }
        }

        let state = enforcer::admit(&self.event, self.joined_count(), self.waitlist_tail());
        self.set_state(user, state);
        let transition = match state {
            MembershipState::Waitlisted { position } => Transition::Waitlisted { position },
            _ => Transition::Joined,
        };
        self.transitions.push((Some(user), transition));
        Ok(JoinEffect::Admitted(state))
    }

    /// Remove an active member; returns the user promoted into a freed seat
    pub fn leave(&mut self, user: UserId) -> RollcallResult<Option<UserId>> {
        let prior = match self.members.get(&user) {
            Some(m) if m.is_active() => m.state,
            _ => {
                return Err(RollcallError::NotAMember {
                    event: self.event.id,
                    user,
                })
            }
        };

        self.set_state(user, MembershipState::Left);
        self.transitions.push((Some(user), Transition::Left));

        match prior {
            MembershipState::Joined => Ok(self.promote_one()),
            MembershipState::Waitlisted { position } => {
                self.compact_after(position);
                Ok(None)
            }
            MembershipState::Left => Ok(None),
        }
    }

    /// Apply a capacity update; returns promoted users
    pub fn set_capacity(&mut self, capacity: u32) -> RollcallResult<Vec<UserId>> {
        let capacity = enforcer::plan_capacity_change(&self.event, self.joined_count(), capacity)?;
        if capacity == self.event.capacity {
            return Ok(Vec::new());
        }
        self.event.capacity = capacity;
        self.event_dirty = true;
        self.transitions
            .push((None, Transition::CapacityChanged { capacity }));
        Ok(self.promote_all())
    }

    /// Open or close the event; re-opening fills free seats from the waitlist
    pub fn set_open(&mut self, is_open: bool) -> Vec<UserId> {
        if self.event.is_open == is_open {
            return Vec::new();
        }
        self.event.is_open = is_open;
        self.event_dirty = true;
        if is_open {
            self.transitions.push((None, Transition::Reopened));
            self.promote_all()
        } else {
            self.transitions.push((None, Transition::Closed));
            Vec::new()
        }
    }

    /// Turn the accumulated work into a delta, or `None` if nothing changed
    pub fn into_delta(self) -> Option<RosterDelta> {
        if !self.is_dirty() {
            return None;
        }

        let mut event = self.event;
        event.version = self.base_version + 1;
        let version = event.version;
        let now = self.now;
        let commit_size = self.transitions.len() as u32;

        let changes = self
            .transitions
            .into_iter()
            .map(|(user, transition)| ChangeEvent {
                event_id: event.id,
                user_id: user,
                transition,
                resulting_version: version,
                commit_size,
                occurred_at: now,
            })
            .collect();

        let mut members = self.members;
        let memberships = self
            .dirty
            .iter()
            .filter_map(|user| members.remove(user))
            .collect();

        Some(RosterDelta {
            expected_version: self.base_version,
            event,
            memberships,
            changes,
        })
    }

    fn set_state(&mut self, user: UserId, state: MembershipState) {
        let now = self.now;
        let event_id = self.event.id;
        self.members
            .entry(user)
            .and_modify(|m| m.transition(state, now))
            .or_insert_with(|| Membership::new(event_id, user, state, now));
        self.dirty.insert(user);
    }

    /// Promote the waitlist head if a seat is free at this instant
    fn promote_one(&mut self) -> Option<UserId> {
        if !enforcer::may_promote(&self.event, self.joined_count()) {
            return None;
        }
        let (user, position) = {
            let head = enforcer::select_promotion(self.members.values())?;
            (head.user_id, head.waitlist_position()?)
        };
        self.set_state(user, MembershipState::Joined);
        self.compact_after(position);
        self.transitions.push((Some(user), Transition::Promoted));
        Some(user)
    }

    fn promote_all(&mut self) -> Vec<UserId> {
        let mut promoted = Vec::new();
        while let Some(user) = self.promote_one() {
            promoted.push(user);
        }
        promoted
    }

    /// Close the gap left by `removed`
    fn compact_after(&mut self, removed: u32) {
        let shifted: Vec<(UserId, u32)> = self
            .members
            .values()
            .filter_map(|m| match m.state {
                MembershipState::Waitlisted { position } if position > removed => {
                    Some((m.user_id, position - 1))
                }
                _ => None,
            })
            .collect();
        for (user, position) in shifted {
            self.set_state(user, MembershipState::Waitlisted { position });
        }
    }
}
