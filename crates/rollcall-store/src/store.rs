//! Store adapter interface

use rollcall_core::{
    ChangeEvent, EventId, EventRecord, Membership, RollcallError, RollcallResult, RosterSnapshot,
    UserId,
};

/// One event's row plus all of its membership rows
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRoster {
    pub event: EventRecord,
    pub memberships: Vec<Membership>,
}

impl StoredRoster {
    pub fn membership(&self, user: UserId) -> Option<&Membership> {
        self.memberships.iter().find(|m| m.user_id == user)
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot::from_rows(&self.event, &self.memberships)
    }
}

/// A transactional write of one event
///
/// Applied atomically iff the stored version still equals
/// `expected_version`: the event row is replaced, every listed membership
/// row is upserted and the change events are appended to the outbox.
#[derive(Clone, Debug)]
pub struct Commit {
    pub expected_version: u64,
    pub event: EventRecord,
    pub memberships: Vec<Membership>,
    pub changes: Vec<ChangeEvent>,
}

impl Commit {
    /// Structural checks every adapter runs before touching storage
    pub fn validate(&self) -> RollcallResult<()> {
        if self.event.version != self.expected_version + 1 {
            return Err(RollcallError::InvalidRequest(format!(
                "commit must advance version by one ({} -> {})",
                self.expected_version, self.event.version
            )));
        }
        if self.memberships.iter().any(|m| m.event_id != self.event.id) {
            return Err(RollcallError::InvalidRequest(
                "membership row belongs to another event".into(),
            ));
        }
        if self
            .changes
            .iter()
            .any(|c| {
                c.event_id != self.event.id
                    || c.resulting_version != self.event.version
                    || c.commit_size as usize != self.changes.len()
            })
        {
            return Err(RollcallError::InvalidRequest(
                "change event does not match the committed version".into(),
            ));
        }
        Ok(())
    }
}

/// Durable store adapter
///
/// Implementations must make `commit` an atomic compare-and-swap on the
/// event version. Failures that are worth retrying are reported as
/// `ConcurrencyConflict` or `TransientStore`.
pub trait MembershipStore: Send + Sync {
    /// Insert a new event row (version 0)
    fn create_event(&self, event: EventRecord) -> RollcallResult<()>;

    /// Load the event row and all of its memberships
    fn load(&self, event_id: EventId) -> RollcallResult<StoredRoster>;

    /// Compare-and-commit; returns the new version
    fn commit(&self, commit: Commit) -> RollcallResult<u64>;

    /// Committed change events not yet acknowledged, oldest first
    fn pending_outbox(&self, limit: usize) -> RollcallResult<Vec<ChangeEvent>>;

    /// Acknowledge the outbox entries of `event_id` committed at exactly the
    /// given versions. Entries at other versions stay pending, even older ones.
    fn ack_outbox(&self, event_id: EventId, versions: &[u64]) -> RollcallResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{MembershipState, Timestamp, Transition};

    fn commit_for(version: u64) -> Commit {
        let mut event = EventRecord::new(EventId::new(1), 1).unwrap();
        event.version = version;
        Commit {
            expected_version: 0,
            memberships: vec![Membership::new(
                event.id,
                UserId::new(1),
                MembershipState::Joined,
                Timestamp::ZERO,
            )],
            changes: vec![ChangeEvent::member(
                event.id,
                UserId::new(1),
                Transition::Joined,
                version,
                Timestamp::ZERO,
            )],
            event,
        }
    }

    #[test]
    fn test_commit_must_advance_by_one() {
        assert!(commit_for(1).validate().is_ok());
        assert!(commit_for(2).validate().is_err());
    }

    #[test]
    fn test_commit_rejects_foreign_rows() {
        let mut commit = commit_for(1);
        commit.memberships[0].event_id = EventId::new(9);
        assert!(matches!(
            commit.validate(),
            Err(RollcallError::InvalidRequest(_))
        ));
    }
}
