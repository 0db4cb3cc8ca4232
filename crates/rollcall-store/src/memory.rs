//! In-memory store adapter

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;
use rollcall_core::{
    ChangeEvent, EventId, EventRecord, Membership, RollcallError, RollcallResult, UserId,
};

use crate::{Commit, MembershipStore, StoredRoster};

#[derive(Debug)]
struct EventEntry {
    record: EventRecord,
    memberships: HashMap<UserId, Membership>,
    /// Committed, unacknowledged changes in commit order
    outbox: Vec<ChangeEvent>,
}

/// Store counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub loads: u64,
    pub commits: u64,
    pub conflicts: u64,
    pub injected_failures: u64,
}

/// In-memory adapter with version-keyed compare-and-commit.
///
/// Safe to share between several coordinators (`Arc<MemoryStore>`), which is
/// how multi-process contention is exercised in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: RwLock<BTreeMap<EventId, EventEntry>>,
    transient_failures: AtomicU32,
    forced_conflicts: AtomicU32,
    loads: AtomicU64,
    commits: AtomicU64,
    conflicts: AtomicU64,
    injected: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Fail the next `count` commits with `TransientStore`
    pub fn inject_transient_failures(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` commits with `ConcurrencyConflict`
    pub fn inject_conflicts(&self, count: u32) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            loads: self.loads.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            injected_failures: self.injected.load(Ordering::Relaxed),
        }
    }

    /// Number of events held
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl MembershipStore for MemoryStore {
    fn create_event(&self, event: EventRecord) -> RollcallResult<()> {
        let mut events = self.events.write();
        if events.contains_key(&event.id) {
            return Err(RollcallError::EventExists(event.id));
        }
        events.insert(
            event.id,
            EventEntry {
                record: event,
                memberships: HashMap::new(),
                outbox: Vec::new(),
            },
        );
        Ok(())
    }

    fn load(&self, event_id: EventId) -> RollcallResult<StoredRoster> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let events = self.events.read();
        let entry = events
            .get(&event_id)
            .ok_or(RollcallError::EventNotFound(event_id))?;
        Ok(StoredRoster {
            event: entry.record.clone(),
            memberships: entry.memberships.values().cloned().collect(),
        })
    }

    fn commit(&self, commit: Commit) -> RollcallResult<u64> {
        commit.validate()?;

        if Self::take_one(&self.transient_failures) {
            self.injected.fetch_add(1, Ordering::Relaxed);
            return Err(RollcallError::TransientStore("injected failure".into()));
        }

        let mut events = self.events.write();
        let entry = events
            .get_mut(&commit.event.id)
            .ok_or(RollcallError::EventNotFound(commit.event.id))?;

        if Self::take_one(&self.forced_conflicts) {
            self.injected.fetch_add(1, Ordering::Relaxed);
            self.conflicts.fetch_add(1, Ordering::Relaxed);
            return Err(RollcallError::ConcurrencyConflict {
                expected: commit.expected_version,
                actual: entry.record.version,
            });
        }

        if entry.record.version != commit.expected_version {
            self.conflicts.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                event = %commit.event.id,
                expected = commit.expected_version,
                actual = entry.record.version,
                "compare-and-commit lost"
            );
            return Err(RollcallError::ConcurrencyConflict {
                expected: commit.expected_version,
                actual: entry.record.version,
            });
        }

        let version = commit.event.version;
        entry.record = commit.event;
        for m in commit.memberships {
            entry.memberships.insert(m.user_id, m);
        }
        entry.outbox.extend(commit.changes);
        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(version)
    }

    fn pending_outbox(&self, limit: usize) -> RollcallResult<Vec<ChangeEvent>> {
        let events = self.events.read();
        Ok(events
            .values()
            .flat_map(|entry| entry.outbox.iter().cloned())
            .take(limit)
            .collect())
    }

    fn ack_outbox(&self, event_id: EventId, versions: &[u64]) -> RollcallResult<()> {
        let mut events = self.events.write();
        let entry = events
            .get_mut(&event_id)
            .ok_or(RollcallError::EventNotFound(event_id))?;
        entry
            .outbox
            .retain(|c| !versions.contains(&c.resulting_version));
        Ok(())
    }
}
