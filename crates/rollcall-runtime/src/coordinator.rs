//! Join/leave coordinator
//!
//! The only writer of event versions and waitlist order. Every operation
//! runs as one transaction: under the event's async lock it loads the
//! roster, applies the transition, checks the roster invariants and
//! compare-and-commits. The commit carries its change events into the
//! store outbox; they are published after the commit and acknowledged
//! once the notifier has accepted them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::OwnedMutexGuard;
use rollcall_core::{
    ChangeEvent, EventId, EventRecord, JoinOutcome, LeaveOutcome, RollcallError, RollcallResult,
    RosterSnapshot, Timestamp, UserId,
};
use rollcall_notify::Notifier;
use rollcall_state::{JoinEffect, Roster};
use rollcall_store::{Commit, MembershipStore};

use crate::CoordinatorConfig;

/// Outbox entries relayed per `flush_outbox` batch
const OUTBOX_BATCH: usize = 1024;

/// Result of a transaction
#[derive(Debug)]
struct Committed<T> {
    value: T,
    /// Event version after the transaction (unchanged for no-ops)
    version: u64,
}

type LockRegistry = Mutex<HashMap<EventId, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive turn on one event. Dropping it releases the event lock and
/// removes the registry entry once nobody else is waiting on it.
struct EventTurn<'a> {
    locks: &'a LockRegistry,
    event_id: EventId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EventTurn<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock();
        // Clones are only handed out under the registry lock
        if matches!(locks.get(&self.event_id), Some(lock) if Arc::strong_count(lock) == 1) {
            locks.remove(&self.event_id);
        }
    }
}

/// Coordinator statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub commits: u64,
    pub noops: u64,
    pub retries: u64,
    pub exhausted: u64,
    pub relayed: u64,
}

/// Serializes and commits membership operations
pub struct Coordinator {
    config: CoordinatorConfig,
    store: Arc<dyn MembershipStore>,
    notifier: Notifier,
    locks: LockRegistry,
    stats: Mutex<CoordinatorStats>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, store: Arc<dyn MembershipStore>, notifier: Notifier) -> Self {
        Self {
            config,
            store,
            notifier,
            locks: Mutex::new(HashMap::new()),
            stats: Mutex::new(CoordinatorStats::default()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MembershipStore> {
        &self.store
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats.lock().clone()
    }

    /// Register a new event (event metadata input)
    pub fn create_event(
        &self,
        event_id: EventId,
        capacity: u32,
        is_open: bool,
    ) -> RollcallResult<EventRecord> {
        let mut record = EventRecord::new(event_id.validate()?, capacity)?;
        record.is_open = is_open;
        self.store.create_event(record.clone())?;
        tracing::info!(event = %event_id, capacity, is_open, "event created");
        Ok(record)
    }

    /// Current committed roster
    pub fn snapshot(&self, event_id: EventId) -> RollcallResult<RosterSnapshot> {
        Ok(self.store.load(event_id)?.snapshot())
    }

    /// Join an event, or report the seat already held
    pub async fn join(&self, event_id: EventId, user: UserId) -> RollcallResult<JoinOutcome> {
        let event_id = event_id.validate()?;
        let user = user.validate()?;
        let idempotent = self.config.idempotent_join;

        let committed = self
            .transact(event_id, |roster| {
                let effect = roster.join(user)?;
                if matches!(effect, JoinEffect::Existing(_)) && !idempotent {
                    return Err(RollcallError::AlreadyMember {
                        event: roster.event().id,
                        user,
                    });
                }
                Ok(effect)
            })
            .await?;

        let state = committed.value.state();
        tracing::debug!(
            event = %event_id,
            user = %user,
            version = committed.version,
            ?state,
            existing = matches!(committed.value, JoinEffect::Existing(_)),
            "join"
        );
        JoinOutcome::from_state(state, committed.version).ok_or(RollcallError::NotAMember {
            event: event_id,
            user,
        })
    }

    /// Leave an event; a freed seat is handed to the waitlist head in the same commit
    pub async fn leave(&self, event_id: EventId, user: UserId) -> RollcallResult<LeaveOutcome> {
        let event_id = event_id.validate()?;
        let user = user.validate()?;

        let committed = self.transact(event_id, |roster| roster.leave(user)).await?;

        tracing::debug!(
            event = %event_id,
            user = %user,
            version = committed.version,
            promoted = ?committed.value,
            "leave"
        );
        Ok(LeaveOutcome {
            version: committed.version,
            promoted: committed.value,
        })
    }

    /// Change the capacity; an increase promotes into the new seats
    pub async fn update_capacity(
        &self,
        event_id: EventId,
        capacity: u32,
    ) -> RollcallResult<RosterSnapshot> {
        let committed = self
            .transact(event_id.validate()?, |roster| {
                let promoted = roster.set_capacity(capacity)?;
                Ok((promoted, roster.snapshot()))
            })
            .await?;

        let (promoted, mut snapshot) = committed.value;
        snapshot.version = committed.version;
        tracing::info!(
            event = %event_id,
            capacity,
            promoted = promoted.len(),
            version = committed.version,
            "capacity updated"
        );
        Ok(snapshot)
    }

    /// Open or close an event; re-opening promotes into free seats
    pub async fn set_open(&self, event_id: EventId, is_open: bool) -> RollcallResult<RosterSnapshot> {
        let committed = self
            .transact(event_id.validate()?, |roster| {
                let promoted = roster.set_open(is_open);
                Ok((promoted, roster.snapshot()))
            })
            .await?;

        let (promoted, mut snapshot) = committed.value;
        snapshot.version = committed.version;
        tracing::info!(
            event = %event_id,
            is_open,
            promoted = promoted.len(),
            version = committed.version,
            "open state updated"
        );
        Ok(snapshot)
    }

    /// Re-publish committed changes that were never acknowledged
    ///
    /// Returns the number of change events handed to the notifier.
    pub fn flush_outbox(&self) -> RollcallResult<usize> {
        let mut relayed = 0;
        loop {
            let pending = self.store.pending_outbox(OUTBOX_BATCH)?;
            if pending.is_empty() {
                break;
            }
            let batch = pending.len();

            let mut acked: HashMap<EventId, Vec<u64>> = HashMap::new();
            for change in pending {
                let versions = acked.entry(change.event_id).or_default();
                if versions.last() != Some(&change.resulting_version) {
                    versions.push(change.resulting_version);
                }
                self.notifier.publish(change)?;
            }
            for (event_id, versions) in acked {
                self.store.ack_outbox(event_id, &versions)?;
            }

            relayed += batch;
            if batch < OUTBOX_BATCH {
                break;
            }
        }

        if relayed > 0 {
            self.stats.lock().relayed += relayed as u64;
            tracing::info!(relayed, "outbox flushed");
        }
        Ok(relayed)
    }

    /// Run `apply` against a freshly loaded roster and commit the result,
    /// retrying lost races and transient store failures.
    async fn transact<T, F>(&self, event_id: EventId, mut apply: F) -> RollcallResult<Committed<T>>
    where
        F: FnMut(&mut Roster) -> RollcallResult<T>,
    {
        let _turn = self.turn(event_id).await;

        let mut attempt = 1;
        loop {
            match self.attempt(event_id, &mut apply) {
                Ok(committed) => return Ok(committed),
                Err(e) if e.is_retryable() && attempt < self.config.max_commit_attempts => {
                    let delay = self.jittered_backoff(attempt);
                    self.stats.lock().retries += 1;
                    tracing::warn!(
                        event = %event_id,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "commit failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        self.stats.lock().exhausted += 1;
                        tracing::warn!(event = %event_id, attempt, error = %e, "giving up");
                    }
                    return Err(e);
                }
            }
        }
    }

    fn attempt<T, F>(&self, event_id: EventId, apply: &mut F) -> RollcallResult<Committed<T>>
    where
        F: FnMut(&mut Roster) -> RollcallResult<T>,
    {
        let stored = self.store.load(event_id)?;
        let mut roster = Roster::new(stored.event, stored.memberships, Timestamp::now());
        let value = apply(&mut roster)?;

        if !roster.is_dirty() {
            self.stats.lock().noops += 1;
            return Ok(Committed {
                value,
                version: roster.event().version,
            });
        }

        if let Err(violation) = roster.check() {
            tracing::error!(event = %event_id, %violation, "refusing to commit");
            return Err(RollcallError::InvariantViolated(violation.invariant));
        }

        let Some(delta) = roster.into_delta() else {
            return Err(RollcallError::InvalidRequest("empty roster delta".into()));
        };
        let changes = delta.changes.clone();
        let version = self.store.commit(Commit {
            expected_version: delta.expected_version,
            event: delta.event,
            memberships: delta.memberships,
            changes: delta.changes,
        })?;
        self.stats.lock().commits += 1;

        self.dispatch(event_id, version, changes);
        Ok(Committed { value, version })
    }

    /// Hand committed changes to the notifier. Failures here never undo
    /// the commit; unacknowledged changes stay in the outbox.
    fn dispatch(&self, event_id: EventId, version: u64, changes: Vec<ChangeEvent>) {
        if let Err(e) = self.notifier.publish_all(changes) {
            tracing::warn!(event = %event_id, version, error = %e, "publish failed, left in outbox");
            return;
        }
        if let Err(e) = self.store.ack_outbox(event_id, &[version]) {
            tracing::warn!(event = %event_id, version, error = %e, "outbox ack failed");
        }
    }

    async fn turn(&self, event_id: EventId) -> EventTurn<'_> {
        let lock = self.locks.lock().entry(event_id).or_default().clone();
        let mut turn = EventTurn {
            locks: &self.locks,
            event_id,
            guard: None,
        };
        turn.guard = Some(lock.lock_owned().await);
        turn
    }

    /// Random delay in the upper half of the backoff window
    fn jittered_backoff(&self, retry: u32) -> Duration {
        let ceiling = self.config.backoff(retry).as_millis() as u64;
        let millis = rand::thread_rng().gen_range(ceiling / 2..=ceiling);
        Duration::from_millis(millis)
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{check_roster, JoinState, Transition};
    use rollcall_notify::{NotifierConfig, OpenAccess, Subscription};
    use rollcall_store::MemoryStore;

    fn coordinator_with(
        config: CoordinatorConfig,
        store: Arc<MemoryStore>,
    ) -> (Coordinator, Notifier) {
        let (notifier, _handle) = Notifier::spawn(NotifierConfig::default(), Arc::new(OpenAccess));
        (Coordinator::new(config, store, notifier.clone()), notifier)
    }

    fn coordinator(capacity: u32) -> (Coordinator, Arc<MemoryStore>, Notifier) {
        let store = Arc::new(MemoryStore::new());
        let (coordinator, notifier) = coordinator_with(CoordinatorConfig::default(), store.clone());
        coordinator.create_event(EventId::new(1), capacity, true).unwrap();
        (coordinator, store, notifier)
    }

    fn user(id: u64) -> UserId {
        UserId::new(id)
    }

    fn assert_invariants(store: &MemoryStore, event: EventId) {
        let roster = store.load(event).unwrap();
        check_roster(&roster.event, &roster.memberships).unwrap();
    }

    async fn next(sub: &mut Subscription) -> ChangeEvent {
        tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_join_then_waitlist() {
        let (c, store, _n) = coordinator(2);
        let e = EventId::new(1);

        let a = c.join(e, user(1)).await.unwrap();
        let b = c.join(e, user(2)).await.unwrap();
        let d = c.join(e, user(3)).await.unwrap();

        assert_eq!((a.state, a.version), (JoinState::Joined, 1));
        assert_eq!((b.state, b.version), (JoinState::Joined, 2));
        assert_eq!(d.state, JoinState::Waitlisted);
        assert_eq!(d.position, Some(1));
        assert_eq!(d.version, 3);
        assert_invariants(&store, e);
    }

    #[tokio::test]
    async fn test_scenario_leave_promotes_waitlist_head() {
        let (c, store, notifier) = coordinator(2);
        let e = EventId::new(1);
        for u in 1..=4 {
            c.join(e, user(u)).await.unwrap();
        }
        let mut sub = notifier.subscribe(e, rollcall_core::ObserverId::new(1)).unwrap();

        let outcome = c.leave(e, user(2)).await.unwrap();
        assert_eq!(outcome.version, 5);
        assert_eq!(outcome.promoted, Some(user(3)));

        let snapshot = c.snapshot(e).unwrap();
        assert_eq!(snapshot.joined, vec![user(1), user(3)]);
        assert_eq!(snapshot.waitlist, vec![(user(4), 1)]);
        assert_eq!(snapshot.version, 5);

        let left = next(&mut sub).await;
        let promoted = next(&mut sub).await;
        assert_eq!((left.user_id, left.transition), (Some(user(2)), Transition::Left));
        assert_eq!(
            (promoted.user_id, promoted.transition),
            (Some(user(3)), Transition::Promoted)
        );
        assert_eq!(left.resulting_version, 5);
        assert_eq!(promoted.resulting_version, 5);
        assert_invariants(&store, e);
    }

    #[tokio::test]
    async fn test_scenario_repeated_join_is_idempotent() {
        let (c, store, _n) = coordinator(1);
        let e = EventId::new(1);

        let first = c.join(e, user(1)).await.unwrap();
        let second = c.join(e, user(1)).await.unwrap();
        assert_eq!(first, second);

        let roster = store.load(e).unwrap();
        assert_eq!(roster.memberships.len(), 1);
        assert_eq!(roster.event.version, 1);
        assert!(roster.snapshot().waitlist.is_empty());
        assert_eq!(store.pending_outbox(10).unwrap().len(), 0);
        assert_eq!(c.stats().noops, 1);
    }

    #[tokio::test]
    async fn test_strict_join_rejects_member() {
        let store = Arc::new(MemoryStore::new());
        let config = CoordinatorConfig {
            idempotent_join: false,
            ..Default::default()
        };
        let (c, _n) = coordinator_with(config, store);
        let e = EventId::new(1);
        c.create_event(e, 1, true).unwrap();

        c.join(e, user(1)).await.unwrap();
        assert_eq!(
            c.join(e, user(1)).await,
            Err(RollcallError::AlreadyMember {
                event: e,
                user: user(1)
            })
        );
    }

    #[tokio::test]
    async fn test_closed_and_missing_events() {
        let (c, _store, _n) = coordinator(1);
        let closed = EventId::new(2);
        c.create_event(closed, 1, false).unwrap();

        assert_eq!(c.join(closed, user(1)).await, Err(RollcallError::EventClosed(closed)));
        assert_eq!(
            c.join(EventId::new(9), user(1)).await,
            Err(RollcallError::EventNotFound(EventId::new(9)))
        );
        assert_eq!(
            c.leave(EventId::new(1), user(1)).await,
            Err(RollcallError::NotAMember {
                event: EventId::new(1),
                user: user(1)
            })
        );
        assert!(matches!(
            c.join(EventId::new(1), UserId::ZERO).await,
            Err(RollcallError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_leave_from_waitlist_compacts() {
        let (c, store, _n) = coordinator(1);
        let e = EventId::new(1);
        for u in 1..=4 {
            c.join(e, user(u)).await.unwrap();
        }

        let outcome = c.leave(e, user(2)).await.unwrap();
        assert_eq!(outcome.promoted, None);

        let snapshot = c.snapshot(e).unwrap();
        assert_eq!(snapshot.waitlist, vec![(user(3), 1), (user(4), 2)]);
        assert_invariants(&store, e);
    }

    #[tokio::test]
    async fn test_capacity_increase_promotes() {
        let (c, store, _n) = coordinator(1);
        let e = EventId::new(1);
        for u in 1..=4 {
            c.join(e, user(u)).await.unwrap();
        }

        let snapshot = c.update_capacity(e, 3).await.unwrap();
        assert_eq!(snapshot.capacity, 3);
        assert_eq!(snapshot.joined.len(), 3);
        assert_eq!(snapshot.waitlist, vec![(user(4), 1)]);
        assert_eq!(snapshot.version, 5);
        assert_eq!(snapshot, c.snapshot(e).unwrap());

        assert!(matches!(
            c.update_capacity(e, 2).await,
            Err(RollcallError::InvalidRequest(_))
        ));
        assert_invariants(&store, e);
    }

    #[tokio::test]
    async fn test_reopen_promotes_into_free_seats() {
        let (c, store, _n) = coordinator(1);
        let e = EventId::new(1);
        c.join(e, user(1)).await.unwrap();
        c.join(e, user(2)).await.unwrap();

        c.set_open(e, false).await.unwrap();
        let outcome = c.leave(e, user(1)).await.unwrap();
        assert_eq!(outcome.promoted, None);
        assert_eq!(c.snapshot(e).unwrap().joined_count(), 0);

        let snapshot = c.set_open(e, true).await.unwrap();
        assert_eq!(snapshot.joined, vec![user(2)]);
        assert!(snapshot.waitlist.is_empty());
        assert_invariants(&store, e);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let (c, store, _n) = coordinator(1);
        let e = EventId::new(1);
        store.inject_transient_failures(2);
        store.inject_conflicts(1);

        let outcome = c.join(e, user(1)).await.unwrap();
        assert_eq!(outcome.version, 1);
        assert_eq!(c.stats().retries, 3);
    }

    #[tokio::test]
    async fn test_retry_attempts_are_bounded() {
        let (c, store, _n) = coordinator(1);
        store.inject_transient_failures(10);

        assert!(matches!(
            c.join(EventId::new(1), user(1)).await,
            Err(RollcallError::TransientStore(_))
        ));
        assert_eq!(c.stats().exhausted, 1);
        assert_eq!(store.stats().injected_failures, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_respect_capacity() {
        let (c, store, _n) = coordinator(5);
        let c = Arc::new(c);
        let e = EventId::new(1);

        let tasks: Vec<_> = (1..=20)
            .map(|u| {
                let c = c.clone();
                tokio::spawn(async move { c.join(e, user(u)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let snapshot = c.snapshot(e).unwrap();
        assert_eq!(snapshot.joined.len(), 5);
        assert_eq!(snapshot.waitlist.len(), 15);
        let positions: Vec<u32> = snapshot.waitlist.iter().map(|(_, p)| *p).collect();
        assert_eq!(positions, (1..=15).collect::<Vec<_>>());
        assert_eq!(snapshot.version, 20);
        assert_invariants(&store, e);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scenario_same_user_races_itself() {
        let (c, store, _n) = coordinator(1);
        let c = Arc::new(c);
        let e = EventId::new(1);

        let (a, b) = tokio::join!(
            {
                let c = c.clone();
                async move { c.join(e, user(1)).await }
            },
            {
                let c = c.clone();
                async move { c.join(e, user(1)).await }
            }
        );
        assert_eq!(a.unwrap(), b.unwrap());

        let roster = store.load(e).unwrap();
        assert_eq!(roster.memberships.len(), 1);
        assert_eq!(roster.snapshot().joined, vec![user(1)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_coordinators_sharing_a_store_converge() {
        let store = Arc::new(MemoryStore::new());
        let (first, _n1) = coordinator_with(CoordinatorConfig::high_contention(), store.clone());
        let (second, _n2) = coordinator_with(CoordinatorConfig::high_contention(), store.clone());
        let e = EventId::new(1);
        first.create_event(e, 3, true).unwrap();
        let first = Arc::new(first);
        let second = Arc::new(second);

        let mut tasks = Vec::new();
        for u in 1..=12 {
            let c = if u % 2 == 0 { first.clone() } else { second.clone() };
            tasks.push(tokio::spawn(async move { c.join(e, user(u)).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let snapshot = first.snapshot(e).unwrap();
        assert_eq!(snapshot.joined.len(), 3);
        assert_eq!(snapshot.waitlist.len(), 9);
        assert_eq!(snapshot.version, 12);
        assert_invariants(&store, e);
    }

    #[tokio::test]
    async fn test_flush_outbox_relays_unacknowledged() {
        let store = Arc::new(MemoryStore::new());
        let (notifier, handle) = Notifier::spawn(NotifierConfig::default(), Arc::new(OpenAccess));
        let c = Coordinator::new(CoordinatorConfig::default(), store.clone(), notifier.clone());
        let e = EventId::new(1);
        c.create_event(e, 2, true).unwrap();

        notifier.shutdown();
        handle.await.unwrap();
        c.join(e, user(1)).await.unwrap();
        c.join(e, user(2)).await.unwrap();
        assert_eq!(store.pending_outbox(10).unwrap().len(), 2);

        let (notifier, _handle) = Notifier::spawn(NotifierConfig::default(), Arc::new(OpenAccess));
        let mut sub = notifier.subscribe(e, rollcall_core::ObserverId::new(1)).unwrap();
        let c = Coordinator::new(CoordinatorConfig::default(), store.clone(), notifier);

        assert_eq!(c.flush_outbox().unwrap(), 2);
        assert!(store.pending_outbox(10).unwrap().is_empty());
        assert_eq!(next(&mut sub).await.resulting_version, 1);
        assert_eq!(next(&mut sub).await.resulting_version, 2);
        assert_eq!(c.flush_outbox().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_later_commit_does_not_swallow_unpublished_one() {
        let store = Arc::new(MemoryStore::new());
        let (dead, dead_handle) = Notifier::spawn(NotifierConfig::default(), Arc::new(OpenAccess));
        let crashed = Coordinator::new(CoordinatorConfig::default(), store.clone(), dead.clone());
        let (healthy, notifier) = coordinator_with(CoordinatorConfig::default(), store.clone());
        let e = EventId::new(1);
        healthy.create_event(e, 2, true).unwrap();
        let mut sub = notifier.subscribe(e, rollcall_core::ObserverId::new(1)).unwrap();

        dead.shutdown();
        dead_handle.await.unwrap();
        crashed.join(e, user(1)).await.unwrap();
        healthy.join(e, user(2)).await.unwrap();

        let pending: Vec<u64> = store
            .pending_outbox(10)
            .unwrap()
            .iter()
            .map(|c| c.resulting_version)
            .collect();
        assert_eq!(pending, vec![1]);
        assert_eq!(next(&mut sub).await.resulting_version, 2);

        assert_eq!(healthy.flush_outbox().unwrap(), 1);
        assert_eq!(next(&mut sub).await.resulting_version, 1);
        assert!(store.pending_outbox(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_registry_does_not_grow() {
        let (c, _store, _n) = coordinator(1);
        for id in 2..=200 {
            c.create_event(EventId::new(id), 1, true).unwrap();
            c.join(EventId::new(id), user(1)).await.unwrap();
        }
        assert!(c.locks.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lock_registry_drains_after_contention() {
        let (c, _store, _n) = coordinator(3);
        let c = Arc::new(c);
        let mut tasks = Vec::new();
        for u in 1..=30 {
            let c = c.clone();
            tasks.push(tokio::spawn(async move { c.join(EventId::new(1), user(u)).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert!(c.locks.lock().is_empty());
        assert_eq!(c.snapshot(EventId::new(1)).unwrap().joined.len(), 3);
    }
}
