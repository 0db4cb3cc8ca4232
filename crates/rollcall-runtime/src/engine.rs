//! Engine facade
//!
//! Bundles a coordinator and a notifier behind the public membership API.

use std::sync::Arc;

use parking_lot::Mutex;
use rollcall_core::{
    EventId, EventRecord, JoinOutcome, LeaveOutcome, ObserverId, RollcallResult, RosterSnapshot,
    UserId,
};
use rollcall_notify::{AccessPolicy, Notifier, NotifierStats, OpenAccess, Subscription};
use rollcall_store::{MembershipStore, MemoryStore};
use tokio::task::JoinHandle;

use crate::{Coordinator, CoordinatorStats, EngineConfig};

/// Membership engine
pub struct Engine {
    config: EngineConfig,
    coordinator: Coordinator,
    notifier: Notifier,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Build an engine over a store and an access policy.
    ///
    /// Spawns the notifier task, so it must be called inside a tokio runtime.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn MembershipStore>,
        policy: Arc<dyn AccessPolicy>,
    ) -> RollcallResult<Self> {
        config.validate()?;
        let (notifier, worker) = Notifier::spawn(config.notifier.clone(), policy);
        let coordinator = Coordinator::new(config.coordinator.clone(), store, notifier.clone());
        tracing::info!(
            max_commit_attempts = config.coordinator.max_commit_attempts,
            idempotent_join = config.coordinator.idempotent_join,
            subscriber_buffer = config.notifier.subscriber_buffer,
            "engine started"
        );
        Ok(Self {
            config,
            coordinator,
            notifier,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// In-memory store, every observer entitled
    pub fn in_memory(config: EngineConfig) -> RollcallResult<Self> {
        Self::new(config, Arc::new(MemoryStore::new()), Arc::new(OpenAccess))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn coordinator_stats(&self) -> CoordinatorStats {
        self.coordinator.stats()
    }

    pub fn create_event(
        &self,
        event_id: EventId,
        capacity: u32,
        is_open: bool,
    ) -> RollcallResult<EventRecord> {
        self.coordinator.create_event(event_id, capacity, is_open)
    }

    pub async fn update_capacity(
        &self,
        event_id: EventId,
        capacity: u32,
    ) -> RollcallResult<RosterSnapshot> {
        self.coordinator.update_capacity(event_id, capacity).await
    }

    pub async fn set_open(&self, event_id: EventId, is_open: bool) -> RollcallResult<RosterSnapshot> {
        self.coordinator.set_open(event_id, is_open).await
    }

    pub async fn join(&self, event_id: EventId, user: UserId) -> RollcallResult<JoinOutcome> {
        self.coordinator.join(event_id, user).await
    }

    pub async fn leave(&self, event_id: EventId, user: UserId) -> RollcallResult<LeaveOutcome> {
        self.coordinator.leave(event_id, user).await
    }

    pub fn get_snapshot(&self, event_id: EventId) -> RollcallResult<RosterSnapshot> {
        self.coordinator.snapshot(event_id.validate()?)
    }

    /// Subscribe to an existing event's change events
    pub fn subscribe(&self, event_id: EventId, observer: ObserverId) -> RollcallResult<Subscription> {
        self.coordinator.store().load(event_id.validate()?)?;
        self.notifier.subscribe(event_id, observer)
    }

    /// Subscribe, then take a snapshot.
    ///
    /// Any change committed between the two shows up both in the snapshot
    /// and on the subscription; version deduplication absorbs it.
    pub fn subscribe_with_snapshot(
        &self,
        event_id: EventId,
        observer: ObserverId,
    ) -> RollcallResult<(RosterSnapshot, Subscription)> {
        let subscription = self.subscribe(event_id, observer)?;
        let snapshot = self.get_snapshot(event_id)?;
        Ok((snapshot, subscription))
    }

    pub fn unsubscribe(&self, event_id: EventId, observer: ObserverId) -> bool {
        self.notifier.unsubscribe(event_id, observer)
    }

    /// Relay committed changes whose publication was never acknowledged
    pub fn flush_outbox(&self) -> RollcallResult<usize> {
        self.coordinator.flush_outbox()
    }

    pub fn notifier_stats(&self) -> NotifierStats {
        self.notifier.stats()
    }

    /// Stop the notifier and wait for it; committed state is unaffected
    pub async fn shutdown(&self) {
        self.notifier.shutdown();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "notifier task failed");
            }
        }
        tracing::info!("engine stopped");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
