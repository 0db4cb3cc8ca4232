//! End-to-end convergence
//!
//! Simulated clients hold a `ClientSynchronizer` fed by a real engine
//! subscription. Tests drive joins and leaves through the engine and check
//! that every client view converges on the authoritative snapshot.

use std::time::Instant;

use rollcall_core::{EventId, ObserverId, RollcallResult, RosterSnapshot, UserId};
use rollcall_notify::Subscription;
use rollcall_runtime::Engine;
use rollcall_state::{ClientSynchronizer, Confirmation, LocalStatus, LocalView};

use crate::ChaosFeed;

/// A client observing one event on behalf of one user
#[derive(Debug)]
pub struct SimulatedClient {
    sync: ClientSynchronizer,
    subscription: Subscription,
}

impl SimulatedClient {
    /// Subscribe and seed the synchronizer from a snapshot
    pub fn connect(
        engine: &Engine,
        event_id: EventId,
        user: UserId,
        observer: ObserverId,
    ) -> RollcallResult<Self> {
        let (snapshot, subscription) = engine.subscribe_with_snapshot(event_id, observer)?;
        Ok(SimulatedClient {
            sync: ClientSynchronizer::from_snapshot(user, &snapshot),
            subscription,
        })
    }

    pub fn sync(&self) -> &ClientSynchronizer {
        &self.sync
    }

    pub fn status(&self) -> LocalStatus {
        self.sync.status()
    }

    pub fn view(&self) -> LocalView {
        self.sync.view()
    }

    /// Optimistic join, reconciled with the engine's answer
    pub async fn join(&mut self, engine: &Engine) -> RollcallResult<Confirmation> {
        let op = self.sync.begin_join(Instant::now())?;
        match engine.join(self.sync.event_id(), self.sync.user_id()).await {
            Ok(outcome) => Ok(self.sync.confirm_join(op, &outcome)),
            Err(e) => {
                self.sync.fail(op);
                Err(e)
            }
        }
    }

    /// Optimistic leave, reconciled with the engine's answer
    pub async fn leave(&mut self, engine: &Engine) -> RollcallResult<Confirmation> {
        let op = self.sync.begin_leave(Instant::now())?;
        match engine.leave(self.sync.event_id(), self.sync.user_id()).await {
            Ok(outcome) => Ok(self.sync.confirm_leave(op, &outcome)),
            Err(e) => {
                self.sync.fail(op);
                Err(e)
            }
        }
    }

    /// Apply every change already waiting on the subscription
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(change) = self.subscription.try_recv() {
            self.sync.apply_remote(&change);
            applied += 1;
        }
        applied
    }

    /// Route waiting changes through a chaotic path before applying them
    pub fn pump_through(&mut self, feed: &mut ChaosFeed) -> usize {
        while let Some(change) = self.subscription.try_recv() {
            feed.send(change);
        }
        let delivered = feed.drain();
        for change in &delivered {
            self.sync.apply_remote(change);
        }
        delivered.len()
    }

    /// Subscribe again after the notifier cut this client off, adopting
    /// the snapshot taken with the new subscription
    pub fn reconnect(&mut self, engine: &Engine) -> RollcallResult<bool> {
        if !self.subscription.is_closed() {
            return Ok(false);
        }
        let (snapshot, subscription) =
            engine.subscribe_with_snapshot(self.sync.event_id(), self.subscription.observer())?;
        self.subscription = subscription;
        self.sync.apply_snapshot(&snapshot);
        Ok(true)
    }

    /// Resynchronise from a snapshot if changes were missed
    pub fn settle(&mut self, engine: &Engine) -> RollcallResult<bool> {
        let snapshot = engine.get_snapshot(self.sync.event_id())?;
        Ok(settle_with(&mut self.sync, &snapshot))
    }

    /// Does the confirmed view match the snapshot?
    pub fn converged(&self, snapshot: &RosterSnapshot) -> bool {
        views_match(self.sync.confirmed_view(), snapshot)
            && self.sync.known_version() == snapshot.version
    }
}

/// Apply `snapshot` when the synchronizer saw a gap, is missing part of a
/// commit, or is simply behind
pub fn settle_with(sync: &mut ClientSynchronizer, snapshot: &RosterSnapshot) -> bool {
    if sync.needs_resync() || !sync.is_complete() || sync.known_version() < snapshot.version {
        return sync.apply_snapshot(snapshot);
    }
    false
}

/// Compare a local view with a snapshot. Seat order is not compared.
pub fn views_match(view: &LocalView, snapshot: &RosterSnapshot) -> bool {
    let mut local = view.joined.clone();
    let mut remote = snapshot.joined.clone();
    local.sort();
    remote.sort();
    let waitlist: Vec<UserId> = snapshot.waitlist.iter().map(|(user, _)| *user).collect();

    local == remote
        && view.waitlist == waitlist
        && view.capacity == snapshot.capacity
        && view.is_open == snapshot.is_open
}
