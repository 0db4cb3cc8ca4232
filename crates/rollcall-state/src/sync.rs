//! Client synchronizer
//!
//! One synchronizer per observed event per client. It keeps the last
//! authoritative view (advanced only by version order) and at most one
//! optimistic operation layered on top of it. Rolling back an operation
//! drops the overlay; the authoritative view is never rewound.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rollcall_core::{
    ChangeEvent, ChangeKey, EventId, JoinOutcome, LeaveOutcome, RollcallError, RollcallResult,
    RosterSnapshot, Transition, TransitionType, UserId,
};

/// Self status as seen by the client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LocalStatus {
    NotMember,
    Joined,
    Waitlisted { position: u32 },
    Left,
}

/// Locally reconstructed roster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalView {
    pub capacity: u32,
    pub is_open: bool,
    /// Seated members in seat order
    pub joined: Vec<UserId>,
    /// Waitlist; index + 1 is the position
    pub waitlist: Vec<UserId>,
    /// Users observed leaving, so their status reads `Left` rather than
    /// `NotMember`. Every transition goes through `place`, which drops a
    /// user that reappears; a snapshot keeps only users it does not list.
    /// Between snapshots the set is bounded by the users who left this event.
    departed: HashSet<UserId>,
}

impl LocalView {
    pub fn from_snapshot(snapshot: &RosterSnapshot) -> Self {
        LocalView {
            capacity: snapshot.capacity,
            is_open: snapshot.is_open,
            joined: snapshot.joined.clone(),
            waitlist: snapshot.waitlist.iter().map(|(user, _)| *user).collect(),
            departed: HashSet::new(),
        }
    }

    pub fn status_of(&self, user: UserId) -> LocalStatus {
        if self.joined.contains(&user) {
            return LocalStatus::Joined;
        }
        if let Some(idx) = self.waitlist.iter().position(|u| *u == user) {
            return LocalStatus::Waitlisted {
                position: idx as u32 + 1,
            };
        }
        if self.departed.contains(&user) {
            LocalStatus::Left
        } else {
            LocalStatus::NotMember
        }
    }

    /// Status a join would most likely produce right now
    pub fn admission_guess(&self) -> LocalStatus {
        if self.waitlist.is_empty() && self.joined.len() < self.capacity as usize {
            LocalStatus::Joined
        } else {
            LocalStatus::Waitlisted {
                position: self.waitlist.len() as u32 + 1,
            }
        }
    }

    /// Place `user` into `status`, keeping the waitlist compact
    pub fn place(&mut self, user: UserId, status: LocalStatus) {
        self.remove(user);
        match status {
            LocalStatus::Joined => self.joined.push(user),
            LocalStatus::Waitlisted { position } => {
                let idx = (position.max(1) as usize - 1).min(self.waitlist.len());
                self.waitlist.insert(idx, user);
            }
            LocalStatus::Left => {
                self.departed.insert(user);
            }
            LocalStatus::NotMember => {}
        }
    }

    fn remove(&mut self, user: UserId) {
        self.joined.retain(|u| *u != user);
        self.waitlist.retain(|u| *u != user);
        self.departed.remove(&user);
    }

    /// Apply one committed transition
    pub fn apply(&mut self, change: &ChangeEvent) {
        match (change.transition, change.user_id) {
            (Transition::Joined, Some(user)) | (Transition::Promoted, Some(user)) => {
                self.place(user, LocalStatus::Joined)
            }
            (Transition::Waitlisted { position }, Some(user)) => {
                self.place(user, LocalStatus::Waitlisted { position })
            }
            (Transition::Left, Some(user)) => self.place(user, LocalStatus::Left),
            (Transition::CapacityChanged { capacity }, _) => self.capacity = capacity,
            (Transition::Closed, _) => self.is_open = false,
            (Transition::Reopened, _) => self.is_open = true,
            (_, None) => {}
        }
    }
}

/// Handle of an optimistic operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    Join,
    Leave,
}

#[derive(Clone, Debug)]
struct PendingOp {
    id: OpId,
    kind: OpKind,
    guess: LocalStatus,
    deadline: Instant,
}

/// What happened to an incoming remote change
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteOutcome {
    Applied,
    /// Older than the known version
    Stale,
    /// Already applied at the known version
    Duplicate,
    /// Addressed to another event
    Ignored,
}

/// What happened to an authoritative response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirmation {
    /// Matched the optimistic guess
    Confirmed,
    /// Differed from the guess; the authoritative result replaced it
    Corrected,
    /// Arrived after the operation was rolled back or already settled,
    /// and changed the local view
    LateApplied,
    /// Already reflected in, or older than, the local view
    Stale,
}

/// Synchronizer counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub remote_applied: u64,
    pub remote_discarded: u64,
    pub confirmed: u64,
    pub corrected: u64,
    pub rollbacks: u64,
    pub gaps: u64,
}

/// Synchronizer configuration
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Local wait before a pending operation is rolled back
    pub pending_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            pending_timeout: Duration::from_secs(5),
        }
    }
}

/// Per-observer reconciliation of one event's roster
#[derive(Debug)]
pub struct ClientSynchronizer {
    event_id: EventId,
    user_id: UserId,
    confirmed: LocalView,
    known_version: u64,
    /// Changes already applied at `known_version`
    applied_at_known: HashSet<ChangeKey>,
    /// Size of the commit at `known_version`, as far as it is known
    expected_at_known: u32,
    /// Own join answers at `known_version`. A join answer may be idempotent
    /// and describe no commit, so these never count toward completeness.
    answered_at_known: HashSet<ChangeKey>,
    pending: Option<PendingOp>,
    next_op: u64,
    needs_resync: bool,
    config: SyncConfig,
    stats: SyncStats,
}

impl ClientSynchronizer {
    pub fn new(event_id: EventId, user_id: UserId) -> Self {
        Self::with_config(event_id, user_id, SyncConfig::default())
    }

    pub fn with_config(event_id: EventId, user_id: UserId, config: SyncConfig) -> Self {
        ClientSynchronizer {
            event_id,
            user_id,
            confirmed: LocalView::default(),
            known_version: 0,
            applied_at_known: HashSet::new(),
            expected_at_known: 0,
            answered_at_known: HashSet::new(),
            pending: None,
            next_op: 0,
            needs_resync: true,
            config,
            stats: SyncStats::default(),
        }
    }

    /// Start from an authoritative snapshot
    pub fn from_snapshot(user_id: UserId, snapshot: &RosterSnapshot) -> Self {
        let mut sync = Self::new(snapshot.event_id, user_id);
        sync.apply_snapshot(snapshot);
        sync
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn known_version(&self) -> u64 {
        self.known_version
    }

    /// A version gap was observed; fetch a snapshot and call `apply_snapshot`
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Every change of the commit at the known version has been seen, on
    /// the stream or in a leave answer
    pub fn is_complete(&self) -> bool {
        self.applied_at_known.len() as u32 >= self.expected_at_known
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Authoritative view without the optimistic overlay
    pub fn confirmed_view(&self) -> &LocalView {
        &self.confirmed
    }

    /// View with the pending optimistic operation applied
    pub fn view(&self) -> LocalView {
        let mut view = self.confirmed.clone();
        if let Some(op) = &self.pending {
            view.place(self.user_id, op.guess);
        }
        view
    }

    /// Own status, optimistic when an operation is pending
    pub fn status(&self) -> LocalStatus {
        match &self.pending {
            Some(op) => op.guess,
            None => self.confirmed.status_of(self.user_id),
        }
    }

    /// Replace the view with a snapshot if it is at least as new
    ///
    /// An equal-version snapshot is accepted only while a resync is due or
    /// the known version is missing some of its changes.
    pub fn apply_snapshot(&mut self, snapshot: &RosterSnapshot) -> bool {
        if snapshot.event_id != self.event_id {
            return false;
        }
        let newer = snapshot.version > self.known_version;
        let repairs =
            (self.needs_resync || !self.is_complete()) && snapshot.version >= self.known_version;
        if !newer && !repairs {
            return false;
        }

        let departed = std::mem::take(&mut self.confirmed.departed);
        self.confirmed = LocalView::from_snapshot(snapshot);
        self.confirmed.departed = departed
            .into_iter()
            .filter(|u| snapshot.state_of(*u).is_none())
            .collect();
        self.known_version = snapshot.version;
        self.applied_at_known.clear();
        self.answered_at_known.clear();
        self.expected_at_known = 0;
        self.needs_resync = false;
        true
    }

    /// Optimistically join; the returned id ties the response to this guess
    pub fn begin_join(&mut self, now: Instant) -> RollcallResult<OpId> {
        let guess = match self.confirmed.status_of(self.user_id) {
            active @ (LocalStatus::Joined | LocalStatus::Waitlisted { .. }) => active,
            _ => self.confirmed.admission_guess(),
        };
        self.begin(OpKind::Join, guess, now)
    }

    /// Optimistically leave
    pub fn begin_leave(&mut self, now: Instant) -> RollcallResult<OpId> {
        self.begin(OpKind::Leave, LocalStatus::Left, now)
    }

    fn begin(&mut self, kind: OpKind, guess: LocalStatus, now: Instant) -> RollcallResult<OpId> {
        if self.pending.is_some() {
            return Err(RollcallError::InvalidRequest(
                "an operation is already pending".into(),
            ));
        }
        self.next_op += 1;
        let id = OpId(self.next_op);
        self.pending = Some(PendingOp {
            id,
            kind,
            guess,
            deadline: now + self.config.pending_timeout,
        });
        Ok(id)
    }

    /// Reconcile the authoritative join response
    pub fn confirm_join(&mut self, op: OpId, outcome: &JoinOutcome) -> Confirmation {
        let status = match outcome.membership_state().waitlist_position() {
            Some(position) => LocalStatus::Waitlisted { position },
            None => LocalStatus::Joined,
        };
        let transition = match status {
            LocalStatus::Waitlisted { position } => Transition::Waitlisted { position },
            _ => Transition::Joined,
        };
        self.confirm(op, status, transition.transition_type(), outcome.version, None)
    }

    /// Reconcile the authoritative leave response, including the promotion
    /// it committed
    pub fn confirm_leave(&mut self, op: OpId, outcome: &LeaveOutcome) -> Confirmation {
        let size = 1 + u32::from(outcome.promoted.is_some());
        let confirmation = self.confirm(
            op,
            LocalStatus::Left,
            TransitionType::Left,
            outcome.version,
            Some(size),
        );
        if let Some(promoted) = outcome.promoted {
            if outcome.version == self.known_version {
                let key = ChangeKey {
                    version: outcome.version,
                    transition: TransitionType::Promoted,
                    user_id: Some(promoted),
                };
                if self.applied_at_known.insert(key) {
                    self.confirmed.place(promoted, LocalStatus::Joined);
                }
            }
        }
        confirmation
    }

    fn confirm(
        &mut self,
        op: OpId,
        status: LocalStatus,
        transition: TransitionType,
        version: u64,
        commit_size: Option<u32>,
    ) -> Confirmation {
        let matched = match &self.pending {
            Some(pending) if pending.id == op => {
                let matched = pending.guess == status;
                self.pending = None;
                Some(matched)
            }
            _ => None,
        };

        let key = ChangeKey {
            version,
            transition,
            user_id: Some(self.user_id),
        };

        let advanced = version > self.known_version;
        if advanced {
            self.advance_to(version);
        }

        let applied = if version == self.known_version {
            // Either a newer commit, the same commit already seen through
            // the stream, or an idempotent join that did not bump the version.
            // A version reached through an answer alone holds at least one
            // change the stream still has to show.
            let floor = commit_size.unwrap_or(u32::from(advanced));
            self.expected_at_known = self.expected_at_known.max(floor);
            let unseen =
                !self.applied_at_known.contains(&key) && !self.answered_at_known.contains(&key);
            if unseen {
                match commit_size {
                    Some(_) => self.applied_at_known.insert(key),
                    None => self.answered_at_known.insert(key),
                };
            }
            let differs = self.confirmed.status_of(self.user_id) != status;
            if unseen || differs {
                self.confirmed.place(self.user_id, status);
            }
            unseen || differs
        } else {
            false
        };

        match (matched, applied) {
            (Some(true), _) => {
                self.stats.confirmed += 1;
                Confirmation::Confirmed
            }
            (Some(false), true) => {
                self.stats.corrected += 1;
                tracing::debug!(
                    event = %self.event_id,
                    user = %self.user_id,
                    ?status,
                    version,
                    "optimistic guess corrected"
                );
                Confirmation::Corrected
            }
            (Some(false), false) => {
                // The stream already moved past this response; the view is
                // authoritative as it stands
                self.stats.corrected += 1;
                Confirmation::Corrected
            }
            (None, true) => Confirmation::LateApplied,
            (None, false) => Confirmation::Stale,
        }
    }

    /// Roll back a failed operation
    pub fn fail(&mut self, op: OpId) -> bool {
        match &self.pending {
            Some(pending) if pending.id == op => {
                self.pending = None;
                self.stats.rollbacks += 1;
                true
            }
            _ => false,
        }
    }

    /// Roll back the pending operation if its local wait has elapsed
    pub fn expire_pending(&mut self, now: Instant) -> Option<OpId> {
        let expired = matches!(&self.pending, Some(op) if now >= op.deadline);
        if !expired {
            return None;
        }
        let op = self.pending.take()?;
        self.stats.rollbacks += 1;
        tracing::debug!(event = %self.event_id, op = op.id.0, "pending operation timed out");
        Some(op.id)
    }

    /// Apply a change event from the subscription stream
    pub fn apply_remote(&mut self, change: &ChangeEvent) -> RemoteOutcome {
        if change.event_id != self.event_id {
            return RemoteOutcome::Ignored;
        }

        let version = change.resulting_version;
        if version < self.known_version {
            self.stats.remote_discarded += 1;
            return RemoteOutcome::Stale;
        }
        if version == self.known_version && self.applied_at_known.contains(&change.key()) {
            self.stats.remote_discarded += 1;
            return RemoteOutcome::Duplicate;
        }
        if version == self.known_version && self.answered_at_known.remove(&change.key()) {
            // Already reflected in the view; now it also counts as seen
            self.applied_at_known.insert(change.key());
            self.expected_at_known = self.expected_at_known.max(change.commit_size);
            self.stats.remote_discarded += 1;
            return RemoteOutcome::Duplicate;
        }
        // Equal version, unseen key: a sibling change of the same commit
        if version > self.known_version {
            self.advance_to(version);
        }

        self.confirmed.apply(change);
        self.applied_at_known.insert(change.key());
        self.expected_at_known = self.expected_at_known.max(change.commit_size);
        self.stats.remote_applied += 1;

        if change.user_id == Some(self.user_id) {
            self.settle_pending(change.transition_type());
        }
        RemoteOutcome::Applied
    }

    /// Our own change arriving through the stream confirms the pending op
    fn settle_pending(&mut self, transition: TransitionType) {
        let settles = match self.pending.as_ref().map(|op| op.kind) {
            Some(OpKind::Join) => {
                matches!(transition, TransitionType::Joined | TransitionType::Waitlisted)
            }
            Some(OpKind::Leave) => transition == TransitionType::Left,
            None => false,
        };
        if !settles {
            return;
        }
        if let Some(op) = self.pending.take() {
            if op.guess == self.confirmed.status_of(self.user_id) {
                self.stats.confirmed += 1;
            } else {
                self.stats.corrected += 1;
            }
        }
    }

    /// Move to a newer version. Skipping a version, or leaving the current
    /// one with some of its changes unseen, calls for a resync.
    fn advance_to(&mut self, version: u64) {
        if version > self.known_version + 1 || !self.is_complete() {
            self.needs_resync = true;
            self.stats.gaps += 1;
        }
        self.known_version = version;
        self.applied_at_known.clear();
        self.answered_at_known.clear();
        self.expected_at_known = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{JoinState, Timestamp};

    const E: EventId = EventId(1);

    fn u(id: u64) -> UserId {
        UserId::new(id)
    }

    fn snapshot(capacity: u32, joined: &[u64], waitlist: &[u64], version: u64) -> RosterSnapshot {
        RosterSnapshot {
            event_id: E,
            capacity,
            is_open: true,
            joined: joined.iter().map(|id| u(*id)).collect(),
            waitlist: waitlist
                .iter()
                .enumerate()
                .map(|(i, id)| (u(*id), i as u32 + 1))
                .collect(),
            version,
        }
    }

    fn change(user: u64, transition: Transition, version: u64) -> ChangeEvent {
        ChangeEvent::member(E, u(user), transition, version, Timestamp::ZERO)
    }

    #[test]
    fn test_optimistic_join_confirmed() {
        let mut sync = ClientSynchronizer::from_snapshot(u(1), &snapshot(2, &[], &[], 3));
        let op = sync.begin_join(Instant::now()).unwrap();
        assert_eq!(sync.status(), LocalStatus::Joined);
        assert_eq!(sync.confirmed_view().status_of(u(1)), LocalStatus::NotMember);

        let outcome = JoinOutcome {
            state: JoinState::Joined,
            position: None,
            version: 4,
        };
        assert_eq!(sync.confirm_join(op, &outcome), Confirmation::Confirmed);
        assert!(!sync.is_pending());
        assert_eq!(sync.known_version(), 4);
        assert_eq!(sync.status(), LocalStatus::Joined);
        assert!(!sync.needs_resync());
    }

    #[test]
    fn test_guess_corrected_to_waitlisted() {
        // Local view shows a free seat, but a racing join took it
        let mut sync = ClientSynchronizer::from_snapshot(u(1), &snapshot(1, &[], &[], 3));
        let op = sync.begin_join(Instant::now()).unwrap();
        assert_eq!(sync.status(), LocalStatus::Joined);

        let outcome = JoinOutcome {
            state: JoinState::Waitlisted,
            position: Some(1),
            version: 5,
        };
        assert_eq!(sync.confirm_join(op, &outcome), Confirmation::Corrected);
        assert_eq!(sync.status(), LocalStatus::Waitlisted { position: 1 });
        // Version 4 was never seen
        assert!(sync.needs_resync());

        // The racing join arrives late and is stale
        assert_eq!(
            sync.apply_remote(&change(2, Transition::Joined, 4)),
            RemoteOutcome::Stale
        );
        assert!(sync.apply_snapshot(&snapshot(1, &[2], &[1], 5)));
        assert_eq!(sync.view().joined, vec![u(2)]);
        assert_eq!(sync.status(), LocalStatus::Waitlisted { position: 1 });
    }

    #[test]
    fn test_guess_waitlisted_when_full() {
        let mut sync = ClientSynchronizer::from_snapshot(u(3), &snapshot(2, &[1, 2], &[], 2));
        sync.begin_join(Instant::now()).unwrap();
        assert_eq!(sync.status(), LocalStatus::Waitlisted { position: 1 });
        assert_eq!(sync.view().waitlist, vec![u(3)]);
    }

    #[test]
    fn test_failure_rolls_back_then_late_confirmation_applies() {
        let mut sync = ClientSynchronizer::from_snapshot(u(1), &snapshot(2, &[], &[], 3));
        let op = sync.begin_join(Instant::now()).unwrap();
        assert!(sync.fail(op));
        assert_eq!(sync.status(), LocalStatus::NotMember);
        assert_eq!(sync.stats().rollbacks, 1);

        let outcome = JoinOutcome {
            state: JoinState::Joined,
            position: None,
            version: 4,
        };
        assert_eq!(sync.confirm_join(op, &outcome), Confirmation::LateApplied);
        assert_eq!(sync.status(), LocalStatus::Joined);
    }

    #[test]
    fn test_timeout_rolls_back_then_remote_change_applies() {
        let start = Instant::now();
        let mut sync = ClientSynchronizer::from_snapshot(u(1), &snapshot(2, &[], &[], 3));
        let op = sync.begin_join(start).unwrap();

        assert_eq!(sync.expire_pending(start), None);
        assert_eq!(sync.expire_pending(start + Duration::from_secs(6)), Some(op));
        assert_eq!(sync.status(), LocalStatus::NotMember);

        assert_eq!(
            sync.apply_remote(&change(1, Transition::Joined, 4)),
            RemoteOutcome::Applied
        );
        assert_eq!(sync.status(), LocalStatus::Joined);

        // The late response for the same commit is not newer
        let outcome = JoinOutcome {
            state: JoinState::Joined,
            position: None,
            version: 4,
        };
        assert_eq!(sync.confirm_join(op, &outcome), Confirmation::Stale);
        assert_eq!(sync.known_version(), 4);
    }

    #[test]
    fn test_reordered_delivery_discards_older_version() {
        let mut sync = ClientSynchronizer::from_snapshot(u(9), &snapshot(3, &[1], &[], 3));
        assert_eq!(
            sync.apply_remote(&change(2, Transition::Joined, 4)),
            RemoteOutcome::Applied
        );
        assert_eq!(
            sync.apply_remote(&change(2, Transition::Left, 5)),
            RemoteOutcome::Applied
        );
        assert_eq!(
            sync.apply_remote(&change(2, Transition::Joined, 4)),
            RemoteOutcome::Stale
        );
        assert_eq!(sync.view().joined, vec![u(1)]);
        assert_eq!(sync.view().status_of(u(2)), LocalStatus::Left);
    }

    #[test]
    fn test_shared_version_siblings_both_apply() {
        let mut sync = ClientSynchronizer::from_snapshot(u(9), &snapshot(1, &[1], &[2, 3], 6));
        assert_eq!(
            sync.apply_remote(&change(1, Transition::Left, 7).in_commit_of(2)),
            RemoteOutcome::Applied
        );
        assert!(!sync.is_complete());
        assert_eq!(
            sync.apply_remote(&change(2, Transition::Promoted, 7).in_commit_of(2)),
            RemoteOutcome::Applied
        );
        assert!(sync.is_complete());
        assert_eq!(
            sync.apply_remote(&change(2, Transition::Promoted, 7).in_commit_of(2)),
            RemoteOutcome::Duplicate
        );
        let view = sync.view();
        assert_eq!(view.joined, vec![u(2)]);
        assert_eq!(view.waitlist, vec![u(3)]);
        assert_eq!(view.status_of(u(3)), LocalStatus::Waitlisted { position: 1 });
    }

    #[test]
    fn test_own_change_on_stream_settles_pending() {
        let mut sync = ClientSynchronizer::from_snapshot(u(1), &snapshot(2, &[1], &[], 3));
        let op = sync.begin_leave(Instant::now()).unwrap();
        assert_eq!(sync.status(), LocalStatus::Left);

        sync.apply_remote(&change(1, Transition::Left, 4));
        assert!(!sync.is_pending());
        assert_eq!(sync.stats().confirmed, 1);

        // Response arrives after the stream already confirmed it
        let outcome = LeaveOutcome {
            version: 4,
            promoted: None,
        };
        assert_eq!(sync.confirm_leave(op, &outcome), Confirmation::Stale);
        assert_eq!(sync.status(), LocalStatus::Left);
    }

    #[test]
    fn test_missing_sibling_flags_resync() {
        let mut sync = ClientSynchronizer::from_snapshot(u(9), &snapshot(1, &[1], &[2], 6));
        sync.apply_remote(&change(1, Transition::Left, 7).in_commit_of(2));
        // The promotion of version 7 is overtaken by version 8
        sync.apply_remote(&change(3, Transition::Waitlisted { position: 1 }, 8));
        assert!(sync.needs_resync());
        assert_eq!(
            sync.apply_remote(&change(2, Transition::Promoted, 7).in_commit_of(2)),
            RemoteOutcome::Stale
        );
        assert!(sync.apply_snapshot(&snapshot(1, &[2], &[3], 8)));
        assert_eq!(sync.view().joined, vec![u(2)]);
    }

    #[test]
    fn test_leave_confirmation_applies_promotion() {
        let mut sync = ClientSynchronizer::from_snapshot(u(1), &snapshot(1, &[1], &[2], 4));
        let op = sync.begin_leave(Instant::now()).unwrap();
        let outcome = LeaveOutcome {
            version: 5,
            promoted: Some(u(2)),
        };
        assert_eq!(sync.confirm_leave(op, &outcome), Confirmation::Confirmed);
        assert!(sync.is_complete());
        assert_eq!(sync.view().joined, vec![u(2)]);
        assert!(sync.view().waitlist.is_empty());

        // Both stream copies of that commit are duplicates now
        assert_eq!(
            sync.apply_remote(&change(1, Transition::Left, 5).in_commit_of(2)),
            RemoteOutcome::Duplicate
        );
        assert_eq!(
            sync.apply_remote(&change(2, Transition::Promoted, 5).in_commit_of(2)),
            RemoteOutcome::Duplicate
        );
    }

    #[test]
    fn test_idempotent_join_answer_does_not_complete_a_commit() {
        let mut sync = ClientSynchronizer::from_snapshot(u(1), &snapshot(2, &[1, 2], &[3], 3));
        let op = sync.begin_join(Instant::now()).unwrap();
        // Already seated; the answer carries the version of someone else's commit
        let outcome = JoinOutcome {
            state: JoinState::Joined,
            position: None,
            version: 4,
        };
        sync.confirm_join(op, &outcome);
        assert_eq!(sync.known_version(), 4);
        assert!(!sync.is_complete());

        sync.apply_remote(&change(2, Transition::Left, 4).in_commit_of(2));
        assert!(!sync.is_complete());

        // The promotion of version 4 is overtaken by version 5
        sync.apply_remote(&change(4, Transition::Waitlisted { position: 1 }, 5));
        assert!(sync.needs_resync());
        assert_eq!(
            sync.apply_remote(&change(3, Transition::Promoted, 4).in_commit_of(2)),
            RemoteOutcome::Stale
        );

        assert!(sync.apply_snapshot(&snapshot(2, &[1, 3], &[4], 5)));
        assert_eq!(sync.view().joined, vec![u(1), u(3)]);
        assert_eq!(sync.view().waitlist, vec![u(4)]);
    }

    #[test]
    fn test_join_answer_completes_once_stream_shows_it() {
        let mut sync = ClientSynchronizer::from_snapshot(u(1), &snapshot(2, &[], &[], 3));
        let op = sync.begin_join(Instant::now()).unwrap();
        let outcome = JoinOutcome {
            state: JoinState::Joined,
            position: None,
            version: 4,
        };
        assert_eq!(sync.confirm_join(op, &outcome), Confirmation::Confirmed);
        assert!(!sync.is_complete());

        assert_eq!(
            sync.apply_remote(&change(1, Transition::Joined, 4)),
            RemoteOutcome::Duplicate
        );
        assert!(sync.is_complete());
        sync.apply_remote(&change(2, Transition::Joined, 5));
        assert!(!sync.needs_resync());
        assert_eq!(sync.view().joined, vec![u(1), u(2)]);
    }

    #[test]
    fn test_departed_user_forgotten_on_return() {
        let mut sync = ClientSynchronizer::from_snapshot(u(9), &snapshot(1, &[1], &[], 1));
        sync.apply_remote(&change(1, Transition::Left, 2));
        assert_eq!(sync.view().status_of(u(1)), LocalStatus::Left);
        assert!(sync.confirmed_view().departed.contains(&u(1)));

        sync.apply_remote(&change(1, Transition::Joined, 3));
        assert!(sync.confirmed_view().departed.is_empty());

        sync.apply_remote(&change(1, Transition::Left, 4));
        assert!(sync.apply_snapshot(&snapshot(1, &[], &[], 5)));
        assert!(sync.confirmed_view().departed.contains(&u(1)));
        assert!(sync.apply_snapshot(&snapshot(1, &[], &[1], 6)));
        assert!(sync.confirmed_view().departed.is_empty());
    }

    #[test]
    fn test_only_one_pending_operation() {
        let mut sync = ClientSynchronizer::new(E, u(1));
        sync.begin_join(Instant::now()).unwrap();
        assert!(sync.begin_leave(Instant::now()).is_err());
    }

    #[test]
    fn test_version_gap_flags_resync() {
        let mut sync = ClientSynchronizer::from_snapshot(u(9), &snapshot(3, &[], &[], 1));
        sync.apply_remote(&change(1, Transition::Joined, 3));
        assert!(sync.needs_resync());
        assert_eq!(sync.stats().gaps, 1);
        // Older snapshot is refused, equal-version one repairs
        assert!(!sync.apply_snapshot(&snapshot(3, &[], &[], 2)));
        assert!(sync.apply_snapshot(&snapshot(3, &[1, 2], &[], 3)));
        assert!(!sync.needs_resync());
        assert_eq!(sync.view().joined.len(), 2);
    }

    #[test]
    fn test_event_level_changes() {
        let mut sync = ClientSynchronizer::from_snapshot(u(9), &snapshot(1, &[1], &[2], 1));
        sync.apply_remote(&ChangeEvent::event_level(
            E,
            Transition::CapacityChanged { capacity: 2 },
            2,
            Timestamp::ZERO,
        ));
        sync.apply_remote(&change(2, Transition::Promoted, 2));
        sync.apply_remote(&ChangeEvent::event_level(E, Transition::Closed, 3, Timestamp::ZERO));
        let view = sync.view();
        assert_eq!(view.capacity, 2);
        assert!(!view.is_open);
        assert_eq!(view.joined, vec![u(1), u(2)]);
        assert!(view.waitlist.is_empty());
    }

    #[test]
    fn test_other_event_ignored() {
        let mut sync = ClientSynchronizer::new(E, u(1));
        let other = ChangeEvent::member(EventId(2), u(1), Transition::Joined, 1, Timestamp::ZERO);
        assert_eq!(sync.apply_remote(&other), RemoteOutcome::Ignored);
    }
}
