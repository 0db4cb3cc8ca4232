//! Synchronous roster simulation
//!
//! Drives the roster transitions without a runtime or store, producing the
//! same change log the coordinator would commit.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rollcall_core::{
    check_roster, ChangeEvent, EventId, EventRecord, InvariantViolation, Membership,
    RollcallResult, RosterSnapshot, Timestamp, UserId,
};
use rollcall_state::Roster;

/// Simulated operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimOp {
    Join(UserId),
    Leave(UserId),
    SetCapacity(u32),
    SetOpen(bool),
}

impl SimOp {
    /// Random operation over `users` distinct users
    pub fn random(rng: &mut StdRng, users: u64) -> Self {
        let user = UserId::new(rng.gen_range(1..=users));
        match rng.gen_range(0..20) {
            0..=9 => SimOp::Join(user),
            10..=16 => SimOp::Leave(user),
            17..=18 => SimOp::SetCapacity(rng.gen_range(1..=8)),
            _ => SimOp::SetOpen(rng.gen_bool(0.7)),
        }
    }
}

/// Authoritative single-event roster with a committed change log
#[derive(Debug)]
pub struct RosterSimulator {
    event: EventRecord,
    rows: HashMap<UserId, Membership>,
    log: Vec<ChangeEvent>,
    clock: i64,
}

impl RosterSimulator {
    pub fn new(event_id: EventId, capacity: u32) -> RollcallResult<Self> {
        Ok(RosterSimulator {
            event: EventRecord::new(event_id, capacity)?,
            rows: HashMap::new(),
            log: Vec::new(),
            clock: 0,
        })
    }

    pub fn version(&self) -> u64 {
        self.event.version
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot::from_rows(&self.event, self.rows.values())
    }

    /// Every committed change, in commit order
    pub fn log(&self) -> &[ChangeEvent] {
        &self.log
    }

    pub fn check(&self) -> Result<(), InvariantViolation> {
        let rows: Vec<Membership> = self.rows.values().cloned().collect();
        check_roster(&self.event, &rows)
    }

    /// Apply one operation as a single commit; returns the changes it produced
    pub fn apply(&mut self, op: SimOp) -> RollcallResult<Vec<ChangeEvent>> {
        self.clock += 1;
        let mut roster = Roster::new(
            self.event.clone(),
            self.rows.values().cloned().collect(),
            Timestamp::from_millis(self.clock),
        );

        match op {
            SimOp::Join(user) => {
                roster.join(user)?;
            }
            SimOp::Leave(user) => {
                roster.leave(user)?;
            }
            SimOp::SetCapacity(capacity) => {
                roster.set_capacity(capacity)?;
            }
            SimOp::SetOpen(is_open) => {
                roster.set_open(is_open);
            }
        }

        let Some(delta) = roster.into_delta() else {
            return Ok(Vec::new());
        };
        self.event = delta.event;
        for row in delta.memberships {
            self.rows.insert(row.user_id, row);
        }
        self.log.extend(delta.changes.iter().cloned());
        Ok(delta.changes)
    }

    /// Apply `count` random operations; rejected ones are skipped
    pub fn run_random(&mut self, seed: u64, count: usize, users: u64) -> usize {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut committed = 0;
        for _ in 0..count {
            let op = SimOp::random(&mut rng, users);
            if matches!(self.apply(op), Ok(changes) if !changes.is_empty()) {
                committed += 1;
            }
        }
        committed
    }
}
