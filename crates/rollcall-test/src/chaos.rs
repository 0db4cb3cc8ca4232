//! Chaotic change-event delivery
//!
//! Simulates a hostile path between the notifier and a client:
//! - Reordering
//! - Duplication
//! - Loss

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rollcall_core::ChangeEvent;

/// Delivery chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Probability a change is moved back in the queue
    pub reorder_prob: f64,
    /// How many queued changes it may jump
    pub reorder_depth: u32,
    /// Probability a change is delivered twice
    pub duplicate_prob: f64,
    /// Probability a change is never delivered
    pub drop_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            reorder_prob: 0.05,
            reorder_depth: 3,
            duplicate_prob: 0.05,
            drop_prob: 0.0,
        }
    }
}

impl ChaosConfig {
    /// In-order, exactly-once delivery
    pub fn calm() -> Self {
        ChaosConfig {
            reorder_prob: 0.0,
            reorder_depth: 0,
            duplicate_prob: 0.0,
            drop_prob: 0.0,
        }
    }

    /// At-least-once redelivery, occasionally out of order
    pub fn rough() -> Self {
        ChaosConfig {
            reorder_prob: 0.2,
            reorder_depth: 4,
            duplicate_prob: 0.2,
            drop_prob: 0.0,
        }
    }

    /// Everything goes wrong, including loss
    pub fn hostile() -> Self {
        ChaosConfig {
            reorder_prob: 0.3,
            reorder_depth: 8,
            duplicate_prob: 0.3,
            drop_prob: 0.1,
        }
    }
}

/// Chaos statistics
#[derive(Clone, Debug, Default)]
pub struct ChaosStats {
    pub sent: u64,
    pub delivered: u64,
    pub reordered: u64,
    pub duplicated: u64,
    pub dropped: u64,
}

/// Seeded chaotic queue of change events
pub struct ChaosFeed {
    config: ChaosConfig,
    rng: StdRng,
    in_flight: VecDeque<ChangeEvent>,
    stats: ChaosStats,
}

impl ChaosFeed {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        ChaosFeed {
            config,
            rng: StdRng::seed_from_u64(seed),
            in_flight: VecDeque::new(),
            stats: ChaosStats::default(),
        }
    }

    /// Hand a change to the chaotic path
    pub fn send(&mut self, change: ChangeEvent) {
        self.stats.sent += 1;

        if self.rng.gen::<f64>() < self.config.drop_prob {
            self.stats.dropped += 1;
            return;
        }

        if self.rng.gen::<f64>() < self.config.duplicate_prob {
            self.in_flight.push_back(change.clone());
            self.stats.duplicated += 1;
        }

        if self.rng.gen::<f64>() < self.config.reorder_prob && !self.in_flight.is_empty() {
            let depth = self.config.reorder_depth.min(self.in_flight.len() as u32);
            let jump = self.rng.gen_range(0..=depth) as usize;
            let at = self.in_flight.len().saturating_sub(jump);
            self.in_flight.insert(at, change);
            self.stats.reordered += 1;
        } else {
            self.in_flight.push_back(change);
        }
    }

    pub fn send_all<I: IntoIterator<Item = ChangeEvent>>(&mut self, changes: I) {
        for change in changes {
            self.send(change);
        }
    }

    /// Deliver up to `max` queued changes
    pub fn deliver(&mut self, max: usize) -> Vec<ChangeEvent> {
        let count = max.min(self.in_flight.len());
        let out: Vec<ChangeEvent> = self.in_flight.drain(..count).collect();
        self.stats.delivered += out.len() as u64;
        out
    }

    /// Deliver everything still queued
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        self.deliver(usize::MAX)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{EventId, Timestamp, Transition, UserId};

    fn change(version: u64) -> ChangeEvent {
        ChangeEvent::member(
            EventId::new(1),
            UserId::new(version),
            Transition::Joined,
            version,
            Timestamp::ZERO,
        )
    }

    #[test]
    fn test_calm_preserves_order() {
        let mut feed = ChaosFeed::new(ChaosConfig::calm(), 7);
        feed.send_all((1..=20).map(change));
        let versions: Vec<u64> = feed.drain().iter().map(|c| c.resulting_version).collect();
        assert_eq!(versions, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_seed_same_delivery() {
        let run = |seed| {
            let mut feed = ChaosFeed::new(ChaosConfig::hostile(), seed);
            feed.send_all((1..=50).map(change));
            feed.drain()
                .into_iter()
                .map(|c| c.resulting_version)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn test_hostile_accounts_for_every_change() {
        let mut feed = ChaosFeed::new(ChaosConfig::hostile(), 3);
        feed.send_all((1..=200).map(change));
        let delivered = feed.drain().len() as u64;
        let stats = feed.stats();
        assert_eq!(delivered, stats.sent - stats.dropped + stats.duplicated);
        assert!(stats.dropped > 0);
        assert!(stats.reordered > 0);
    }

    #[test]
    fn test_partial_delivery() {
        let mut feed = ChaosFeed::new(ChaosConfig::calm(), 1);
        feed.send_all((1..=5).map(change));
        assert_eq!(feed.deliver(2).len(), 2);
        assert_eq!(feed.in_flight(), 3);
    }
}
