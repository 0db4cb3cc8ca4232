//! Interest and entitlement - who observes which event
//!
//! Entitlement is decided once, when an observer subscribes. Individual
//! change events are never re-checked.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::RwLock;
use rollcall_core::{ChangeEvent, EventId, ObserverId};
use tokio::sync::mpsc;

/// Subscribe-time authorization
pub trait AccessPolicy: Send + Sync {
    fn can_observe(&self, observer: ObserverId, event: EventId) -> bool;
}

/// Any observer may watch any event
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAccess;

impl AccessPolicy for OpenAccess {
    fn can_observe(&self, _observer: ObserverId, _event: EventId) -> bool {
        true
    }
}

/// Explicit per-event entitlements
#[derive(Debug, Default)]
pub struct EntitlementList {
    grants: RwLock<HashMap<EventId, HashSet<ObserverId>>>,
}

impl EntitlementList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, event: EventId, observer: ObserverId) {
        self.grants.write().entry(event).or_default().insert(observer);
    }

    /// Revoking does not cut an existing subscription; it only refuses new ones
    pub fn revoke(&self, event: EventId, observer: ObserverId) {
        if let Some(observers) = self.grants.write().get_mut(&event) {
            observers.remove(&observer);
        }
    }
}

impl AccessPolicy for EntitlementList {
    fn can_observe(&self, observer: ObserverId, event: EventId) -> bool {
        self.grants
            .read()
            .get(&event)
            .map(|observers| observers.contains(&observer))
            .unwrap_or(false)
    }
}

/// One observer's registration for one event
#[derive(Debug)]
pub struct Subscriber {
    pub(crate) sender: mpsc::Sender<ChangeEvent>,
    /// Changes not yet accepted by the channel, oldest first
    pub(crate) backlog: VecDeque<ChangeEvent>,
    /// Consecutive failed attempts on the backlog head
    pub(crate) failed_attempts: u32,
    pub(crate) retry_scheduled: bool,
}

impl Subscriber {
    pub fn new(sender: mpsc::Sender<ChangeEvent>) -> Self {
        Subscriber {
            sender,
            backlog: VecDeque::new(),
            failed_attempts: 0,
            retry_scheduled: false,
        }
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Subscription registry
#[derive(Debug, Default)]
pub struct SubscriptionMap {
    /// Event -> (Observer -> Subscriber)
    by_event: HashMap<EventId, HashMap<ObserverId, Subscriber>>,

    /// Observer -> events it watches
    by_observer: HashMap<ObserverId, HashSet<EventId>>,
}

impl SubscriptionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber, replacing any earlier one for the same pair
    pub fn register(&mut self, event: EventId, observer: ObserverId, subscriber: Subscriber) {
        self.by_event
            .entry(event)
            .or_default()
            .insert(observer, subscriber);
        self.by_observer.entry(observer).or_default().insert(event);
    }

    /// Remove one subscription; returns whether it existed
    pub fn unregister(&mut self, event: EventId, observer: ObserverId) -> bool {
        let removed = match self.by_event.get_mut(&event) {
            Some(observers) => {
                let removed = observers.remove(&observer).is_some();
                if observers.is_empty() {
                    self.by_event.remove(&event);
                }
                removed
            }
            None => false,
        };
        if let Some(events) = self.by_observer.get_mut(&observer) {
            events.remove(&event);
            if events.is_empty() {
                self.by_observer.remove(&observer);
            }
        }
        removed
    }

    /// Drop every subscription of an observer (it disconnected)
    pub fn remove_observer(&mut self, observer: ObserverId) {
        for event in self.by_observer.remove(&observer).unwrap_or_default() {
            if let Some(observers) = self.by_event.get_mut(&event) {
                observers.remove(&observer);
                if observers.is_empty() {
                    self.by_event.remove(&event);
                }
            }
        }
    }

    pub fn get_mut(&mut self, event: EventId, observer: ObserverId) -> Option<&mut Subscriber> {
        self.by_event.get_mut(&event)?.get_mut(&observer)
    }

    /// Observers subscribed to an event
    pub fn observers(&self, event: EventId) -> Vec<ObserverId> {
        self.by_event
            .get(&event)
            .map(|observers| observers.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Events an observer watches
    pub fn observer_events(&self, observer: ObserverId) -> Vec<EventId> {
        self.by_observer
            .get(&observer)
            .map(|events| events.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, event: EventId) -> usize {
        self.by_event.get(&event).map(HashMap::len).unwrap_or(0)
    }

    pub fn is_subscribed(&self, event: EventId, observer: ObserverId) -> bool {
        self.by_event
            .get(&event)
            .map(|observers| observers.contains_key(&observer))
            .unwrap_or(false)
    }
}
