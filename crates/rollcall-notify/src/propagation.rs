//! Propagation - How committed changes reach observers
//!
//! A single background task owns fan-out. Producers push onto an unbounded
//! dispatch queue and return immediately; the task appends each change to
//! every subscriber's backlog and drains backlogs into bounded channels.
//!
//! A subscriber that cannot keep up is disconnected rather than skipped:
//! its stream ends after the changes already buffered, and the observer
//! resubscribes with a fresh snapshot.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rollcall_core::{ChangeEvent, EventId, ObserverId, RollcallError, RollcallResult};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{AccessPolicy, Subscriber, SubscriptionMap};

/// Notifier configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Capacity of each subscriber channel
    pub subscriber_buffer: usize,
    /// Attempts per change before the subscriber is disconnected
    pub max_delivery_attempts: u32,
    /// Delay before a full channel is retried
    pub redelivery_delay_ms: u64,
    /// Undelivered changes held per subscriber before it is disconnected
    pub max_backlog: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            max_delivery_attempts: 5,
            redelivery_delay_ms: 10,
            max_backlog: 1024,
        }
    }
}

impl NotifierConfig {
    /// Small buffers, fast retries (interactive clients)
    pub fn low_latency() -> Self {
        Self {
            subscriber_buffer: 32,
            max_delivery_attempts: 10,
            redelivery_delay_ms: 1,
            max_backlog: 128,
        }
    }

    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}

/// Fan-out statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifierStats {
    /// Changes accepted by `publish`
    pub published: u64,
    /// Deliveries that succeeded on the first attempt
    pub delivered: u64,
    /// Deliveries that succeeded after at least one retry
    pub redelivered: u64,
    /// Subscribers cut off for falling behind
    pub disconnected: u64,
    /// Subscriptions removed because the observer went away
    pub pruned: u64,
}

#[derive(Debug)]
enum Dispatch {
    Publish(ChangeEvent),
    Retry { event: EventId, observer: ObserverId },
    Shutdown,
}

/// What the drain loop decided for one subscriber
enum Drain {
    Idle,
    Retry,
    /// Receiver went away
    Prune,
    /// Receiver is alive but not keeping up
    Disconnect,
}

struct Shared {
    config: NotifierConfig,
    policy: Arc<dyn AccessPolicy>,
    subscriptions: Mutex<SubscriptionMap>,
    stats: Mutex<NotifierStats>,
    tx: mpsc::UnboundedSender<Dispatch>,
}

/// Receiving end of a subscription
#[derive(Debug)]
pub struct Subscription {
    event_id: EventId,
    observer: ObserverId,
    receiver: mpsc::Receiver<ChangeEvent>,
    closed: bool,
}

impl Subscription {
    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn observer(&self) -> ObserverId {
        self.observer
    }

    /// Next change; `None` once unsubscribed, disconnected for falling
    /// behind, or the notifier stopped
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        let next = self.receiver.recv().await;
        self.closed = next.is_none();
        next
    }

    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        match self.receiver.try_recv() {
            Ok(change) => Some(change),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    /// The stream has ended; nothing more will arrive on it
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Change notifier handle
#[derive(Clone)]
pub struct Notifier {
    shared: Arc<Shared>,
}

impl Notifier {
    /// Start the fan-out task. Must be called inside a tokio runtime.
    pub fn spawn(config: NotifierConfig, policy: Arc<dyn AccessPolicy>) -> (Notifier, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            policy,
            subscriptions: Mutex::new(SubscriptionMap::new()),
            stats: Mutex::new(NotifierStats::default()),
            tx,
        });
        let handle = tokio::spawn(run(shared.clone(), rx));
        (Notifier { shared }, handle)
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.shared.config
    }

    /// Register an observer for an event.
    ///
    /// Entitlement is checked here and only here. Re-subscribing replaces
    /// the previous subscription, whose receiver then yields `None`.
    pub fn subscribe(&self, event: EventId, observer: ObserverId) -> RollcallResult<Subscription> {
        let event = event.validate()?;
        let observer = observer.validate()?;
        if !self.shared.policy.can_observe(observer, event) {
            return Err(RollcallError::Unauthorized { observer, event });
        }
        if self.shared.tx.is_closed() {
            return Err(RollcallError::NotifierStopped);
        }

        let (sender, receiver) = mpsc::channel(self.shared.config.subscriber_buffer.max(1));
        self.shared
            .subscriptions
            .lock()
            .register(event, observer, Subscriber::new(sender));
        tracing::debug!(%event, %observer, "subscribed");

        Ok(Subscription {
            event_id: event,
            observer,
            receiver,
            closed: false,
        })
    }

    /// Remove a subscription; returns whether it existed
    pub fn unsubscribe(&self, event: EventId, observer: ObserverId) -> bool {
        let removed = self.shared.subscriptions.lock().unregister(event, observer);
        if removed {
            tracing::debug!(%event, %observer, "unsubscribed");
        }
        removed
    }

    /// Queue a change for fan-out. Never blocks.
    pub fn publish(&self, change: ChangeEvent) -> RollcallResult<()> {
        self.shared
            .tx
            .send(Dispatch::Publish(change))
            .map_err(|_| RollcallError::NotifierStopped)
    }

    /// Queue several changes, preserving their order
    pub fn publish_all<I>(&self, changes: I) -> RollcallResult<()>
    where
        I: IntoIterator<Item = ChangeEvent>,
    {
        for change in changes {
            self.publish(change)?;
        }
        Ok(())
    }

    pub fn stats(&self) -> NotifierStats {
        self.shared.stats.lock().clone()
    }

    pub fn subscriber_count(&self, event: EventId) -> usize {
        self.shared.subscriptions.lock().subscriber_count(event)
    }

    pub fn is_running(&self) -> bool {
        !self.shared.tx.is_closed()
    }

    /// Stop the fan-out task. Queued changes behind the shutdown are discarded
    /// and every subscription is closed.
    pub fn shutdown(&self) {
        let _ = self.shared.tx.send(Dispatch::Shutdown);
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

async fn run(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Dispatch>) {
    while let Some(dispatch) = rx.recv().await {
        match dispatch {
            Dispatch::Publish(change) => fan_out(&shared, change),
            Dispatch::Retry { event, observer } => {
                if let Some(sub) = shared.subscriptions.lock().get_mut(event, observer) {
                    sub.retry_scheduled = false;
                }
                drain(&shared, event, observer);
            }
            Dispatch::Shutdown => break,
        }
    }
    rx.close();
    *shared.subscriptions.lock() = SubscriptionMap::new();
    tracing::debug!("notifier stopped");
}

fn fan_out(shared: &Shared, change: ChangeEvent) {
    shared.stats.lock().published += 1;
    let event = change.event_id;
    let observers = {
        let mut subs = shared.subscriptions.lock();
        let mut ready = Vec::new();
        for observer in subs.observers(event) {
            let Some(sub) = subs.get_mut(event, observer) else {
                continue;
            };
            if sub.backlog.len() >= shared.config.max_backlog {
                tracing::warn!(%event, %observer, backlog = sub.backlog.len(), "subscriber backlog full");
                disconnect(shared, &mut subs, event, observer);
            } else {
                sub.backlog.push_back(change.clone());
                ready.push(observer);
            }
        }
        ready
    };
    for observer in observers {
        drain(shared, event, observer);
    }
}

/// Drop a lagging subscriber's sender so its stream ends
fn disconnect(shared: &Shared, subs: &mut SubscriptionMap, event: EventId, observer: ObserverId) {
    subs.unregister(event, observer);
    shared.stats.lock().disconnected += 1;
    tracing::warn!(%event, %observer, "disconnected lagging subscriber");
}

/// Push a subscriber's backlog into its channel, oldest first
fn drain(shared: &Shared, event: EventId, observer: ObserverId) {
    let mut subs = shared.subscriptions.lock();
    let outcome = match subs.get_mut(event, observer) {
        Some(sub) => drain_subscriber(shared, observer, sub),
        None => return,
    };

    match outcome {
        Drain::Idle => {}
        Drain::Retry => {
            let Some(sub) = subs.get_mut(event, observer) else {
                return;
            };
            if sub.retry_scheduled {
                return;
            }
            sub.retry_scheduled = true;
            let tx = shared.tx.clone();
            let delay = shared.config.redelivery_delay();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Dispatch::Retry { event, observer });
            });
        }
        Drain::Prune => {
            subs.unregister(event, observer);
            shared.stats.lock().pruned += 1;
            tracing::debug!(%event, %observer, "pruned closed subscriber");
        }
        Drain::Disconnect => disconnect(shared, &mut subs, event, observer),
    }
}

fn drain_subscriber(shared: &Shared, observer: ObserverId, sub: &mut Subscriber) -> Drain {
    while let Some(change) = sub.backlog.front() {
        let version = change.resulting_version;
        match sub.sender.try_send(change.clone()) {
            Ok(()) => {
                sub.backlog.pop_front();
                let mut stats = shared.stats.lock();
                if sub.failed_attempts > 0 {
                    stats.redelivered += 1;
                } else {
                    stats.delivered += 1;
                }
                sub.failed_attempts = 0;
                tracing::trace!(%observer, version, "delivered");
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                sub.failed_attempts = sub.failed_attempts.saturating_add(1);
                let error = RollcallError::NotifierDeliveryFailure { observer, version };
                if sub.failed_attempts >= shared.config.max_delivery_attempts {
                    tracing::warn!(%error, attempts = sub.failed_attempts, "giving up on subscriber");
                    return Drain::Disconnect;
                }
                tracing::warn!(%error, attempts = sub.failed_attempts, "subscriber full, will retry");
                return Drain::Retry;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Drain::Prune,
        }
    }
    Drain::Idle
}
