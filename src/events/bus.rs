//! Event bus for swarm coordination
//!
//! Pub/sub backbone with per-type subscription order, a bounded pending queue
//! with drop-oldest shedding, per-event TTL watchdogs, and re-entrancy-safe
//! dispatch on spawned tasks. Every other component publishes through here.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use super::types::{CoordinationPayload, Event, EventId, SubscriptionId};
use crate::config::EventBusConfig;

/// Source stamped on the bus's own diagnostic events
const BUS_SOURCE: &str = "event-bus";

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Listener callback invoked for each matching event.
///
/// An `Err` return is logged and isolated; it never aborts dispatch to the
/// remaining listeners.
pub type Listener = Box<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Predicate narrowing which events of the subscribed type a listener sees
pub type EventFilter = Box<dyn Fn(&Event) -> bool + Send + Sync>;

/// A registered listener for one event type
struct Subscription {
    id: SubscriptionId,
    filter: Option<EventFilter>,
    listener: Listener,
}

/// Counters for observability snapshots
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BusStats {
    /// Events accepted by publish
    pub published: u64,
    /// Listener invocations that actually ran
    pub delivered: u64,
    /// Events shed from the full pending queue
    pub dropped: u64,
    /// TTL expiries observed while still queued
    pub expired: u64,
}

/// Dispatch slots and the secondary bounded FIFO behind them
struct DispatchState {
    pending: VecDeque<Event>,
    in_flight: usize,
}

struct BusInner {
    subscriptions: Mutex<HashMap<String, Vec<Arc<Subscription>>>>,
    dispatch: Mutex<DispatchState>,
    stats: Mutex<BusStats>,
    idle: Notify,
    config: EventBusConfig,
}

/// Pub/sub event bus with backpressure by load shedding.
///
/// Dispatch runs on spawned tasks bounded by `max_concurrent_events`; a
/// publish arriving while all slots are busy (including a re-entrant publish
/// from inside a listener) is deferred through the pending queue instead of
/// recursing. Must be used within a Tokio runtime.
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with default configuration
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a bus with explicit capacity and TTL settings.
    ///
    /// A zero `max_concurrent_events` would leave every publish queued with
    /// nothing draining, so it is clamped to 1.
    pub fn with_config(mut config: EventBusConfig) -> Self {
        config.max_concurrent_events = config.max_concurrent_events.max(1);
        Self {
            inner: Arc::new(BusInner {
                subscriptions: Mutex::new(HashMap::new()),
                dispatch: Mutex::new(DispatchState {
                    pending: VecDeque::new(),
                    in_flight: 0,
                }),
                stats: Mutex::new(BusStats::default()),
                idle: Notify::new(),
                config,
            }),
        }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers of its type.
    ///
    /// Assigns id and timestamp if the caller left them blank. Returns the
    /// event id; the event itself is immutable from here on. Never blocks and
    /// never fails under load: excess events are shed oldest-first with a
    /// `bus.event.dropped` diagnostic per drop.
    pub fn publish(&self, mut event: Event) -> EventId {
        if event.id.is_empty() {
            event.id = Event::new_id();
        }
        let id = event.id.clone();

        self.inner.stats.lock().expect("stats lock").published += 1;

        if let Some(ttl) = self.inner.config.event_ttl {
            Self::arm_ttl(&self.inner, &event, ttl);
        }

        let dropped = {
            let mut dispatch = self.inner.dispatch.lock().expect("dispatch lock");
            if dispatch.in_flight >= self.inner.config.max_concurrent_events {
                let mut shed = None;
                if dispatch.pending.len() >= self.inner.config.queue_capacity {
                    shed = dispatch.pending.pop_front();
                }
                dispatch.pending.push_back(event);
                trace!(event_id = %id, queued = dispatch.pending.len(), "Event deferred to queue");
                shed
            } else {
                dispatch.in_flight += 1;
                Self::spawn_drain(self.inner.clone(), event);
                None
            }
        };

        if let Some(shed) = dropped {
            self.inner.stats.lock().expect("stats lock").dropped += 1;
            warn!(
                dropped_id = %shed.id,
                dropped_type = %shed.event_type,
                "Pending queue full, shed oldest event"
            );
            Self::publish_diagnostic(
                &self.inner,
                CoordinationPayload::EventDropped {
                    dropped_event_id: shed.id,
                    dropped_event_type: shed.event_type,
                    queue_capacity: self.inner.config.queue_capacity,
                },
            );
        }

        id
    }

    /// Publish a core-owned payload under its derived type string
    pub fn publish_coordination(&self, source: &str, payload: CoordinationPayload) -> EventId {
        self.publish(Event::coordination(source, payload))
    }

    /// Subscribe a listener to one event type.
    ///
    /// Listeners for the same type fire in subscription order; types are
    /// independent partitions with no cross-type ordering.
    pub fn subscribe<F>(&self, event_type: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(event_type, None, Box::new(listener))
    }

    /// Subscribe with a filter predicate.
    ///
    /// A filter evaluating false is a silent skip, not an error.
    pub fn subscribe_filtered<P, F>(&self, event_type: &str, filter: P, listener: F) -> SubscriptionId
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(event_type, Some(Box::new(filter)), Box::new(listener))
    }

    fn register(
        &self,
        event_type: &str,
        filter: Option<EventFilter>,
        listener: Listener,
    ) -> SubscriptionId {
        let id = uuid::Uuid::new_v4().to_string();
        let subscription = Arc::new(Subscription {
            id: id.clone(),
            filter,
            listener,
        });

        let mut subs = self.inner.subscriptions.lock().expect("subscriptions lock");
        subs.entry(event_type.to_string())
            .or_default()
            .push(subscription);

        debug!(event_type, subscription_id = %id, "Listener subscribed");
        id
    }

    /// Remove a subscription by id.
    ///
    /// Returns false if the id is unknown (already removed or never issued).
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let mut subs = self.inner.subscriptions.lock().expect("subscriptions lock");
        for listeners in subs.values_mut() {
            if let Some(pos) = listeners.iter().position(|s| s.id == subscription_id) {
                listeners.remove(pos);
                debug!(subscription_id, "Listener unsubscribed");
                return true;
            }
        }
        false
    }

    /// Wait until every accepted event has finished dispatching
    pub async fn flush(&self) {
        loop {
            let notified = self.inner.idle.notified();
            {
                let dispatch = self.inner.dispatch.lock().expect("dispatch lock");
                if dispatch.pending.is_empty() && dispatch.in_flight == 0 {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Drop all subscriptions and any still-queued events
    pub fn clear(&self) {
        self.inner
            .subscriptions
            .lock()
            .expect("subscriptions lock")
            .clear();
        self.inner
            .dispatch
            .lock()
            .expect("dispatch lock")
            .pending
            .clear();
        self.inner.idle.notify_waiters();
        debug!("Event bus cleared");
    }

    /// Number of registered subscriptions across all types
    pub fn subscription_count(&self) -> usize {
        self.inner
            .subscriptions
            .lock()
            .expect("subscriptions lock")
            .values()
            .map(|v| v.len())
            .sum()
    }

    /// Current length of the pending queue
    pub fn queue_len(&self) -> usize {
        self.inner
            .dispatch
            .lock()
            .expect("dispatch lock")
            .pending
            .len()
    }

    /// Snapshot of bus counters
    pub fn stats(&self) -> BusStats {
        *self.inner.stats.lock().expect("stats lock")
    }

    /// Take a dispatch slot and drain the queue behind it
    fn spawn_drain(inner: Arc<BusInner>, event: Event) {
        tokio::spawn(async move {
            let mut current = event;
            loop {
                Self::deliver(&inner, &current);

                let next = {
                    let mut dispatch = inner.dispatch.lock().expect("dispatch lock");
                    match dispatch.pending.pop_front() {
                        Some(event) => Some(event),
                        None => {
                            dispatch.in_flight -= 1;
                            None
                        }
                    }
                };

                match next {
                    Some(event) => {
                        current = event;
                        // Cooperative yield between queued events
                        tokio::task::yield_now().await;
                    }
                    None => {
                        inner.idle.notify_waiters();
                        return;
                    }
                }
            }
        });
    }

    /// Diagnostics bypass the capacity gate so shedding cannot shed its own
    /// signal; they still occupy accounting so `flush` observes them.
    fn publish_diagnostic(inner: &Arc<BusInner>, payload: CoordinationPayload) {
        let event = Event::coordination(BUS_SOURCE, payload);
        inner.dispatch.lock().expect("dispatch lock").in_flight += 1;

        let inner = inner.clone();
        tokio::spawn(async move {
            Self::deliver(&inner, &event);
            inner.dispatch.lock().expect("dispatch lock").in_flight -= 1;
            inner.idle.notify_waiters();
        });
    }

    /// Invoke all listeners for the event's type, in subscription order
    fn deliver(inner: &Arc<BusInner>, event: &Event) {
        let listeners: Vec<Arc<Subscription>> = {
            let subs = inner.subscriptions.lock().expect("subscriptions lock");
            subs.get(&event.event_type).cloned().unwrap_or_default()
        };

        for subscription in listeners {
            if let Some(filter) = &subscription.filter {
                if !filter(event) {
                    trace!(
                        event_id = %event.id,
                        subscription_id = %subscription.id,
                        "Filter skipped event"
                    );
                    continue;
                }
            }

            if let Err(e) = (subscription.listener)(event) {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    subscription_id = %subscription.id,
                    "Listener failed: {e}"
                );
                continue;
            }

            inner.stats.lock().expect("stats lock").delivered += 1;
        }
    }

    /// Watch for the event still sitting in the queue when its TTL fires.
    ///
    /// Advisory only: the event stays queued and is still delivered later.
    fn arm_ttl(inner: &Arc<BusInner>, event: &Event, ttl: Duration) {
        let event_id = event.id.clone();
        let event_type = event.event_type.clone();
        let inner = inner.clone();

        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;

            let still_queued = {
                let dispatch = inner.dispatch.lock().expect("dispatch lock");
                dispatch.pending.iter().any(|e| e.id == event_id)
            };

            if still_queued {
                inner.stats.lock().expect("stats lock").expired += 1;
                warn!(event_id = %event_id, event_type = %event_type, "Event TTL expired while queued");
                Self::publish_diagnostic(
                    &inner,
                    CoordinationPayload::EventExpired {
                        expired_event_id: event_id,
                        expired_event_type: event_type,
                        ttl_ms: ttl.as_millis() as u64,
                    },
                );
            }
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
