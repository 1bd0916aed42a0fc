//! Configuration for the coordination core
//!
//! Components are constructor-injected with their own config section; there is
//! no process-wide singleton. [`CoordinationConfig`] aggregates the sections
//! for the [`crate::core::CoordinationCore`] factory.

use std::time::Duration;

/// Capacity and TTL settings for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Maximum events actively dispatching at once; beyond this, events enter
    /// the pending queue. Zero is clamped to 1 at bus construction.
    pub max_concurrent_events: usize,
    /// Bound on the pending queue; when full, the oldest queued event is shed
    pub queue_capacity: usize,
    /// Time an event may sit queued before an advisory expiry diagnostic;
    /// `None` disables the watchdog
    pub event_ttl: Option<Duration>,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_concurrent_events: 4,
            queue_capacity: 256,
            event_ttl: Some(Duration::from_secs(30)),
        }
    }
}

impl EventBusConfig {
    /// Override the pending queue bound
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Override or disable the per-event TTL
    pub fn with_event_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.event_ttl = ttl;
        self
    }
}

/// Tuning knobs for routing predictions and rebalancing heuristics
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Most-recent-N routing decisions retained per agent
    pub history_capacity: usize,
    /// Utilization above which an agent is flagged as overloaded
    pub high_water_utilization: f64,
    /// Utilization below which a peer counts as a rebalance target
    pub low_water_utilization: f64,
    /// Assumed seconds per task until throughput observations arrive
    pub default_task_secs: f64,
    /// Wait-time discount per priority level above the agent's queued average
    pub priority_discount_per_level: f64,
    /// EWMA weight given to the newest throughput observation
    pub throughput_alpha: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            history_capacity: 32,
            high_water_utilization: 0.85,
            low_water_utilization: 0.40,
            default_task_secs: 30.0,
            priority_discount_per_level: 0.25,
            throughput_alpha: 0.3,
        }
    }
}

impl RouterConfig {
    /// Override the per-agent history bound
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }
}

/// Aggregate configuration for the whole coordination core
#[derive(Debug, Clone, Default)]
pub struct CoordinationConfig {
    pub bus: EventBusConfig,
    pub router: RouterConfig,
}
