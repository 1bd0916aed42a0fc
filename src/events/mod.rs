//! Pub/sub backbone for swarm coordination
//!
//! The bus carries opaque envelopes between loosely-coupled components; the
//! core's own notifications are a closed tagged union of payload schemas.

pub mod bus;
pub mod types;

pub use bus::{BusStats, EventBus, EventFilter, Listener, SharedEventBus};
pub use types::{CoordinationPayload, Event, EventId, SubscriptionId};
