//! Event envelope and core-owned payload schemas
//!
//! The bus carries an opaque envelope: collaborators own the payload shape for
//! the event types they define. The coordination core's own notifications form
//! a closed tagged union ([`CoordinationPayload`]) so that subscribers can
//! decode them without string-keyed guesswork.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AgentId, TaskId};

/// Unique identifier for events
pub type EventId = String;

/// Unique identifier for subscriptions
pub type SubscriptionId = String;

/// The envelope every published notification travels in.
///
/// Immutable once published. The bus validates only the envelope fields; the
/// payload belongs to whichever collaborator owns the event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id, assigned at publish if empty
    pub id: EventId,
    /// Namespaced type string, e.g. "task.completed" or "voting.session.closed"
    pub event_type: String,
    /// Publish timestamp, assigned at publish if unset
    pub timestamp: DateTime<Utc>,
    /// Identity of the publishing component or collaborator
    pub source: String,
    /// Opaque payload owned by the event-type's collaborator
    pub payload: Value,
}

impl Event {
    /// Create a new event with a fresh id and timestamp
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Self::new_id(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }

    /// Wrap a core-owned payload into an envelope, deriving the type string
    /// from the payload variant
    pub fn coordination(source: impl Into<String>, payload: CoordinationPayload) -> Self {
        let event_type = payload.event_type().to_string();
        let value = serde_json::to_value(&payload).unwrap_or(Value::Null);
        Self::new(event_type, source, value)
    }

    /// Decode the payload as a core-owned schema.
    ///
    /// Returns `None` for collaborator-defined event types.
    pub fn decode(&self) -> Option<CoordinationPayload> {
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// Create a new unique event id
    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }
}

/// All notifications owned by the coordination core itself.
///
/// Closed union keyed by the namespaced type string; each component constructs
/// its own variants at the publish boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CoordinationPayload {
    /// The bounded queue overflowed and the oldest queued event was shed
    #[serde(rename = "bus.event.dropped")]
    EventDropped {
        dropped_event_id: EventId,
        dropped_event_type: String,
        queue_capacity: usize,
    },

    /// An event sat unconsumed in the queue past its time-to-live
    #[serde(rename = "bus.event.expired")]
    EventExpired {
        expired_event_id: EventId,
        expired_event_type: String,
        ttl_ms: u64,
    },

    /// The router committed a task to an agent
    #[serde(rename = "router.task.routed")]
    TaskRouted {
        agent_id: AgentId,
        estimated_wait_secs: f64,
        estimated_completion: DateTime<Utc>,
        confidence: f64,
        priority: crate::types::TaskPriority,
    },

    /// A voting session was opened
    #[serde(rename = "voting.session.created")]
    VotingSessionCreated {
        session_id: String,
        question: String,
        option_count: usize,
        quorum: Option<u32>,
    },

    /// A vote was cast (or re-cast) in an open session
    #[serde(rename = "voting.vote.cast")]
    VoteCast {
        session_id: String,
        voter_id: AgentId,
        option_id: String,
        overwrote_previous: bool,
    },

    /// A voting session was closed and tallied
    #[serde(rename = "voting.session.closed")]
    VotingSessionClosed {
        session_id: String,
        winning_option_id: Option<String>,
        consensus_reached: bool,
        quorum_met: bool,
        total_votes: u32,
    },

    /// A context handoff was opened and is transferring
    #[serde(rename = "handoff.initiated")]
    HandoffInitiated {
        handoff_id: String,
        source_agent_id: AgentId,
        target_agent_id: AgentId,
        task_id: TaskId,
        compressed_size: usize,
        priority: crate::types::TaskPriority,
    },

    /// A handoff delivered its context to the receiving agent
    #[serde(rename = "handoff.completed")]
    HandoffCompleted {
        handoff_id: String,
        receiving_agent_id: AgentId,
    },

    /// A handoff was cancelled and its record destroyed
    #[serde(rename = "handoff.cancelled")]
    HandoffCancelled {
        handoff_id: String,
        cancelled_while: String,
    },
}

impl CoordinationPayload {
    /// Get the namespaced event type string for this payload
    pub fn event_type(&self) -> &'static str {
        match self {
            CoordinationPayload::EventDropped { .. } => "bus.event.dropped",
            CoordinationPayload::EventExpired { .. } => "bus.event.expired",
            CoordinationPayload::TaskRouted { .. } => "router.task.routed",
            CoordinationPayload::VotingSessionCreated { .. } => "voting.session.created",
            CoordinationPayload::VoteCast { .. } => "voting.vote.cast",
            CoordinationPayload::VotingSessionClosed { .. } => "voting.session.closed",
            CoordinationPayload::HandoffInitiated { .. } => "handoff.initiated",
            CoordinationPayload::HandoffCompleted { .. } => "handoff.completed",
            CoordinationPayload::HandoffCancelled { .. } => "handoff.cancelled",
        }
    }

    /// Whether this is one of the bus's own observability diagnostics
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            CoordinationPayload::EventDropped { .. } | CoordinationPayload::EventExpired { .. }
        )
    }
}
