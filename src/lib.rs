//! Coordination core for autonomous agent swarms
//!
//! This library provides the four coordination primitives a swarm of
//! task-processing agents is built on:
//!
//! - **Event Bus**: pub/sub backbone with bounded queueing, drop-oldest load
//!   shedding, and per-event TTL diagnostics
//! - **Task Router**: predicts per-agent queueing and completion time from
//!   live workload snapshots and picks a target
//! - **Consensus Voting**: binding group decisions under configurable quorum
//!   and closure rules
//! - **Context Handoff**: tracked, cancellable transfer of working context
//!   from one agent to another
//!
//! Model inference, storage, and workflow execution live outside this crate;
//! they participate as collaborators publishing and subscribing through the
//! bus. Components are constructor-injected; [`core::CoordinationCore`] is
//! the thin factory that wires a full set onto one shared bus.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use swarm_coordination::config::CoordinationConfig;
//! use swarm_coordination::core::CoordinationCore;
//! use swarm_coordination::router::{AgentWorkload, WorkloadSource};
//! use swarm_coordination::types::TaskPriority;
//!
//! struct Registry;
//!
//! #[async_trait::async_trait]
//! impl WorkloadSource for Registry {
//!     async fn agent_workloads(&self) -> anyhow::Result<Vec<AgentWorkload>> {
//!         Ok(vec![AgentWorkload::new("agent-a", 1, 4)])
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let core = CoordinationCore::new(Arc::new(Registry), CoordinationConfig::default());
//! let decision = core.router().route_task("summarize repo", TaskPriority::High).await?;
//! println!("routed to {}", decision.agent_id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod events;
pub mod handoff;
pub mod router;
pub mod types;
pub mod voting;

// Re-export key event types
pub use events::{BusStats, CoordinationPayload, Event, EventBus, EventId, SharedEventBus};

// Re-export key router types
pub use router::{
    AgentWorkload, BoundedHistory, RebalanceRecommendation, RouterError, RoutingDecision,
    RoutingPrediction, TaskRouter, WorkloadSource,
};

// Re-export key voting types
pub use voting::{
    ClosureRule, ConsensusVoting, SessionStatus, VoteOption, VotingError, VotingResult,
    VotingSession,
};

// Re-export key handoff types
pub use handoff::{
    HandoffError, HandoffManager, HandoffProgress, HandoffReceipt, HandoffRequest, HandoffStatus,
};

// Re-export configuration and wiring
pub use crate::config::{CoordinationConfig, EventBusConfig, RouterConfig};
pub use crate::core::CoordinationCore;
pub use crate::types::{AgentId, TaskId, TaskPriority};
