//! Predictive task routing for the agent swarm
//!
//! Reads live workload snapshots from an external agent registry, models
//! per-agent throughput with recency weighting, and picks the agent with the
//! earliest predicted completion.

pub mod history;
pub mod predictor;
pub mod workload;

pub use history::BoundedHistory;
pub use predictor::{
    RebalanceRecommendation, RouterError, RouterResult, RoutingDecision, RoutingPrediction,
    SharedTaskRouter, TaskRouter,
};
pub use workload::{AgentWorkload, ThroughputTracker, WorkloadSource};
