//! Agent workload snapshots and the external source that supplies them

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AgentId;

/// Point-in-time view of one agent's load, supplied by the agent registry.
///
/// Derived data, never persisted by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentWorkload {
    pub agent_id: AgentId,
    /// Tasks currently queued or executing on the agent
    pub current_workload: u32,
    /// Concurrent tasks the agent is provisioned for
    pub capacity: u32,
    /// Mean priority weight of the agent's queued tasks
    pub average_queued_priority: f64,
    /// Capability tags used for rebalance matching
    pub capabilities: Vec<String>,
}

impl AgentWorkload {
    /// Create a snapshot with no capability tags
    pub fn new(agent_id: impl Into<AgentId>, current_workload: u32, capacity: u32) -> Self {
        Self {
            agent_id: agent_id.into(),
            current_workload,
            capacity,
            average_queued_priority: crate::types::TaskPriority::Medium.weight(),
            capabilities: Vec::new(),
        }
    }

    /// Attach capability tags
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the mean queued priority weight
    pub fn with_average_queued_priority(mut self, priority: f64) -> Self {
        self.average_queued_priority = priority;
        self
    }

    /// Load fraction clamped to [0, 1]; a zero-capacity agent counts as full
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        (self.current_workload as f64 / self.capacity as f64).clamp(0.0, 1.0)
    }

    /// Whether this agent shares at least one capability tag with another
    pub fn shares_capability(&self, other: &AgentWorkload) -> Option<&str> {
        self.capabilities
            .iter()
            .find(|c| other.capabilities.contains(*c))
            .map(|c| c.as_str())
    }
}

/// External collaborator that reports live workload snapshots.
///
/// Fetching is the router's one genuine blocking boundary; a source failure is
/// surfaced to callers rather than papered over with fabricated data.
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    async fn agent_workloads(&self) -> anyhow::Result<Vec<AgentWorkload>>;
}

/// Recency-weighted throughput observations for one agent.
///
/// An exponentially-weighted moving average over observed task durations, so
/// the newest completion always carries the most individual weight.
#[derive(Debug, Clone, Default)]
pub struct ThroughputTracker {
    avg_task_secs: Option<f64>,
    samples: u32,
}

impl ThroughputTracker {
    /// Record a completed task's duration
    pub fn record(&mut self, duration_secs: f64, alpha: f64) {
        let duration_secs = duration_secs.max(0.0);
        self.avg_task_secs = Some(match self.avg_task_secs {
            Some(avg) => alpha * duration_secs + (1.0 - alpha) * avg,
            None => duration_secs,
        });
        self.samples += 1;
    }

    /// Smoothed seconds-per-task, or the supplied default before any samples
    pub fn avg_task_secs(&self, default_secs: f64) -> f64 {
        self.avg_task_secs.unwrap_or(default_secs)
    }

    /// Number of completions observed
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Extrapolate when an agent with the given backlog frees up
    pub fn estimated_availability(&self, backlog: u32, default_secs: f64) -> DateTime<Utc> {
        let wait_secs = backlog as f64 * self.avg_task_secs(default_secs);
        Utc::now() + Duration::milliseconds((wait_secs * 1000.0) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization_clamped() {
        let over = AgentWorkload::new("agent-1", 12, 4);
        assert_eq!(over.utilization(), 1.0);

        let idle = AgentWorkload::new("agent-2", 0, 4);
        assert_eq!(idle.utilization(), 0.0);

        let zero_capacity = AgentWorkload::new("agent-3", 0, 0);
        assert_eq!(zero_capacity.utilization(), 1.0);
    }

    #[test]
    fn test_shared_capability_lookup() {
        let a = AgentWorkload::new("agent-1", 1, 4)
            .with_capabilities(vec!["rust".to_string(), "review".to_string()]);
        let b = AgentWorkload::new("agent-2", 1, 4).with_capabilities(vec!["review".to_string()]);
        let c = AgentWorkload::new("agent-3", 1, 4).with_capabilities(vec!["python".to_string()]);

        assert_eq!(a.shares_capability(&b), Some("review"));
        assert_eq!(a.shares_capability(&c), None);
    }

    #[test]
    fn test_throughput_weights_recent_samples() {
        let mut tracker = ThroughputTracker::default();
        tracker.record(10.0, 0.3);
        tracker.record(20.0, 0.3);

        let avg = tracker.avg_task_secs(30.0);
        // Pulled towards the newer observation, not a plain restart
        assert!(avg > 10.0 && avg < 20.0);
        assert_eq!(tracker.samples(), 2);
    }

    #[test]
    fn test_default_before_samples() {
        let tracker = ThroughputTracker::default();
        assert_eq!(tracker.avg_task_secs(30.0), 30.0);
    }
}
