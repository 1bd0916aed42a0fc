//! Predictive task routing
//!
//! Scores every agent's expected queueing and completion time from live
//! workload snapshots plus recency-weighted throughput, picks a target, and
//! announces the decision on the bus. Routing is stateless per call except for
//! the bounded audit history and the throughput model.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::history::BoundedHistory;
use super::workload::{AgentWorkload, ThroughputTracker, WorkloadSource};
use crate::config::RouterConfig;
use crate::events::{CoordinationPayload, SharedEventBus};
use crate::types::{AgentId, TaskPriority};

/// Source stamped on router events
const ROUTER_SOURCE: &str = "task-router";

/// Error type for routing operations
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The workload collaborator could not be reached; fabricating a routing
    /// decision without live data is unsafe, so this propagates
    #[error("Workload source unavailable: {0}")]
    WorkloadSource(String),

    #[error("No agents available for routing")]
    NoAgentsAvailable,
}

/// Result type for routing operations
pub type RouterResult<T> = Result<T, RouterError>;

/// Shared reference to TaskRouter
pub type SharedTaskRouter = Arc<TaskRouter>;

/// One agent's predicted cost of taking the task
#[derive(Debug, Clone, Serialize)]
pub struct RoutingPrediction {
    pub agent_id: AgentId,
    /// Seconds until the agent would start this task
    pub estimated_wait_secs: f64,
    /// Seconds this task is expected to run once started
    pub estimated_task_secs: f64,
    pub estimated_completion: DateTime<Utc>,
    pub confidence: f64,
    pub reasoning: String,
}

/// A committed routing decision, stamped for auditability.
///
/// Invariant: `routing_time <= estimated_start <= estimated_completion`.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub agent_id: AgentId,
    pub priority: TaskPriority,
    pub routing_time: DateTime<Utc>,
    pub estimated_start: DateTime<Utc>,
    pub estimated_completion: DateTime<Utc>,
    pub confidence: f64,
    pub reasoning: String,
}

/// Advisory suggestion to shift load between two agents.
///
/// Produced by a read-only heuristic; acting on it is up to the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceRecommendation {
    pub overloaded_agent: AgentId,
    pub suggested_target: AgentId,
    pub shared_capability: String,
    pub overloaded_utilization: f64,
    pub target_utilization: f64,
}

/// Routes tasks to the agent with the earliest predicted completion
pub struct TaskRouter {
    source: Arc<dyn WorkloadSource>,
    bus: SharedEventBus,
    config: RouterConfig,
    history: Mutex<HashMap<AgentId, BoundedHistory<RoutingDecision>>>,
    throughput: Mutex<HashMap<AgentId, ThroughputTracker>>,
}

impl TaskRouter {
    /// Create a router over an external workload source
    pub fn new(source: Arc<dyn WorkloadSource>, bus: SharedEventBus, config: RouterConfig) -> Self {
        Self {
            source,
            bus,
            config,
            history: Mutex::new(HashMap::new()),
            throughput: Mutex::new(HashMap::new()),
        }
    }

    /// Create a shared reference to this router
    pub fn shared(self) -> SharedTaskRouter {
        Arc::new(self)
    }

    /// Predict routing cost for every known agent.
    ///
    /// Sorted by ascending estimated completion; ties broken by descending
    /// confidence, then agent id for determinism. An empty or whitespace
    /// description falls back to default unweighted scoring, never an error.
    pub async fn predict_routing(
        &self,
        description: &str,
        priority: TaskPriority,
    ) -> RouterResult<Vec<RoutingPrediction>> {
        let workloads = self.fetch_workloads().await?;

        let (multiplier, weighted) = match complexity_multiplier(description) {
            Some(m) => (m, true),
            None => (1.0, false),
        };

        // One shared reference instant so equal-cost agents tie exactly
        let now = Utc::now();
        let mut predictions: Vec<RoutingPrediction> = {
            let throughput = self.throughput.lock().expect("throughput lock");
            workloads
                .iter()
                .map(|w| self.predict_for_agent(w, priority, multiplier, weighted, now, &throughput))
                .collect()
        };

        predictions.sort_by(|a, b| {
            a.estimated_completion
                .cmp(&b.estimated_completion)
                .then_with(|| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });

        debug!(
            candidates = predictions.len(),
            weighted, "Routing predictions computed"
        );
        Ok(predictions)
    }

    /// Route a task to the best-predicted agent.
    ///
    /// Records the decision in the per-agent audit history and announces it as
    /// `router.task.routed`.
    pub async fn route_task(
        &self,
        description: &str,
        priority: TaskPriority,
    ) -> RouterResult<RoutingDecision> {
        let predictions = self.predict_routing(description, priority).await?;
        let best = predictions
            .into_iter()
            .next()
            .ok_or(RouterError::NoAgentsAvailable)?;

        let routing_time = Utc::now();
        let estimated_start = routing_time + secs_to_duration(best.estimated_wait_secs);
        let estimated_completion = estimated_start + secs_to_duration(best.estimated_task_secs);

        let decision = RoutingDecision {
            agent_id: best.agent_id.clone(),
            priority,
            routing_time,
            estimated_start,
            estimated_completion,
            confidence: best.confidence,
            reasoning: best.reasoning,
        };

        self.history
            .lock()
            .expect("history lock")
            .entry(decision.agent_id.clone())
            .or_insert_with(|| BoundedHistory::new(self.config.history_capacity))
            .push(decision.clone());

        info!(
            agent_id = %decision.agent_id,
            priority = %priority,
            confidence = decision.confidence,
            "Task routed"
        );

        self.bus.publish_coordination(
            ROUTER_SOURCE,
            CoordinationPayload::TaskRouted {
                agent_id: decision.agent_id.clone(),
                estimated_wait_secs: best.estimated_wait_secs,
                estimated_completion: decision.estimated_completion,
                confidence: decision.confidence,
                priority,
            },
        );

        Ok(decision)
    }

    /// Feed an observed task duration into the throughput model
    pub fn record_task_completion(&self, agent_id: &str, duration: StdDuration) {
        let mut throughput = self.throughput.lock().expect("throughput lock");
        throughput
            .entry(agent_id.to_string())
            .or_default()
            .record(duration.as_secs_f64(), self.config.throughput_alpha);
    }

    /// Read-only snapshot of the bounded routing history for one agent,
    /// oldest to newest
    pub fn routing_history(&self, agent_id: &str) -> Vec<RoutingDecision> {
        self.history
            .lock()
            .expect("history lock")
            .get(agent_id)
            .map(|h| h.to_vec())
            .unwrap_or_default()
    }

    /// Read-only passthrough to the workload collaborator
    pub async fn agent_workloads(&self) -> RouterResult<Vec<AgentWorkload>> {
        self.fetch_workloads().await
    }

    /// When an agent with the given backlog is expected to free up
    pub fn estimated_availability(&self, workload: &AgentWorkload) -> DateTime<Utc> {
        let throughput = self.throughput.lock().expect("throughput lock");
        throughput
            .get(&workload.agent_id)
            .cloned()
            .unwrap_or_default()
            .estimated_availability(workload.current_workload, self.config.default_task_secs)
    }

    /// Flag overloaded agents that have an idle, capability-matching peer.
    ///
    /// Purely advisory; mutates nothing.
    pub fn rebalance_recommendations(
        &self,
        workloads: &[AgentWorkload],
    ) -> Vec<RebalanceRecommendation> {
        let mut candidates: Vec<&AgentWorkload> = workloads
            .iter()
            .filter(|w| w.utilization() < self.config.low_water_utilization)
            .collect();
        candidates.sort_by(|a, b| {
            a.utilization()
                .partial_cmp(&b.utilization())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });

        let mut recommendations = Vec::new();
        for overloaded in workloads {
            if overloaded.utilization() < self.config.high_water_utilization {
                continue;
            }
            let peer = candidates.iter().find_map(|target| {
                overloaded
                    .shares_capability(target)
                    .map(|capability| (target, capability))
            });
            if let Some((target, capability)) = peer {
                recommendations.push(RebalanceRecommendation {
                    overloaded_agent: overloaded.agent_id.clone(),
                    suggested_target: target.agent_id.clone(),
                    shared_capability: capability.to_string(),
                    overloaded_utilization: overloaded.utilization(),
                    target_utilization: target.utilization(),
                });
            }
        }
        recommendations
    }

    async fn fetch_workloads(&self) -> RouterResult<Vec<AgentWorkload>> {
        self.source.agent_workloads().await.map_err(|e| {
            warn!("Workload source failed: {e}");
            RouterError::WorkloadSource(e.to_string())
        })
    }

    fn predict_for_agent(
        &self,
        workload: &AgentWorkload,
        priority: TaskPriority,
        multiplier: f64,
        weighted: bool,
        now: DateTime<Utc>,
        throughput: &HashMap<AgentId, ThroughputTracker>,
    ) -> RoutingPrediction {
        let tracker = throughput.get(&workload.agent_id);
        let avg_secs = tracker
            .map(|t| t.avg_task_secs(self.config.default_task_secs))
            .unwrap_or(self.config.default_task_secs);
        let samples = tracker.map(|t| t.samples()).unwrap_or(0);

        let mut wait_secs = workload.current_workload as f64 * avg_secs;

        // Higher-priority tasks jump part of the queue: discount proportional
        // to the priority gap over the agent's queued average, floored at zero
        let gap = priority.weight() - workload.average_queued_priority;
        if gap > 0.0 {
            let discount = (self.config.priority_discount_per_level * gap).min(1.0);
            wait_secs *= 1.0 - discount;
        }
        wait_secs = wait_secs.max(0.0);

        let task_secs = avg_secs * multiplier;

        let mut confidence =
            0.5 + 0.1 * samples.min(4) as f64 - 0.25 * workload.utilization();
        if !weighted {
            confidence *= 0.8;
        }
        let confidence = confidence.clamp(0.05, 0.95);

        let reasoning = format!(
            "utilization {:.0}%, {} throughput samples, est wait {:.1}s{}",
            workload.utilization() * 100.0,
            samples,
            wait_secs,
            if weighted { "" } else { ", unweighted fallback" }
        );

        RoutingPrediction {
            agent_id: workload.agent_id.clone(),
            estimated_wait_secs: wait_secs,
            estimated_task_secs: task_secs,
            estimated_completion: now + secs_to_duration(wait_secs) + secs_to_duration(task_secs),
            confidence,
            reasoning,
        }
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::milliseconds((secs.max(0.0) * 1000.0) as i64)
}

/// Scale expected task duration by rough description complexity.
///
/// `None` for an empty or whitespace description, signalling the unweighted
/// fallback path.
fn complexity_multiplier(description: &str) -> Option<f64> {
    let trimmed = description.trim();
    if trimmed.is_empty() {
        return None;
    }

    let words = trimmed.split_whitespace().count();
    let mut score: u8 = match words {
        0..=8 => 1,
        9..=30 => 2,
        _ => 3,
    };

    let lower = trimmed.to_lowercase();
    for keyword in ["refactor", "migrate", "architecture", "debug", "multi-file"] {
        if lower.contains(keyword) {
            score = score.saturating_add(1);
        }
    }
    let score = score.min(5);

    Some(0.5 + 0.25 * score as f64)
}
