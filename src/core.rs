//! Constructor-injected wiring for the four coordination components
//!
//! There are no process-wide singletons: a deployment builds exactly the
//! instances it needs through [`CoordinationCore`], which is a thin factory
//! over explicitly shared components.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::CoordinationConfig;
use crate::events::{EventBus, SharedEventBus, SubscriptionId};
use crate::handoff::{HandoffManager, SharedHandoffManager};
use crate::router::{SharedTaskRouter, TaskRouter, WorkloadSource};
use crate::voting::{ConsensusVoting, SharedConsensusVoting};

/// One bus plus the three components that publish through it.
///
/// Components never hold live references into each other's mutable state;
/// they communicate through bus payload copies and read-only queries.
pub struct CoordinationCore {
    bus: SharedEventBus,
    router: SharedTaskRouter,
    voting: SharedConsensusVoting,
    handoff: SharedHandoffManager,
}

impl CoordinationCore {
    /// Build a full coordination core over an external workload source
    pub fn new(source: Arc<dyn WorkloadSource>, config: CoordinationConfig) -> Self {
        let bus = EventBus::with_config(config.bus).shared();
        let router = TaskRouter::new(source, bus.clone(), config.router).shared();
        let voting = ConsensusVoting::new(bus.clone()).shared();
        let handoff = HandoffManager::new(bus.clone()).shared();

        debug!("Coordination core assembled");
        Self {
            bus,
            router,
            voting,
            handoff,
        }
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.bus
    }

    pub fn router(&self) -> &SharedTaskRouter {
        &self.router
    }

    pub fn voting(&self) -> &SharedConsensusVoting {
        &self.voting
    }

    pub fn handoff(&self) -> &SharedHandoffManager {
        &self.handoff
    }

    /// Feed collaborator-reported `task.completed` events into the router's
    /// throughput model.
    ///
    /// Expects the collaborator payload to carry `agent_id` (string) and
    /// `duration_secs` (number); other shapes are skipped silently, since the
    /// payload belongs to the publishing collaborator.
    pub fn wire_throughput_feedback(&self) -> SubscriptionId {
        let router = self.router.clone();
        self.bus.subscribe("task.completed", move |event| {
            let agent_id = event.payload.get("agent_id").and_then(|v| v.as_str());
            let duration_secs = event.payload.get("duration_secs").and_then(|v| v.as_f64());
            if let (Some(agent_id), Some(duration_secs)) = (agent_id, duration_secs) {
                if duration_secs.is_finite() && duration_secs >= 0.0 {
                    router.record_task_completion(agent_id, Duration::from_secs_f64(duration_secs));
                }
            }
            Ok(())
        })
    }

    /// Wait for every published event to finish dispatching
    pub async fn quiesce(&self) {
        self.bus.flush().await;
    }
}
