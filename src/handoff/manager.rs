//! Context handoff between agents
//!
//! Point-to-point transfer of working context with a four-state protocol:
//! initiated → transferring → completed, with cancelled reachable from either
//! pre-completion state. Cancellation is destructive: the record is removed
//! outright so a cancelled handoff can never later be completed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::events::{CoordinationPayload, SharedEventBus};
use crate::types::{AgentId, TaskId, TaskPriority};

/// Source stamped on handoff events
const HANDOFF_SOURCE: &str = "context-handoff";

/// Unique identifier for handoffs
pub type HandoffId = String;

/// Error type for handoff operations
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("Malformed handoff request: {0}")]
    MalformedRequest(String),

    #[error("Failed to package context: {0}")]
    Packaging(String),
}

/// Protocol state of a handoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    /// Pre-packaging state. Packaging is synchronous in this implementation,
    /// so stored records advance straight to [`Self::Transferring`] inside
    /// [`HandoffManager::initiate_handoff`]; the variant is kept for the wire
    /// protocol, where a distributed deployment packages asynchronously.
    Initiated,
    Transferring,
    Completed,
    Cancelled,
}

impl std::fmt::Display for HandoffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandoffStatus::Initiated => write!(f, "initiated"),
            HandoffStatus::Transferring => write!(f, "transferring"),
            HandoffStatus::Completed => write!(f, "completed"),
            HandoffStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Request to move a task's context between agents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub source_agent_id: AgentId,
    pub target_agent_id: AgentId,
    pub task_id: TaskId,
    /// Opaque, collaborator-defined working context
    pub context: Value,
    pub priority: TaskPriority,
}

/// Returned on successful initiation
#[derive(Debug, Clone, Serialize)]
pub struct HandoffReceipt {
    pub handoff_id: HandoffId,
    pub compressed_size: usize,
}

/// Queryable status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HandoffProgress {
    pub status: HandoffStatus,
    /// 0-100
    pub progress: u8,
    pub source_agent_id: AgentId,
    pub target_agent_id: AgentId,
    pub task_id: TaskId,
    pub compressed_size: usize,
    pub priority: TaskPriority,
    pub initiated_at: DateTime<Utc>,
}

/// In-flight handoff record, exclusively owned by the manager
struct HandoffRecord {
    source_agent_id: AgentId,
    target_agent_id: AgentId,
    task_id: TaskId,
    /// Taken on completion: logical ownership moves to the receiving agent
    /// and the source loses access
    context: Option<Value>,
    compressed_size: usize,
    status: HandoffStatus,
    progress: u8,
    priority: TaskPriority,
    initiated_at: DateTime<Utc>,
}

/// Manages point-to-point context transfers between agents
pub struct HandoffManager {
    bus: SharedEventBus,
    records: Mutex<HashMap<HandoffId, HandoffRecord>>,
}

/// Shared reference to HandoffManager
pub type SharedHandoffManager = Arc<HandoffManager>;

impl HandoffManager {
    pub fn new(bus: SharedEventBus) -> Self {
        Self {
            bus,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Create a shared reference to this manager
    pub fn shared(self) -> SharedHandoffManager {
        Arc::new(self)
    }

    /// Open a handoff: package the context and start the transfer.
    ///
    /// Packaging is synchronous; the record advances straight to transferring
    /// at progress 50, the packaging midpoint, modeling the network leg a
    /// distributed deployment would add.
    pub fn initiate_handoff(&self, request: HandoffRequest) -> Result<HandoffReceipt, HandoffError> {
        if request.source_agent_id.is_empty() || request.target_agent_id.is_empty() {
            return Err(HandoffError::MalformedRequest(
                "source and target agent ids are required".to_string(),
            ));
        }
        if request.task_id.is_empty() {
            return Err(HandoffError::MalformedRequest("task id is required".to_string()));
        }

        let packaged = serde_json::to_vec(&request.context)
            .map_err(|e| HandoffError::Packaging(e.to_string()))?;
        let compressed_size = packaged.len();

        let handoff_id: HandoffId = uuid::Uuid::new_v4().to_string();
        let record = HandoffRecord {
            source_agent_id: request.source_agent_id.clone(),
            target_agent_id: request.target_agent_id.clone(),
            task_id: request.task_id.clone(),
            context: Some(request.context),
            compressed_size,
            status: HandoffStatus::Transferring,
            progress: 50,
            priority: request.priority,
            initiated_at: Utc::now(),
        };

        self.records
            .lock()
            .expect("records lock")
            .insert(handoff_id.clone(), record);

        info!(
            handoff_id = %handoff_id,
            source = %request.source_agent_id,
            target = %request.target_agent_id,
            task_id = %request.task_id,
            compressed_size,
            "Handoff initiated"
        );

        self.bus.publish_coordination(
            HANDOFF_SOURCE,
            CoordinationPayload::HandoffInitiated {
                handoff_id: handoff_id.clone(),
                source_agent_id: request.source_agent_id,
                target_agent_id: request.target_agent_id,
                task_id: request.task_id,
                compressed_size,
                priority: request.priority,
            },
        );

        Ok(HandoffReceipt {
            handoff_id,
            compressed_size,
        })
    }

    /// Current status and progress, `None` once the record is gone
    pub fn handoff_status(&self, handoff_id: &str) -> Option<HandoffProgress> {
        self.records
            .lock()
            .expect("records lock")
            .get(handoff_id)
            .map(|r| HandoffProgress {
                status: r.status,
                progress: r.progress,
                source_agent_id: r.source_agent_id.clone(),
                target_agent_id: r.target_agent_id.clone(),
                task_id: r.task_id.clone(),
                compressed_size: r.compressed_size,
                priority: r.priority,
                initiated_at: r.initiated_at,
            })
    }

    /// Deliver the context to the receiving agent.
    ///
    /// Returns the original payload and marks the handoff completed at
    /// progress 100; the record stays queryable until [`Self::remove_completed`].
    /// Unknown or already-delivered handoffs yield `None`, never an error. A
    /// receiver other than the declared target is accepted, since the declared
    /// target may have become unavailable, but logged as a concern.
    pub fn complete_handoff(&self, handoff_id: &str, receiving_agent_id: &str) -> Option<Value> {
        let context = {
            let mut records = self.records.lock().expect("records lock");
            let Some(record) = records.get_mut(handoff_id) else {
                debug!(handoff_id, "Completion rejected: unknown handoff");
                return None;
            };

            let context = record.context.take()?;

            if record.target_agent_id != receiving_agent_id {
                warn!(
                    handoff_id,
                    declared_target = %record.target_agent_id,
                    receiving_agent_id,
                    "Handoff completed by a different agent than declared"
                );
            }

            record.status = HandoffStatus::Completed;
            record.progress = 100;
            context
        };

        info!(handoff_id, receiving_agent_id, "Handoff completed");

        self.bus.publish_coordination(
            HANDOFF_SOURCE,
            CoordinationPayload::HandoffCompleted {
                handoff_id: handoff_id.to_string(),
                receiving_agent_id: receiving_agent_id.to_string(),
            },
        );

        Some(context)
    }

    /// Cancel an in-flight handoff, destroying its record.
    ///
    /// Valid from initiated or transferring only; a completed handoff cannot
    /// be cancelled and an unknown id is an idempotent no-op returning false.
    pub fn cancel_handoff(&self, handoff_id: &str) -> bool {
        let cancelled_while = {
            let mut records = self.records.lock().expect("records lock");
            let status = match records.get(handoff_id) {
                None => {
                    debug!(handoff_id, "Cancellation rejected: unknown handoff");
                    return false;
                }
                Some(record) if record.status == HandoffStatus::Completed => {
                    debug!(handoff_id, "Cancellation rejected: already completed");
                    return false;
                }
                Some(record) => record.status,
            };
            records.remove(handoff_id);
            status
        };

        info!(handoff_id, %cancelled_while, "Handoff cancelled");

        self.bus.publish_coordination(
            HANDOFF_SOURCE,
            CoordinationPayload::HandoffCancelled {
                handoff_id: handoff_id.to_string(),
                cancelled_while: cancelled_while.to_string(),
            },
        );

        true
    }

    /// Explicitly clean up a completed handoff's record
    pub fn remove_completed(&self, handoff_id: &str) -> bool {
        let mut records = self.records.lock().expect("records lock");
        let is_completed = matches!(
            records.get(handoff_id),
            Some(record) if record.status == HandoffStatus::Completed
        );
        if is_completed {
            records.remove(handoff_id);
            debug!(handoff_id, "Completed handoff record removed");
        }
        is_completed
    }

    /// Number of records currently held (transferring or completed)
    pub fn handoff_count(&self) -> usize {
        self.records.lock().expect("records lock").len()
    }

    /// Whether an agent has a handoff still transferring towards it.
    ///
    /// Read-only availability probe for the router and orchestrators.
    pub fn has_inbound_transfer(&self, agent_id: &str) -> bool {
        self.records
            .lock()
            .expect("records lock")
            .values()
            .any(|r| r.status == HandoffStatus::Transferring && r.target_agent_id == agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use serde_json::json;

    fn test_manager() -> HandoffManager {
        HandoffManager::new(EventBus::new().shared())
    }

    fn request(context: Value) -> HandoffRequest {
        HandoffRequest {
            source_agent_id: "agent-src".to_string(),
            target_agent_id: "agent-dst".to_string(),
            task_id: "task-1".to_string(),
            context,
            priority: TaskPriority::High,
        }
    }

    #[tokio::test]
    async fn test_initiate_advances_to_transferring() {
        let manager = test_manager();
        let receipt = manager
            .initiate_handoff(request(json!({"cursor": 42, "notes": ["a", "b"]})))
            .unwrap();

        assert!(receipt.compressed_size > 0);

        let progress = manager.handoff_status(&receipt.handoff_id).unwrap();
        assert_eq!(progress.status, HandoffStatus::Transferring);
        assert_eq!(progress.progress, 50);
        assert_eq!(progress.task_id, "task-1");
        assert_eq!(progress.compressed_size, receipt.compressed_size);
        assert!(manager.has_inbound_transfer("agent-dst"));
    }

    #[tokio::test]
    async fn test_complete_returns_original_context() {
        let manager = test_manager();
        let context = json!({"cursor": 42, "stack": [1, 2, 3]});
        let receipt = manager.initiate_handoff(request(context.clone())).unwrap();

        let delivered = manager
            .complete_handoff(&receipt.handoff_id, "agent-dst")
            .unwrap();
        assert_eq!(delivered, context);

        let progress = manager.handoff_status(&receipt.handoff_id).unwrap();
        assert_eq!(progress.status, HandoffStatus::Completed);
        assert_eq!(progress.progress, 100);

        // Ownership moved: the payload can only be delivered once
        assert!(manager
            .complete_handoff(&receipt.handoff_id, "agent-dst")
            .is_none());
    }

    #[tokio::test]
    async fn test_mismatched_receiver_is_accepted() {
        let manager = test_manager();
        let receipt = manager.initiate_handoff(request(json!({"k": 1}))).unwrap();

        let delivered = manager.complete_handoff(&receipt.handoff_id, "agent-other");
        assert!(delivered.is_some());
    }

    #[tokio::test]
    async fn test_cancel_is_destructive() {
        let manager = test_manager();
        let receipt = manager.initiate_handoff(request(json!(null))).unwrap();

        assert!(manager.cancel_handoff(&receipt.handoff_id));
        assert!(manager.handoff_status(&receipt.handoff_id).is_none());

        // A cancelled handoff can never later be completed
        assert!(manager
            .complete_handoff(&receipt.handoff_id, "agent-dst")
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_ids_are_noops() {
        let manager = test_manager();
        assert!(!manager.cancel_handoff("no-such-handoff"));
        assert!(manager.handoff_status("no-such-handoff").is_none());
        assert!(manager.complete_handoff("no-such-handoff", "agent-dst").is_none());
    }

    #[tokio::test]
    async fn test_completed_handoff_cannot_be_cancelled() {
        let manager = test_manager();
        let receipt = manager.initiate_handoff(request(json!({"k": 1}))).unwrap();
        manager.complete_handoff(&receipt.handoff_id, "agent-dst");

        assert!(!manager.cancel_handoff(&receipt.handoff_id));
        assert!(manager.handoff_status(&receipt.handoff_id).is_some());

        assert!(manager.remove_completed(&receipt.handoff_id));
        assert!(manager.handoff_status(&receipt.handoff_id).is_none());
        assert_eq!(manager.handoff_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_request_rejected() {
        let manager = test_manager();
        let mut bad = request(json!({}));
        bad.source_agent_id = String::new();

        assert!(matches!(
            manager.initiate_handoff(bad),
            Err(HandoffError::MalformedRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_null_context_still_packages() {
        let manager = test_manager();
        let receipt = manager.initiate_handoff(request(json!(null))).unwrap();
        // "null" still serializes to non-empty bytes
        assert!(receipt.compressed_size > 0);
    }
}
