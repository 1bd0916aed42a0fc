//! Shared identifiers and priority levels used across the coordination core.

use serde::{Deserialize, Serialize};

/// Unique identifier for an agent in the swarm
pub type AgentId = String;

/// Unique identifier for a unit of work
pub type TaskId = String;

/// Priority attached to a task or handoff request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
}

impl TaskPriority {
    /// Numeric weight used by the router's priority-discount model
    pub fn weight(&self) -> f64 {
        match self {
            TaskPriority::Low => 1.0,
            TaskPriority::Medium => 2.0,
            TaskPriority::High => 3.0,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Medium => write!(f, "medium"),
            TaskPriority::High => write!(f, "high"),
        }
    }
}
