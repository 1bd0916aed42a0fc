//! Tracked, cancellable transfer of task context between agents

pub mod manager;

pub use manager::{
    HandoffError, HandoffId, HandoffManager, HandoffProgress, HandoffReceipt, HandoffRequest,
    HandoffStatus, SharedHandoffManager,
};
