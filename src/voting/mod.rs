//! Consensus voting for binding group decisions
//!
//! Sessions accumulate ballots while open and close exactly once under a
//! configurable quorum and closure rule.

pub mod consensus;
pub mod session;

pub use consensus::{ConsensusVoting, SharedConsensusVoting, VotingError};
pub use session::{
    CastVote, ClosureRule, OptionId, SessionId, SessionStatus, VoteOption, VotingResult,
    VotingSession,
};
