//! Voting session state and tallies

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::AgentId;

/// Unique identifier for voting sessions
pub type SessionId = String;

/// Identifier of one option within a session
pub type OptionId = String;

/// A choice voters can select
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteOption {
    pub id: OptionId,
    pub label: String,
    /// Collaborator-defined payload carried with the option
    pub value: Value,
}

impl VoteOption {
    pub fn new(id: impl Into<OptionId>, label: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            value,
        }
    }
}

/// Rule applied when a session is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClosureRule {
    /// Winner needs a strict majority of cast votes
    SimpleMajority,
    /// Winner needs a configurable share of cast votes
    Supermajority,
}

impl std::fmt::Display for ClosureRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClosureRule::SimpleMajority => write!(f, "simple-majority"),
            ClosureRule::Supermajority => write!(f, "supermajority"),
        }
    }
}

/// Lifecycle of a session: open on creation, closed exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// One voter's current vote. Re-casting overwrites this in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastVote {
    pub option_id: OptionId,
    pub reason: Option<String>,
    pub cast_at: DateTime<Utc>,
    /// Session-local monotonic sequence, used for the tie-break audit trail
    pub sequence: u64,
}

/// A voting session and its accumulated ballots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingSession {
    pub id: SessionId,
    pub question: String,
    pub options: Vec<VoteOption>,
    /// Minimum cast-vote count for the outcome to be valid, if set
    pub quorum: Option<u32>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    /// Current vote per voter; last vote wins while the session is open
    votes: HashMap<AgentId, CastVote>,
    /// Sequence of the FIRST vote ever cast for each option, kept across
    /// overwrites so tie-breaking stays deterministic and auditable
    first_cast: HashMap<OptionId, u64>,
    next_sequence: u64,
}

impl VotingSession {
    pub fn new(question: impl Into<String>, options: Vec<VoteOption>, quorum: Option<u32>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            question: question.into(),
            options,
            quorum,
            status: SessionStatus::Open,
            created_at: Utc::now(),
            votes: HashMap::new(),
            first_cast: HashMap::new(),
            next_sequence: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }

    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }

    pub fn option(&self, option_id: &str) -> Option<&VoteOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    /// Record a ballot, overwriting the voter's earlier one if present.
    ///
    /// Returns whether an earlier ballot was overwritten.
    pub fn record_vote(
        &mut self,
        voter_id: impl Into<AgentId>,
        option_id: impl Into<OptionId>,
        reason: Option<String>,
    ) -> bool {
        let option_id = option_id.into();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.first_cast.entry(option_id.clone()).or_insert(sequence);

        self.votes
            .insert(
                voter_id.into(),
                CastVote {
                    option_id,
                    reason,
                    cast_at: Utc::now(),
                    sequence,
                },
            )
            .is_some()
    }

    /// Count of current votes per option; options nobody voted for count zero
    pub fn tally(&self) -> HashMap<OptionId, u32> {
        let mut counts: HashMap<OptionId, u32> =
            self.options.iter().map(|o| (o.id.clone(), 0)).collect();
        for vote in self.votes.values() {
            if let Some(count) = counts.get_mut(&vote.option_id) {
                *count += 1;
            }
        }
        counts
    }

    pub fn total_votes(&self) -> u32 {
        self.votes.len() as u32
    }

    /// Sequence of the first vote ever cast for an option
    pub fn first_cast_sequence(&self, option_id: &str) -> Option<u64> {
        self.first_cast.get(option_id).copied()
    }

    pub(crate) fn close(&mut self) {
        self.status = SessionStatus::Closed;
    }
}

/// Outcome of closing a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingResult {
    pub session_id: SessionId,
    /// Leading option; reported even when consensus was not reached, `None`
    /// only when nobody voted
    pub winning_option: Option<VoteOption>,
    pub vote_distribution: HashMap<OptionId, u32>,
    pub consensus_reached: bool,
    pub quorum_met: bool,
    pub rule: ClosureRule,
    pub total_votes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> Vec<VoteOption> {
        vec![
            VoteOption::new("a", "Option A", json!(null)),
            VoteOption::new("b", "Option B", json!(null)),
        ]
    }

    #[test]
    fn test_revote_overwrites_in_place() {
        let mut session = VotingSession::new("pick one", options(), None);

        assert!(!session.record_vote("voter-1", "a", None));
        assert!(session.record_vote("voter-1", "b", None));

        let tally = session.tally();
        assert_eq!(tally["a"], 0);
        assert_eq!(tally["b"], 1);
        assert_eq!(session.total_votes(), 1);
    }

    #[test]
    fn test_first_cast_survives_overwrite() {
        let mut session = VotingSession::new("pick one", options(), None);

        session.record_vote("voter-1", "a", None);
        session.record_vote("voter-1", "b", None);

        // "a" was voted for first even though it no longer holds the vote
        assert!(session.first_cast_sequence("a") < session.first_cast_sequence("b"));
    }

    #[test]
    fn test_tally_includes_zero_count_options() {
        let session = VotingSession::new("pick one", options(), None);
        let tally = session.tally();
        assert_eq!(tally.len(), 2);
        assert!(tally.values().all(|&c| c == 0));
    }
}
