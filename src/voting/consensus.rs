//! Consensus voting across agents
//!
//! Sessions move open → closed exactly once. Expected misuse on the hot path
//! (unknown session, closed session, invalid option) is a boolean sentinel,
//! never an error; structural mistakes at creation and closure are errors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::session::{
    ClosureRule, SessionId, VoteOption, VotingResult, VotingSession,
};
use crate::events::{CoordinationPayload, SharedEventBus};

/// Source stamped on voting events
const VOTING_SOURCE: &str = "consensus-voting";

/// Default share required when closing with supermajority and no threshold
const DEFAULT_SUPERMAJORITY: f64 = 2.0 / 3.0;

/// Error type for voting operations
#[derive(Debug, thiserror::Error)]
pub enum VotingError {
    #[error("Voting session requires at least one option")]
    NoOptions,

    #[error("Duplicate option id: {0}")]
    DuplicateOption(String),

    #[error("Unknown voting session: {0}")]
    UnknownSession(SessionId),

    #[error("Voting session already closed: {0}")]
    AlreadyClosed(SessionId),

    #[error("Supermajority threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),
}

/// Shared reference to ConsensusVoting
pub type SharedConsensusVoting = Arc<ConsensusVoting>;

/// Manages voting sessions and their binding outcomes
pub struct ConsensusVoting {
    bus: SharedEventBus,
    sessions: Mutex<HashMap<SessionId, VotingSession>>,
    results: Mutex<HashMap<SessionId, VotingResult>>,
}

impl ConsensusVoting {
    pub fn new(bus: SharedEventBus) -> Self {
        Self {
            bus,
            sessions: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
        }
    }

    /// Create a shared reference to this voting manager
    pub fn shared(self) -> SharedConsensusVoting {
        Arc::new(self)
    }

    /// Open a new voting session.
    ///
    /// Rejects an empty option set and duplicate option ids.
    pub fn create_voting_session(
        &self,
        question: impl Into<String>,
        options: Vec<VoteOption>,
        quorum: Option<u32>,
    ) -> Result<SessionId, VotingError> {
        if options.is_empty() {
            return Err(VotingError::NoOptions);
        }
        for (i, option) in options.iter().enumerate() {
            if options[..i].iter().any(|o| o.id == option.id) {
                return Err(VotingError::DuplicateOption(option.id.clone()));
            }
        }

        let session = VotingSession::new(question, options, quorum);
        let session_id = session.id.clone();
        let question = session.question.clone();
        let option_count = session.options.len();

        info!(
            session_id = %session_id,
            options = option_count,
            quorum = ?quorum,
            "Voting session created"
        );

        // Commit before announcing: a listener reacting to the created event
        // must be able to cast a vote on the announced id
        self.sessions
            .lock()
            .expect("sessions lock")
            .insert(session_id.clone(), session);

        self.bus.publish_coordination(
            VOTING_SOURCE,
            CoordinationPayload::VotingSessionCreated {
                session_id: session_id.clone(),
                question,
                option_count,
                quorum,
            },
        );

        Ok(session_id)
    }

    /// Cast (or re-cast) a vote in an open session.
    ///
    /// Returns false for an unknown session, a closed session, or an invalid
    /// option, never an error. A repeat voter's new ballot overwrites the
    /// earlier one while the session remains open.
    pub fn cast_vote(
        &self,
        session_id: &str,
        voter_id: &str,
        option_id: &str,
        reason: Option<String>,
    ) -> bool {
        let overwrote = {
            let mut sessions = self.sessions.lock().expect("sessions lock");
            let Some(session) = sessions.get_mut(session_id) else {
                debug!(session_id, voter_id, "Vote rejected: unknown session");
                return false;
            };
            if !session.is_open() {
                debug!(session_id, voter_id, "Vote rejected: session closed");
                return false;
            }
            if !session.has_option(option_id) {
                debug!(session_id, voter_id, option_id, "Vote rejected: invalid option");
                return false;
            }
            session.record_vote(voter_id, option_id, reason)
        };

        if overwrote {
            // Last vote wins; kept as-is pending a product decision on
            // whether overwrites should be restricted
            debug!(session_id, voter_id, option_id, "Vote overwrote earlier ballot");
        }

        self.bus.publish_coordination(
            VOTING_SOURCE,
            CoordinationPayload::VoteCast {
                session_id: session_id.to_string(),
                voter_id: voter_id.to_string(),
                option_id: option_id.to_string(),
                overwrote_previous: overwrote,
            },
        );

        true
    }

    /// Close a session exactly once and produce its binding result.
    ///
    /// For supermajority, `threshold` defaults to 2/3 and must lie in (0, 1].
    /// A tied top count never reaches consensus; the reported winner is the
    /// tied option whose first vote was cast earliest.
    pub fn close_voting_session(
        &self,
        session_id: &str,
        rule: ClosureRule,
        threshold: Option<f64>,
    ) -> Result<VotingResult, VotingError> {
        let threshold = match rule {
            ClosureRule::SimpleMajority => None,
            ClosureRule::Supermajority => {
                let t = threshold.unwrap_or(DEFAULT_SUPERMAJORITY);
                if !(t > 0.0 && t <= 1.0) {
                    return Err(VotingError::InvalidThreshold(t));
                }
                Some(t)
            }
        };

        let result = {
            let mut sessions = self.sessions.lock().expect("sessions lock");
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| VotingError::UnknownSession(session_id.to_string()))?;
            if !session.is_open() {
                return Err(VotingError::AlreadyClosed(session_id.to_string()));
            }

            let result = tally_session(session, rule, threshold);
            session.close();
            result
        };

        if !result.consensus_reached {
            warn!(
                session_id,
                rule = %rule,
                total_votes = result.total_votes,
                quorum_met = result.quorum_met,
                "Session closed without consensus"
            );
        } else {
            info!(
                session_id,
                rule = %rule,
                winner = ?result.winning_option.as_ref().map(|o| o.id.as_str()),
                "Session closed with consensus"
            );
        }

        // Commit before announcing: a listener reacting to the closed event
        // must see the result through voting_result
        self.results
            .lock()
            .expect("results lock")
            .insert(session_id.to_string(), result.clone());

        self.bus.publish_coordination(
            VOTING_SOURCE,
            CoordinationPayload::VotingSessionClosed {
                session_id: session_id.to_string(),
                winning_option_id: result.winning_option.as_ref().map(|o| o.id.clone()),
                consensus_reached: result.consensus_reached,
                quorum_met: result.quorum_met,
                total_votes: result.total_votes,
            },
        );

        Ok(result)
    }

    /// Read-only copy of a session, open or closed
    pub fn session(&self, session_id: &str) -> Option<VotingSession> {
        self.sessions
            .lock()
            .expect("sessions lock")
            .get(session_id)
            .cloned()
    }

    /// Result of a closed session, if any
    pub fn voting_result(&self, session_id: &str) -> Option<VotingResult> {
        self.results
            .lock()
            .expect("results lock")
            .get(session_id)
            .cloned()
    }

    /// Number of sessions still open
    pub fn open_session_count(&self) -> usize {
        self.sessions
            .lock()
            .expect("sessions lock")
            .values()
            .filter(|s| s.is_open())
            .count()
    }
}

fn tally_session(
    session: &VotingSession,
    rule: ClosureRule,
    threshold: Option<f64>,
) -> VotingResult {
    let distribution = session.tally();
    let total = session.total_votes();
    let quorum_met = session.quorum.map_or(true, |q| total >= q);

    let top = distribution.values().copied().max().unwrap_or(0);

    let (winning_option, tied) = if top == 0 {
        (None, false)
    } else {
        let mut leaders: Vec<&str> = distribution
            .iter()
            .filter(|(_, &count)| count == top)
            .map(|(id, _)| id.as_str())
            .collect();
        let tied = leaders.len() > 1;
        // Deterministic, auditable tie-break: earliest first-cast vote
        leaders.sort_by_key(|id| session.first_cast_sequence(id).unwrap_or(u64::MAX));
        (leaders.first().and_then(|id| session.option(id)).cloned(), tied)
    };

    let share = if total > 0 {
        top as f64 / total as f64
    } else {
        0.0
    };

    let share_sufficient = match rule {
        ClosureRule::SimpleMajority => share > 0.5,
        ClosureRule::Supermajority => share >= threshold.unwrap_or(DEFAULT_SUPERMAJORITY),
    };

    VotingResult {
        session_id: session.id.clone(),
        winning_option,
        vote_distribution: distribution,
        consensus_reached: share_sufficient && quorum_met && !tied && total > 0,
        quorum_met,
        rule,
        total_votes: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use serde_json::json;

    fn test_voting() -> ConsensusVoting {
        ConsensusVoting::new(EventBus::new().shared())
    }

    fn tech_options() -> Vec<VoteOption> {
        vec![
            VoteOption::new("tech-a", "Technology A", json!({"stack": "a"})),
            VoteOption::new("tech-b", "Technology B", json!({"stack": "b"})),
            VoteOption::new("tech-c", "Technology C", json!({"stack": "c"})),
        ]
    }

    #[tokio::test]
    async fn test_simple_majority_consensus() {
        let voting = test_voting();
        let id = voting
            .create_voting_session("pick a stack", tech_options(), None)
            .unwrap();

        assert!(voting.cast_vote(&id, "voter-1", "tech-a", None));
        assert!(voting.cast_vote(&id, "voter-2", "tech-a", None));
        assert!(voting.cast_vote(&id, "voter-3", "tech-b", None));

        let result = voting
            .close_voting_session(&id, ClosureRule::SimpleMajority, None)
            .unwrap();

        assert_eq!(result.winning_option.unwrap().id, "tech-a");
        assert!(result.consensus_reached);
        assert!(result.quorum_met);
        assert_eq!(result.vote_distribution["tech-a"], 2);
        assert_eq!(result.vote_distribution["tech-b"], 1);
        assert_eq!(result.vote_distribution["tech-c"], 0);
    }

    #[tokio::test]
    async fn test_supermajority_not_reached_on_split() {
        let voting = test_voting();
        let id = voting
            .create_voting_session("pick a stack", tech_options(), None)
            .unwrap();

        voting.cast_vote(&id, "voter-1", "tech-a", None);
        voting.cast_vote(&id, "voter-2", "tech-b", None);

        let result = voting
            .close_voting_session(&id, ClosureRule::Supermajority, Some(0.8))
            .unwrap();

        assert!(!result.consensus_reached);
        // Leading option still reported: the tie-break picks the earliest
        // first-cast option
        assert_eq!(result.winning_option.unwrap().id, "tech-a");
    }

    #[tokio::test]
    async fn test_supermajority_reached_at_threshold() {
        let voting = test_voting();
        let id = voting
            .create_voting_session("pick a stack", tech_options(), None)
            .unwrap();

        voting.cast_vote(&id, "voter-1", "tech-a", None);
        voting.cast_vote(&id, "voter-2", "tech-a", None);
        voting.cast_vote(&id, "voter-3", "tech-a", None);
        voting.cast_vote(&id, "voter-4", "tech-b", None);

        let result = voting
            .close_voting_session(&id, ClosureRule::Supermajority, Some(0.75))
            .unwrap();

        assert!(result.consensus_reached);
        assert_eq!(result.winning_option.unwrap().id, "tech-a");
    }

    #[tokio::test]
    async fn test_last_vote_wins() {
        let voting = test_voting();
        let id = voting
            .create_voting_session("pick a stack", tech_options(), None)
            .unwrap();

        voting.cast_vote(&id, "voter-1", "tech-a", None);
        voting.cast_vote(&id, "voter-1", "tech-b", Some("changed my mind".to_string()));
        voting.cast_vote(&id, "voter-2", "tech-b", None);

        let result = voting
            .close_voting_session(&id, ClosureRule::SimpleMajority, None)
            .unwrap();

        assert_eq!(result.vote_distribution["tech-a"], 0);
        assert_eq!(result.vote_distribution["tech-b"], 2);
        assert_eq!(result.total_votes, 2);
    }

    #[tokio::test]
    async fn test_invalid_votes_return_false() {
        let voting = test_voting();
        let id = voting
            .create_voting_session("pick a stack", tech_options(), None)
            .unwrap();

        assert!(!voting.cast_vote("no-such-session", "voter-1", "tech-a", None));
        assert!(!voting.cast_vote(&id, "voter-1", "no-such-option", None));

        voting
            .close_voting_session(&id, ClosureRule::SimpleMajority, None)
            .unwrap();
        assert!(!voting.cast_vote(&id, "voter-1", "tech-a", None));
    }

    #[tokio::test]
    async fn test_unmet_quorum_blocks_consensus() {
        let voting = test_voting();
        let id = voting
            .create_voting_session("pick a stack", tech_options(), Some(3))
            .unwrap();

        voting.cast_vote(&id, "voter-1", "tech-a", None);
        voting.cast_vote(&id, "voter-2", "tech-a", None);

        let result = voting
            .close_voting_session(&id, ClosureRule::SimpleMajority, None)
            .unwrap();

        assert!(!result.quorum_met);
        assert!(!result.consensus_reached);
        assert_eq!(result.winning_option.unwrap().id, "tech-a");
    }

    #[tokio::test]
    async fn test_tie_breaks_to_earliest_first_cast() {
        let voting = test_voting();
        let id = voting
            .create_voting_session("pick a stack", tech_options(), None)
            .unwrap();

        voting.cast_vote(&id, "voter-1", "tech-b", None);
        voting.cast_vote(&id, "voter-2", "tech-a", None);

        let result = voting
            .close_voting_session(&id, ClosureRule::SimpleMajority, None)
            .unwrap();

        assert!(!result.consensus_reached);
        assert_eq!(result.winning_option.unwrap().id, "tech-b");
    }

    #[tokio::test]
    async fn test_close_exactly_once() {
        let voting = test_voting();
        let id = voting
            .create_voting_session("pick a stack", tech_options(), None)
            .unwrap();

        voting
            .close_voting_session(&id, ClosureRule::SimpleMajority, None)
            .unwrap();

        assert!(matches!(
            voting.close_voting_session(&id, ClosureRule::SimpleMajority, None),
            Err(VotingError::AlreadyClosed(_))
        ));
        assert!(matches!(
            voting.close_voting_session("no-such-session", ClosureRule::SimpleMajority, None),
            Err(VotingError::UnknownSession(_))
        ));

        // Result stays readable after closure
        assert!(voting.voting_result(&id).is_some());
        assert_eq!(voting.open_session_count(), 0);
    }

    #[tokio::test]
    async fn test_create_validates_options() {
        let voting = test_voting();

        assert!(matches!(
            voting.create_voting_session("empty", Vec::new(), None),
            Err(VotingError::NoOptions)
        ));

        let duplicates = vec![
            VoteOption::new("x", "X", json!(null)),
            VoteOption::new("x", "X again", json!(null)),
        ];
        assert!(matches!(
            voting.create_voting_session("dup", duplicates, None),
            Err(VotingError::DuplicateOption(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_threshold_rejected() {
        let voting = test_voting();
        let id = voting
            .create_voting_session("pick a stack", tech_options(), None)
            .unwrap();

        assert!(matches!(
            voting.close_voting_session(&id, ClosureRule::Supermajority, Some(1.5)),
            Err(VotingError::InvalidThreshold(_))
        ));

        // Rejected threshold must not consume the single closure
        let result = voting
            .close_voting_session(&id, ClosureRule::Supermajority, None)
            .unwrap();
        assert!(!result.consensus_reached);
    }

    #[tokio::test]
    async fn test_created_event_listener_can_cast_immediately() {
        let bus = EventBus::new().shared();
        let voting = ConsensusVoting::new(bus.clone()).shared();

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();
        let reactor = voting.clone();
        bus.subscribe("voting.session.created", move |event| {
            if let Some(crate::events::CoordinationPayload::VotingSessionCreated {
                session_id,
                ..
            }) = event.decode()
            {
                let accepted = reactor.cast_vote(&session_id, "reactor", "tech-a", None);
                sink.lock().unwrap().push(accepted);
            }
            Ok(())
        });

        for _ in 0..10 {
            voting
                .create_voting_session("pick a stack", tech_options(), None)
                .unwrap();
        }
        bus.flush().await;

        // The session must already be registered when the event fires
        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 10);
        assert!(outcomes.iter().all(|&accepted| accepted));
    }

    #[tokio::test]
    async fn test_closed_event_listener_sees_result() {
        let bus = EventBus::new().shared();
        let voting = ConsensusVoting::new(bus.clone()).shared();

        let lookups = Arc::new(Mutex::new(Vec::new()));
        let sink = lookups.clone();
        let reactor = voting.clone();
        bus.subscribe("voting.session.closed", move |event| {
            if let Some(crate::events::CoordinationPayload::VotingSessionClosed {
                session_id,
                ..
            }) = event.decode()
            {
                sink.lock().unwrap().push(reactor.voting_result(&session_id).is_some());
            }
            Ok(())
        });

        let id = voting
            .create_voting_session("pick a stack", tech_options(), None)
            .unwrap();
        voting.cast_vote(&id, "voter-1", "tech-a", None);
        voting
            .close_voting_session(&id, ClosureRule::SimpleMajority, None)
            .unwrap();
        bus.flush().await;

        let lookups = lookups.lock().unwrap();
        assert_eq!(*lookups, vec![true]);
    }

    #[tokio::test]
    async fn test_no_votes_means_no_winner() {
        let voting = test_voting();
        let id = voting
            .create_voting_session("pick a stack", tech_options(), None)
            .unwrap();

        let result = voting
            .close_voting_session(&id, ClosureRule::SimpleMajority, None)
            .unwrap();

        assert!(result.winning_option.is_none());
        assert!(!result.consensus_reached);
    }
}
