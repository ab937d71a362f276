//! Consensus evaluation for multi-agent deliberation.
//!
//! Turns a set of agent votes into a verdict given a required vote count
//! and a consensus threshold. Evaluation is pure and deterministic.
//!
//! # Voting Rules
//!
//! - Fewer votes than required: no verdict (`InsufficientVotes`)
//! - Abstentions count toward the total but toward neither ratio
//! - `approvals / total >= threshold`: approved
//! - otherwise `rejections / total >= threshold`: rejected
//! - otherwise no verdict (`ThresholdNotMet`); ties are never broken here

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CouncilError;
use crate::Result;

/// A single agent's vote value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Approve,
    Reject,
    Abstain,
}

impl std::str::FromStr for Vote {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "approve" | "yes" => Ok(Vote::Approve),
            "reject" | "no" => Ok(Vote::Reject),
            "abstain" => Ok(Vote::Abstain),
            other => Err(format!("unknown vote '{}'", other)),
        }
    }
}

/// A binding outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "approve" | "approved" => Ok(Decision::Approved),
            "reject" | "rejected" => Ok(Decision::Rejected),
            other => Err(format!("unknown decision '{}'", other)),
        }
    }
}

/// A vote cast by one agent on one deliberation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentVote {
    /// Voting agent.
    pub agent_id: String,
    /// The vote.
    pub vote: Vote,
    /// Free-text reasoning.
    pub reasoning: String,
    /// Self-reported confidence in [0, 1].
    pub confidence: f64,
    /// When the vote was cast.
    pub timestamp: DateTime<Utc>,
}

impl AgentVote {
    /// Creates a vote stamped now. Confidence is clamped into [0, 1];
    /// a NaN confidence becomes 0.
    pub fn new(
        agent_id: impl Into<String>,
        vote: Vote,
        reasoning: impl Into<String>,
        confidence: f64,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            agent_id: agent_id.into(),
            vote,
            reasoning: reasoning.into(),
            confidence,
            timestamp: Utc::now(),
        }
    }
}

/// Counts of each vote value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub approvals: usize,
    pub rejections: usize,
    pub abstentions: usize,
    pub total: usize,
}

impl VoteTally {
    /// Tallies a collection of votes.
    pub fn from_votes(votes: &[AgentVote]) -> Self {
        let mut tally = VoteTally {
            total: votes.len(),
            ..VoteTally::default()
        };
        for vote in votes {
            match vote.vote {
                Vote::Approve => tally.approvals += 1,
                Vote::Reject => tally.rejections += 1,
                Vote::Abstain => tally.abstentions += 1,
            }
        }
        tally
    }

    /// Approvals over all votes cast, abstentions included.
    pub fn approval_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.approvals as f64 / self.total as f64
        }
    }

    /// Rejections over all votes cast, abstentions included.
    pub fn rejection_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.rejections as f64 / self.total as f64
        }
    }
}

/// Why a verdict was or was not reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusReason {
    /// One side's ratio met the threshold.
    ThresholdMet,
    /// Fewer votes than required.
    InsufficientVotes,
    /// Enough votes, but neither side met the threshold.
    ThresholdNotMet,
}

/// Result of evaluating a vote set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusVerdict {
    /// Whether a binding verdict was reached.
    pub reached: bool,
    /// The verdict, if reached.
    pub decision: Option<Decision>,
    /// Why.
    pub reason: ConsensusReason,
    /// Vote counts the verdict was computed from.
    pub tally: VoteTally,
}

/// Evaluates `votes` against a required count and threshold.
///
/// An empty vote set never reaches a verdict, even when `required_votes`
/// is zero.
///
/// # Example
///
/// ```rust
/// use gavel_council::{evaluate, AgentVote, ConsensusReason, Decision, Vote};
///
/// let votes = vec![
///     AgentVote::new("a", Vote::Approve, "", 1.0),
///     AgentVote::new("b", Vote::Approve, "", 1.0),
///     AgentVote::new("c", Vote::Approve, "", 1.0),
///     AgentVote::new("d", Vote::Reject, "", 1.0),
/// ];
///
/// let verdict = evaluate(&votes, 3, 0.66);
/// assert_eq!(verdict.decision, Some(Decision::Approved));
/// assert_eq!(verdict.reason, ConsensusReason::ThresholdMet);
/// ```
pub fn evaluate(votes: &[AgentVote], required_votes: usize, threshold: f64) -> ConsensusVerdict {
    let tally = VoteTally::from_votes(votes);

    if tally.total == 0 || tally.total < required_votes {
        return ConsensusVerdict {
            reached: false,
            decision: None,
            reason: ConsensusReason::InsufficientVotes,
            tally,
        };
    }

    let decision = if tally.approval_ratio() >= threshold {
        Some(Decision::Approved)
    } else if tally.rejection_ratio() >= threshold {
        Some(Decision::Rejected)
    } else {
        None
    };

    ConsensusVerdict {
        reached: decision.is_some(),
        decision,
        reason: if decision.is_some() {
            ConsensusReason::ThresholdMet
        } else {
            ConsensusReason::ThresholdNotMet
        },
        tally,
    }
}

/// A validated voting policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPolicy {
    required_votes: usize,
    threshold: f64,
}

impl ConsensusPolicy {
    /// Creates a policy.
    ///
    /// # Errors
    ///
    /// `InvalidThreshold` if `threshold` is outside [0, 1] or NaN;
    /// `InvalidPolicy` if `required_votes` is zero.
    pub fn new(required_votes: usize, threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(CouncilError::InvalidThreshold(threshold));
        }
        if required_votes == 0 {
            return Err(CouncilError::InvalidPolicy(
                "required votes must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            required_votes,
            threshold,
        })
    }

    /// Evaluates votes under this policy.
    pub fn evaluate(&self, votes: &[AgentVote]) -> ConsensusVerdict {
        evaluate(votes, self.required_votes, self.threshold)
    }

    /// Required vote count.
    pub fn required_votes(&self) -> usize {
        self.required_votes
    }

    /// Consensus threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Default for ConsensusPolicy {
    /// Three votes at a 0.66 threshold.
    fn default() -> Self {
        Self {
            required_votes: 3,
            threshold: 0.66,
        }
    }
}
