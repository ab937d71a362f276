//! # Gavel Council
//!
//! Multi-agent deliberation for governance requests.
//!
//! ## Overview
//!
//! Requests arrive with an impact score produced elsewhere. The
//! [`AdaptiveRouter`] resolves low-impact requests on the fast lane and
//! sends the rest to the [`DeliberationQueue`], where agents vote until the
//! consensus evaluator reaches a verdict or the voting deadline passes.
//!
//! ## Architecture
//!
//! ```text
//!   request + impact score
//!            │
//!            ▼
//!   ┌─────────────────┐   score < threshold   ┌───────────┐
//!   │ AdaptiveRouter  │──────────────────────▶│ fast lane │
//!   └────────┬────────┘                       └───────────┘
//!            │ score >= threshold
//!            ▼
//!   ┌─────────────────┐  votes  ┌─────────────────────┐
//!   │DeliberationQueue│────────▶│ consensus::evaluate │
//!   └─────────────────┘         └─────────────────────┘
//! ```
//!
//! ## Consensus Rules
//!
//! - A verdict needs at least `required_votes` votes
//! - Abstentions dilute both ratios
//! - Approval is checked before rejection; neither meeting the threshold
//!   leaves the item open
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gavel_council::{AdaptiveRouter, DeliberationQueue, GovernanceRequest, Vote};
//!
//! let queue = Arc::new(DeliberationQueue::new(store));
//! let router = AdaptiveRouter::new(Arc::clone(&queue));
//!
//! let decision = router.route(request, 0.92).await?;
//! if let Some(item_id) = decision.item_id {
//!     queue.submit_vote(&item_id, "agent-7", Vote::Approve, "low risk", 0.8).await?;
//! }
//! ```

pub mod consensus;
pub mod deliberation;
pub mod error;
pub mod request;
pub mod router;

pub use consensus::{
    evaluate, AgentVote, ConsensusPolicy, ConsensusReason, ConsensusVerdict, Decision, Vote,
    VoteTally,
};
pub use deliberation::{
    DeliberationConfig, DeliberationItem, DeliberationQueue, FinalizeOutcome, ItemStatus,
    VoteOutcome, MAX_VOTING_TIMEOUT,
};
pub use error::CouncilError;
pub use request::{GovernanceRequest, Priority};
pub use router::{
    AdaptiveRouter, Lane, LaneStrategy, RouteDecision, RoutingStats, ThresholdStrategy,
    DEFAULT_IMPACT_THRESHOLD,
};

/// Result type for council operations.
pub type Result<T> = std::result::Result<T, CouncilError>;
