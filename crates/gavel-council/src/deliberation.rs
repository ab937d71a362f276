//! # Deliberation Queue
//!
//! Holds governance requests awaiting multi-agent votes. Each item owns at
//! most one vote per agent; a second vote from the same agent replaces the
//! first and the replaced vote is not retained.
//!
//! ## Item Lifecycle
//!
//! ```text
//!   PENDING ──vote──▶ UNDER_REVIEW ◀──vote──▶ CONSENSUS_REACHED
//!      │                   │                        │
//!      │                   │                    finalize
//!      │                   │                        ▼
//!      └──── deadline ─────┴──────▶ TIMED_OUT   APPROVED / REJECTED
//! ```
//!
//! Reaching consensus only marks the item; it does not escalate anything.
//!
//! ## Persistence
//!
//! Items and votes live in the `deliberations` keyspace. A vote is stored
//! at `{item_id}/votes/{agent_id}` and written in the same atomic batch as
//! the item's updated status.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gavel_store::{Keyspace, RecordStore, RecordStoreExt, ShardedLocks, WriteOp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::consensus::{AgentVote, ConsensusPolicy, ConsensusVerdict, Decision, Vote};
use crate::error::CouncilError;
use crate::request::GovernanceRequest;
use crate::Result;

/// Status of a deliberation item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
    TimedOut,
    ConsensusReached,
}

impl ItemStatus {
    /// Terminal statuses accept no further votes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Approved | ItemStatus::Rejected | ItemStatus::TimedOut
        )
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::UnderReview => "under_review",
            ItemStatus::Approved => "approved",
            ItemStatus::Rejected => "rejected",
            ItemStatus::TimedOut => "timed_out",
            ItemStatus::ConsensusReached => "consensus_reached",
        }
    }
}

/// One request under multi-agent vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliberationItem {
    pub item_id: String,
    pub request: GovernanceRequest,
    pub status: ItemStatus,
    pub required_votes: usize,
    pub threshold: f64,
    /// Current votes, one per agent. Stored as separate records.
    #[serde(default)]
    pub votes: Vec<AgentVote>,
    /// Verdict recorded when consensus was last reached.
    #[serde(default)]
    pub decision: Option<Decision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl DeliberationItem {
    /// Returns the vote currently held for `agent_id`.
    pub fn vote_of(&self, agent_id: &str) -> Option<&AgentVote> {
        self.votes.iter().find(|v| v.agent_id == agent_id)
    }

    /// Returns true once the voting deadline has passed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    fn record_op(&mut self) -> Result<WriteOp> {
        // votes are persisted under their own keys
        let votes = std::mem::take(&mut self.votes);
        let op = WriteOp::put_json(self.item_id.clone(), &*self);
        self.votes = votes;
        Ok(op?)
    }
}

/// Result of a vote submission.
#[derive(Debug, Clone, PartialEq)]
pub enum VoteOutcome {
    /// The vote was stored and consensus re-evaluated.
    Counted {
        status: ItemStatus,
        verdict: ConsensusVerdict,
    },
    /// No such item.
    NotFound,
    /// The item no longer accepts votes.
    Closed { status: ItemStatus },
}

impl VoteOutcome {
    /// Returns true if the vote was stored.
    pub fn accepted(&self) -> bool {
        matches!(self, VoteOutcome::Counted { .. })
    }
}

/// Result of finalizing an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The item moved to a terminal status.
    Finalized { status: ItemStatus },
    /// The item has no consensus to finalize.
    NotReady { status: ItemStatus },
    /// No such item.
    NotFound,
}

/// Default voting parameters for new items.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use gavel_council::DeliberationConfig;
///
/// let config = DeliberationConfig::new()
///     .with_required_votes(5)
///     .with_threshold(0.8)
///     .with_timeout(Duration::from_secs(600));
/// assert_eq!(config.required_votes, 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliberationConfig {
    pub required_votes: usize,
    pub threshold: f64,
    pub timeout: Duration,
}

impl DeliberationConfig {
    /// Three votes, 0.66 threshold, five minute deadline.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            required_votes: 3,
            threshold: 0.66,
            timeout: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub const fn with_required_votes(mut self, required_votes: usize) -> Self {
        self.required_votes = required_votes;
        self
    }

    #[must_use]
    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for DeliberationConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Longest voting window an item may be given: one year.
pub const MAX_VOTING_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 3600);

/// Queue of items awaiting agent votes.
///
/// All state lives in the record store; every operation on an item runs
/// under that item's lock so concurrent votes are applied one at a time.
pub struct DeliberationQueue {
    store: Arc<dyn RecordStore>,
    locks: ShardedLocks,
    defaults: DeliberationConfig,
}

impl DeliberationQueue {
    /// Creates a queue over `store` with default voting parameters.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_config(store, DeliberationConfig::default())
    }

    /// Creates a queue with custom defaults.
    pub fn with_config(store: Arc<dyn RecordStore>, defaults: DeliberationConfig) -> Self {
        Self {
            store,
            locks: ShardedLocks::default(),
            defaults,
        }
    }

    /// Default voting parameters.
    pub fn defaults(&self) -> DeliberationConfig {
        self.defaults
    }

    /// Enqueues a request with the queue's default voting parameters.
    pub async fn enqueue_default(&self, request: GovernanceRequest) -> Result<String> {
        let DeliberationConfig {
            required_votes,
            threshold,
            timeout,
        } = self.defaults;
        self.enqueue(request, required_votes, threshold, timeout).await
    }

    /// Enqueues a request for voting and returns the new item id.
    ///
    /// # Errors
    ///
    /// `InvalidThreshold`/`InvalidPolicy` for an unsatisfiable policy or a
    /// timeout above [`MAX_VOTING_TIMEOUT`], `InvalidRequest` for a request
    /// without an id, `Store` if the item could not be persisted.
    pub async fn enqueue(
        &self,
        request: GovernanceRequest,
        required_votes: usize,
        threshold: f64,
        timeout: Duration,
    ) -> Result<String> {
        let policy = ConsensusPolicy::new(required_votes, threshold)?;
        if request.id.trim().is_empty() {
            return Err(CouncilError::InvalidRequest(
                "request id must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let deadline = voting_deadline(now, timeout).ok_or_else(|| {
            CouncilError::InvalidPolicy(format!(
                "voting timeout {}s exceeds the {}s limit",
                timeout.as_secs(),
                MAX_VOTING_TIMEOUT.as_secs()
            ))
        })?;
        let mut item = DeliberationItem {
            item_id: Uuid::new_v4().to_string(),
            request,
            status: ItemStatus::Pending,
            required_votes: policy.required_votes(),
            threshold: policy.threshold(),
            votes: Vec::new(),
            decision: None,
            created_at: now,
            updated_at: now,
            deadline,
        };

        let _guard = self.locks.lock(&item.item_id).await;
        let op = item.record_op()?;
        self.commit(vec![op])?;

        info!(
            item_id = %item.item_id,
            request_id = %item.request.id,
            required_votes,
            threshold,
            "request enqueued for deliberation"
        );
        Ok(item.item_id)
    }

    /// Records an agent's vote and re-evaluates consensus.
    ///
    /// A repeat vote from the same agent replaces the earlier one.
    pub async fn submit_vote(
        &self,
        item_id: &str,
        agent_id: &str,
        vote: Vote,
        reasoning: &str,
        confidence: f64,
    ) -> Result<VoteOutcome> {
        let _guard = self.locks.lock(item_id).await;

        let mut item = match self.load_item(item_id)? {
            Some(item) => item,
            None => {
                debug!(item_id, agent_id, "vote for unknown item");
                return Ok(VoteOutcome::NotFound);
            }
        };

        if item.status.is_terminal() {
            debug!(item_id, agent_id, status = item.status.as_str(), "vote for closed item");
            return Ok(VoteOutcome::Closed {
                status: item.status,
            });
        }

        let now = Utc::now();
        if item.is_overdue(now) {
            item.status = ItemStatus::TimedOut;
            item.updated_at = now;
            let op = item.record_op()?;
            self.commit(vec![op])?;
            warn!(item_id, agent_id, "vote arrived after deadline, item timed out");
            return Ok(VoteOutcome::Closed {
                status: ItemStatus::TimedOut,
            });
        }

        let ballot = AgentVote::new(agent_id, vote, reasoning, confidence);
        let vote_op = WriteOp::put_json(vote_key(item_id, agent_id), &ballot)?;
        match item.votes.iter_mut().find(|v| v.agent_id == agent_id) {
            Some(existing) => *existing = ballot,
            None => item.votes.push(ballot),
        }

        let verdict = crate::consensus::evaluate(&item.votes, item.required_votes, item.threshold);
        if verdict.reached {
            item.status = ItemStatus::ConsensusReached;
            item.decision = verdict.decision;
        } else {
            item.status = ItemStatus::UnderReview;
            item.decision = None;
        }
        item.updated_at = now;

        let item_op = item.record_op()?;
        self.commit(vec![vote_op, item_op])?;

        if verdict.reached {
            info!(
                item_id,
                decision = ?verdict.decision,
                approvals = verdict.tally.approvals,
                rejections = verdict.tally.rejections,
                "consensus reached"
            );
        } else {
            debug!(item_id, agent_id, reason = ?verdict.reason, "vote counted");
        }

        Ok(VoteOutcome::Counted {
            status: item.status,
            verdict,
        })
    }

    /// Returns a snapshot of an item with its current votes.
    pub async fn get_status(&self, item_id: &str) -> Result<Option<DeliberationItem>> {
        self.load_item(item_id)
    }

    /// Converts a reached consensus into a terminal status.
    pub async fn finalize(&self, item_id: &str) -> Result<FinalizeOutcome> {
        let _guard = self.locks.lock(item_id).await;

        let mut item = match self.load_item(item_id)? {
            Some(item) => item,
            None => return Ok(FinalizeOutcome::NotFound),
        };

        let status = match (item.status, item.decision) {
            (ItemStatus::ConsensusReached, Some(Decision::Approved)) => ItemStatus::Approved,
            (ItemStatus::ConsensusReached, Some(Decision::Rejected)) => ItemStatus::Rejected,
            (status, _) => return Ok(FinalizeOutcome::NotReady { status }),
        };

        item.status = status;
        item.updated_at = Utc::now();
        let op = item.record_op()?;
        self.commit(vec![op])?;

        info!(item_id, status = status.as_str(), "deliberation finalized");
        Ok(FinalizeOutcome::Finalized { status })
    }

    /// Times out every open item past its deadline. Returns their ids.
    pub async fn expire_overdue(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let candidates: Vec<String> = self
            .scan_items()?
            .into_iter()
            .filter(|item| !item.status.is_terminal() && item.is_overdue(now))
            .map(|item| item.item_id)
            .collect();

        let mut expired = Vec::new();
        for item_id in candidates {
            let _guard = self.locks.lock(&item_id).await;
            // re-read under the lock; a vote or finalize may have won the race
            let mut item = match self.load_record(&item_id)? {
                Some(item) if !item.status.is_terminal() && item.is_overdue(now) => item,
                _ => continue,
            };
            item.status = ItemStatus::TimedOut;
            item.updated_at = now;
            let op = item.record_op()?;
            self.commit(vec![op])?;
            info!(item_id = %item_id, "deliberation timed out");
            expired.push(item_id);
        }

        Ok(expired)
    }

    /// Snapshots of every item still accepting votes.
    pub async fn list_open(&self) -> Result<Vec<DeliberationItem>> {
        let mut open = Vec::new();
        for mut item in self.scan_items()? {
            if item.status.is_terminal() {
                continue;
            }
            item.votes = self.load_votes(&item.item_id)?;
            open.push(item);
        }
        Ok(open)
    }

    /// Writes a batch and makes it durable before the caller is answered.
    fn commit(&self, ops: Vec<WriteOp>) -> Result<()> {
        self.store.apply(Keyspace::Deliberations, ops)?;
        self.store.sync()?;
        Ok(())
    }

    fn load_record(&self, item_id: &str) -> Result<Option<DeliberationItem>> {
        Ok(self.store.get_json(Keyspace::Deliberations, item_id)?)
    }

    fn load_item(&self, item_id: &str) -> Result<Option<DeliberationItem>> {
        match self.load_record(item_id)? {
            Some(mut item) => {
                item.votes = self.load_votes(item_id)?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    fn load_votes(&self, item_id: &str) -> Result<Vec<AgentVote>> {
        let prefix = format!("{}/votes/", item_id);
        Ok(self
            .store
            .scan_json::<AgentVote>(Keyspace::Deliberations, &prefix)?
            .into_iter()
            .map(|(_, vote)| vote)
            .collect())
    }

    fn scan_items(&self) -> Result<Vec<DeliberationItem>> {
        let mut items = Vec::new();
        for (key, bytes) in self.store.scan_prefix(Keyspace::Deliberations, "")? {
            if key.contains('/') {
                continue;
            }
            let item: DeliberationItem =
                serde_json::from_slice(&bytes).map_err(gavel_store::StoreError::from)?;
            items.push(item);
        }
        Ok(items)
    }
}

impl std::fmt::Debug for DeliberationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliberationQueue")
            .field("defaults", &self.defaults)
            .finish()
    }
}

fn vote_key(item_id: &str, agent_id: &str) -> String {
    format!("{}/votes/{}", item_id, agent_id)
}

fn voting_deadline(now: DateTime<Utc>, timeout: Duration) -> Option<DateTime<Utc>> {
    if timeout > MAX_VOTING_TIMEOUT {
        return None;
    }
    let delta = chrono::Duration::from_std(timeout).ok()?;
    now.checked_add_signed(delta)
}
