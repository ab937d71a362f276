//! Approval request model.
//!
//! An [`ApprovalRequest`] is one walk of a chain for one decision. It is
//! owned by the engine for its whole life and persisted after every
//! mutation.
//!
//! ## State Machine
//!
//! ```text
//!              approve (step met, more steps)
//!             ┌──────────────┐
//!             ▼              │
//!   ──▶ PENDING ─────────────┘
//!        │  │  │  └── deadline ──▶ ESCALATED ──▶ PENDING (next step)
//!        │  │  └───── deadline at last step / max depth ──▶ TIMED_OUT
//!        │  └──────── reject ──▶ REJECTED
//!        ├─────────── approve (final step met) ──▶ APPROVED
//!        └─────────── cancel ──▶ CANCELLED
//! ```
//!
//! Terminal statuses are write-once.

use chrono::{DateTime, Utc};
use gavel_council::{Decision, Priority};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    /// Transient: the request is moving to its next step.
    Escalated,
    TimedOut,
    Cancelled,
}

impl ApprovalStatus {
    /// Returns true for write-once statuses.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApprovalStatus::Approved
                | ApprovalStatus::Rejected
                | ApprovalStatus::TimedOut
                | ApprovalStatus::Cancelled
        )
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Escalated => "escalated",
            ApprovalStatus::TimedOut => "timed_out",
            ApprovalStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A human decision recorded against a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDecision {
    pub step_index: usize,
    pub step_id: String,
    pub actor_id: String,
    pub decision: Decision,
    #[serde(default)]
    pub rationale: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Made through the chain's emergency override role.
    #[serde(default)]
    pub emergency_override: bool,
}

/// One entry of the escalation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub timestamp: DateTime<Utc>,
    pub from_step: usize,
    /// `None` when the escalation ended the request.
    pub to_step: Option<usize>,
    pub reason: String,
    /// Escalation level after this entry.
    pub level: u32,
}

/// One walk of an approval chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: String,
    pub chain_id: String,
    /// The decision under approval.
    pub decision_ref: String,
    pub tenant: String,
    pub requester: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    #[serde(default)]
    pub context: Map<String, Value>,
    pub status: ApprovalStatus,
    pub current_step: usize,
    #[serde(default)]
    pub decisions: Vec<StepDecision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Deadline of the current step while pending.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub escalation_level: u32,
    #[serde(default)]
    pub escalations: Vec<EscalationRecord>,
    #[serde(default)]
    pub cancelled_by: Option<String>,
}

impl ApprovalRequest {
    /// Returns true if the request can no longer change.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Distinct actors who approved `step_index`.
    pub fn approvals_for_step(&self, step_index: usize) -> u32 {
        let mut actors: Vec<&str> = self
            .decisions
            .iter()
            .filter(|d| d.step_index == step_index && d.decision == Decision::Approved)
            .map(|d| d.actor_id.as_str())
            .collect();
        actors.sort_unstable();
        actors.dedup();
        actors.len() as u32
    }

    /// Returns true if `actor_id` already approved `step_index`.
    pub fn has_approved(&self, step_index: usize, actor_id: &str) -> bool {
        self.decisions.iter().any(|d| {
            d.step_index == step_index
                && d.actor_id == actor_id
                && d.decision == Decision::Approved
        })
    }

    /// Read-only history view.
    pub fn history(&self) -> RequestHistory {
        RequestHistory {
            request_id: self.request_id.clone(),
            chain_id: self.chain_id.clone(),
            status: self.status,
            current_step: self.current_step,
            escalation_level: self.escalation_level,
            decisions: self.decisions.clone(),
            escalations: self.escalations.clone(),
        }
    }
}

/// Decisions and escalations of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHistory {
    pub request_id: String,
    pub chain_id: String,
    pub status: ApprovalStatus,
    pub current_step: usize,
    pub escalation_level: u32,
    pub decisions: Vec<StepDecision>,
    pub escalations: Vec<EscalationRecord>,
}

/// Parameters for opening an approval request.
///
/// # Example
///
/// ```rust
/// use gavel_chain::NewApproval;
/// use gavel_council::Priority;
///
/// let draft = NewApproval::new("decision-17", "Raise API rate limits")
///     .with_tenant("acme")
///     .with_requester("alice")
///     .with_priority(Priority::High)
///     .with_chain("standard");
/// assert_eq!(draft.chain_id.as_deref(), Some("standard"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewApproval {
    pub decision_ref: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub requester: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Explicit chain; when absent the engine's selector decides.
    #[serde(default)]
    pub chain_id: Option<String>,
}

impl NewApproval {
    pub fn new(decision_ref: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            decision_ref: decision_ref.into(),
            title: title.into(),
            description: String::new(),
            tenant: String::new(),
            requester: String::new(),
            priority: Priority::Standard,
            context: Map::new(),
            chain_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = requester.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_chain(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = Some(chain_id.into());
        self
    }
}
