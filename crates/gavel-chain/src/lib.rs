//! # Gavel Chain
//!
//! Escalating human approval chains.
//!
//! ## Overview
//!
//! High-impact decisions that need human sign-off walk an
//! [`ApprovalChain`]: an ordered list of steps, each owned by a role, with
//! a deadline. The [`ApprovalEngine`] records decisions, advances steps,
//! and escalates a request to its next step when a deadline elapses. A
//! request that runs out of steps or escalation depth ends in
//! `TIMED_OUT`; nothing is left hanging.
//!
//! ## Architecture
//!
//! ```text
//!   NewApproval ──▶ ChainSelector ──▶ ApprovalEngine ──▶ RecordStore
//!                                        │      ▲
//!                                   arm  │      │ deadline
//!                                        ▼      │
//!                                  EscalationScheduler
//!                                        │
//!                                        ▼
//!                                  EventPublisher ──▶ pending / escalated / completed
//! ```
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`ApprovalChain`] | Step definitions, escalation depth, override role |
//! | [`ChainSelector`] | Picks a chain when the caller does not |
//! | [`ApprovalEngine`] | The request state machine |
//! | [`EscalationScheduler`] | Cancellable per-request deadlines |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gavel_chain::{ApprovalEngine, NewApproval};
//! use gavel_council::Decision;
//!
//! let engine = ApprovalEngine::with_defaults(store, publisher)?;
//! let request = engine.create_request(NewApproval::new("d-1", "Ship it")).await?;
//! engine
//!     .approve_or_reject(&request.request_id, "bob", Decision::Approved, None)
//!     .await?;
//! ```

pub mod chain;
pub mod engine;
pub mod error;
pub mod policy;
pub mod request;
pub mod scheduler;

pub use chain::{
    ApprovalChain, ApprovalStep, CRITICAL_CHAIN, MAX_STEP_TIMEOUT_SECS, STANDARD_CHAIN,
};
pub use engine::{ApprovalEngine, CancelOutcome, DecisionOutcome, STORE_RETRY_DELAY};
pub use error::{ChainError, Result};
pub use policy::{ChainSelector, PriorityChainSelector, DEFAULT_SENSITIVITY_KEY};
pub use request::{
    ApprovalRequest, ApprovalStatus, EscalationRecord, NewApproval, RequestHistory, StepDecision,
};
pub use scheduler::EscalationScheduler;
