//! # Gavel Core
//!
//! Unified governance facade. Wires the durable store, deliberation
//! council and approval chains into a single [`Gavel`] handle.
//!
//! ## Decision Paths
//!
//! | Impact | Priority | Path |
//! |--------|----------|------|
//! | below threshold | any | fast lane, resolved immediately |
//! | at or above threshold | below human-review priority | multi-agent deliberation |
//! | at or above threshold | at or above human-review priority | deliberation + human approval chain |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          GAVEL CORE                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │                    ┌─────────────────┐                          │
//! │                    │      Gavel      │  ← Unified Facade        │
//! │                    └────────┬────────┘                          │
//! │                             │                                   │
//! │         ┌───────────────────┼───────────────────┐               │
//! │         ▼                   ▼                   ▼               │
//! │  ┌─────────────┐    ┌──────────────┐    ┌──────────────┐        │
//! │  │  Adaptive   │───▶│ Deliberation │    │   Approval   │        │
//! │  │   Router    │    │    Queue     │    │    Engine    │        │
//! │  └─────────────┘    └──────┬───────┘    └──────┬───────┘        │
//! │                            │                   │                │
//! │                            ▼                   ▼                │
//! │                   ┌─────────────────────────────────┐           │
//! │                   │   SledStore  +  EventPublisher  │           │
//! │                   └─────────────────────────────────┘           │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gavel_core::{init_logging, Gavel, GavelConfig};
//!
//! let config = GavelConfig::load("gavel.json")?;
//! init_logging(&config.logging.level);
//!
//! let gavel = Gavel::new(config).await?;
//! let admission = gavel.submit(request, impact_score).await?;
//! ```
//!
//! ## Guarantees
//!
//! - Every transition is persisted before the caller sees its outcome
//! - Unknown ids and closed requests are outcomes, not errors
//! - Event delivery failures never undo a committed transition
//! - An approval request nobody answers ends in `TIMED_OUT`

mod config;
mod error;
mod gavel;
mod logging;

pub use config::{
    ApprovalsConfig, DeliberationSettings, EventsConfig, GavelConfig, LoggingConfig,
    RoutingConfig, StorageConfig,
};
pub use error::GavelError;
pub use gavel::{Admission, Gavel, DELIBERATION_ITEM_KEY};
pub use logging::init_logging;

// Re-export component types for convenience
pub use gavel_chain::{
    ApprovalChain, ApprovalRequest, ApprovalStatus, ApprovalStep, CancelOutcome, DecisionOutcome,
    NewApproval, RequestHistory,
};
pub use gavel_council::{
    Decision, DeliberationItem, FinalizeOutcome, GovernanceRequest, ItemStatus, Lane, Priority,
    RouteDecision, RoutingStats, Vote, VoteOutcome,
};
pub use gavel_store::{EventKind, LifecycleEvent};

/// Core result type for Gavel operations.
pub type Result<T> = std::result::Result<T, GavelError>;
