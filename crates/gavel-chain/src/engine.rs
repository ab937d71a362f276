//! # Approval Chain Engine
//!
//! Walks [`ApprovalRequest`]s through their chain's steps.
//!
//! ## Transition Protocol
//!
//! Every transition on a request follows the same sequence while holding
//! the request's shard lock:
//!
//! 1. load the request from the store (the store is the source of truth)
//! 2. check the status; wrong status or unknown id returns an outcome, not an error
//! 3. mutate the loaded copy
//! 4. persist it; a store failure aborts here with nothing changed
//! 5. arm or disarm the step timer
//! 6. publish the lifecycle event (best-effort, never rolls back)
//!
//! ## Escalation
//!
//! When a step's deadline elapses the scheduler calls back into the
//! engine with the step index and escalation level the timer was armed
//! for. A callback that finds the request resolved, or already moved past
//! that step, is a no-op.
//!
//! | Situation at deadline | Result |
//! |-----------------------|--------|
//! | more steps, depth left, step escalatable | next step, level + 1, `escalated` event |
//! | last step, depth exhausted or step not escalatable | `TIMED_OUT`, `completed` event |
//!
//! A request that cannot be resolved therefore always ends in `TIMED_OUT`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gavel_council::Decision;
use gavel_store::{
    EventKind, EventPublisher, Keyspace, LifecycleEvent, RecordStore, RecordStoreExt,
    ShardedLocks,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chain::{ApprovalChain, ApprovalStep};
use crate::error::{ChainError, Result};
use crate::policy::{ChainSelector, PriorityChainSelector};
use crate::request::{
    ApprovalRequest, ApprovalStatus, EscalationRecord, NewApproval, RequestHistory, StepDecision,
};
use crate::scheduler::EscalationScheduler;

/// Delay before a deadline that hit a store failure is retried.
pub const STORE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Result of an approve or reject decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// Approval stored; the step still needs more.
    Recorded { approvals: u32, required: u32 },
    /// The step completed and the request moved to `step_index`.
    Advanced { step_index: usize },
    /// The final step completed.
    Approved,
    /// The request was rejected.
    Rejected,
    /// This actor already approved the current step.
    AlreadyRecorded,
    NotFound,
    /// The request is no longer pending.
    NotPending { status: ApprovalStatus },
    /// The actor does not hold the chain's override role.
    Unauthorized,
}

impl DecisionOutcome {
    /// Returns true if the decision changed the request.
    pub fn accepted(&self) -> bool {
        matches!(
            self,
            DecisionOutcome::Recorded { .. }
                | DecisionOutcome::Advanced { .. }
                | DecisionOutcome::Approved
                | DecisionOutcome::Rejected
        )
    }
}

/// Result of a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
    NotPending { status: ApprovalStatus },
}

impl CancelOutcome {
    pub fn cancelled(&self) -> bool {
        matches!(self, CancelOutcome::Cancelled)
    }
}

/// What an elapsed step deadline did to its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EscalationOutcome {
    /// Moved to the next step.
    Escalated { step_index: usize, level: u32 },
    /// No escalation left; the request timed out.
    TimedOut,
    NotFound,
    /// The request was not pending.
    Skipped { status: ApprovalStatus },
    /// The request already left the step the deadline was armed for.
    Stale,
}

type TimerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct EngineInner {
    store: Arc<dyn RecordStore>,
    publisher: EventPublisher,
    scheduler: EscalationScheduler,
    locks: ShardedLocks,
    chains: RwLock<HashMap<String, ApprovalChain>>,
    selector: Box<dyn ChainSelector>,
}

/// The approval chain state machine.
///
/// Cheap to clone; clones share state. Must be used from within a tokio
/// runtime since step deadlines run as tokio tasks.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use gavel_chain::{ApprovalEngine, NewApproval};
/// use gavel_council::Decision;
/// use gavel_store::{BroadcastBus, EventPublisher, SledStore};
///
/// # async fn run() -> gavel_chain::Result<()> {
/// let store = Arc::new(SledStore::temporary()?);
/// let publisher = EventPublisher::new(Arc::new(BroadcastBus::new(64)));
/// let engine = ApprovalEngine::with_defaults(store, publisher)?;
///
/// let request = engine
///     .create_request(NewApproval::new("decision-1", "Enable feature flag"))
///     .await?;
/// let outcome = engine
///     .approve_or_reject(&request.request_id, "bob", Decision::Approved, None)
///     .await?;
/// assert!(outcome.accepted());
/// # Ok(())
/// # }
/// ```
///
/// Only an elapsed step deadline escalates a request; callers cannot:
///
/// ```rust,compile_fail
/// # use std::sync::Arc;
/// # use gavel_chain::ApprovalEngine;
/// # use gavel_store::{BroadcastBus, EventPublisher, SledStore};
/// # async fn run() -> gavel_chain::Result<()> {
/// # let store = Arc::new(SledStore::temporary()?);
/// # let publisher = EventPublisher::new(Arc::new(BroadcastBus::new(64)));
/// let engine = ApprovalEngine::with_defaults(store, publisher)?;
/// engine.escalate("req-1").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ApprovalEngine {
    inner: Arc<EngineInner>,
}

impl ApprovalEngine {
    /// Creates an engine with the given chains and selection policy.
    ///
    /// # Errors
    ///
    /// `InvalidChain` if any chain fails validation.
    pub fn new(
        store: Arc<dyn RecordStore>,
        publisher: EventPublisher,
        chains: Vec<ApprovalChain>,
        selector: Box<dyn ChainSelector>,
    ) -> Result<Self> {
        let mut registry = HashMap::new();
        for chain in chains {
            chain.validate()?;
            registry.insert(chain.chain_id.clone(), chain);
        }

        Ok(Self {
            inner: Arc::new(EngineInner {
                store,
                publisher,
                scheduler: EscalationScheduler::new(),
                locks: ShardedLocks::default(),
                chains: RwLock::new(registry),
                selector,
            }),
        })
    }

    /// Creates an engine with the `standard` and `critical` presets and
    /// the priority-based selector.
    pub fn with_defaults(store: Arc<dyn RecordStore>, publisher: EventPublisher) -> Result<Self> {
        Self::new(
            store,
            publisher,
            vec![ApprovalChain::standard(), ApprovalChain::critical()],
            Box::new(PriorityChainSelector::default()),
        )
    }

    /// Validates and registers a chain, replacing any chain with the same id.
    pub fn register_chain(&self, chain: ApprovalChain) -> Result<()> {
        chain.validate()?;
        info!(chain_id = %chain.chain_id, steps = chain.steps.len(), "approval chain registered");
        self.inner
            .write_chains()
            .insert(chain.chain_id.clone(), chain);
        Ok(())
    }

    /// Returns a registered chain.
    pub fn chain(&self, chain_id: &str) -> Option<ApprovalChain> {
        self.inner.chain(chain_id)
    }

    /// Ids of all registered chains, sorted.
    pub fn chain_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read_chains().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the chain `create_request` would open `draft` on: its
    /// explicit chain, or the selector's pick.
    ///
    /// # Errors
    ///
    /// `NoChainSelected` / `UnknownChain` if no usable chain applies.
    pub fn resolve_chain(&self, draft: &NewApproval) -> Result<ApprovalChain> {
        let chain_id = match draft.chain_id.clone() {
            Some(chain_id) => chain_id,
            None => self
                .inner
                .selector
                .select(draft.priority, &draft.context)
                .ok_or_else(|| ChainError::NoChainSelected(draft.decision_ref.clone()))?,
        };
        self.inner
            .chain(&chain_id)
            .ok_or(ChainError::UnknownChain(chain_id))
    }

    /// Opens an approval request at step 0 and arms its deadline.
    ///
    /// # Errors
    ///
    /// `NoChainSelected` / `UnknownChain` if no usable chain applies,
    /// `Store` if the request could not be persisted.
    pub async fn create_request(&self, draft: NewApproval) -> Result<ApprovalRequest> {
        let inner = &self.inner;
        let chain = self.resolve_chain(&draft)?;
        let first = step_at(&chain, 0)?;

        let now = Utc::now();
        let request = ApprovalRequest {
            request_id: Uuid::new_v4().to_string(),
            chain_id: chain.chain_id.clone(),
            decision_ref: draft.decision_ref,
            tenant: draft.tenant,
            requester: draft.requester,
            title: draft.title,
            description: draft.description,
            priority: draft.priority,
            context: draft.context,
            status: ApprovalStatus::Pending,
            current_step: 0,
            decisions: Vec::new(),
            created_at: now,
            updated_at: now,
            expires_at: Some(deadline_after(now, first.timeout())),
            escalation_level: 0,
            escalations: Vec::new(),
            cancelled_by: None,
        };

        let _guard = inner.locks.lock(&request.request_id).await;
        inner.persist(&request)?;
        inner.arm(&request.request_id, 0, 0, first.timeout());
        inner.emit(EventKind::Pending, &request, request.status);

        info!(
            request_id = %request.request_id,
            chain_id = %request.chain_id,
            decision_ref = %request.decision_ref,
            tenant = %request.tenant,
            "approval request created"
        );
        Ok(request)
    }

    /// Records a human decision on the current step.
    ///
    /// A rejection ends the request at once. An approval completes the
    /// step once enough distinct actors approved it, then either advances
    /// or, at the final step, approves the request.
    pub async fn approve_or_reject(
        &self,
        request_id: &str,
        actor_id: &str,
        decision: Decision,
        rationale: Option<&str>,
    ) -> Result<DecisionOutcome> {
        let inner = &self.inner;
        let _guard = inner.locks.lock(request_id).await;

        let mut request = match inner.load(request_id)? {
            Some(request) => request,
            None => {
                debug!(request_id, actor_id, "decision for unknown request");
                return Ok(DecisionOutcome::NotFound);
            }
        };
        if request.status != ApprovalStatus::Pending {
            debug!(request_id, actor_id, status = request.status.as_str(), "decision for closed request");
            return Ok(DecisionOutcome::NotPending {
                status: request.status,
            });
        }

        let chain = inner.chain_of(&request)?;
        let step_index = request.current_step;
        let step = step_at(&chain, step_index)?;
        let now = Utc::now();

        if decision == Decision::Approved && request.has_approved(step_index, actor_id) {
            return Ok(DecisionOutcome::AlreadyRecorded);
        }

        request.decisions.push(StepDecision {
            step_index,
            step_id: step.step_id.clone(),
            actor_id: actor_id.to_string(),
            decision,
            rationale: rationale.map(str::to_string),
            timestamp: now,
            emergency_override: false,
        });
        request.updated_at = now;

        if decision == Decision::Rejected {
            request.status = ApprovalStatus::Rejected;
            request.expires_at = None;
            inner.persist(&request)?;
            inner.scheduler.cancel(request_id);
            inner.emit(EventKind::Completed, &request, request.status);
            info!(request_id, actor_id, step = %step.step_id, "approval request rejected");
            return Ok(DecisionOutcome::Rejected);
        }

        let approvals = request.approvals_for_step(step_index);
        if approvals < step.required_approvals {
            inner.persist(&request)?;
            debug!(request_id, actor_id, approvals, required = step.required_approvals, "approval recorded");
            return Ok(DecisionOutcome::Recorded {
                approvals,
                required: step.required_approvals,
            });
        }

        if step_index >= chain.last_step_index() {
            request.status = ApprovalStatus::Approved;
            request.expires_at = None;
            inner.persist(&request)?;
            inner.scheduler.cancel(request_id);
            inner.emit(EventKind::Completed, &request, request.status);
            info!(request_id, actor_id, "approval request approved");
            return Ok(DecisionOutcome::Approved);
        }

        let next_index = step_index + 1;
        let next = step_at(&chain, next_index)?;
        request.current_step = next_index;
        request.expires_at = Some(deadline_after(now, next.timeout()));
        inner.persist(&request)?;
        inner.arm(request_id, next_index, request.escalation_level, next.timeout());
        inner.emit(EventKind::Pending, &request, request.status);
        info!(request_id, from = %step.step_id, to = %next.step_id, "approval step completed");
        Ok(DecisionOutcome::Advanced {
            step_index: next_index,
        })
    }

    /// Resolves a request from any step on behalf of the chain's
    /// emergency override role.
    ///
    /// Returns `Unauthorized` unless `actor_roles` holds that role.
    pub async fn emergency_override(
        &self,
        request_id: &str,
        actor_id: &str,
        actor_roles: &[String],
        decision: Decision,
        rationale: Option<&str>,
    ) -> Result<DecisionOutcome> {
        let inner = &self.inner;
        let _guard = inner.locks.lock(request_id).await;

        let mut request = match inner.load(request_id)? {
            Some(request) => request,
            None => return Ok(DecisionOutcome::NotFound),
        };
        if request.status != ApprovalStatus::Pending {
            return Ok(DecisionOutcome::NotPending {
                status: request.status,
            });
        }

        let chain = inner.chain_of(&request)?;
        if !chain.allows_override(actor_roles) {
            warn!(request_id, actor_id, chain_id = %chain.chain_id, "override refused");
            return Ok(DecisionOutcome::Unauthorized);
        }

        let step_index = request.current_step;
        let step = step_at(&chain, step_index)?;
        let now = Utc::now();
        request.decisions.push(StepDecision {
            step_index,
            step_id: step.step_id.clone(),
            actor_id: actor_id.to_string(),
            decision,
            rationale: rationale.map(str::to_string),
            timestamp: now,
            emergency_override: true,
        });
        request.status = match decision {
            Decision::Approved => ApprovalStatus::Approved,
            Decision::Rejected => ApprovalStatus::Rejected,
        };
        request.expires_at = None;
        request.updated_at = now;

        inner.persist(&request)?;
        inner.scheduler.cancel(request_id);
        inner.emit(EventKind::Completed, &request, request.status);

        warn!(
            request_id,
            actor_id,
            step = %step.step_id,
            status = request.status.as_str(),
            "approval request resolved by emergency override"
        );
        Ok(match decision {
            Decision::Approved => DecisionOutcome::Approved,
            Decision::Rejected => DecisionOutcome::Rejected,
        })
    }

    /// Cancels a pending request and disarms its deadline.
    pub async fn cancel(&self, request_id: &str, actor_id: &str) -> Result<CancelOutcome> {
        let inner = &self.inner;
        let _guard = inner.locks.lock(request_id).await;

        let mut request = match inner.load(request_id)? {
            Some(request) => request,
            None => return Ok(CancelOutcome::NotFound),
        };
        if request.status != ApprovalStatus::Pending {
            return Ok(CancelOutcome::NotPending {
                status: request.status,
            });
        }

        request.status = ApprovalStatus::Cancelled;
        request.cancelled_by = Some(actor_id.to_string());
        request.expires_at = None;
        request.updated_at = Utc::now();

        inner.persist(&request)?;
        inner.scheduler.cancel(request_id);
        inner.emit(EventKind::Completed, &request, request.status);
        info!(request_id, actor_id, "approval request cancelled");
        Ok(CancelOutcome::Cancelled)
    }

    /// Returns the current state of a request.
    pub async fn get_status(&self, request_id: &str) -> Result<Option<ApprovalRequest>> {
        self.inner.load(request_id)
    }

    /// Returns the decisions and escalations of a request.
    pub async fn get_history(&self, request_id: &str) -> Result<Option<RequestHistory>> {
        Ok(self.inner.load(request_id)?.map(|request| request.history()))
    }

    /// Pending requests whose current step needs `role`.
    pub async fn pending_for_role(&self, role: &str) -> Result<Vec<ApprovalRequest>> {
        let mut inbox = Vec::new();
        for request in self.inner.scan()? {
            if request.status != ApprovalStatus::Pending {
                continue;
            }
            let Some(chain) = self.inner.chain(&request.chain_id) else {
                continue;
            };
            if chain
                .step(request.current_step)
                .map(|step| step.required_role == role)
                .unwrap_or(false)
            {
                inbox.push(request);
            }
        }
        inbox.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(inbox)
    }

    /// Re-arms deadlines for every pending request in the store.
    ///
    /// Call once at startup. Requests already past their deadline escalate
    /// immediately. Returns the number of timers armed.
    pub async fn recover(&self) -> Result<usize> {
        let inner = &self.inner;
        let pending: Vec<String> = inner
            .scan()?
            .into_iter()
            .filter(|request| request.status == ApprovalStatus::Pending)
            .map(|request| request.request_id)
            .collect();

        let now = Utc::now();
        let mut armed = 0;
        for request_id in pending {
            let _guard = inner.locks.lock(&request_id).await;
            let request = match inner.load(&request_id)? {
                Some(request) if request.status == ApprovalStatus::Pending => request,
                _ => continue,
            };
            let delay = match request.expires_at {
                Some(expires_at) => (expires_at - now).to_std().unwrap_or(Duration::ZERO),
                None => match inner.chain(&request.chain_id) {
                    Some(chain) => step_at(&chain, request.current_step)?.timeout(),
                    None => {
                        warn!(request_id = %request_id, chain_id = %request.chain_id, "pending request has no registered chain");
                        continue;
                    }
                },
            };
            inner.arm(
                &request_id,
                request.current_step,
                request.escalation_level,
                delay,
            );
            armed += 1;
        }

        info!(armed, "approval timers recovered");
        Ok(armed)
    }

    /// Returns true if a deadline is armed for the request.
    pub fn has_timer(&self, request_id: &str) -> bool {
        self.inner.scheduler.is_scheduled(request_id)
    }

    /// Number of armed deadlines.
    pub fn armed_timers(&self) -> usize {
        self.inner.scheduler.len()
    }

    /// Disarms every deadline. Pending requests stay pending in the store
    /// and are picked up again by [`recover`](Self::recover).
    pub fn shutdown(&self) {
        self.inner.scheduler.shutdown();
    }
}

impl std::fmt::Debug for ApprovalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalEngine")
            .field("chains", &self.chain_ids())
            .field("scheduler", &self.inner.scheduler)
            .finish()
    }
}

impl EngineInner {
    fn read_chains(&self) -> RwLockReadGuard<'_, HashMap<String, ApprovalChain>> {
        self.chains.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_chains(&self) -> RwLockWriteGuard<'_, HashMap<String, ApprovalChain>> {
        self.chains.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn chain(&self, chain_id: &str) -> Option<ApprovalChain> {
        self.read_chains().get(chain_id).cloned()
    }

    fn chain_of(&self, request: &ApprovalRequest) -> Result<ApprovalChain> {
        self.chain(&request.chain_id)
            .ok_or_else(|| ChainError::UnknownChain(request.chain_id.clone()))
    }

    fn load(&self, request_id: &str) -> Result<Option<ApprovalRequest>> {
        Ok(self.store.get_json(Keyspace::Approvals, request_id)?)
    }

    fn scan(&self) -> Result<Vec<ApprovalRequest>> {
        Ok(self
            .store
            .scan_json::<ApprovalRequest>(Keyspace::Approvals, "")?
            .into_iter()
            .map(|(_, request)| request)
            .collect())
    }

    fn persist(&self, request: &ApprovalRequest) -> Result<()> {
        let written = self
            .store
            .put_json(Keyspace::Approvals, &request.request_id, request)
            .and_then(|()| self.store.sync());
        if let Err(err) = written {
            error!(request_id = %request.request_id, error = %err, "failed to persist approval request");
            return Err(err.into());
        }
        Ok(())
    }

    fn emit(&self, kind: EventKind, request: &ApprovalRequest, status: ApprovalStatus) {
        self.publisher.publish(LifecycleEvent {
            kind,
            request_id: request.request_id.clone(),
            subject_id: request.chain_id.clone(),
            status: status.as_str().to_string(),
            tenant: request.tenant.clone(),
            step_index: request.current_step,
            escalation_level: request.escalation_level,
            timestamp: request.updated_at,
        });
    }

    /// Arms the deadline of `step_index` at `level`.
    fn arm(self: &Arc<Self>, request_id: &str, step_index: usize, level: u32, delay: Duration) {
        let engine = Arc::downgrade(self);
        let id = request_id.to_string();
        self.scheduler.schedule(request_id, delay, move || {
            deadline_elapsed(engine, id, step_index, level)
        });
    }

    /// Escalates a request whose deadline for `(step_index, level)`
    /// elapsed. Only step timers call this.
    async fn escalate_due(
        self: &Arc<Self>,
        request_id: &str,
        step_index: usize,
        level: u32,
    ) -> Result<EscalationOutcome> {
        let _guard = self.locks.lock(request_id).await;

        let mut request = match self.load(request_id)? {
            Some(request) => request,
            None => return Ok(EscalationOutcome::NotFound),
        };
        if request.status != ApprovalStatus::Pending {
            debug!(request_id, status = request.status.as_str(), "escalation skipped");
            return Ok(EscalationOutcome::Skipped {
                status: request.status,
            });
        }
        if request.current_step != step_index || request.escalation_level != level {
            debug!(request_id, step_index, level, "stale deadline ignored");
            return Ok(EscalationOutcome::Stale);
        }

        let chain = self.chain_of(&request)?;
        let from = request.current_step;
        let step = step_at(&chain, from)?;
        let now = Utc::now();
        request.updated_at = now;

        let can_advance = from < chain.last_step_index()
            && request.escalation_level < chain.max_escalation_depth
            && step.can_escalate;

        if !can_advance {
            request.escalations.push(EscalationRecord {
                timestamp: now,
                from_step: from,
                to_step: None,
                reason: format!("step '{}' deadline elapsed with no escalation left", step.step_id),
                level: request.escalation_level,
            });
            request.status = ApprovalStatus::TimedOut;
            request.expires_at = None;

            self.persist(&request)?;
            self.scheduler.cancel(request_id);
            self.emit(EventKind::Completed, &request, request.status);
            warn!(request_id, step = %step.step_id, "approval request timed out");
            return Ok(EscalationOutcome::TimedOut);
        }

        let to = from + 1;
        let next = step_at(&chain, to)?;
        let level = request.escalation_level + 1;
        request.escalations.push(EscalationRecord {
            timestamp: now,
            from_step: from,
            to_step: Some(to),
            reason: format!("step '{}' deadline elapsed", step.step_id),
            level,
        });
        request.escalation_level = level;
        // ESCALATED is transient; the next step starts at once
        request.current_step = to;
        request.status = ApprovalStatus::Pending;
        request.expires_at = Some(deadline_after(now, next.timeout()));

        self.persist(&request)?;
        self.arm(request_id, to, level, next.timeout());
        self.emit(EventKind::Escalated, &request, ApprovalStatus::Escalated);

        info!(
            request_id,
            from = %step.step_id,
            to = %next.step_id,
            level,
            notify = step.escalate_to.as_deref().unwrap_or(next.required_role.as_str()),
            "approval request escalated"
        );
        Ok(EscalationOutcome::Escalated {
            step_index: to,
            level,
        })
    }
}

/// Timer callback for a step deadline.
///
/// Returns a boxed future so the timer type does not depend on the
/// engine's own async state machines.
fn deadline_elapsed(
    engine: Weak<EngineInner>,
    request_id: String,
    step_index: usize,
    level: u32,
) -> TimerFuture {
    Box::pin(async move {
        let Some(engine) = engine.upgrade() else {
            return;
        };
        match engine.escalate_due(&request_id, step_index, level).await {
            Ok(EscalationOutcome::Escalated {
                step_index: to_step,
                level: to_level,
            }) => {
                debug!(request_id = %request_id, to_step, to_level, "deadline moved request on");
            }
            Ok(EscalationOutcome::Skipped { status }) => {
                debug!(request_id = %request_id, status = status.as_str(), "deadline after resolution");
            }
            Ok(outcome) => debug!(request_id = %request_id, ?outcome, "deadline handled"),
            Err(err) if err.is_retryable() => {
                warn!(request_id = %request_id, error = %err, "deadline handling failed, retrying");
                let _guard = engine.locks.lock(&request_id).await;
                // a decision may have armed a newer deadline meanwhile
                if !engine.scheduler.is_scheduled(&request_id) {
                    engine.arm(&request_id, step_index, level, STORE_RETRY_DELAY);
                }
            }
            Err(err) => {
                error!(request_id = %request_id, error = %err, "deadline handling failed");
            }
        }
    })
}

fn step_at(chain: &ApprovalChain, index: usize) -> Result<ApprovalStep> {
    chain.step(index).cloned().ok_or_else(|| ChainError::InvalidChain {
        chain_id: chain.chain_id.clone(),
        reason: format!("no step at index {}", index),
    })
}

/// Saturates at the latest representable instant.
fn deadline_after(now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
