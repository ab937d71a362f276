//! The unified Gavel facade.
//!
//! [`Gavel`] wires the durable store, event bus, deliberation queue,
//! adaptive router and approval engine together from one
//! [`GavelConfig`], and exposes the routing, voting and approval surfaces
//! behind a single handle.

use std::sync::Arc;

use gavel_chain::{
    ApprovalEngine, ApprovalRequest, CancelOutcome, DecisionOutcome, NewApproval,
    PriorityChainSelector, RequestHistory,
};
use gavel_council::{
    AdaptiveRouter, Decision, DeliberationItem, DeliberationQueue, FinalizeOutcome,
    GovernanceRequest, Lane, RouteDecision, RoutingStats, ThresholdStrategy, Vote, VoteOutcome,
};
use gavel_store::{BroadcastBus, EventPublisher, LifecycleEvent, RecordStore, SledStore};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{config::GavelConfig, Result};

/// Context key linking an approval request to its deliberation item.
pub const DELIBERATION_ITEM_KEY: &str = "deliberation_item_id";

/// What happened to a submitted request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    /// Lane the router chose.
    pub route: RouteDecision,
    /// Human approval opened alongside deliberation, if the priority
    /// called for one.
    pub approval: Option<ApprovalRequest>,
}

impl Admission {
    /// Returns true if the request was resolved on the fast lane.
    pub fn is_fast(&self) -> bool {
        self.route.lane == Lane::Fast
    }
}

/// The unified Gavel governance facade.
///
/// # Example
///
/// ```rust,ignore
/// let gavel = Gavel::new(GavelConfig::default()).await?;
///
/// let request = GovernanceRequest::new("req-1", "Delete stale tenants")
///     .with_priority(Priority::High);
/// let admission = gavel.submit(request, 0.93).await?;
///
/// if let Some(approval) = admission.approval {
///     gavel.approve_or_reject(&approval.request_id, "bob", Decision::Approved, None).await?;
/// }
/// ```
pub struct Gavel {
    /// Configuration.
    config: GavelConfig,

    /// Durable store shared by every service.
    store: Arc<SledStore>,

    /// In-process lifecycle event bus.
    bus: BroadcastBus,

    /// Multi-agent voting.
    queue: Arc<DeliberationQueue>,

    /// Fast lane / deliberation routing.
    router: AdaptiveRouter,

    /// Human approval chains.
    approvals: ApprovalEngine,
}

impl Gavel {
    /// Builds every service from `config` and re-arms pending approval
    /// deadlines found in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the configuration is invalid
    /// - the database cannot be opened
    pub async fn new(config: GavelConfig) -> Result<Self> {
        config.validate()?;

        let mut store = match &config.storage.db_path {
            Some(path) => SledStore::open(path)?,
            None => SledStore::temporary()?,
        }
        .with_durable_writes(config.storage.durable_writes);
        if let Some(ttl) = config.storage.record_ttl() {
            store = store.with_ttl(ttl);
        }
        let store = Arc::new(store);
        let records: Arc<dyn RecordStore> = store.clone();

        let bus = BroadcastBus::new(config.events.channel_capacity);
        let publisher =
            EventPublisher::with_policy(Arc::new(bus.clone()), config.events.retry_policy());

        let queue = Arc::new(DeliberationQueue::with_config(
            Arc::clone(&records),
            config.deliberation.queue_config(),
        ));
        let router = AdaptiveRouter::with_strategy(
            Arc::clone(&queue),
            Box::new(ThresholdStrategy),
            config.routing.impact_threshold,
        );

        let selector = PriorityChainSelector::new(
            config.approvals.default_chain.clone(),
            config.approvals.accelerated_chain.clone(),
            config.approvals.sensitivity_key.clone(),
        );
        let approvals = ApprovalEngine::new(
            records,
            publisher,
            config.approvals.chains.clone(),
            Box::new(selector),
        )?;
        let recovered = approvals.recover().await?;

        info!(
            db_path = ?config.storage.db_path,
            impact_threshold = config.routing.impact_threshold,
            chains = config.approvals.chains.len(),
            recovered,
            "Gavel initialized"
        );

        Ok(Self {
            config,
            store,
            bus,
            queue,
            router,
            approvals,
        })
    }

    /// Routes a scored request.
    ///
    /// On the deliberation lane a request at or above the configured
    /// human-review priority also opens an approval request, linked to the
    /// deliberation item through its context. The approval chain is chosen
    /// before routing, so a request no chain accepts fails without
    /// enqueueing anything. A store failure while opening the approval
    /// leaves the deliberation item in place; retry with
    /// [`Gavel::create_approval`].
    pub async fn submit(
        &self,
        request: GovernanceRequest,
        impact_score: f64,
    ) -> Result<Admission> {
        let needs_review = request.priority >= self.config.approvals.human_review_priority;
        let draft = match needs_review.then(|| approval_draft(&request)) {
            Some(draft) => {
                let chain = self.approvals.resolve_chain(&draft)?;
                Some(draft.with_chain(chain.chain_id))
            }
            None => None,
        };

        let route = self.router.route(request, impact_score).await?;

        let approval = match (route.lane, draft) {
            (Lane::Deliberation, Some(mut draft)) => {
                if let Some(item_id) = &route.item_id {
                    draft
                        .context
                        .insert(DELIBERATION_ITEM_KEY.to_string(), item_id.clone().into());
                }
                Some(self.approvals.create_request(draft).await?)
            }
            _ => None,
        };

        debug!(
            request_id = %route.request_id,
            lane = ?route.lane,
            approval = approval.is_some(),
            "request admitted"
        );
        Ok(Admission { route, approval })
    }

    /// Routes a request without opening an approval.
    pub async fn route(
        &self,
        request: GovernanceRequest,
        impact_score: f64,
    ) -> Result<RouteDecision> {
        Ok(self.router.route(request, impact_score).await?)
    }

    /// Sends a request to deliberation regardless of its score.
    pub async fn force_deliberation(
        &self,
        request: GovernanceRequest,
        reason: &str,
    ) -> Result<RouteDecision> {
        Ok(self.router.force_deliberation(request, reason).await?)
    }

    /// Sets the routing threshold; returns the clamped value.
    pub fn set_threshold(&self, value: f64) -> f64 {
        self.router.set_threshold(value)
    }

    /// Routing counters.
    pub fn routing_stats(&self) -> RoutingStats {
        self.router.stats()
    }

    /// Records an agent vote on a deliberation item.
    pub async fn submit_vote(
        &self,
        item_id: &str,
        agent_id: &str,
        vote: Vote,
        reasoning: &str,
        confidence: f64,
    ) -> Result<VoteOutcome> {
        Ok(self
            .queue
            .submit_vote(item_id, agent_id, vote, reasoning, confidence)
            .await?)
    }

    /// Snapshot of a deliberation item.
    pub async fn item_status(&self, item_id: &str) -> Result<Option<DeliberationItem>> {
        Ok(self.queue.get_status(item_id).await?)
    }

    /// Turns a reached consensus into a final status.
    pub async fn finalize_item(&self, item_id: &str) -> Result<FinalizeOutcome> {
        Ok(self.queue.finalize(item_id).await?)
    }

    /// Times out overdue deliberation items.
    pub async fn expire_overdue_items(&self) -> Result<Vec<String>> {
        Ok(self.queue.expire_overdue().await?)
    }

    /// Opens an approval request directly.
    pub async fn create_approval(&self, draft: NewApproval) -> Result<ApprovalRequest> {
        Ok(self.approvals.create_request(draft).await?)
    }

    /// Records a human decision on an approval request.
    pub async fn approve_or_reject(
        &self,
        request_id: &str,
        actor_id: &str,
        decision: Decision,
        rationale: Option<&str>,
    ) -> Result<DecisionOutcome> {
        Ok(self
            .approvals
            .approve_or_reject(request_id, actor_id, decision, rationale)
            .await?)
    }

    /// Resolves an approval request through the chain's override role.
    pub async fn emergency_override(
        &self,
        request_id: &str,
        actor_id: &str,
        actor_roles: &[String],
        decision: Decision,
        rationale: Option<&str>,
    ) -> Result<DecisionOutcome> {
        Ok(self
            .approvals
            .emergency_override(request_id, actor_id, actor_roles, decision, rationale)
            .await?)
    }

    /// Cancels a pending approval request.
    pub async fn cancel(&self, request_id: &str, actor_id: &str) -> Result<CancelOutcome> {
        Ok(self.approvals.cancel(request_id, actor_id).await?)
    }

    /// Current state of an approval request.
    pub async fn approval_status(&self, request_id: &str) -> Result<Option<ApprovalRequest>> {
        Ok(self.approvals.get_status(request_id).await?)
    }

    /// Decisions and escalations of an approval request.
    pub async fn approval_history(&self, request_id: &str) -> Result<Option<RequestHistory>> {
        Ok(self.approvals.get_history(request_id).await?)
    }

    /// Pending approval requests waiting on `role`.
    pub async fn pending_for_role(&self, role: &str) -> Result<Vec<ApprovalRequest>> {
        Ok(self.approvals.pending_for_role(role).await?)
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.bus.subscribe()
    }

    /// Flushes the store to disk. Returns bytes flushed.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.store.flush()?)
    }

    /// Disarms approval deadlines and flushes the store.
    pub fn shutdown(&self) -> Result<()> {
        self.approvals.shutdown();
        self.flush()?;
        info!("Gavel shut down");
        Ok(())
    }

    /// The active configuration.
    pub fn config(&self) -> &GavelConfig {
        &self.config
    }

    /// The approval engine.
    pub fn approvals(&self) -> &ApprovalEngine {
        &self.approvals
    }

    /// The deliberation queue.
    pub fn queue(&self) -> &DeliberationQueue {
        &self.queue
    }

    /// The router.
    pub fn router(&self) -> &AdaptiveRouter {
        &self.router
    }
}

impl std::fmt::Debug for Gavel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gavel")
            .field("db_path", &self.config.storage.db_path)
            .field("threshold", &self.router.threshold())
            .field("approvals", &self.approvals)
            .finish()
    }
}

fn approval_draft(request: &GovernanceRequest) -> NewApproval {
    let mut draft = NewApproval::new(request.id.clone(), request.content.clone())
        .with_description(request.request_type.clone())
        .with_tenant(request.tenant.clone())
        .with_requester(request.requester.clone())
        .with_priority(request.priority);
    draft.context = request.context.clone();
    draft
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_chain::ApprovalStatus;
    use gavel_council::Priority;

    async fn make_gavel() -> Gavel {
        Gavel::new(GavelConfig::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_low_impact_takes_fast_lane() {
        let gavel = make_gavel().await;
        let request = GovernanceRequest::new("r1", "rename a dashboard").with_priority(Priority::High);

        let admission = gavel.submit(request, 0.2).await.unwrap();
        assert!(admission.is_fast());
        assert!(admission.approval.is_none());
        assert_eq!(gavel.routing_stats().fast_lane, 1);
    }

    #[tokio::test]
    async fn test_high_priority_deliberation_opens_approval() {
        let gavel = make_gavel().await;
        let request = GovernanceRequest::new("r2", "widen prod access")
            .with_priority(Priority::High)
            .with_tenant("acme");

        let admission = gavel.submit(request, 0.95).await.unwrap();
        assert_eq!(admission.route.lane, Lane::Deliberation);

        let approval = admission.approval.unwrap();
        assert_eq!(approval.decision_ref, "r2");
        assert_eq!(approval.chain_id, "standard");
        assert_eq!(approval.tenant, "acme");
        assert_eq!(
            approval.context.get(DELIBERATION_ITEM_KEY).and_then(|v| v.as_str()),
            admission.route.item_id.as_deref()
        );
        assert!(gavel.approvals().has_timer(&approval.request_id));
    }

    #[tokio::test]
    async fn test_sensitive_request_pins_accelerated_chain() {
        let gavel = make_gavel().await;
        let request = GovernanceRequest::new("r4", "export customer records")
            .with_priority(Priority::High)
            .with_context("data_sensitivity", "HIGH");

        let admission = gavel.submit(request, 0.95).await.unwrap();
        let approval = admission.approval.unwrap();
        assert_eq!(approval.chain_id, "critical");
        assert_eq!(gavel.routing_stats().deliberation, 1);
    }

    #[tokio::test]
    async fn test_standard_priority_deliberates_without_approval() {
        let gavel = make_gavel().await;
        let admission = gavel
            .submit(GovernanceRequest::new("r3", "tune alert"), 0.9)
            .await
            .unwrap();
        assert_eq!(admission.route.lane, Lane::Deliberation);
        assert!(admission.approval.is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = GavelConfig::default();
        config.deliberation.required_votes = 0;
        assert!(Gavel::new(config).await.is_err());
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let gavel = make_gavel().await;
        let mut events = gavel.subscribe();

        let approval = gavel
            .create_approval(NewApproval::new("d1", "raise quota"))
            .await
            .unwrap();
        gavel.cancel(&approval.request_id, "alice").await.unwrap();

        let pending = events.recv().await.unwrap();
        assert_eq!(pending.request_id, approval.request_id);
        assert_eq!(pending.status, ApprovalStatus::Pending.as_str());
        let completed = events.recv().await.unwrap();
        assert_eq!(completed.status, "cancelled");
    }
}
