//! Adaptive routing between the fast lane and the deliberation lane.
//!
//! The router consults an externally supplied impact score. Requests at or
//! above the threshold are enqueued for deliberation; the rest are resolved
//! immediately and not tracked further.
//!
//! Routing counters are exposed for observability only. Any behaviour that
//! learns from them belongs in a custom [`LaneStrategy`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::deliberation::DeliberationQueue;
use crate::request::GovernanceRequest;
use crate::Result;

/// Default impact threshold.
pub const DEFAULT_IMPACT_THRESHOLD: f64 = 0.8;

/// Context key recording why deliberation was forced.
pub const FORCED_REASON_KEY: &str = "forced_deliberation_reason";

/// Processing lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Resolved immediately.
    Fast,
    /// Multi-agent vote required.
    Deliberation,
}

/// Chooses a lane for a scored request.
pub trait LaneStrategy: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &str;

    /// Picks a lane. `impact_score` and `threshold` are both within [0, 1].
    fn choose(&self, request: &GovernanceRequest, impact_score: f64, threshold: f64) -> Lane;
}

/// `impact_score >= threshold` goes to deliberation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdStrategy;

impl LaneStrategy for ThresholdStrategy {
    fn name(&self) -> &str {
        "threshold"
    }

    fn choose(&self, _request: &GovernanceRequest, impact_score: f64, threshold: f64) -> Lane {
        if impact_score >= threshold {
            Lane::Deliberation
        } else {
            Lane::Fast
        }
    }
}

/// Where a request was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub request_id: String,
    pub lane: Lane,
    /// Deliberation item id for the deliberation lane.
    pub item_id: Option<String>,
    pub impact_score: f64,
    pub threshold: f64,
}

/// Snapshot of routing counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutingStats {
    pub total_routed: u64,
    pub fast_lane: u64,
    pub deliberation: u64,
    pub threshold: f64,
}

impl RoutingStats {
    /// Fraction of routed requests sent to deliberation.
    pub fn deliberation_rate(&self) -> f64 {
        if self.total_routed == 0 {
            0.0
        } else {
            self.deliberation as f64 / self.total_routed as f64
        }
    }
}

/// Routes scored requests to a lane.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use gavel_council::{AdaptiveRouter, DeliberationQueue, GovernanceRequest, Lane};
/// use gavel_store::SledStore;
///
/// # tokio_test_block(async {
/// let queue = Arc::new(DeliberationQueue::new(Arc::new(SledStore::temporary().unwrap())));
/// let router = AdaptiveRouter::new(queue);
///
/// let decision = router
///     .route(GovernanceRequest::new("r1", "rename dashboard"), 0.1)
///     .await
///     .unwrap();
/// assert_eq!(decision.lane, Lane::Fast);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
pub struct AdaptiveRouter {
    queue: Arc<DeliberationQueue>,
    strategy: Box<dyn LaneStrategy>,
    threshold_bits: AtomicU64,
    total: AtomicU64,
    fast: AtomicU64,
    deliberation: AtomicU64,
}

impl AdaptiveRouter {
    /// Creates a router using [`ThresholdStrategy`] and the default threshold.
    pub fn new(queue: Arc<DeliberationQueue>) -> Self {
        Self::with_strategy(queue, Box::new(ThresholdStrategy), DEFAULT_IMPACT_THRESHOLD)
    }

    /// Creates a router with a custom strategy and initial threshold.
    pub fn with_strategy(
        queue: Arc<DeliberationQueue>,
        strategy: Box<dyn LaneStrategy>,
        threshold: f64,
    ) -> Self {
        let router = Self {
            queue,
            strategy,
            threshold_bits: AtomicU64::new(DEFAULT_IMPACT_THRESHOLD.to_bits()),
            total: AtomicU64::new(0),
            fast: AtomicU64::new(0),
            deliberation: AtomicU64::new(0),
        };
        router.set_threshold(threshold);
        router
    }

    /// Routes a request by its impact score.
    ///
    /// Scores are clamped into [0, 1]; a NaN score is treated as maximal
    /// impact. Counters only move once the request has been placed.
    pub async fn route(&self, request: GovernanceRequest, impact_score: f64) -> Result<RouteDecision> {
        let impact_score = if impact_score.is_nan() {
            1.0
        } else {
            impact_score.clamp(0.0, 1.0)
        };
        let threshold = self.threshold();
        let lane = self.strategy.choose(&request, impact_score, threshold);

        let request_id = request.id.clone();
        let item_id = match lane {
            Lane::Fast => {
                self.fast.fetch_add(1, Ordering::Relaxed);
                debug!(request_id = %request_id, impact_score, threshold, "fast lane");
                None
            }
            Lane::Deliberation => {
                let item_id = self.queue.enqueue_default(request).await?;
                self.deliberation.fetch_add(1, Ordering::Relaxed);
                info!(
                    request_id = %request_id,
                    item_id = %item_id,
                    impact_score,
                    threshold,
                    strategy = self.strategy.name(),
                    "deliberation lane"
                );
                Some(item_id)
            }
        };
        self.total.fetch_add(1, Ordering::Relaxed);

        Ok(RouteDecision {
            request_id,
            lane,
            item_id,
            impact_score,
            threshold,
        })
    }

    /// Sends a request to deliberation regardless of its score.
    pub async fn force_deliberation(
        &self,
        mut request: GovernanceRequest,
        reason: &str,
    ) -> Result<RouteDecision> {
        request
            .context
            .insert(FORCED_REASON_KEY.to_string(), reason.into());
        let request_id = request.id.clone();

        let item_id = self.queue.enqueue_default(request).await?;
        self.deliberation.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        info!(request_id = %request_id, item_id = %item_id, reason, "deliberation forced");

        Ok(RouteDecision {
            request_id,
            lane: Lane::Deliberation,
            item_id: Some(item_id),
            impact_score: 1.0,
            threshold: self.threshold(),
        })
    }

    /// Sets the impact threshold, clamped into [0, 1]. A NaN value is
    /// ignored. Returns the threshold now in effect.
    pub fn set_threshold(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.threshold();
        }
        let clamped = value.clamp(0.0, 1.0);
        self.threshold_bits.store(clamped.to_bits(), Ordering::Relaxed);
        info!(threshold = clamped, "impact threshold updated");
        clamped
    }

    /// Current impact threshold.
    pub fn threshold(&self) -> f64 {
        f64::from_bits(self.threshold_bits.load(Ordering::Relaxed))
    }

    /// Snapshot of the routing counters.
    pub fn stats(&self) -> RoutingStats {
        RoutingStats {
            total_routed: self.total.load(Ordering::Relaxed),
            fast_lane: self.fast.load(Ordering::Relaxed),
            deliberation: self.deliberation.load(Ordering::Relaxed),
            threshold: self.threshold(),
        }
    }

    /// Name of the active lane strategy.
    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }
}

impl std::fmt::Debug for AdaptiveRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveRouter")
            .field("strategy", &self.strategy.name())
            .field("stats", &self.stats())
            .finish()
    }
}
