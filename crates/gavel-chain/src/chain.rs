//! Approval chain definitions.
//!
//! A chain is an ordered list of steps. Each step names the role that must
//! approve it, how many distinct approvals it needs, and how long it may
//! stay open before the request escalates to the next step.

use std::collections::HashSet;
use std::time::Duration;

use gavel_council::Priority;
use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};

/// Id of the built-in default chain.
pub const STANDARD_CHAIN: &str = "standard";

/// Id of the built-in accelerated chain.
pub const CRITICAL_CHAIN: &str = "critical";

/// Longest step timeout a chain may declare: one year.
pub const MAX_STEP_TIMEOUT_SECS: u64 = 365 * 24 * 3600;

/// One step of an approval chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub step_id: String,
    /// Role whose members may approve this step.
    pub required_role: String,
    pub description: String,
    /// Seconds the step may stay open.
    pub timeout_secs: u64,
    /// Distinct approvals needed to complete the step.
    pub required_approvals: u32,
    /// Whether an elapsed deadline moves the request on rather than
    /// timing it out.
    pub can_escalate: bool,
    /// Role notified when the step escalates.
    #[serde(default)]
    pub escalate_to: Option<String>,
}

impl ApprovalStep {
    /// Creates an escalatable single-approval step. A timeout with a
    /// fractional second is rounded up to the next whole second.
    pub fn new(
        step_id: impl Into<String>,
        required_role: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            required_role: required_role.into(),
            description: String::new(),
            timeout_secs: whole_secs(timeout),
            required_approvals: 1,
            can_escalate: true,
            escalate_to: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_required_approvals(mut self, count: u32) -> Self {
        self.required_approvals = count;
        self
    }

    #[must_use]
    pub fn escalating_to(mut self, role: impl Into<String>) -> Self {
        self.can_escalate = true;
        self.escalate_to = Some(role.into());
        self
    }

    #[must_use]
    pub fn without_escalation(mut self) -> Self {
        self.can_escalate = false;
        self.escalate_to = None;
        self
    }

    /// Step timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A named, ordered sequence of approval steps.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use gavel_chain::{ApprovalChain, ApprovalStep};
///
/// let chain = ApprovalChain::new("vendor-onboarding", "Vendor onboarding")
///     .with_step(ApprovalStep::new("procurement", "procurement", Duration::from_secs(3600)))
///     .with_step(ApprovalStep::new("security", "security_officer", Duration::from_secs(7200)))
///     .with_max_escalation_depth(1)
///     .with_override_role("ciso");
///
/// assert!(chain.validate().is_ok());
/// assert_eq!(chain.last_step_index(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalChain {
    pub chain_id: String,
    pub name: String,
    pub steps: Vec<ApprovalStep>,
    pub priority: Priority,
    /// Escalations allowed over the life of one request.
    pub max_escalation_depth: u32,
    /// Role that may resolve any step unilaterally.
    #[serde(default)]
    pub emergency_override_role: Option<String>,
}

impl ApprovalChain {
    /// Creates an empty standard-priority chain.
    pub fn new(chain_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            name: name.into(),
            steps: Vec::new(),
            priority: Priority::Standard,
            max_escalation_depth: 0,
            emergency_override_role: None,
        }
    }

    #[must_use]
    pub fn with_step(mut self, step: ApprovalStep) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_max_escalation_depth(mut self, depth: u32) -> Self {
        self.max_escalation_depth = depth;
        self
    }

    #[must_use]
    pub fn with_override_role(mut self, role: impl Into<String>) -> Self {
        self.emergency_override_role = Some(role.into());
        self
    }

    /// Index of the final step.
    pub fn last_step_index(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    /// Step at `index`.
    pub fn step(&self, index: usize) -> Option<&ApprovalStep> {
        self.steps.get(index)
    }

    /// Returns true if `roles` contains the emergency override role.
    pub fn allows_override(&self, roles: &[String]) -> bool {
        match &self.emergency_override_role {
            Some(role) => roles.iter().any(|r| r == role),
            None => false,
        }
    }

    /// Checks that every request walking this chain can terminate.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| ChainError::InvalidChain {
            chain_id: self.chain_id.clone(),
            reason,
        };

        if self.chain_id.trim().is_empty() {
            return Err(invalid("chain id must not be empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(invalid("chain has no steps".to_string()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_id.as_str()) {
                return Err(invalid(format!("duplicate step id '{}'", step.step_id)));
            }
            if step.required_approvals == 0 {
                return Err(invalid(format!(
                    "step '{}' requires zero approvals",
                    step.step_id
                )));
            }
            if step.timeout_secs == 0 {
                return Err(invalid(format!("step '{}' has no timeout", step.step_id)));
            }
            if step.timeout_secs > MAX_STEP_TIMEOUT_SECS {
                return Err(invalid(format!(
                    "step '{}' timeout of {}s exceeds the {}s limit",
                    step.step_id, step.timeout_secs, MAX_STEP_TIMEOUT_SECS
                )));
            }
        }
        Ok(())
    }

    /// Two-step chain for ordinary requests.
    pub fn standard() -> Self {
        ApprovalChain::new(STANDARD_CHAIN, "Standard approval")
            .with_step(
                ApprovalStep::new("peer_review", "reviewer", Duration::from_secs(24 * 3600))
                    .with_description("Peer review by a qualified reviewer")
                    .escalating_to("manager"),
            )
            .with_step(
                ApprovalStep::new("manager_approval", "manager", Duration::from_secs(48 * 3600))
                    .with_description("Sign-off by the owning manager"),
            )
            .with_max_escalation_depth(1)
            .with_override_role("governance_admin")
    }

    /// Three-step accelerated chain for critical or sensitive requests.
    pub fn critical() -> Self {
        ApprovalChain::new(CRITICAL_CHAIN, "Critical approval")
            .with_priority(Priority::Critical)
            .with_step(
                ApprovalStep::new("on_call", "on_call_lead", Duration::from_secs(15 * 60))
                    .with_description("Immediate review by the on-call lead")
                    .escalating_to("security_officer"),
            )
            .with_step(
                ApprovalStep::new("security", "security_officer", Duration::from_secs(30 * 60))
                    .with_description("Security officer approval")
                    .with_required_approvals(2)
                    .escalating_to("executive"),
            )
            .with_step(
                ApprovalStep::new("executive", "executive", Duration::from_secs(60 * 60))
                    .with_description("Executive sign-off"),
            )
            .with_max_escalation_depth(2)
            .with_override_role("incident_commander")
    }
}

/// Step timeouts are kept in whole seconds; a partial second rounds up.
fn whole_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs();
    if timeout.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(ApprovalChain::standard().validate().is_ok());
        assert!(ApprovalChain::critical().validate().is_ok());
        assert_eq!(ApprovalChain::standard().chain_id, STANDARD_CHAIN);
        assert_eq!(ApprovalChain::critical().priority, Priority::Critical);
    }

    #[test]
    fn test_empty_chain_invalid() {
        let err = ApprovalChain::new("empty", "Empty").validate().unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_duplicate_step_ids_invalid() {
        let chain = ApprovalChain::new("dup", "Dup")
            .with_step(ApprovalStep::new("a", "r", Duration::from_secs(1)))
            .with_step(ApprovalStep::new("a", "r", Duration::from_secs(1)));
        assert!(chain.validate().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_zero_approvals_invalid() {
        let chain = ApprovalChain::new("zero", "Zero").with_step(
            ApprovalStep::new("a", "r", Duration::from_secs(1)).with_required_approvals(0),
        );
        assert!(chain.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_invalid() {
        let chain =
            ApprovalChain::new("t", "T").with_step(ApprovalStep::new("a", "r", Duration::ZERO));
        assert!(chain.validate().is_err());
    }

    #[test]
    fn test_timeout_beyond_limit_invalid() {
        let chain = ApprovalChain::new("t", "T").with_step(ApprovalStep::new(
            "a",
            "r",
            Duration::from_secs(10_000_000_000_000),
        ));
        let err = chain.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds"));

        let at_limit = ApprovalChain::new("t", "T").with_step(ApprovalStep::new(
            "a",
            "r",
            Duration::from_secs(MAX_STEP_TIMEOUT_SECS),
        ));
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_sub_second_timeout_rounds_up() {
        let step = ApprovalStep::new("s", "r", Duration::from_millis(500));
        assert_eq!(step.timeout_secs, 1);
        assert_eq!(
            ApprovalStep::new("s", "r", Duration::from_millis(1500)).timeout(),
            Duration::from_secs(2)
        );
        assert!(ApprovalChain::new("t", "T").with_step(step).validate().is_ok());
    }

    #[test]
    fn test_allows_override() {
        let chain = ApprovalChain::standard();
        assert!(chain.allows_override(&["governance_admin".to_string()]));
        assert!(!chain.allows_override(&["manager".to_string()]));

        let no_override = ApprovalChain::new("x", "X");
        assert!(!no_override.allows_override(&["governance_admin".to_string()]));
    }

    #[test]
    fn test_step_builders() {
        let step = ApprovalStep::new("s", "role", Duration::from_secs(90))
            .escalating_to("boss")
            .without_escalation();
        assert!(!step.can_escalate);
        assert!(step.escalate_to.is_none());
        assert_eq!(step.timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_chain_serialization() {
        let chain = ApprovalChain::critical();
        let json = serde_json::to_string(&chain).unwrap();
        let parsed: ApprovalChain = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, chain);
    }
}
