//! Chain selection policy.
//!
//! Decides which chain a request walks when the caller does not name one.
//! The built-in [`PriorityChainSelector`] is only an example policy;
//! deployments can supply any [`ChainSelector`], including a closure.

use gavel_council::Priority;
use serde_json::{Map, Value};

use crate::chain::{CRITICAL_CHAIN, STANDARD_CHAIN};

/// Context key consulted by [`PriorityChainSelector`].
pub const DEFAULT_SENSITIVITY_KEY: &str = "data_sensitivity";

/// Picks a chain id from a request's priority and context.
pub trait ChainSelector: Send + Sync {
    /// Returns the chain to use, or `None` if no chain applies.
    fn select(&self, priority: Priority, context: &Map<String, Value>) -> Option<String>;
}

impl<F> ChainSelector for F
where
    F: Fn(Priority, &Map<String, Value>) -> Option<String> + Send + Sync,
{
    fn select(&self, priority: Priority, context: &Map<String, Value>) -> Option<String> {
        self(priority, context)
    }
}

/// Routes critical or highly sensitive requests to an accelerated chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityChainSelector {
    pub default_chain: String,
    pub accelerated_chain: String,
    /// Context key whose value `"high"` selects the accelerated chain.
    pub sensitivity_key: String,
}

impl PriorityChainSelector {
    pub fn new(
        default_chain: impl Into<String>,
        accelerated_chain: impl Into<String>,
        sensitivity_key: impl Into<String>,
    ) -> Self {
        Self {
            default_chain: default_chain.into(),
            accelerated_chain: accelerated_chain.into(),
            sensitivity_key: sensitivity_key.into(),
        }
    }

    fn is_sensitive(&self, context: &Map<String, Value>) -> bool {
        context
            .get(&self.sensitivity_key)
            .and_then(Value::as_str)
            .map(|v| v.eq_ignore_ascii_case("high"))
            .unwrap_or(false)
    }
}

impl Default for PriorityChainSelector {
    fn default() -> Self {
        Self::new(STANDARD_CHAIN, CRITICAL_CHAIN, DEFAULT_SENSITIVITY_KEY)
    }
}

impl ChainSelector for PriorityChainSelector {
    fn select(&self, priority: Priority, context: &Map<String, Value>) -> Option<String> {
        if priority == Priority::Critical || self.is_sensitive(context) {
            Some(self.accelerated_chain.clone())
        } else {
            Some(self.default_chain.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_critical_selects_accelerated() {
        let selector = PriorityChainSelector::default();
        assert_eq!(
            selector.select(Priority::Critical, &Map::new()).as_deref(),
            Some(CRITICAL_CHAIN)
        );
    }

    #[test]
    fn test_sensitive_context_selects_accelerated() {
        let selector = PriorityChainSelector::default();
        let ctx = context(json!({"data_sensitivity": "HIGH"}));
        assert_eq!(
            selector.select(Priority::Low, &ctx).as_deref(),
            Some(CRITICAL_CHAIN)
        );
    }

    #[test]
    fn test_other_priorities_select_default() {
        let selector = PriorityChainSelector::default();
        let ctx = context(json!({"data_sensitivity": "low"}));
        for priority in [Priority::Low, Priority::Standard, Priority::High] {
            assert_eq!(
                selector.select(priority, &ctx).as_deref(),
                Some(STANDARD_CHAIN)
            );
        }
    }

    #[test]
    fn test_closure_selector() {
        let selector = |priority: Priority, _: &Map<String, Value>| {
            (priority >= Priority::High).then(|| "board".to_string())
        };
        assert_eq!(
            ChainSelector::select(&selector, Priority::High, &Map::new()).as_deref(),
            Some("board")
        );
        assert!(ChainSelector::select(&selector, Priority::Low, &Map::new()).is_none());
    }
}
