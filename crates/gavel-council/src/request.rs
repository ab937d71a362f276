//! Inbound governance request model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Priority class of a governance request.
///
/// Ordered from least to most urgent, so `Priority::High >= Priority::Standard`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Standard,
    High,
    Critical,
}

impl Priority {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Standard => "standard",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "standard" | "medium" | "normal" => Ok(Priority::Standard),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// A request under governance.
///
/// Created by the caller and never mutated by the engine.
///
/// # Example
///
/// ```rust
/// use gavel_council::{GovernanceRequest, Priority};
///
/// let request = GovernanceRequest::new("req-42", "rotate production keys")
///     .with_priority(Priority::High)
///     .with_tenant("acme")
///     .with_context("data_sensitivity", "high");
///
/// assert_eq!(request.priority, Priority::High);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceRequest {
    /// Caller-assigned identifier.
    pub id: String,
    /// Summary of what is being decided.
    pub content: String,
    /// Caller-defined request type, e.g. "policy_change".
    #[serde(rename = "type", default)]
    pub request_type: String,
    /// Priority class.
    #[serde(default)]
    pub priority: Priority,
    /// Owning tenant.
    #[serde(default)]
    pub tenant: String,
    /// Who raised the request.
    #[serde(default)]
    pub requester: String,
    /// Opaque caller context.
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl GovernanceRequest {
    /// Creates a standard-priority request with empty context.
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            request_type: String::new(),
            priority: Priority::Standard,
            tenant: String::new(),
            requester: String::new(),
            context: Map::new(),
        }
    }

    /// Sets the request type.
    pub fn with_type(mut self, request_type: impl Into<String>) -> Self {
        self.request_type = request_type.into();
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the tenant.
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = tenant.into();
        self
    }

    /// Sets the requester.
    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = requester.into();
        self
    }

    /// Adds a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Standard);
        assert!(Priority::Standard > Priority::Low);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("CRITICAL".parse::<Priority>().unwrap(), Priority::Critical);
        assert_eq!("medium".parse::<Priority>().unwrap(), Priority::Standard);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_request_builder() {
        let request = GovernanceRequest::new("r1", "deploy")
            .with_type("change")
            .with_tenant("acme")
            .with_requester("alice")
            .with_context("risk", 3);

        assert_eq!(request.request_type, "change");
        assert_eq!(request.tenant, "acme");
        assert_eq!(request.requester, "alice");
        assert_eq!(request.context["risk"], 3);
        assert_eq!(request.priority, Priority::Standard);
    }

    #[test]
    fn test_inbound_schema_parses() {
        let json = r#"{
            "id": "r9",
            "content": "grant admin",
            "type": "access",
            "priority": "critical",
            "tenant": "acme",
            "requester": "bob",
            "context": {"data_sensitivity": "high"}
        }"#;
        let request: GovernanceRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.request_type, "access");
        assert_eq!(request.priority, Priority::Critical);
        assert_eq!(request.context["data_sensitivity"], "high");
    }

    #[test]
    fn test_inbound_schema_defaults() {
        let request: GovernanceRequest =
            serde_json::from_str(r#"{"id": "r1", "content": "x"}"#).unwrap();
        assert_eq!(request.priority, Priority::Standard);
        assert!(request.context.is_empty());
    }
}
