//! Configuration types for Gavel.
//!
//! Every section has defaults, so a config file only needs the keys it
//! changes:
//!
//! ```json
//! {
//!   "storage": { "db_path": "/var/lib/gavel/db" },
//!   "routing": { "impact_threshold": 0.7 },
//!   "logging": { "level": "debug" }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use gavel_chain::{ApprovalChain, CRITICAL_CHAIN, DEFAULT_SENSITIVITY_KEY, STANDARD_CHAIN};
use gavel_council::{DeliberationConfig, Priority, DEFAULT_IMPACT_THRESHOLD, MAX_VOTING_TIMEOUT};
use gavel_store::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::{error::GavelError, Result};

/// Configuration for the Gavel facade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GavelConfig {
    /// Durable store settings.
    pub storage: StorageConfig,

    /// Adaptive router settings.
    pub routing: RoutingConfig,

    /// Deliberation queue defaults.
    pub deliberation: DeliberationSettings,

    /// Approval chains and chain selection.
    pub approvals: ApprovalsConfig,

    /// Lifecycle event delivery.
    pub events: EventsConfig,

    /// Log output.
    pub logging: LoggingConfig,
}

impl GavelConfig {
    /// Reads a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Parses a JSON config document.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| GavelError::Config(e.to_string()))
    }

    /// Checks the configuration for values the services would reject.
    pub fn validate(&self) -> Result<()> {
        check_fraction("routing.impact_threshold", self.routing.impact_threshold)?;
        check_fraction(
            "deliberation.consensus_threshold",
            self.deliberation.consensus_threshold,
        )?;
        if self.deliberation.required_votes == 0 {
            return Err(GavelError::Config(
                "deliberation.required_votes must be at least 1".to_string(),
            ));
        }
        if self.deliberation.voting_timeout_secs == 0 {
            return Err(GavelError::Config(
                "deliberation.voting_timeout_secs must be positive".to_string(),
            ));
        }
        if self.deliberation.voting_timeout_secs > MAX_VOTING_TIMEOUT.as_secs() {
            return Err(GavelError::Config(format!(
                "deliberation.voting_timeout_secs must not exceed {}",
                MAX_VOTING_TIMEOUT.as_secs()
            )));
        }

        for chain in &self.approvals.chains {
            chain.validate()?;
        }
        for (key, chain_id) in [
            ("approvals.default_chain", &self.approvals.default_chain),
            ("approvals.accelerated_chain", &self.approvals.accelerated_chain),
        ] {
            if !self.approvals.chains.iter().any(|c| &c.chain_id == chain_id) {
                return Err(GavelError::Config(format!(
                    "{} '{}' is not a configured chain",
                    key, chain_id
                )));
            }
        }

        if self.events.channel_capacity == 0 {
            return Err(GavelError::Config(
                "events.channel_capacity must be positive".to_string(),
            ));
        }
        if self.events.max_publish_attempts == 0 {
            return Err(GavelError::Config(
                "events.max_publish_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_fraction(key: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(GavelError::Config(format!(
            "{} must be within [0, 1], got {}",
            key, value
        )))
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database directory. `None` uses a temporary database.
    pub db_path: Option<PathBuf>,

    /// Record lifetime in seconds; 0 keeps records forever.
    pub record_ttl_secs: u64,

    /// Flush to disk before acknowledging each transition.
    pub durable_writes: bool,
}

impl StorageConfig {
    /// Record lifetime, if any.
    pub fn record_ttl(&self) -> Option<Duration> {
        (self.record_ttl_secs > 0).then(|| Duration::from_secs(self.record_ttl_secs))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            record_ttl_secs: 30 * 24 * 3600, // 30 days
            durable_writes: true,
        }
    }
}

/// Adaptive router configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Impact score at or above which requests are deliberated.
    pub impact_threshold: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            impact_threshold: DEFAULT_IMPACT_THRESHOLD,
        }
    }
}

/// Deliberation queue defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliberationSettings {
    /// Votes needed before a verdict is possible.
    pub required_votes: usize,

    /// Fraction of votes one side needs.
    pub consensus_threshold: f64,

    /// Voting window in seconds.
    pub voting_timeout_secs: u64,
}

impl DeliberationSettings {
    /// Queue parameters for these settings.
    pub fn queue_config(&self) -> DeliberationConfig {
        DeliberationConfig::new()
            .with_required_votes(self.required_votes)
            .with_threshold(self.consensus_threshold)
            .with_timeout(Duration::from_secs(self.voting_timeout_secs))
    }
}

impl Default for DeliberationSettings {
    fn default() -> Self {
        Self {
            required_votes: 3,
            consensus_threshold: 0.66,
            voting_timeout_secs: 300,
        }
    }
}

/// Approval chain configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalsConfig {
    /// Registered chains.
    pub chains: Vec<ApprovalChain>,

    /// Chain for ordinary requests.
    pub default_chain: String,

    /// Chain for critical or highly sensitive requests.
    pub accelerated_chain: String,

    /// Context key whose value `"high"` selects the accelerated chain.
    pub sensitivity_key: String,

    /// Deliberated requests at or above this priority also need human approval.
    pub human_review_priority: Priority,
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            chains: vec![ApprovalChain::standard(), ApprovalChain::critical()],
            default_chain: STANDARD_CHAIN.to_string(),
            accelerated_chain: CRITICAL_CHAIN.to_string(),
            sensitivity_key: DEFAULT_SENSITIVITY_KEY.to_string(),
            human_review_priority: Priority::High,
        }
    }
}

/// Lifecycle event delivery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Undelivered events retained per subscriber.
    pub channel_capacity: usize,

    /// Publish attempts per event, including the first.
    pub max_publish_attempts: u32,

    /// Delay before the first retry, doubled per retry.
    pub retry_base_delay_ms: u64,
}

impl EventsConfig {
    /// Retry policy for these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_publish_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            max_publish_attempts: 5,
            retry_base_delay_ms: 100,
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
