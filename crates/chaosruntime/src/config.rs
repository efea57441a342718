use chaoscore::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How Parallel and Task nodes aggregate failed children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The first failed child fails the parent
    #[default]
    FailFast,
    /// The parent waits until every child is terminal, then fails if any failed
    WaitForAll,
}

/// Configuration for the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How often the controller re-lists workflows in case a notification was missed
    pub resync_interval_ms: u64,
    /// Number of manager shards; events of one workflow always land on the same shard
    pub max_concurrent_workflows: usize,
    /// Hex characters appended to template names to form node names
    pub node_name_suffix_length: usize,
    pub failure_policy: FailurePolicy,
    pub max_redeliveries: u32,
    /// Backoff before the first re-delivery, doubled on each further attempt
    pub redelivery_backoff_ms: u64,
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            resync_interval_ms: 30_000,
            max_concurrent_workflows: 4,
            node_name_suffix_length: 4,
            failure_policy: FailurePolicy::FailFast,
            max_redeliveries: 3,
            redelivery_backoff_ms: 100,
            event_buffer_size: 1000,
        }
    }
}

impl RuntimeConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: RuntimeConfig = serde_json::from_str(&raw).map_err(|e| {
            EngineError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_concurrent_workflows == 0 {
            return Err(EngineError::Configuration(
                "max_concurrent_workflows must be at least 1".to_string(),
            ));
        }
        if !(1..=32).contains(&self.node_name_suffix_length) {
            return Err(EngineError::Configuration(format!(
                "node_name_suffix_length must be within 1..=32, got {}",
                self.node_name_suffix_length
            )));
        }
        if self.resync_interval_ms == 0 {
            return Err(EngineError::Configuration(
                "resync_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.resync_interval_ms)
    }

    /// Delay before re-delivering an event that failed `attempt` times
    pub fn redelivery_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(self.redelivery_backoff_ms.saturating_mul(factor))
    }
}
