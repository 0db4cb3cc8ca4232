//! Engine configuration

use std::time::Duration;

use rollcall_core::{RollcallError, RollcallResult};
use rollcall_notify::NotifierConfig;
use serde::{Deserialize, Serialize};

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Attempts per operation, the first one included
    pub max_commit_attempts: u32,
    /// Backoff before the first retry, doubled on each further retry
    pub retry_backoff_ms: u64,
    /// Backoff ceiling
    pub max_backoff_ms: u64,
    /// Repeated join by an active member returns its state instead of failing
    pub idempotent_join: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 5,
            retry_backoff_ms: 2,
            max_backoff_ms: 50,
            idempotent_join: true,
        }
    }
}

impl CoordinatorConfig {
    /// Several processes racing on the same events
    pub fn high_contention() -> Self {
        Self {
            max_commit_attempts: 20,
            retry_backoff_ms: 1,
            max_backoff_ms: 20,
            ..Default::default()
        }
    }

    /// Upper bound of the backoff before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        let millis = self
            .retry_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Log output configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG` when set
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub coordinator: CoordinatorConfig,
    pub notifier: NotifierConfig,
    pub telemetry: TelemetryConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> RollcallResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| RollcallError::InvalidRequest(format!("engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RollcallResult<()> {
        if self.coordinator.max_commit_attempts == 0 {
            return Err(RollcallError::InvalidRequest(
                "max_commit_attempts must be at least 1".into(),
            ));
        }
        if self.coordinator.max_backoff_ms < self.coordinator.retry_backoff_ms {
            return Err(RollcallError::InvalidRequest(
                "max_backoff_ms is below retry_backoff_ms".into(),
            ));
        }
        if self.notifier.subscriber_buffer == 0 {
            return Err(RollcallError::InvalidRequest(
                "subscriber_buffer must be at least 1".into(),
            ));
        }
        if self.notifier.max_delivery_attempts == 0 {
            return Err(RollcallError::InvalidRequest(
                "max_delivery_attempts must be at least 1".into(),
            ));
        }
        if self.notifier.max_backlog == 0 {
            return Err(RollcallError::InvalidRequest(
                "max_backlog must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
