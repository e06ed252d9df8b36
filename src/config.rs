//! Runtime configuration with TOML persistence and validation.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{MeshError, Result};

pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;
pub const DEFAULT_RATE_MAX_MESSAGES: usize = 30;
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 30_000;
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 600_000;
pub const DEFAULT_REQUEUE_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_DISPATCH_LIMIT: usize = 8;
pub const DEFAULT_CAPABILITY: &str = "development";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub messaging: MessagingConfig,
    pub registry: RegistryConfig,
    pub delegation: DelegationConfig,
    pub orchestrator: OrchestratorConfig,
}

impl MeshConfig {
    pub async fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join("mesh.toml");
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, dir: &Path) -> Result<()> {
        self.validate()?;
        let config_path = dir.join("mesh.toml");
        let content = toml::to_string_pretty(self).map_err(|e| MeshError::Config(e.to_string()))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency. Collects every
    /// violation so a broken file is reported in one pass.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.messaging.rate_limit_window_secs == 0 {
            errors.push("rate_limit_window_secs must be greater than 0");
        }
        if self.messaging.rate_limit_max_messages == 0 {
            errors.push("rate_limit_max_messages must be greater than 0");
        }
        if self.messaging.history_limit == 0 {
            errors.push("history_limit must be greater than 0");
        }

        if self.registry.heartbeat_timeout_secs == 0 {
            errors.push("heartbeat_timeout_secs must be greater than 0");
        }

        if self.delegation.max_attempts == 0 {
            errors.push("max_attempts must be greater than 0");
        }
        if self.delegation.backoff_base_ms == 0 {
            errors.push("backoff_base_ms must be greater than 0");
        }
        if self.delegation.backoff_cap_ms < self.delegation.backoff_base_ms {
            errors.push("backoff_cap_ms must be at least backoff_base_ms");
        }

        if self.orchestrator.dispatch_limit == 0 {
            errors.push("dispatch_limit must be greater than 0");
        }
        if self.orchestrator.default_capability.is_empty() {
            errors.push("default_capability must not be empty");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MeshError::Config(errors.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Sliding-window duration for the per-agent rate limiter.
    pub rate_limit_window_secs: u64,
    /// Messages a single agent may send within one window, fleet-wide.
    pub rate_limit_max_messages: usize,
    /// Most recent messages retained per session.
    pub history_limit: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            rate_limit_window_secs: DEFAULT_RATE_WINDOW_SECS,
            rate_limit_max_messages: DEFAULT_RATE_MAX_MESSAGES,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Heartbeat age beyond which an agent is marked offline on the next sweep.
    pub heartbeat_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: DEFAULT_HEARTBEAT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegationConfig {
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Suggested cadence for the external requeue scheduler. The queue itself
    /// is tick-driven and never arms a timer.
    pub requeue_interval_secs: u64,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffKind::Exponential,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            requeue_interval_secs: DEFAULT_REQUEUE_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Exponential,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on tasks dispatched per planning cycle.
    pub dispatch_limit: usize,
    /// Capability used when nothing more specific can be derived from a task.
    pub default_capability: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dispatch_limit: DEFAULT_DISPATCH_LIMIT,
            default_capability: DEFAULT_CAPABILITY.to_string(),
        }
    }
}
