//! Delegated work items and their retry bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{BackoffKind, DelegationConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
    Dispatched,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of delegated work. Never deleted, only transitioned:
/// `queued -> dispatched -> {completed | failed}`, with `failed -> queued`
/// via requeue until attempts are exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegatedTask {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Where the task came from: a provider's snapshot hash, or "direct".
    pub source: String,
    pub finding: String,
    pub action: String,
    pub status: TaskStatus,
    /// Failed execution attempts so far. Incremented when a failure result
    /// is recorded; `attempts == max_attempts` makes a failure terminal.
    pub attempts: u32,
    pub max_attempts: u32,
    /// Epoch-millis deadline after which a failed task becomes requeueable.
    /// Absent while the task is not awaiting retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_unix: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl DelegatedTask {
    pub fn new(
        source: impl Into<String>,
        finding: impl Into<String>,
        action: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            source: source.into(),
            finding: finding.into(),
            action: action.into(),
            status: TaskStatus::Queued,
            attempts: 0,
            max_attempts,
            next_attempt_unix: None,
            assigned_agent: None,
            error_code: None,
            latency_ms: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Terminal means no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            TaskStatus::Completed => true,
            TaskStatus::Failed => self.is_exhausted(),
            _ => false,
        }
    }
}

/// Outcome of one execution attempt, as recorded against the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ExecutionOutcome {
    pub fn completed(duration_ms: u64) -> Self {
        Self {
            success: true,
            error_code: None,
            error_message: None,
            duration_ms: Some(duration_ms),
        }
    }

    pub fn failed(error_code: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(error_code.into()),
            error_message: None,
            duration_ms: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// What an analysis provider hands the queue: one task is created per
/// recommended action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub summary: String,
    pub recommended_actions: Vec<String>,
    pub snapshot_hash: String,
}

/// Deterministic retry delay schedule.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    kind: BackoffKind,
    base_delay_ms: u64,
    cap_ms: u64,
}

impl BackoffPolicy {
    pub fn new(config: &DelegationConfig) -> Self {
        Self {
            kind: config.backoff,
            base_delay_ms: config.backoff_base_ms,
            cap_ms: config.backoff_cap_ms,
        }
    }

    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_delay_ms: delay_ms,
            cap_ms: delay_ms,
        }
    }

    pub fn exponential(base_delay_ms: u64, cap_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay_ms,
            cap_ms,
        }
    }

    /// Delay before the next attempt, given how many attempts have failed.
    /// Exponential doubles per failed attempt: base, 2*base, 4*base, ...
    /// capped; `attempts` is at least 1 when this is consulted.
    pub fn delay_ms(&self, attempts: u32) -> u64 {
        match self.kind {
            BackoffKind::Fixed => self.base_delay_ms,
            BackoffKind::Exponential => {
                let exponent = attempts.saturating_sub(1).min(20);
                self.base_delay_ms
                    .saturating_mul(1u64 << exponent)
                    .min(self.cap_ms)
            }
        }
    }
}
