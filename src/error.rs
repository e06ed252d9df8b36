use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Rate limit exceeded for agent '{agent_id}': {max_messages} messages per {window_secs}s")]
    RateLimitExceeded {
        agent_id: String,
        max_messages: usize,
        window_secs: u64,
    },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("No agent matches capabilities: {0:?}")]
    CapabilityMismatch(Vec<String>),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task transition: {task_id} {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("Analysis provider failed: {0}")]
    Analysis(String),

    #[error("Audit store error: {0}")]
    Audit(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl MeshError {
    /// Whether the error is a synchronous input rejection the caller can fix,
    /// as opposed to an internal fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::RateLimitExceeded { .. } | Self::SessionNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;
