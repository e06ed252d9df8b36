//! Agent runtime contract.
//!
//! The runtime executing a dispatched message is an external collaborator.
//! The mesh only requires that it (a) processes messages addressed to its
//! agent and (b) on finding an embedded task reference, emits a structured
//! execution report (see [`crate::orchestrator::protocol`]) so the
//! orchestrator can correlate the result. A runtime that never reports
//! simply leaves its task dispatched; retries are the queue's problem, not
//! the runtime's.

use async_trait::async_trait;

use crate::error::Result;
use crate::messaging::{Message, SendMessage};

/// Per-invocation context handed to the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub agent_id: String,
    pub session_id: String,
}

impl RuntimeContext {
    pub fn new(agent_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Process one message addressed to this agent. The returned message, if
    /// any, is sent back through the bus by the driver. Implementations must
    /// emit at most one execution report per dispatched task attempt.
    async fn process_message(
        &self,
        context: &RuntimeContext,
        message: &Message,
    ) -> Result<Option<SendMessage>>;
}
