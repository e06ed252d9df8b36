//! Scripted agent runtime for testing without real agents.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;

use agent_mesh::error::Result;
use agent_mesh::messaging::{Message, MessageType, SendMessage};
use agent_mesh::orchestrator::{extract_task_reference, ExecutionReport, ORCHESTRATOR_AGENT_ID};
use agent_mesh::runtime::{AgentRuntime, RuntimeContext};

#[derive(Debug, Clone)]
pub struct ScriptedOutcome {
    pub success: bool,
    pub error_code: Option<String>,
    pub duration_ms: u64,
}

impl ScriptedOutcome {
    pub fn complete(duration_ms: u64) -> Self {
        Self {
            success: true,
            error_code: None,
            duration_ms,
        }
    }

    pub fn fail(error_code: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(error_code.into()),
            duration_ms: 0,
        }
    }

    fn into_report(self, task_id: &str) -> ExecutionReport {
        if self.success {
            ExecutionReport::completed(task_id, self.duration_ms)
        } else {
            ExecutionReport::failed(task_id, self.error_code.unwrap_or_else(|| "E_FAIL".into()))
                .with_duration(self.duration_ms)
        }
    }
}

/// Runtime that answers task dispatches from a script: content patterns are
/// consulted first, then a queued sequence, then the default outcome.
/// Non-task messages are counted but never answered.
pub struct MockAgentRuntime {
    patterns: Mutex<Vec<(Regex, ScriptedOutcome)>>,
    sequence: Mutex<VecDeque<ScriptedOutcome>>,
    default_outcome: ScriptedOutcome,
    task_calls: AtomicUsize,
    chat_calls: AtomicUsize,
    seen_tasks: Mutex<Vec<String>>,
}

impl Default for MockAgentRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAgentRuntime {
    pub fn new() -> Self {
        Self {
            patterns: Mutex::new(Vec::new()),
            sequence: Mutex::new(VecDeque::new()),
            default_outcome: ScriptedOutcome::complete(100),
            task_calls: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
            seen_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default(mut self, outcome: ScriptedOutcome) -> Self {
        self.default_outcome = outcome;
        self
    }

    pub fn push_outcome(&self, outcome: ScriptedOutcome) {
        self.sequence.lock().push_back(outcome);
    }

    pub fn on_pattern(&self, pattern: &str, outcome: ScriptedOutcome) {
        let regex = Regex::new(pattern)
            .unwrap_or_else(|e| panic!("Invalid pattern '{}': {}", pattern, e));
        self.patterns.lock().push((regex, outcome));
    }

    pub fn task_call_count(&self) -> usize {
        self.task_calls.load(Ordering::SeqCst)
    }

    pub fn chat_call_count(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn seen_tasks(&self) -> Vec<String> {
        self.seen_tasks.lock().clone()
    }

    fn next_outcome(&self, content: &str) -> ScriptedOutcome {
        for (regex, outcome) in self.patterns.lock().iter() {
            if regex.is_match(content) {
                return outcome.clone();
            }
        }
        self.sequence
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone())
    }
}

#[async_trait]
impl AgentRuntime for MockAgentRuntime {
    async fn process_message(
        &self,
        context: &RuntimeContext,
        message: &Message,
    ) -> Result<Option<SendMessage>> {
        let Some(task_id) = extract_task_reference(&message.content) else {
            self.chat_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(None);
        };

        self.task_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_tasks.lock().push(task_id.clone());

        let report = self.next_outcome(&message.content).into_report(&task_id);
        Ok(Some(
            SendMessage::new(&context.session_id, &context.agent_id, report.to_content())
                .to(ORCHESTRATOR_AGENT_ID)
                .with_type(MessageType::ExecutionReport),
        ))
    }
}
