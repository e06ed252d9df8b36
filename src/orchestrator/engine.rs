//! Planning cycles: match queued tasks to capable agents, dispatch, and
//! correlate results into mission progress.
//!
//! The orchestrator sends under its own agent id, so it must be a
//! participant of every session it dispatches into.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::progress::MissionProgress;
use super::protocol::{parse_execution_report, task_reference, ExecutionReport};
use crate::config::OrchestratorConfig;
use crate::delegation::{DelegatedTask, TaskDelegationQueue};
use crate::error::Result;
use crate::events::{EventBus, MeshEvent};
use crate::messaging::{BusSubscriber, MessageBus, MessageType, SendMessage};
use crate::registry::AgentRegistry;
use crate::session::SessionStore;

pub const ORCHESTRATOR_AGENT_ID: &str = "orchestrator";

/// Keyword hints mapping a task's action text to a discovery capability.
/// First hit wins; anything unmatched falls back to the configured default.
const CAPABILITY_HINTS: &[(&str, &str)] = &[
    ("debug", "debugging"),
    ("diagnose", "debugging"),
    ("review", "review"),
    ("test", "testing"),
    ("document", "documentation"),
    ("deploy", "operations"),
];

#[derive(Debug, Clone, Default)]
pub struct PlanOutcome {
    pub dispatched: Vec<String>,
    /// Tasks left queued this cycle because no capable participant was
    /// available or the send was rejected.
    pub skipped: Vec<String>,
}

pub struct Orchestrator {
    plan_id: String,
    agent_id: String,
    registry: Arc<AgentRegistry>,
    sessions: Arc<SessionStore>,
    bus: Arc<MessageBus>,
    queue: Arc<TaskDelegationQueue>,
    events: Arc<EventBus>,
    config: OrchestratorConfig,
    inbox: BusSubscriber,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        sessions: Arc<SessionStore>,
        bus: Arc<MessageBus>,
        queue: Arc<TaskDelegationQueue>,
        events: Arc<EventBus>,
        config: OrchestratorConfig,
    ) -> Self {
        let inbox = bus.subscribe(ORCHESTRATOR_AGENT_ID);
        Self {
            plan_id: format!("plan-{}", Uuid::new_v4()),
            agent_id: ORCHESTRATOR_AGENT_ID.to_string(),
            registry,
            sessions,
            bus,
            queue,
            events,
            config,
            inbox,
        }
    }

    pub fn with_plan_id(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = plan_id.into();
        self
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// One full cycle: harvest new findings, requeue due retries, dispatch
    /// up to the configured limit, then drain any pending results.
    pub async fn run_cycle(&self, session_id: &str) -> Result<PlanOutcome> {
        self.queue.harvest_and_queue().await?;
        self.run_requeue_tick(Utc::now().timestamp_millis());
        let outcome = self.execute_plan(session_id, self.config.dispatch_limit)?;
        self.process_incoming();
        Ok(outcome)
    }

    /// Dispatch up to `limit` queued tasks into a session, FIFO by creation.
    /// Tasks with no capable, available participant stay queued for a later
    /// cycle.
    pub fn execute_plan(&self, session_id: &str, limit: usize) -> Result<PlanOutcome> {
        let session = self.sessions.require(session_id)?;
        let mut outcome = PlanOutcome::default();

        for task in self.queue.queued_tasks(limit) {
            let capability = self.derive_capability(&task);
            let candidate = self
                .registry
                .discover(&[capability.clone()])
                .into_iter()
                .find(|agent| session.is_participant(&agent.id));

            let Some(agent) = candidate else {
                debug!(
                    task_id = %task.id,
                    capability = %capability,
                    "No capable agent available, task stays queued"
                );
                outcome.skipped.push(task.id);
                continue;
            };

            if !self.queue.mark_dispatched(&task.id, &agent.id) {
                continue;
            }

            let content = format!(
                "{}\n\nFinding: {}\n\n{}",
                task.action,
                task.finding,
                task_reference(&task.id)
            );
            let send = self.bus.send_message(
                SendMessage::new(session_id, &self.agent_id, content)
                    .to(&agent.id)
                    .with_type(MessageType::TaskDispatch),
            );

            match send {
                Ok(_) => {
                    info!(
                        task_id = %task.id,
                        agent_id = %agent.id,
                        capability = %capability,
                        "Task dispatched"
                    );
                    outcome.dispatched.push(task.id);
                }
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Dispatch send rejected");
                    self.queue.release(&task.id);
                    outcome.skipped.push(task.id);
                }
            }
        }

        self.broadcast_progress();
        Ok(outcome)
    }

    /// Drain the orchestrator inbox and apply any execution reports found.
    /// Returns how many reports were applied.
    pub fn process_incoming(&self) -> usize {
        let mut applied = 0;
        for message in self.inbox.recv_all() {
            if let Some(report) = parse_execution_report(&message.content) {
                if self.apply_report(&report) {
                    applied += 1;
                }
            }
        }
        applied
    }

    /// Direct emission hook for runtimes wired without the bus. Duplicate
    /// reports for an already-resolved task are logged no-ops.
    pub fn apply_report(&self, report: &ExecutionReport) -> bool {
        let now_ms = Utc::now().timestamp_millis();
        let applied = self
            .queue
            .mark_execution_result(&report.task_id, &report.outcome(), now_ms);

        if applied {
            debug!(
                task_id = %report.task_id,
                status = ?report.status,
                latency_ms = report.duration_ms.unwrap_or(0),
                "Execution result recorded"
            );
            self.broadcast_progress();
        } else {
            debug!(task_id = %report.task_id, "Execution result ignored");
        }
        applied
    }

    /// Requeue due retries. Explicit tick; the caller owns the schedule.
    pub fn run_requeue_tick(&self, now_ms: i64) -> Vec<String> {
        let requeued = self.queue.process_due_requeues(now_ms);
        if !requeued.is_empty() {
            self.broadcast_progress();
        }
        requeued
    }

    pub fn progress(&self) -> MissionProgress {
        MissionProgress::from_tasks(&self.plan_id, &self.queue.all_tasks())
    }

    fn broadcast_progress(&self) {
        self.events.emit(&MeshEvent::MissionProgress {
            progress: self.progress(),
        });
    }

    fn derive_capability(&self, task: &DelegatedTask) -> String {
        let text = format!("{} {}", task.action, task.source).to_lowercase();
        for (keyword, capability) in CAPABILITY_HINTS {
            if text.contains(keyword) {
                return (*capability).to_string();
            }
        }
        self.config.default_capability.clone()
    }
}
