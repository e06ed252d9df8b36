//! Retryable task-delegation queue.
//!
//! All transitions run under one arena lock, so a requeue tick can never
//! race a dispatch or a result for the same task, and the tick is safely
//! re-entrant: a task requeues at most once per deadline.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::task::{
    AnalysisSnapshot, BackoffPolicy, DelegatedTask, ExecutionOutcome, TaskStatus,
};
use crate::audit::{AuditRecord, AuditSink, NullAuditSink};
use crate::config::DelegationConfig;
use crate::error::Result;
use crate::monitor::{MonitorSink, NullMonitor, OpTimer};

/// Source of findings harvested into tasks. Possibly slow (an offline
/// analysis run), hence async.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn analyze(&self) -> Result<AnalysisSnapshot>;
}

pub struct TaskDelegationQueue {
    tasks: Mutex<Vec<DelegatedTask>>,
    provider: RwLock<Option<Arc<dyn AnalysisProvider>>>,
    backoff: BackoffPolicy,
    max_attempts: u32,
    audit: Arc<dyn AuditSink>,
    monitor: Arc<dyn MonitorSink>,
}

impl TaskDelegationQueue {
    pub fn new(config: &DelegationConfig) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            provider: RwLock::new(None),
            backoff: BackoffPolicy::new(config),
            max_attempts: config.max_attempts,
            audit: Arc::new(NullAuditSink),
            monitor: Arc::new(NullMonitor),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn MonitorSink>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Single provider slot; the last registration wins. Replacement is
    /// logged so an unexpected overwrite is visible.
    pub fn register_analysis_provider(&self, provider: Arc<dyn AnalysisProvider>) {
        let mut slot = self.provider.write();
        if slot.is_some() {
            info!("Analysis provider replaced (last registered wins)");
        }
        *slot = Some(provider);
    }

    /// Invoke the active provider and queue one task per recommended action.
    /// Returns the new task ids; no provider means nothing to harvest.
    pub async fn harvest_and_queue(&self) -> Result<Vec<String>> {
        let timer = OpTimer::start(self.monitor.as_ref(), "harvest_and_queue");

        let provider = self.provider.read().clone();
        let Some(provider) = provider else {
            timer.success();
            return Ok(Vec::new());
        };

        let snapshot = match provider.analyze().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                timer.error();
                return Err(e);
            }
        };

        let mut queued = Vec::with_capacity(snapshot.recommended_actions.len());
        {
            let mut tasks = self.tasks.lock();
            for action in &snapshot.recommended_actions {
                let task = DelegatedTask::new(
                    &snapshot.snapshot_hash,
                    &snapshot.summary,
                    action,
                    self.max_attempts,
                );
                queued.push(task.id.clone());
                tasks.push(task);
            }
        }

        debug!(
            count = queued.len(),
            snapshot = %snapshot.snapshot_hash,
            "Harvested tasks"
        );
        timer.success();
        Ok(queued)
    }

    /// Direct submission, bypassing the provider.
    pub fn submit(
        &self,
        finding: impl Into<String>,
        action: impl Into<String>,
    ) -> String {
        let task = DelegatedTask::new("direct", finding, action, self.max_attempts);
        let id = task.id.clone();
        self.tasks.lock().push(task);
        debug!(task_id = %id, "Task submitted");
        id
    }

    /// Read-only snapshot, in creation (FIFO) order.
    pub fn all_tasks(&self) -> Vec<DelegatedTask> {
        self.tasks.lock().clone()
    }

    pub fn get(&self, task_id: &str) -> Option<DelegatedTask> {
        self.tasks.lock().iter().find(|t| t.id == task_id).cloned()
    }

    /// Up to `limit` queued tasks in FIFO order.
    pub fn queued_tasks(&self, limit: usize) -> Vec<DelegatedTask> {
        self.tasks
            .lock()
            .iter()
            .filter(|t| t.status == TaskStatus::Queued)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Claim a queued task for dispatch. Returns false if the task is not
    /// claimable (unknown, or no longer queued).
    pub fn mark_dispatched(&self, task_id: &str, agent_id: &str) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) else {
            warn!(task_id, "Dispatch claim for unknown task");
            return false;
        };

        if task.status != TaskStatus::Queued {
            debug!(task_id, status = %task.status, "Dispatch claim skipped");
            return false;
        }

        task.status = TaskStatus::Dispatched;
        task.assigned_agent = Some(agent_id.to_string());
        self.record_transition(task, "dispatched");
        true
    }

    /// Undo a dispatch claim whose send was rejected. The attempt is not
    /// counted: execution never started.
    pub fn release(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) else {
            return false;
        };

        if task.status != TaskStatus::Dispatched {
            return false;
        }

        task.status = TaskStatus::Queued;
        task.assigned_agent = None;
        debug!(task_id, "Dispatch released back to queue");
        true
    }

    /// Record one execution attempt's outcome. Applies only to dispatched
    /// tasks; anything else (duplicate result, unknown id) is a logged
    /// no-op, never an error. Returns whether the outcome was applied.
    pub fn mark_execution_result(
        &self,
        task_id: &str,
        outcome: &ExecutionOutcome,
        now_ms: i64,
    ) -> bool {
        let timer = OpTimer::start(self.monitor.as_ref(), "mark_execution_result");
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.iter_mut().find(|t| t.id == task_id) else {
            debug!(task_id, "Execution result for unknown task, ignoring");
            timer.error();
            return false;
        };

        if task.status != TaskStatus::Dispatched {
            debug!(
                task_id,
                status = %task.status,
                "Duplicate execution result, ignoring"
            );
            timer.success();
            return false;
        }

        task.latency_ms = outcome.duration_ms;

        if outcome.success {
            task.status = TaskStatus::Completed;
            task.error_code = None;
            task.next_attempt_unix = None;
        } else {
            task.status = TaskStatus::Failed;
            task.attempts += 1;
            task.error_code = outcome.error_code.clone();

            if task.is_exhausted() {
                task.next_attempt_unix = None;
                warn!(
                    task_id,
                    attempts = task.attempts,
                    error_code = task.error_code.as_deref().unwrap_or("unknown"),
                    "Task failed permanently"
                );
            } else {
                let delay = self.backoff.delay_ms(task.attempts);
                task.next_attempt_unix = Some(now_ms + delay as i64);
                debug!(
                    task_id,
                    attempts = task.attempts,
                    retry_in_ms = delay,
                    "Task failed, retry scheduled"
                );
            }
        }

        self.record_transition(task, task.status.as_str());
        timer.success();
        true
    }

    /// Requeue failed tasks whose backoff deadline has passed and which
    /// still have attempts left. Returns the ids actually requeued.
    /// Tick-driven: callers supply the clock.
    pub fn process_due_requeues(&self, now_ms: i64) -> Vec<String> {
        let timer = OpTimer::start(self.monitor.as_ref(), "process_due_requeues");
        let mut requeued = Vec::new();

        {
            let mut tasks = self.tasks.lock();
            for task in tasks.iter_mut() {
                if task.status != TaskStatus::Failed || task.is_exhausted() {
                    continue;
                }
                let Some(deadline) = task.next_attempt_unix else {
                    continue;
                };
                if deadline > now_ms {
                    continue;
                }

                task.status = TaskStatus::Queued;
                task.next_attempt_unix = None;
                task.assigned_agent = None;
                requeued.push(task.id.clone());
                self.record_transition(task, "requeued");
            }
        }

        if !requeued.is_empty() {
            debug!(count = requeued.len(), "Tasks requeued");
        }
        timer.success();
        requeued
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().len()
    }

    fn record_transition(&self, task: &DelegatedTask, transition: &str) {
        self.audit.record(
            AuditRecord::new("delegation", "task_transition", &task.id)
                .with_tags([transition.to_string(), task.action.clone()])
                .with_body(serde_json::to_string(task).unwrap_or_default()),
        );
    }
}
