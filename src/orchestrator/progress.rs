//! Derived mission-level progress snapshots.

use serde::{Deserialize, Serialize};

use crate::delegation::{DelegatedTask, TaskStatus};

/// Aggregate view of a plan's tasks. Always recomputed from the task arena,
/// never mutated independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionProgress {
    pub plan_id: String,
    pub total: usize,
    /// Tasks that have entered dispatch: currently executing, completed,
    /// or failed.
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    /// Tasks currently out with an agent.
    pub in_progress: usize,
    /// Mean latency over completed tasks that reported a duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<u64>,
}

impl MissionProgress {
    pub fn from_tasks(plan_id: impl Into<String>, tasks: &[DelegatedTask]) -> Self {
        let mut dispatched = 0;
        let mut completed = 0;
        let mut failed = 0;
        let mut in_progress = 0;
        let mut latency_sum: u64 = 0;
        let mut latency_count: u64 = 0;

        for task in tasks {
            match task.status {
                TaskStatus::Queued => {}
                TaskStatus::Dispatched => {
                    dispatched += 1;
                    in_progress += 1;
                }
                TaskStatus::Completed => {
                    dispatched += 1;
                    completed += 1;
                    if let Some(latency) = task.latency_ms {
                        latency_sum += latency;
                        latency_count += 1;
                    }
                }
                TaskStatus::Failed => {
                    dispatched += 1;
                    failed += 1;
                }
            }
        }

        Self {
            plan_id: plan_id.into(),
            total: tasks.len(),
            dispatched,
            completed,
            failed,
            in_progress,
            avg_latency_ms: (latency_count > 0).then(|| latency_sum / latency_count),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.in_progress == 0 && self.completed + self.failed == self.total
    }
}
