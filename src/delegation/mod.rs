//! Task delegation: work items, retry/backoff, and the queue.

mod queue;
mod task;

pub use queue::{AnalysisProvider, TaskDelegationQueue};
pub use task::{
    AnalysisSnapshot, BackoffPolicy, DelegatedTask, ExecutionOutcome, TaskStatus,
};
