//! Plan execution, result correlation, and mission progress.

mod engine;
mod progress;
pub mod protocol;

pub use engine::{Orchestrator, PlanOutcome, ORCHESTRATOR_AGENT_ID};
pub use progress::MissionProgress;
pub use protocol::{
    extract_task_reference, parse_execution_report, task_reference, ExecutionReport, ReportStatus,
};
