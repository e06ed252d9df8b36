pub mod audit;
pub mod config;
pub mod delegation;
pub mod error;
pub mod events;
pub mod messaging;
pub mod monitor;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod session;

pub use audit::{AuditRecord, AuditSink, NullAuditSink, SqliteAuditLog};
pub use config::MeshConfig;
pub use delegation::{
    AnalysisProvider, AnalysisSnapshot, DelegatedTask, ExecutionOutcome, TaskDelegationQueue,
    TaskStatus,
};
pub use error::{MeshError, Result};
pub use events::{EventBus, EventKind, HandlerId, MeshEvent};
pub use messaging::{Message, MessageBus, MessageType, SendMessage};
pub use monitor::{MonitorSink, NullMonitor, OpOutcome};
pub use orchestrator::{ExecutionReport, MissionProgress, Orchestrator, ORCHESTRATOR_AGENT_ID};
pub use registry::{AgentDescriptor, AgentRegistry, AgentStatus};
pub use runtime::{AgentRuntime, RuntimeContext};
pub use session::{CreateSession, Session, SessionStore};
