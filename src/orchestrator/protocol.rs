//! Structured execution-result protocol.
//!
//! Dispatched messages embed a `TASK_ID: <id>` reference so the agent
//! runtime can correlate its result. The runtime reports back with a
//! JSON-shaped body; parsing is defensive because the runtime is an
//! untrusted, best-effort collaborator — malformed payloads are dropped,
//! never raised.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::delegation::ExecutionOutcome;

pub const TASK_REF_PREFIX: &str = "TASK_ID:";
pub const EXECUTION_RESULT_TYPE: &str = "execution_result";

/// The reference line embedded in dispatch content.
pub fn task_reference(task_id: &str) -> String {
    format!("{} {}", TASK_REF_PREFIX, task_id)
}

/// Scan message content for a task reference. The first well-formed line
/// wins.
pub fn extract_task_reference(content: &str) -> Option<String> {
    for line in content.lines() {
        if let Some(rest) = line.trim().strip_prefix(TASK_REF_PREFIX) {
            let task_id = rest.trim();
            if !task_id.is_empty() {
                return Some(task_id.to_string());
            }
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Completed,
    Failed,
}

/// Completion/failure signal emitted by an agent runtime, correlated by
/// task id. Field aliases accept the camelCase spelling some runtimes emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(alias = "taskId")]
    pub task_id: String,
    pub status: ReportStatus,
    #[serde(default, alias = "errorCode", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, alias = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, alias = "durationMs", skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ExecutionReport {
    pub fn completed(task_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            kind: EXECUTION_RESULT_TYPE.to_string(),
            task_id: task_id.into(),
            status: ReportStatus::Completed,
            error_code: None,
            error_message: None,
            duration_ms: Some(duration_ms),
        }
    }

    pub fn failed(task_id: impl Into<String>, error_code: impl Into<String>) -> Self {
        Self {
            kind: EXECUTION_RESULT_TYPE.to_string(),
            task_id: task_id.into(),
            status: ReportStatus::Failed,
            error_code: Some(error_code.into()),
            error_message: None,
            duration_ms: None,
        }
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Render as message content for the bus.
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn outcome(&self) -> ExecutionOutcome {
        ExecutionOutcome {
            success: self.status == ReportStatus::Completed,
            error_code: self.error_code.clone(),
            error_message: self.error_message.clone(),
            duration_ms: self.duration_ms,
        }
    }
}

/// Parse an execution report out of message content. Returns `None` for
/// malformed JSON, a missing/empty task id, an unknown status, or a body
/// that is not an execution result — the orchestration loop never sees an
/// error from here.
pub fn parse_execution_report(content: &str) -> Option<ExecutionReport> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }

    let report: ExecutionReport = match serde_json::from_str(&content[start..=end]) {
        Ok(report) => report,
        Err(e) => {
            debug!(error = %e, "Ignoring malformed execution report");
            return None;
        }
    };

    if report.kind != EXECUTION_RESULT_TYPE {
        debug!(kind = %report.kind, "Ignoring non-result payload");
        return None;
    }
    if report.task_id.trim().is_empty() {
        debug!("Ignoring execution report without task id");
        return None;
    }

    Some(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_reference_roundtrip() {
        let content = format!("Fix the login flow.\n\n{}\n", task_reference("t-42"));
        assert_eq!(extract_task_reference(&content).as_deref(), Some("t-42"));
        assert!(extract_task_reference("no reference here").is_none());
        assert!(extract_task_reference("TASK_ID:   ").is_none());
    }

    #[test]
    fn test_report_roundtrip() {
        let report = ExecutionReport::failed("t-1", "E_TIMEOUT")
            .with_error_message("command timed out")
            .with_duration(4200);

        let parsed = parse_execution_report(&report.to_content()).unwrap();
        assert_eq!(parsed.task_id, "t-1");
        assert_eq!(parsed.status, ReportStatus::Failed);
        assert_eq!(parsed.error_code.as_deref(), Some("E_TIMEOUT"));
        assert_eq!(parsed.duration_ms, Some(4200));

        let outcome = parsed.outcome();
        assert!(!outcome.success);
        assert_eq!(outcome.error_code.as_deref(), Some("E_TIMEOUT"));
    }

    #[test]
    fn test_parse_accepts_camel_case_fields() {
        let raw = r#"{"type": "execution_result", "taskId": "t-7", "status": "completed", "durationMs": 950}"#;
        let report = parse_execution_report(raw).unwrap();
        assert_eq!(report.task_id, "t-7");
        assert_eq!(report.duration_ms, Some(950));
    }

    #[test]
    fn test_parse_extracts_json_from_surrounding_prose() {
        let content = format!(
            "Done with the task.\n{}\nLet me know if anything else is needed.",
            ExecutionReport::completed("t-3", 120).to_content()
        );
        let report = parse_execution_report(&content).unwrap();
        assert_eq!(report.task_id, "t-3");
    }

    #[test]
    fn test_parse_rejects_malformed_payloads() {
        assert!(parse_execution_report("not json at all").is_none());
        assert!(parse_execution_report("{\"type\": \"execution_result\"").is_none());
        assert!(
            parse_execution_report(r#"{"type": "chat", "taskId": "t-1", "status": "completed"}"#)
                .is_none()
        );
        assert!(
            parse_execution_report(r#"{"type": "execution_result", "status": "completed"}"#)
                .is_none()
        );
        assert!(parse_execution_report(
            r#"{"type": "execution_result", "taskId": "", "status": "completed"}"#
        )
        .is_none());
        assert!(parse_execution_report(
            r#"{"type": "execution_result", "taskId": "t-1", "status": "exploded"}"#
        )
        .is_none());
    }
}
