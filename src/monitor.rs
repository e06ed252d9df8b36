//! Operation-outcome reporting for external observability.
//!
//! Every registry/session/messaging/delegation operation reports its outcome
//! and duration through a [`MonitorSink`]. The default sink discards records;
//! correctness never depends on one being attached.

use std::time::{Duration, Instant};

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpOutcome {
    Success,
    Error,
}

impl OpOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

pub trait MonitorSink: Send + Sync {
    fn record(&self, operation: &str, outcome: OpOutcome, duration: Duration);
}

/// Sink that drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMonitor;

impl MonitorSink for NullMonitor {
    fn record(&self, operation: &str, outcome: OpOutcome, duration: Duration) {
        trace!(
            operation,
            outcome = outcome.as_str(),
            duration_us = duration.as_micros() as u64,
            "op recorded"
        );
    }
}

/// Measures one operation and reports it on completion.
pub struct OpTimer<'a> {
    sink: &'a dyn MonitorSink,
    operation: &'static str,
    started: Instant,
}

impl<'a> OpTimer<'a> {
    pub fn start(sink: &'a dyn MonitorSink, operation: &'static str) -> Self {
        Self {
            sink,
            operation,
            started: Instant::now(),
        }
    }

    pub fn success(self) {
        self.sink
            .record(self.operation, OpOutcome::Success, self.started.elapsed());
    }

    pub fn error(self) {
        self.sink
            .record(self.operation, OpOutcome::Error, self.started.elapsed());
    }

    pub fn finish(self, succeeded: bool) {
        if succeeded {
            self.success();
        } else {
            self.error();
        }
    }
}
