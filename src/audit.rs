use std::time::Duration;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// One audit record: what ran, how it ended, how long it took.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub level: AuditLevel,
    pub operation: &'static str,
    /// `"ok"`, an error kind such as `"Conflict"`, or `"post_write_conflict"`.
    pub outcome: &'static str,
    pub message: String,
    pub details: Value,
    pub duration: Option<Duration>,
}

impl AuditEvent {
    pub fn new(level: AuditLevel, operation: &'static str, outcome: &'static str) -> Self {
        Self {
            level,
            operation,
            outcome,
            message: String::new(),
            details: Value::Null,
            duration: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Where audit records go. Must not fail the operation being audited.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit records through `tracing` under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, event: AuditEvent) {
        let duration_ms = event.duration.map(|d| d.as_secs_f64() * 1000.0);
        let details = event.details.to_string();
        match event.level {
            AuditLevel::Debug => tracing::debug!(
                target: "audit",
                operation = event.operation,
                outcome = event.outcome,
                duration_ms,
                details = %details,
                "{}",
                event.message
            ),
            AuditLevel::Info => tracing::info!(
                target: "audit",
                operation = event.operation,
                outcome = event.outcome,
                duration_ms,
                details = %details,
                "{}",
                event.message
            ),
            AuditLevel::Warning => tracing::warn!(
                target: "audit",
                operation = event.operation,
                outcome = event.outcome,
                duration_ms,
                details = %details,
                "{}",
                event.message
            ),
            AuditLevel::Error => tracing::error!(
                target: "audit",
                operation = event.operation,
                outcome = event.outcome,
                duration_ms,
                details = %details,
                "{}",
                event.message
            ),
        }
    }
}
