//! Audit trail for command and extension activity
//!
//! Every registration, dispatch decision and extension load can be recorded
//! to an [`AuditSink`]. Sink failures are logged and swallowed; auditing
//! never changes the outcome of a dispatch.

use serde::Serialize;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::permission::Level;

/// Audit event describing one framework decision
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// RFC 3339 timestamp
    pub timestamp: String,
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_type,
            actor: None,
            command: None,
            extension: None,
            detail: None,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn denied(actor: &str, command: &str, required: Level, actual: Level) -> Self {
        Self::new(AuditEventType::PermissionDenied)
            .with_actor(actor)
            .with_command(command)
            .with_detail(format!("required={} actual={}", required, actual))
    }
}

/// Type of audit event
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    CommandRegistered,
    CommandReplaced,
    CommandInvoked,
    PermissionDenied,
    UnknownCommand,
    ExecutionFailed,
    ExtensionLoaded,
    ExtensionFailed,
}

/// Why an event could not be recorded
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit log I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Audit event could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Push buffered events to durable storage; unbuffered sinks keep the default
    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Record an event, logging instead of failing
pub(crate) fn record_quietly(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.record(event) {
        tracing::warn!(error = %e, "Failed to record audit event");
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Append-only JSON-lines log, one event per line, written through on every record
pub struct FileAuditSink {
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
}

impl FileAuditSink {
    /// Open `path` for appending, creating missing parent directories
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)?,
            _ => {}
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut out = self.out.lock().unwrap();
        serde_json::to_writer(&mut *out, &event)?;
        out.write_all(b"\n")?;
        // Each line reaches the file before `record` returns
        out.flush()?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(self.out.lock().unwrap().flush()?)
    }
}

impl fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileAuditSink({})", self.path.display())
    }
}

/// Keeps events in memory; used by tests to assert on decisions
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    recorded: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.recorded.lock().unwrap().clone()
    }

    /// Recorded events of one kind, oldest first
    pub fn of_type(&self, kind: AuditEventType) -> Vec<AuditEvent> {
        let recorded = self.recorded.lock().unwrap();
        recorded.iter().filter(|e| e.event_type == kind).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.recorded.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.recorded.lock().unwrap().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    #[test]
    fn test_memory_sink_filters_by_type() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent::new(AuditEventType::CommandInvoked).with_command("ping"))
            .unwrap();
        sink.record(AuditEvent::denied("mallory", "loopclick", 2, 0))
            .unwrap();

        assert_eq!(sink.len(), 2);
        let denied = sink.of_type(AuditEventType::PermissionDenied);
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].actor.as_deref(), Some("mallory"));
        assert_eq!(denied[0].detail.as_deref(), Some("required=2 actual=0"));
    }

    #[test]
    fn test_file_sink_persists_without_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let sink = FileAuditSink::open(&path).unwrap();
        sink.record(AuditEvent::denied("mallory", "loopclick", 2, 0))
            .unwrap();

        // Sink still open and never flushed explicitly
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), 1);
        assert!(written.contains("permission_denied"));
        drop(sink);
    }

    #[test]
    fn test_file_sink_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.jsonl");

        let sink = FileAuditSink::open(&path).unwrap();
        sink.record(
            AuditEvent::new(AuditEventType::ExtensionLoaded).with_extension("core-commands"),
        )
        .unwrap();
        sink.record(AuditEvent::new(AuditEventType::UnknownCommand).with_command("dance"))
            .unwrap();
        sink.flush().unwrap();

        let lines: Vec<String> = BufReader::new(File::open(&path).unwrap())
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["event_type"], "extension_loaded");
        assert_eq!(first["extension"], "core-commands");
        assert!(first.get("actor").is_none());
    }
}
