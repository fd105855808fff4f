use cadence_core::{CadenceResult, Clock, SprintId, SystemClock};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// What an [`AuditEntry`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A sprint was started.
    SprintStarted,
    /// A sprint was stopped or concluded.
    SprintStopped,
    /// A standup was held.
    Standup,
    /// A completion assessment was recorded.
    Assessment,
    /// A continuation decision was made.
    Decision,
    /// An escalation was raised.
    Escalation,
    /// A resource conflict was detected.
    Conflict,
    /// A conflict resolution was suggested.
    Resolution,
}

/// One immutable line of the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the entry was recorded, from the trail's clock.
    pub timestamp: DateTime<Utc>,
    /// Sprint the entry belongs to, if any.
    pub sprint_id: Option<SprintId>,
    /// Entry category.
    pub kind: AuditKind,
    /// One-line human-readable summary.
    pub summary: String,
    /// The recorded value, serialized.
    pub details: serde_json::Value,
}

/// Append-only audit trail of decisions, escalations, conflicts, and sprint
/// lifecycle events.
///
/// Entries are kept in memory and, when a file sink is configured, also
/// streamed as JSON lines by a background task.
pub struct AuditTrail {
    entries: Mutex<Vec<AuditEntry>>,
    sink: Mutex<Option<mpsc::UnboundedSender<AuditEntry>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    clock: Arc<dyn Clock>,
}

impl AuditTrail {
    /// An in-memory trail with no file sink.
    pub fn in_memory() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// In-memory trail stamping entries from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            writer: Mutex::new(None),
            clock,
        }
    }

    /// Also append every entry to `<log_dir>/audit.jsonl`.
    ///
    /// Spawns the writer on the current tokio runtime.
    pub fn with_file_sink(self, log_dir: PathBuf) -> Self {
        self.attach_file_sink(log_dir);
        self
    }

    /// Like [`with_file_sink`](Self::with_file_sink) for a trail that is
    /// already shared. Replaces any previous sink.
    pub fn attach_file_sink(&self, log_dir: PathBuf) {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEntry>();

        let handle = tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
                warn!(error = %e, dir = %log_dir.display(), "Cannot create audit directory");
                return;
            }
            let log_file = log_dir.join("audit.jsonl");
            let mut file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .await
            {
                Ok(file) => file,
                Err(e) => {
                    warn!(error = %e, file = %log_file.display(), "Cannot open audit log");
                    return;
                }
            };

            while let Some(entry) = rx.recv().await {
                let Ok(line) = serde_json::to_string(&entry) else {
                    continue;
                };
                if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                    warn!(error = %e, "Failed to write audit entry");
                }
            }
            let _ = file.flush().await;
        });

        *self.sink.lock() = Some(tx);
        *self.writer.lock() = Some(handle);
    }

    /// Append an entry. `details` is stored as JSON; a value that fails to
    /// serialize is recorded as `null`.
    pub fn record<T: Serialize>(
        &self,
        sprint_id: Option<&str>,
        kind: AuditKind,
        summary: impl Into<String>,
        details: &T,
    ) {
        let details = serde_json::to_value(details).unwrap_or_else(|e| {
            warn!(error = %e, "Audit details not serializable");
            serde_json::Value::Null
        });
        let entry = AuditEntry {
            timestamp: self.clock.now(),
            sprint_id: sprint_id.map(str::to_string),
            kind,
            summary: summary.into(),
            details,
        };
        info!(
            sprint_id = ?entry.sprint_id,
            kind = ?entry.kind,
            summary = %entry.summary,
            "audit"
        );
        if let Some(tx) = self.sink.lock().as_ref() {
            let _ = tx.send(entry.clone());
        }
        self.entries.lock().push(entry);
    }

    /// All entries in the order they were recorded.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Entries of one kind, in recording order.
    pub fn entries_of(&self, kind: AuditKind) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of entries recorded.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Close the file sink and wait for pending lines to be written.
    pub async fn close(&self) -> CadenceResult<()> {
        drop(self.sink.lock().take());
        let handle = self.writer.lock().take();
        if let Some(handle) = handle {
            handle.await.map_err(|e| {
                cadence_core::CadenceError::Io(std::io::Error::other(e.to_string()))
            })?;
        }
        Ok(())
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_append_order() {
        let trail = AuditTrail::in_memory();
        trail.record(Some("s1"), AuditKind::SprintStarted, "started", &());
        trail.record(
            Some("s1"),
            AuditKind::Decision,
            "AutoContinue",
            &serde_json::json!({"reason": "ok"}),
        );
        let entries = trail.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, AuditKind::SprintStarted);
        assert_eq!(entries[1].details["reason"], "ok");
        assert_eq!(trail.entries_of(AuditKind::Decision).len(), 1);
    }

    #[tokio::test]
    async fn test_file_sink_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let trail = AuditTrail::in_memory().with_file_sink(dir.path().join("audit"));
        trail.record(None, AuditKind::Escalation, "developer-1 blocked", &());
        trail.record(Some("s1"), AuditKind::SprintStopped, "stopped", &());
        trail.close().await.unwrap();

        let content = tokio::fs::read_to_string(dir.path().join("audit").join("audit.jsonl"))
            .await
            .unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.kind, AuditKind::Escalation);
        assert!(first.sprint_id.is_none());
    }
}
