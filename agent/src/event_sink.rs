//! Ambient default [`EventSink`]: an append-only JSONL file (§6.3). This is
//! the ordinary audit-trail implementation every complete run carries.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use recon_core::event::{EventRecord, EventSink};
use serde_json::json;

/// Writes each [`EventRecord`] as one JSON line to a file, flushing after
/// every write so the log stays readable by `tail -f` during a run.
pub struct JsonlEventSink {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl std::fmt::Debug for JsonlEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlEventSink").field("path", &self.path).finish_non_exhaustive()
    }
}

impl JsonlEventSink {
    /// Opens (creating if needed) `path` in append mode.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened for appending.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path this sink writes to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlEventSink {
    fn emit(&self, record: EventRecord) {
        let line = json!({
            "timestamp": record.timestamp,
            "event_type": record.event_type,
            "goal_id": record.goal_id,
            "data": record.data,
        });

        let Ok(mut file) = self.file.lock() else {
            tracing::warn!("event sink mutex poisoned; dropping event");
            return;
        };

        if let Err(err) = writeln!(file, "{line}") {
            tracing::warn!(error = %err, "failed to append event to JSONL log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_json_line_per_event() {
        let dir = std::env::temp_dir().join(format!("recon-events-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("events.jsonl");

        let sink = JsonlEventSink::open(&path).unwrap();
        sink.emit(EventRecord::run("research_started", json!({"question": "x"})));
        sink.emit(EventRecord::goal("task_completed", "g1", json!({"ok": true})));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let _: serde_json::Value = serde_json::from_str(line).unwrap();
        }

        std::fs::remove_dir_all(&dir).ok();
    }
}
