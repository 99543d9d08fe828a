use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

const RESERVED_FIELDS: &[&str] = &["type", "session_id", "ts"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    RequestStarted,
    RequestFinished,
    RequestFailed,
    LocalCapability,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::RequestStarted => "request_started",
            EventKind::RequestFinished => "request_finished",
            EventKind::RequestFailed => "request_failed",
            EventKind::LocalCapability => "local_capability",
        }
    }
}

/// Session journal: one JSON object per line, headed by `type`, `session_id`
/// and `ts`. Payload fields with those names are dropped.
#[derive(Debug, Clone)]
pub struct EventWriter {
    journal: Arc<Journal>,
}

#[derive(Debug)]
struct Journal {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            journal: Arc::new(Journal {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.journal.path
    }

    pub fn record(&self, kind: EventKind, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::from(kind.as_str()));
        event.insert(
            "session_id".to_string(),
            Value::from(self.journal.session_id.as_str()),
        );
        event.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        event.extend(
            payload
                .into_iter()
                .filter(|(key, _)| !RESERVED_FIELDS.contains(&key.as_str())),
        );

        let event = Value::Object(event);
        self.journal.append(&event)?;
        Ok(event)
    }
}

impl Journal {
    fn append(&self, event: &Value) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event journal lock poisoned"))?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(&line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    fn journal_types(path: &Path) -> anyhow::Result<Vec<String>> {
        Ok(fs::read_to_string(path)?
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    #[test]
    fn record_writes_one_compact_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");

        let mut payload = EventPayload::new();
        payload.insert("operation".to_string(), Value::from("erase_foreground"));
        let emitted = writer.record(EventKind::RequestStarted, payload)?;

        let content = fs::read_to_string(&path)?;
        assert_eq!(content.lines().count(), 1);
        let parsed: Value = serde_json::from_str(content.trim_end())?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], "request_started");
        assert_eq!(parsed["session_id"], "session-1");
        assert_eq!(parsed["operation"], "erase_foreground");
        DateTime::parse_from_rfc3339(parsed["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn journal_appends_across_clones() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");
        let shared = writer.clone();

        writer.record(EventKind::RequestStarted, EventPayload::new())?;
        shared.record(EventKind::RequestFailed, EventPayload::new())?;

        assert_eq!(journal_types(&path)?, vec!["request_started", "request_failed"]);
        Ok(())
    }

    #[test]
    fn payload_cannot_rewrite_header_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-1");

        let mut payload = EventPayload::new();
        payload.insert("type".to_string(), Value::from("custom"));
        payload.insert("session_id".to_string(), Value::from("override"));
        payload.insert("latency_ms".to_string(), Value::from(12));
        let emitted = writer.record(EventKind::RequestFinished, payload)?;

        assert_eq!(emitted["type"], "request_finished");
        assert_eq!(emitted["session_id"], "session-1");
        assert_eq!(emitted["latency_ms"], 12);
        assert_eq!(journal_types(&path)?, vec!["request_finished"]);
        Ok(())
    }
}
