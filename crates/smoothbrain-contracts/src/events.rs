use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ModelKind;

/// Everything a session records. Serialized with the variant name as `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    PackCompleted {
        shot_count: usize,
        source: String,
        fallback_reason: Option<String>,
    },
    PromptRefined {
        target_model: String,
        refined: bool,
    },
    ModelsScanned {
        kind: ModelKind,
        count: usize,
        skipped: usize,
    },
    DescriptorSkipped {
        path: PathBuf,
        reason: String,
    },
    ProjectSaved {
        path: PathBuf,
        shot_count: usize,
    },
    AssetImported {
        source: PathBuf,
        stored: PathBuf,
    },
    BatchStarted {
        batch_id: String,
        kind: ModelKind,
        shots: Vec<u32>,
    },
    ShotStarted {
        batch_id: String,
        index: u32,
        model: String,
    },
    ShotSucceeded {
        batch_id: String,
        index: u32,
        artifact: PathBuf,
    },
    ShotFailed {
        batch_id: String,
        index: u32,
        error: String,
    },
    ShotCancelled {
        batch_id: String,
        index: u32,
    },
    BatchFinished {
        batch_id: String,
        succeeded: usize,
        failed: usize,
        cancelled: bool,
    },
}

/// Append-only writer for `events.jsonl`.
///
/// - every line is one compact JSON object
/// - `type` comes from the event, `session_id` and `ts` are added by the writer
/// - clones share one lock, so concurrent emitters never interleave a line
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event: &SessionEvent) -> anyhow::Result<Value> {
        let mut record = match serde_json::to_value(event)? {
            Value::Object(map) => map,
            other => anyhow::bail!("event serialized to non-object: {other}"),
        };
        record.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        record.insert("ts".to_string(), Value::String(now_utc_iso()));

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&record)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(record))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
