use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Append-only structured log, one compact JSON object per line.
///
/// Every line carries `event`, `actor` and `ts`; the caller payload is merged
/// after those and cannot replace them. A log built with [`EventLog::disabled`]
/// accepts events and drops them.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: Option<PathBuf>,
    actor: String,
    /// Shared by every handle derived through [`EventLog::for_actor`].
    lock: Arc<Mutex<()>>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, actor: impl Into<String>) -> Self {
        Self::build(Some(path.into()), actor.into(), Arc::new(Mutex::new(())))
    }

    pub fn disabled() -> Self {
        Self::build(None, String::new(), Arc::new(Mutex::new(())))
    }

    fn build(path: Option<PathBuf>, actor: String, lock: Arc<Mutex<()>>) -> Self {
        Self {
            inner: Arc::new(EventLogInner { path, actor, lock }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Same file, different actor.
    pub fn for_actor(&self, actor: impl Into<String>) -> Self {
        Self::build(
            self.inner.path.clone(),
            actor.into(),
            Arc::clone(&self.inner.lock),
        )
    }

    pub fn emit(&self, event: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut record = Map::new();
        for (key, value) in payload {
            record.insert(key, value);
        }
        record.insert("event".to_string(), Value::String(event.to_string()));
        record.insert("actor".to_string(), Value::String(self.inner.actor.clone()));
        record.insert("ts".to_string(), Value::String(now_utc_iso()));

        let Some(path) = self.inner.path.as_deref() else {
            return Ok(Value::Object(record));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;

        Ok(Value::Object(record))
    }

    /// Emits and swallows write failures; used on paths where logging must
    /// never change the outcome.
    pub fn note(&self, event: &str, payload: EventPayload) {
        if let Err(err) = self.emit(event, payload) {
            eprintln!("wardrobe: failed to record {event} event: {err:#}");
        }
    }
}

/// Reads every well-formed line of an events file.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .collect())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
