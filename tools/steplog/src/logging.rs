use crate::errors::StepLogError;
use crate::log_retention::enforce_total_budget;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), StepLogError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StepLogError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| StepLogError::Serialization(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StepLogError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| StepLogError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| StepLogError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            let _ = enforce_total_budget(parent, self.budget_bytes, &self.path)?;
        }

        Ok(())
    }
}

// ── Process-wide run log ──────────────────────────────────────────────────────

static RUN_LOGGER: OnceLock<Mutex<Option<JsonlLogger>>> = OnceLock::new();

fn logger_slot() -> &'static Mutex<Option<JsonlLogger>> {
    RUN_LOGGER.get_or_init(|| Mutex::new(None))
}

/// Install `logger` as the destination for `append_run_log`.
pub fn init_run_logger(logger: JsonlLogger) -> Result<(), StepLogError> {
    if let Some(parent) = logger.path.parent() {
        fs::create_dir_all(parent).map_err(|e| StepLogError::Io(e.to_string()))?;
    }
    let mut slot = logger_slot()
        .lock()
        .map_err(|_| StepLogError::Io("run logger lock poisoned".to_string()))?;
    *slot = Some(logger);
    Ok(())
}

pub fn clear_run_logger() {
    if let Ok(mut slot) = logger_slot().lock() {
        *slot = None;
    }
}

/// Append one event to the run log. No-op when no logger is installed; write
/// failures are swallowed so diagnostics never change recording behaviour.
pub fn append_run_log(level: &str, event_type: &str, payload: Value) {
    let logger = match logger_slot().lock() {
        Ok(slot) => slot.clone(),
        Err(_) => return,
    };
    if let Some(logger) = logger {
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

pub fn structured_fallback_line(session_id: &str, state: &str, message: &str) -> String {
    format!(
        "session_id={session_id} state={state} message={} ",
        message.replace('\n', "\\n")
    )
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{
        append_run_log, clear_run_logger, init_run_logger, structured_fallback_line, JsonlLogger,
        LogEvent,
    };
    use serde_json::json;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;
        logger.budget_bytes = 1024;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "session.step.accepted",
                payload: json!({"text": "abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"session.step.accepted\""));
        assert!(text.contains("..."));
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 12;

        logger
            .append(&LogEvent {
                level: "debug",
                event_type: "feed.line.skipped",
                payload: json!({"t": "ééééééééé"}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        let line: serde_json::Value = serde_json::from_str(text.trim()).expect("valid json");
        assert!(line["payload"].as_str().expect("string payload").ends_with("..."));
    }

    #[test]
    fn global_run_log_is_noop_until_installed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("run.jsonl");

        init_run_logger(JsonlLogger::new(&path)).expect("init");
        append_run_log("info", "test.logger.installed", json!({"probe": 1}));
        clear_run_logger();
        append_run_log("info", "test.logger.cleared", json!({"probe": 2}));

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("test.logger.installed"));
        assert!(!text.contains("test.logger.cleared"));
    }

    #[test]
    fn fallback_line_is_deterministic() {
        let line = structured_fallback_line("s1", "recording", "hello\nworld");
        assert_eq!(line, "session_id=s1 state=recording message=hello\\nworld ");
    }
}
