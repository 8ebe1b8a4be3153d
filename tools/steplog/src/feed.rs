use crate::errors::StepLogError;
use crate::logging::append_run_log;
use crate::runtime::Clock;
use crate::session::Recorder;
use crate::step::{
    non_blank, ActionDetails, ActionStep, CheckpointStep, ErrorStep, NoteStep, PromptDetails,
    PromptStep, StepPayload, TerminalDetails, TerminalStep,
};
use crate::types::{NoteCategory, TerminalOutcome};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedLineError {
    #[error("line is not valid UTF-8: {0}")]
    InvalidUtf8(String),
    #[error("line is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("unrecognized entry: {0}")]
    InvalidEntry(String),
    #[error("{kind} entry is missing `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

impl FeedLineError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidUtf8(_) => "invalid_utf8",
            Self::InvalidJson(_) => "invalid_json",
            Self::InvalidEntry(_) => "invalid_entry",
            Self::MissingField { .. } => "missing_field",
        }
    }
}

/// A validated feed line, ready to become one mutation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub payload: StepPayload,
    /// The producer supplied its own `timestamp`. It is not used for ordering
    /// or elapsed time; the flag only exists so the loss can be traced.
    pub declared_timestamp: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawEntry {
    Prompt(RawPrompt),
    Action(RawAction),
    Note(RawNote),
    Error(RawError),
    Checkpoint(RawCheckpoint),
    Terminal(RawTerminal),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPrompt {
    content: Option<String>,
    summary: Option<String>,
    raw_text: Option<String>,
    context: Option<Vec<String>>,
    intent: Option<String>,
    timestamp: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    summary: Option<String>,
    files_created: Option<Vec<String>>,
    files_modified: Option<Vec<String>>,
    files_deleted: Option<Vec<String>>,
    approach: Option<String>,
    timestamp: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNote {
    content: Option<String>,
    category: Option<Value>,
    timestamp: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawError {
    message: Option<String>,
    resolved: Option<bool>,
    resolution: Option<String>,
    timestamp: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCheckpoint {
    name: Option<String>,
    summary: Option<String>,
    timestamp: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTerminal {
    command: Option<String>,
    outcome: Option<String>,
    summary: Option<String>,
    exit_code: Option<i32>,
    timestamp: Option<Value>,
}

pub fn parse_feed_line(line: &str) -> Result<FeedEntry, FeedLineError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| FeedLineError::InvalidJson(e.to_string()))?;
    let raw: RawEntry =
        serde_json::from_value(value).map_err(|e| FeedLineError::InvalidEntry(e.to_string()))?;

    let (payload, timestamp) = match raw {
        RawEntry::Prompt(raw) => (prompt_payload(&raw)?, raw.timestamp),
        RawEntry::Action(raw) => {
            let summary = required(raw.summary, "action", "summary")?;
            let details = ActionDetails {
                files_created: raw.files_created,
                files_modified: raw.files_modified,
                files_deleted: raw.files_deleted,
                approach: raw.approach,
            };
            (
                StepPayload::Action(ActionStep::new(summary, details)),
                raw.timestamp,
            )
        }
        RawEntry::Note(raw) => {
            let content = required(raw.content, "note", "content")?;
            let category = raw
                .category
                .as_ref()
                .and_then(Value::as_str)
                .and_then(NoteCategory::parse);
            (
                StepPayload::Note(NoteStep { content, category }),
                raw.timestamp,
            )
        }
        RawEntry::Error(raw) => {
            let message = required(raw.message, "error", "message")?;
            (
                StepPayload::Error(ErrorStep {
                    message,
                    resolved: raw.resolved.unwrap_or(false),
                    resolution: non_blank(raw.resolution),
                }),
                raw.timestamp,
            )
        }
        RawEntry::Checkpoint(raw) => {
            let name = required(raw.name, "checkpoint", "name")?;
            let summary = required(raw.summary, "checkpoint", "summary")?;
            (
                StepPayload::Checkpoint(CheckpointStep { name, summary }),
                raw.timestamp,
            )
        }
        RawEntry::Terminal(raw) => {
            let command = required(raw.command, "terminal", "command")?;
            let outcome = raw
                .outcome
                .as_deref()
                .and_then(TerminalOutcome::parse)
                .or_else(|| raw.exit_code.map(TerminalOutcome::from_exit_code))
                .ok_or(FeedLineError::MissingField {
                    kind: "terminal",
                    field: "outcome",
                })?;
            let details = TerminalDetails {
                summary: raw.summary,
                exit_code: raw.exit_code,
            };
            (
                StepPayload::Terminal(TerminalStep::new(command, outcome, details)),
                raw.timestamp,
            )
        }
    };

    Ok(FeedEntry {
        payload,
        declared_timestamp: timestamp.is_some_and(|value| !value.is_null()),
    })
}

/// `rawText` is authoritative when present; the short `content` (or
/// `summary`) then becomes the intent unless an explicit intent exists.
fn prompt_payload(raw: &RawPrompt) -> Result<StepPayload, FeedLineError> {
    let short = non_blank(raw.content.clone()).or_else(|| non_blank(raw.summary.clone()));
    let explicit_intent = non_blank(raw.intent.clone());

    let (content, intent) = match non_blank(raw.raw_text.clone()) {
        Some(raw_text) => (raw_text, explicit_intent.or(short)),
        None => {
            let content = short.ok_or(FeedLineError::MissingField {
                kind: "prompt",
                field: "content",
            })?;
            (content, explicit_intent)
        }
    };

    Ok(StepPayload::Prompt(PromptStep::new(
        content,
        PromptDetails {
            context: raw.context.clone(),
            intent,
        },
    )))
}

fn required(
    value: Option<String>,
    kind: &'static str,
    field: &'static str,
) -> Result<String, FeedLineError> {
    non_blank(value).ok_or(FeedLineError::MissingField { kind, field })
}

// ── FeedReader ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollReport {
    pub applied: usize,
    pub skipped: usize,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct FeedReader {
    path: PathBuf,
    offset: u64,
}

impl FeedReader {
    /// Read the feed from its first byte.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            offset: 0,
        }
    }

    /// Skip whatever the feed already holds; only later appends are read.
    pub fn attach_at_end(path: impl AsRef<Path>) -> Result<Self, StepLogError> {
        let path = path.as_ref().to_path_buf();
        let offset = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(StepLogError::Io(format!("{}: {e}", path.display()))),
        };
        Ok(Self { path, offset })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Apply every complete line appended since the last poll. A trailing
    /// line without its newline is left for the next poll.
    pub fn poll(&mut self, recorder: &mut dyn Recorder) -> Result<PollReport, StepLogError> {
        let mut report = PollReport {
            offset: self.offset,
            ..PollReport::default()
        };

        let len = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(StepLogError::Io(format!("{}: {e}", self.path.display()))),
        };

        if len < self.offset {
            append_run_log(
                "warn",
                "feed.truncated",
                json!({
                    "path": self.path.display().to_string(),
                    "previous_offset": self.offset,
                    "len": len,
                }),
            );
            self.offset = 0;
        }
        if len == self.offset {
            report.offset = self.offset;
            return Ok(report);
        }

        let chunk = read_from(&self.path, self.offset)?;
        let Some(last_newline) = chunk.iter().rposition(|b| *b == b'\n') else {
            report.offset = self.offset;
            return Ok(report);
        };
        let complete = &chunk[..=last_newline];

        let mut line_offset = self.offset;
        for raw_line in complete.split_inclusive(|b| *b == b'\n') {
            let at = line_offset;
            line_offset += raw_line.len() as u64;

            let parsed = match std::str::from_utf8(raw_line) {
                Ok(text) if text.trim().is_empty() => continue,
                Ok(text) => parse_feed_line(text.trim()),
                Err(e) => Err(FeedLineError::InvalidUtf8(e.to_string())),
            };

            match parsed {
                Ok(entry) => {
                    if entry.declared_timestamp {
                        append_run_log(
                            "debug",
                            "feed.entry.timestamp_ignored",
                            json!({ "offset": at, "kind": entry.payload.kind().as_str() }),
                        );
                    }
                    recorder.record(entry.payload);
                    report.applied += 1;
                }
                Err(error) => {
                    append_run_log(
                        "warn",
                        "feed.line.skipped",
                        json!({
                            "path": self.path.display().to_string(),
                            "offset": at,
                            "reason": error.reason(),
                            "detail": error.to_string(),
                        }),
                    );
                    report.skipped += 1;
                }
            }
        }

        self.offset += complete.len() as u64;
        report.offset = self.offset;
        Ok(report)
    }
}

fn read_from(path: &Path, offset: u64) -> Result<Vec<u8>, StepLogError> {
    let mut file = File::open(path).map_err(|e| StepLogError::Io(format!("{}: {e}", path.display())))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| StepLogError::Io(e.to_string()))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .map_err(|e| StepLogError::Io(e.to_string()))?;
    Ok(buf)
}

// ── Background polling ────────────────────────────────────────────────────────

pub struct FeedPoller {
    stop: Arc<AtomicBool>,
    join: thread::JoinHandle<FeedReader>,
}

impl FeedPoller {
    /// Poll `reader` every `interval` on a background thread, feeding
    /// `recorder`, until `finish` is called.
    pub fn spawn<R>(
        mut reader: FeedReader,
        mut recorder: R,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self
    where
        R: Recorder + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let join = thread::spawn(move || {
            loop {
                let stopping = stop_flag.load(Ordering::SeqCst);
                if let Err(error) = reader.poll(&mut recorder) {
                    append_run_log(
                        "warn",
                        "feed.poll_failed",
                        json!({ "path": reader.path().display().to_string(), "error": error.to_string() }),
                    );
                }
                if stopping {
                    break;
                }
                clock.sleep(interval);
            }
            reader
        });
        Self { stop, join }
    }

    /// Signal the poller, let it drain the feed one last time, and take the
    /// reader back.
    pub fn finish(self) -> Result<FeedReader, StepLogError> {
        self.stop.store(true, Ordering::SeqCst);
        self.join
            .join()
            .map_err(|_| StepLogError::Io("feed poller panicked".to_string()))
    }
}
