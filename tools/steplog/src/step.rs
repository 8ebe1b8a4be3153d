use crate::types::{NoteCategory, StepKind, TerminalOutcome};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub sequence: u64,
    pub elapsed_seconds: u64,
    #[serde(flatten)]
    pub payload: StepPayload,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepPayload {
    Prompt(PromptStep),
    Action(ActionStep),
    Terminal(TerminalStep),
    Note(NoteStep),
    Checkpoint(CheckpointStep),
    Error(ErrorStep),
}

impl StepPayload {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Prompt(_) => StepKind::Prompt,
            Self::Action(_) => StepKind::Action,
            Self::Terminal(_) => StepKind::Terminal,
            Self::Note(_) => StepKind::Note,
            Self::Checkpoint(_) => StepKind::Checkpoint,
            Self::Error(_) => StepKind::Error,
        }
    }

    /// One-line label used by status output and the run log.
    pub fn headline(&self) -> &str {
        match self {
            Self::Prompt(step) => &step.content,
            Self::Action(step) => &step.summary,
            Self::Terminal(step) => &step.command,
            Self::Note(step) => &step.content,
            Self::Checkpoint(step) => &step.name,
            Self::Error(step) => &step.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStep {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStep {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_created: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_modified: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_deleted: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approach: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalStep {
    pub command: String,
    pub outcome: TerminalOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteStep {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<NoteCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointStep {
    pub name: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStep {
    pub message: String,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptDetails {
    pub context: Option<Vec<String>>,
    pub intent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionDetails {
    pub files_created: Option<Vec<String>>,
    pub files_modified: Option<Vec<String>>,
    pub files_deleted: Option<Vec<String>>,
    pub approach: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminalDetails {
    pub summary: Option<String>,
    pub exit_code: Option<i32>,
}

impl PromptStep {
    pub fn new(content: impl Into<String>, details: PromptDetails) -> Self {
        Self {
            content: content.into(),
            context: non_empty_paths(details.context),
            intent: non_blank(details.intent),
        }
    }
}

impl ActionStep {
    pub fn new(summary: impl Into<String>, details: ActionDetails) -> Self {
        Self {
            summary: summary.into(),
            files_created: non_empty_paths(details.files_created),
            files_modified: non_empty_paths(details.files_modified),
            files_deleted: non_empty_paths(details.files_deleted),
            approach: non_blank(details.approach),
        }
    }
}

impl TerminalStep {
    pub fn new(command: impl Into<String>, outcome: TerminalOutcome, details: TerminalDetails) -> Self {
        Self {
            command: command.into(),
            outcome,
            summary: non_blank(details.summary),
            exit_code: details.exit_code,
        }
    }
}

/// Stable step id derived from the owning session and the step's sequence.
pub fn step_id(session_id: &str, sequence: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(b":");
    hasher.update(sequence.to_be_bytes());
    let digest = hasher.finalize();
    let hex = digest[..8]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    format!("step-{hex}")
}

/// Drops blank entries; an empty result is `None` so it is omitted on the wire.
pub fn non_empty_paths(paths: Option<Vec<String>>) -> Option<Vec<String>> {
    let paths = paths?
        .into_iter()
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .collect::<Vec<_>>();
    if paths.is_empty() {
        None
    } else {
        Some(paths)
    }
}

pub fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
