use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Recording,
    Paused,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Prompt,
    Action,
    Terminal,
    Note,
    Checkpoint,
    Error,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prompt => "prompt",
            Self::Action => "action",
            Self::Terminal => "terminal",
            Self::Note => "note",
            Self::Checkpoint => "checkpoint",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteCategory {
    Observation,
    Decision,
    Blocker,
    Learning,
    Todo,
}

impl NoteCategory {
    pub const ALL: [NoteCategory; 5] = [
        Self::Observation,
        Self::Decision,
        Self::Blocker,
        Self::Learning,
        Self::Todo,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "observation" => Some(Self::Observation),
            "decision" => Some(Self::Decision),
            "blocker" => Some(Self::Blocker),
            "learning" => Some(Self::Learning),
            "todo" => Some(Self::Todo),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Decision => "decision",
            Self::Blocker => "blocker",
            Self::Learning => "learning",
            Self::Todo => "todo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalOutcome {
    Success,
    Failure,
    Partial,
}

impl TerminalOutcome {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" | "ok" => Some(Self::Success),
            "failure" | "failed" | "fail" => Some(Self::Failure),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }

    /// Outcome implied by a process exit code when none is given explicitly.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            Self::Success
        } else {
            Self::Failure
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Partial,
    Failed,
    Abandoned,
}

impl OutcomeStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "failed" | "failure" => Some(Self::Failed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_categories_parse_case_insensitively() {
        for category in NoteCategory::ALL {
            let upper = category.as_str().to_ascii_uppercase();
            assert_eq!(NoteCategory::parse(&upper), Some(category));
        }
        assert_eq!(NoteCategory::parse("rant"), None);
    }

    #[test]
    fn terminal_outcome_follows_exit_code() {
        assert_eq!(TerminalOutcome::from_exit_code(0), TerminalOutcome::Success);
        assert_eq!(TerminalOutcome::from_exit_code(2), TerminalOutcome::Failure);
        assert_eq!(TerminalOutcome::parse("FAILED"), Some(TerminalOutcome::Failure));
    }

    #[test]
    fn session_state_serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Paused).expect("serialize");
        assert_eq!(json, "\"paused\"");
    }
}
