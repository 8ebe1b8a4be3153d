use crate::errors::StepLogError;
use crate::step::Step;
use crate::types::{OutcomeStatus, StepKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const ARTIFACT_VERSION: &str = "1.0";
pub const ARTIFACT_FORMAT: &str = "steplog.session";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub version: String,
    pub format: String,
    pub metadata: ArtifactMetadata,
    pub steps: Vec<Step>,
    pub outcome: ArtifactOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub duration_seconds: u64,
    pub replicable: bool,
    #[serde(flatten)]
    pub environment: EnvironmentInfo,
}

/// Descriptors of the machine and tool that produced the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub recorder: String,
    pub recorder_version: String,
    pub os: String,
    pub arch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl EnvironmentInfo {
    pub fn detect(working_dir: Option<&Path>) -> Self {
        Self {
            recorder: env!("CARGO_PKG_NAME").to_string(),
            recorder_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            working_dir: working_dir.map(|dir| dir.display().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactOutcome {
    pub status: OutcomeStatus,
    pub summary: String,
    pub files_created: usize,
    pub files_modified: usize,
    pub can_replicate: bool,
}

/// Caller-supplied overrides for the computed outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOutcome {
    pub status: Option<OutcomeStatus>,
    pub summary: Option<String>,
}

/// Everything the session hands over to assembly when it stops.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: String,
    pub title: String,
    pub started_at: SystemTime,
    pub duration_seconds: u64,
    pub steps: Vec<Step>,
    pub files_created: BTreeSet<String>,
    pub files_modified: BTreeSet<String>,
    pub environment: EnvironmentInfo,
}

pub fn assemble(snapshot: SessionSnapshot, requested: StopOutcome) -> Artifact {
    let replicable = snapshot
        .steps
        .iter()
        .any(|step| step.kind() == StepKind::Prompt);
    let status = requested.status.unwrap_or(if replicable {
        OutcomeStatus::Success
    } else {
        OutcomeStatus::Abandoned
    });
    let summary = requested
        .summary
        .filter(|summary| !summary.trim().is_empty())
        .unwrap_or_else(|| format!("Recorded {} steps", snapshot.steps.len()));

    Artifact {
        version: ARTIFACT_VERSION.to_string(),
        format: ARTIFACT_FORMAT.to_string(),
        metadata: ArtifactMetadata {
            id: snapshot.id,
            title: snapshot.title,
            created_at: format_timestamp(snapshot.started_at),
            duration_seconds: snapshot.duration_seconds,
            replicable,
            environment: snapshot.environment,
        },
        outcome: ArtifactOutcome {
            status,
            summary,
            files_created: snapshot.files_created.len(),
            files_modified: snapshot.files_modified.len(),
            can_replicate: replicable,
        },
        steps: snapshot.steps,
    }
}

impl Artifact {
    pub fn from_json(text: &str) -> Result<Self, StepLogError> {
        let artifact: Self =
            serde_json::from_str(text).map_err(|e| StepLogError::Serialization(e.to_string()))?;
        if artifact.format != ARTIFACT_FORMAT {
            return Err(StepLogError::Serialization(format!(
                "unsupported artifact format `{}`",
                artifact.format
            )));
        }
        Ok(artifact)
    }

    pub fn to_json(&self, pretty: bool) -> Result<String, StepLogError> {
        let rendered = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        rendered.map_err(|e| StepLogError::Serialization(e.to_string()))
    }

    pub fn count_of(&self, kind: StepKind) -> usize {
        self.steps.iter().filter(|step| step.kind() == kind).count()
    }
}

/// RFC 3339 in UTC; falls back to raw unix seconds for unrepresentable times.
pub fn format_timestamp(at: SystemTime) -> String {
    OffsetDateTime::from(at)
        .format(&Rfc3339)
        .unwrap_or_else(|_| {
            let secs = at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            secs.to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{ActionDetails, ActionStep, NoteStep, PromptDetails, PromptStep, StepPayload};
    use std::time::Duration;

    fn environment() -> EnvironmentInfo {
        EnvironmentInfo {
            recorder: "steplog".to_string(),
            recorder_version: "0.0.0".to_string(),
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
            working_dir: None,
        }
    }

    fn snapshot(payloads: Vec<StepPayload>) -> SessionSnapshot {
        let steps = payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| Step {
                id: format!("step-{index}"),
                sequence: index as u64,
                elapsed_seconds: index as u64,
                payload,
            })
            .collect();
        SessionSnapshot {
            id: "session-1".to_string(),
            title: "T".to_string(),
            started_at: UNIX_EPOCH + Duration::from_secs(1_767_323_045),
            duration_seconds: 42,
            steps,
            files_created: BTreeSet::new(),
            files_modified: BTreeSet::new(),
            environment: environment(),
        }
    }

    #[test]
    fn prompt_presence_drives_default_outcome() {
        let with_prompt = assemble(
            snapshot(vec![StepPayload::Prompt(PromptStep::new(
                "Create a hello world function",
                PromptDetails::default(),
            ))]),
            StopOutcome::default(),
        );
        assert!(with_prompt.metadata.replicable);
        assert!(with_prompt.outcome.can_replicate);
        assert_eq!(with_prompt.outcome.status, OutcomeStatus::Success);
        assert_eq!(with_prompt.outcome.summary, "Recorded 1 steps");

        let without_prompt = assemble(
            snapshot(vec![
                StepPayload::Action(ActionStep::new("Manual edit", ActionDetails::default())),
                StepPayload::Note(NoteStep {
                    content: "Fixed a typo".to_string(),
                    category: None,
                }),
            ]),
            StopOutcome::default(),
        );
        assert!(!without_prompt.metadata.replicable);
        assert_eq!(without_prompt.outcome.status, OutcomeStatus::Abandoned);
    }

    #[test]
    fn explicit_outcome_overrides_defaults() {
        let artifact = assemble(
            snapshot(vec![]),
            StopOutcome {
                status: Some(OutcomeStatus::Partial),
                summary: Some("half done".to_string()),
            },
        );
        assert_eq!(artifact.outcome.status, OutcomeStatus::Partial);
        assert_eq!(artifact.outcome.summary, "half done");
        assert!(!artifact.outcome.can_replicate);
    }

    #[test]
    fn created_at_is_rfc3339_utc() {
        let artifact = assemble(snapshot(vec![]), StopOutcome::default());
        assert_eq!(artifact.metadata.created_at, "2026-01-02T03:04:05Z");
    }

    #[test]
    fn wire_format_uses_camel_case_and_flattens_environment() {
        let artifact = assemble(snapshot(vec![]), StopOutcome::default());
        let value = serde_json::to_value(&artifact).expect("serialize");
        assert_eq!(value["format"], ARTIFACT_FORMAT);
        assert_eq!(value["metadata"]["durationSeconds"], 42);
        assert_eq!(value["metadata"]["recorder"], "steplog");
        assert!(value["metadata"].get("workingDir").is_none());
        assert_eq!(value["outcome"]["canReplicate"], false);

        let back = Artifact::from_json(&artifact.to_json(true).expect("json")).expect("parse");
        assert_eq!(back, artifact);
    }

    #[test]
    fn foreign_formats_are_rejected() {
        let mut artifact = assemble(snapshot(vec![]), StopOutcome::default());
        artifact.format = "other".to_string();
        let text = artifact.to_json(false).expect("json");
        assert!(matches!(
            Artifact::from_json(&text),
            Err(StepLogError::Serialization(message)) if message.contains("unsupported")
        ));
    }
}
