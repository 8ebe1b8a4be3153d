use crate::artifact::Artifact;
use crate::session::SessionStatus;
use crate::step::{Step, StepPayload};
use crate::types::StepKind;
use std::fmt::Write as _;

/// `M:SS` under an hour, `H:MM:SS` otherwise.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

pub fn status_line(status: &SessionStatus) -> String {
    let title = status.title.as_deref().unwrap_or("-");
    format!(
        "{} | {} | {} | {} steps ({} prompts)",
        status.state.as_str(),
        title,
        format_duration(status.elapsed_seconds),
        status.stats.total_steps,
        status.stats.count(StepKind::Prompt),
    )
}

pub fn render_markdown(artifact: &Artifact) -> String {
    let meta = &artifact.metadata;
    let outcome = &artifact.outcome;
    let mut out = String::new();

    let _ = writeln!(out, "# {}", meta.title);
    let _ = writeln!(out);
    let _ = writeln!(out, "- id: `{}`", meta.id);
    let _ = writeln!(out, "- created: {}", meta.created_at);
    let _ = writeln!(out, "- duration: {}", format_duration(meta.duration_seconds));
    let _ = writeln!(
        out,
        "- recorder: {} {} ({}/{})",
        meta.environment.recorder,
        meta.environment.recorder_version,
        meta.environment.os,
        meta.environment.arch
    );
    let _ = writeln!(out, "- replicable: {}", if meta.replicable { "yes" } else { "no" });
    let _ = writeln!(out);

    let _ = writeln!(out, "## Outcome");
    let _ = writeln!(out);
    let _ = writeln!(out, "**{}**: {}", outcome.status.as_str(), outcome.summary);
    let _ = writeln!(
        out,
        "Files created: {}, files modified: {}",
        outcome.files_created, outcome.files_modified
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "## Steps ({})", artifact.steps.len());
    let _ = writeln!(out);
    if artifact.steps.is_empty() {
        let _ = writeln!(out, "_No steps recorded._");
    }
    for step in &artifact.steps {
        render_step(&mut out, step);
    }
    out
}

fn render_step(out: &mut String, step: &Step) {
    let _ = writeln!(
        out,
        "{}. [{}] `{}` {}",
        step.sequence + 1,
        format_duration(step.elapsed_seconds),
        step.kind().as_str(),
        step.payload.headline()
    );
    match &step.payload {
        StepPayload::Prompt(prompt) => {
            detail(out, "intent", prompt.intent.as_deref());
            paths(out, "context", prompt.context.as_deref());
        }
        StepPayload::Action(action) => {
            paths(out, "created", action.files_created.as_deref());
            paths(out, "modified", action.files_modified.as_deref());
            paths(out, "deleted", action.files_deleted.as_deref());
            detail(out, "approach", action.approach.as_deref());
        }
        StepPayload::Terminal(terminal) => {
            let exit = terminal
                .exit_code
                .map(|code| format!(" (exit {code})"))
                .unwrap_or_default();
            let _ = writeln!(out, "   - outcome: {}{exit}", terminal.outcome.as_str());
            detail(out, "summary", terminal.summary.as_deref());
        }
        StepPayload::Note(note) => {
            detail(out, "category", note.category.map(|c| c.as_str()));
        }
        StepPayload::Checkpoint(checkpoint) => {
            detail(out, "summary", Some(checkpoint.summary.as_str()));
        }
        StepPayload::Error(error) => {
            let state = if error.resolved { "resolved" } else { "unresolved" };
            let _ = writeln!(out, "   - {state}");
            detail(out, "resolution", error.resolution.as_deref());
        }
    }
}

fn detail(out: &mut String, label: &str, value: Option<&str>) {
    if let Some(value) = value {
        let _ = writeln!(out, "   - {label}: {value}");
    }
}

fn paths(out: &mut String, label: &str, value: Option<&[String]>) {
    if let Some(paths) = value {
        let joined = paths
            .iter()
            .map(|path| format!("`{path}`"))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "   - {label}: {joined}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{assemble, EnvironmentInfo, SessionSnapshot, StopOutcome};
    use crate::step::{ErrorStep, PromptDetails, PromptStep, TerminalDetails, TerminalStep};
    use crate::types::TerminalOutcome;
    use std::collections::BTreeSet;
    use std::time::{Duration, UNIX_EPOCH};

    fn artifact(payloads: Vec<StepPayload>) -> Artifact {
        let steps = payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| Step {
                id: format!("step-{index}"),
                sequence: index as u64,
                elapsed_seconds: 65 * index as u64,
                payload,
            })
            .collect();
        assemble(
            SessionSnapshot {
                id: "abc".to_string(),
                title: "Build a parser".to_string(),
                started_at: UNIX_EPOCH + Duration::from_secs(1_767_323_045),
                duration_seconds: 3_725,
                steps,
                files_created: BTreeSet::new(),
                files_modified: BTreeSet::new(),
                environment: EnvironmentInfo {
                    recorder: "steplog".to_string(),
                    recorder_version: "0.1.0".to_string(),
                    os: "linux".to_string(),
                    arch: "x86_64".to_string(),
                    working_dir: None,
                },
            },
            StopOutcome::default(),
        )
    }

    #[test]
    fn durations_switch_to_hours() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(65), "1:05");
        assert_eq!(format_duration(3_725), "1:02:05");
    }

    #[test]
    fn markdown_lists_steps_with_details() {
        let text = render_markdown(&artifact(vec![
            StepPayload::Prompt(PromptStep::new(
                "Write the lexer",
                PromptDetails {
                    context: Some(vec!["src/lexer.rs".to_string()]),
                    intent: None,
                },
            )),
            StepPayload::Terminal(TerminalStep::new(
                "cargo test",
                TerminalOutcome::Failure,
                TerminalDetails {
                    summary: None,
                    exit_code: Some(101),
                },
            )),
            StepPayload::Error(ErrorStep {
                message: "off by one".to_string(),
                resolved: true,
                resolution: Some("fixed the range".to_string()),
            }),
        ]));

        assert!(text.starts_with("# Build a parser\n"));
        assert!(text.contains("- duration: 1:02:05"));
        assert!(text.contains("**success**: Recorded 3 steps"));
        assert!(text.contains("1. [0:00] `prompt` Write the lexer"));
        assert!(text.contains("   - context: `src/lexer.rs`"));
        assert!(text.contains("2. [1:05] `terminal` cargo test"));
        assert!(text.contains("   - outcome: failure (exit 101)"));
        assert!(text.contains("   - resolution: fixed the range"));
        assert!(!text.contains("intent"));
    }

    #[test]
    fn empty_artifact_says_so() {
        let text = render_markdown(&artifact(vec![]));
        assert!(text.contains("## Steps (0)"));
        assert!(text.contains("_No steps recorded._"));
        assert!(text.contains("- replicable: no"));
    }
}
