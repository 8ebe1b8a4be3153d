use crate::artifact::StopOutcome;
use crate::driver::DriverHandle;
use crate::errors::StepLogError;
use crate::logging::append_run_log;
use crate::manual::{Capture, Entry, ManualAdapter, Prompter};
use crate::report::status_line;
use crate::runtime::Terminal;
use crate::types::{OutcomeStatus, SessionState};
use serde_json::json;

const COMMAND_LABEL: &str = "steplog";

const HELP: &[&str] = &[
    "prompt [text]          record a prompt (no text: guided)",
    "action [summary]       record an action",
    "note [text]            record a note",
    "checkpoint [name]      record a checkpoint",
    "error [message]        record an error",
    "terminal [command]     record a terminal command",
    "pause | resume         suspend or continue recording",
    "status                 show the session summary",
    "stop [status] [text]   finish and save (status: success/partial/failed/abandoned)",
    "help                   show this list",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand<'a> {
    Capture { verb: &'a str, rest: &'a str },
    Pause,
    Resume,
    Status,
    Stop(StopOutcome),
    Help,
    Empty,
    Unknown(&'a str),
}

fn parse_command(line: &str) -> ConsoleCommand<'_> {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleCommand::Empty;
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    match verb {
        "prompt" | "action" | "note" | "checkpoint" | "error" | "terminal" => {
            ConsoleCommand::Capture { verb, rest }
        }
        "pause" => ConsoleCommand::Pause,
        "resume" => ConsoleCommand::Resume,
        "status" => ConsoleCommand::Status,
        "stop" => ConsoleCommand::Stop(parse_stop(rest)),
        "help" | "?" => ConsoleCommand::Help,
        other => ConsoleCommand::Unknown(other),
    }
}

/// `stop [status] [summary…]`: the first word is a status only if it parses as one.
fn parse_stop(rest: &str) -> StopOutcome {
    let (first, tail) = match rest.split_once(char::is_whitespace) {
        Some((first, tail)) => (first, tail.trim()),
        None => (rest, ""),
    };
    match OutcomeStatus::parse(first) {
        Some(status) => StopOutcome {
            status: Some(status),
            summary: Some(tail.to_string()).filter(|s| !s.is_empty()),
        },
        None => StopOutcome {
            status: None,
            summary: Some(rest.to_string()).filter(|s| !s.is_empty()),
        },
    }
}

/// Runs until `stop` or end of input. The session must already be recording
/// and is left recording (never paused) on return.
pub fn run_console(
    handle: &DriverHandle,
    prompter: &mut dyn Prompter,
    terminal: &dyn Terminal,
) -> Result<StopOutcome, StepLogError> {
    let mut producer = handle.clone();
    terminal.write_line("Type `help` for commands, `stop` to finish.")?;

    loop {
        let Some(line) = prompter.ask(COMMAND_LABEL)? else {
            append_run_log("info", "console.input.closed", json!({}));
            if handle.status()?.state == SessionState::Paused {
                handle.resume()?;
            }
            return Ok(StopOutcome::default());
        };

        match parse_command(&line) {
            ConsoleCommand::Empty => {}
            ConsoleCommand::Help => {
                for line in HELP {
                    terminal.write_line(line)?;
                }
            }
            ConsoleCommand::Unknown(verb) => {
                terminal.write_line(&format!("unknown command `{verb}`; try `help`"))?;
            }
            ConsoleCommand::Status => {
                terminal.write_line(&status_line(&handle.status()?))?;
            }
            ConsoleCommand::Pause => report(terminal, handle.pause(), "paused")?,
            ConsoleCommand::Resume => report(terminal, handle.resume(), "resumed")?,
            ConsoleCommand::Stop(outcome) => {
                if handle.status()?.state == SessionState::Paused {
                    terminal.write_line("session is paused; resume before stopping")?;
                    continue;
                }
                return Ok(outcome);
            }
            ConsoleCommand::Capture { verb, rest } => {
                let state = handle.status()?.state;
                if state != SessionState::Recording {
                    terminal.write_line(&format!(
                        "not recording ({}); nothing captured",
                        state.as_str()
                    ))?;
                    continue;
                }
                let entry = if rest.is_empty() {
                    Entry::Guided
                } else {
                    Entry::Quick(rest)
                };
                let mut adapter = ManualAdapter::new(&mut *prompter);
                let capture = match verb {
                    "prompt" => adapter.capture_prompt(&mut producer, entry)?,
                    "action" => adapter.capture_action(&mut producer, entry)?,
                    "note" => adapter.capture_note(&mut producer, entry)?,
                    "checkpoint" => adapter.capture_checkpoint(&mut producer, entry)?,
                    "error" => adapter.capture_error(&mut producer, entry)?,
                    _ => adapter.capture_terminal(&mut producer, entry)?,
                };
                match capture {
                    Capture::Submitted(kind) => {
                        terminal.write_line(&format!("recorded {}", kind.as_str()))?
                    }
                    Capture::Cancelled => terminal.write_line("cancelled")?,
                }
            }
        }
    }
}

fn report(
    terminal: &dyn Terminal,
    result: Result<(), StepLogError>,
    done: &str,
) -> Result<(), StepLogError> {
    match result {
        Ok(()) => terminal.write_line(done),
        Err(err) => terminal.write_line(&format!("error: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SessionDriver;
    use crate::manual::ScriptedPrompter;
    use crate::runtime::{FakeClock, FakeTerminal};
    use crate::session::RecordingSession;
    use crate::types::StepKind;
    use std::sync::Arc;

    fn recording() -> (DriverHandle, SessionDriver) {
        let (handle, driver) =
            SessionDriver::spawn(RecordingSession::new(Arc::new(FakeClock::default())));
        handle.start(Some("Console")).expect("start");
        (handle, driver)
    }

    #[test]
    fn stop_parses_optional_status_and_summary() {
        assert_eq!(parse_stop(""), StopOutcome::default());
        assert_eq!(
            parse_stop("partial ran out of time"),
            StopOutcome {
                status: Some(OutcomeStatus::Partial),
                summary: Some("ran out of time".to_string()),
            }
        );
        assert_eq!(
            parse_stop("wrapped up early"),
            StopOutcome {
                status: None,
                summary: Some("wrapped up early".to_string()),
            }
        );
    }

    #[test]
    fn commands_dispatch_to_adapter_and_stop_returns_artifact() {
        let (handle, driver) = recording();
        let mut prompter = ScriptedPrompter::new([
            "prompt Create a hello world function",
            "action",
            "Wrote hello.rs",
            "hello.rs",
            "",
            "",
            "",
            "bogus",
            "stop success done",
        ]);
        let terminal = FakeTerminal::new(false);

        let outcome = run_console(&handle, &mut prompter, &terminal).expect("console");
        let artifact = handle.stop(outcome).expect("stop");
        assert_eq!(artifact.steps.len(), 2);
        assert_eq!(artifact.count_of(StepKind::Prompt), 1);
        assert_eq!(artifact.outcome.files_created, 1);
        assert_eq!(artifact.outcome.summary, "done");

        let lines = terminal.written_lines();
        assert!(lines.contains(&"recorded prompt".to_string()));
        assert!(lines.contains(&"recorded action".to_string()));
        assert!(lines.contains(&"unknown command `bogus`; try `help`".to_string()));

        drop(handle);
        driver.join().expect("join");
    }

    #[test]
    fn paused_console_refuses_captures() {
        let (handle, driver) = recording();
        let mut prompter = ScriptedPrompter::new([
            "pause",
            "note while paused",
            "stop",
            "resume",
            "note after",
            "stop",
        ]);
        let terminal = FakeTerminal::new(false);

        let outcome = run_console(&handle, &mut prompter, &terminal).expect("console");
        let artifact = handle.stop(outcome).expect("stop");
        assert_eq!(artifact.steps.len(), 1);
        assert_eq!(artifact.steps[0].payload.headline(), "after");
        let lines = terminal.written_lines();
        assert!(lines.contains(&"not recording (paused); nothing captured".to_string()));
        assert!(lines.contains(&"session is paused; resume before stopping".to_string()));

        drop(handle);
        driver.join().expect("join");
    }

    #[test]
    fn end_of_input_ends_the_loop_with_default_outcome() {
        let (handle, driver) = recording();
        let mut prompter = ScriptedPrompter::new(["note only a note", "pause"]);
        let terminal = FakeTerminal::new(false);

        let outcome = run_console(&handle, &mut prompter, &terminal).expect("console");
        assert_eq!(outcome, StopOutcome::default());
        assert_eq!(handle.status().expect("status").state, SessionState::Recording);

        let artifact = handle.stop(outcome).expect("stop");
        assert_eq!(artifact.steps.len(), 1);
        assert_eq!(artifact.outcome.status, OutcomeStatus::Abandoned);

        drop(handle);
        driver.join().expect("join");
    }
}
