pub mod artifact;
pub mod config;
pub mod console;
pub mod driver;
pub mod errors;
pub mod feed;
pub mod log_retention;
pub mod logging;
pub mod manual;
pub mod observers;
pub mod report;
pub mod runtime;
pub mod session;
pub mod sink;
pub mod step;
pub mod types;

use artifact::{Artifact, EnvironmentInfo, StopOutcome};
use clap::{error::ErrorKind, Parser, Subcommand};
use config::{load_config, AppConfig, CliOverrides, RuntimeScope};
use console::run_console;
use driver::SessionDriver;
use errors::StepLogError;
use feed::{FeedPoller, FeedReader};
use logging::{append_run_log, clear_run_logger, init_run_logger, structured_fallback_line, JsonlLogger};
use manual::{LinePrompter, Prompter};
use report::render_markdown;
use runtime::ProductionRuntime;
use serde_json::json;
use session::RecordingSession;
use sink::{ArtifactSink, JsonFileSink};
use std::path::{Path, PathBuf};
use std::time::Duration;
use types::{OutcomeStatus, SessionState};

#[derive(Debug, Clone, Parser)]
#[command(name = "steplog", version)]
#[command(about = "Record development sessions as ordered, replayable step logs")]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, global = true)]
    pub working_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Record interactively from stdin, optionally tailing a JSONL feed.
    Record {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        feed: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Turn a complete JSONL feed into one artifact.
    Convert {
        #[arg(long)]
        feed: PathBuf,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, value_parser = parse_status)]
        status: Option<OutcomeStatus>,
        #[arg(long)]
        summary: Option<String>,
    },
    /// Print a Markdown summary of a saved artifact.
    Show { path: PathBuf },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::Record { .. } => "record",
            Self::Convert { .. } => "convert",
            Self::Show { .. } => "show",
        }
    }
}

fn parse_status(value: &str) -> Result<OutcomeStatus, String> {
    OutcomeStatus::parse(value).ok_or_else(|| {
        format!("unknown status `{value}` (expected success, partial, failed or abandoned)")
    })
}

pub fn run() -> Result<i32, StepLogError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| StepLogError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, StepLogError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(StepLogError::Cli(error.to_string())),
        },
    };

    let (feed_path, output_dir) = match &cli.command {
        Command::Record { feed, out, .. } => (feed.clone(), out.clone()),
        Command::Convert { feed, out, .. } => (Some(feed.clone()), out.clone()),
        Command::Show { .. } => (None, None),
    };
    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        working_dir: cli.working_dir.clone(),
        feed_path,
        output_dir,
    };
    let (cfg, scope) = load_config(&overrides, cwd, runtime.file_system.as_ref())?;

    init_run_logger(JsonlLogger {
        path: scope.resolve(&cfg.logging.path),
        max_payload_bytes: cfg.logging.max_payload_bytes,
        budget_bytes: cfg.logging.budget_bytes,
    })?;
    append_run_log(
        "info",
        "cli.started",
        json!({
            "command": cli.command.name(),
            "working_dir": scope.working_dir.display().to_string(),
        }),
    );

    let result = match &cli.command {
        Command::Record { title, .. } => record(runtime, &cfg, &scope, title.as_deref()),
        Command::Convert {
            title,
            status,
            summary,
            ..
        } => convert(
            runtime,
            &cfg,
            &scope,
            title.as_deref(),
            StopOutcome {
                status: *status,
                summary: summary.clone(),
            },
        ),
        Command::Show { path } => show(runtime, &scope, path),
    };

    if let Err(error) = &result {
        append_run_log(
            "error",
            "cli.failed",
            json!({ "command": cli.command.name(), "error": error.to_string() }),
        );
    }
    clear_run_logger();
    result
}

fn new_session(runtime: &ProductionRuntime, cfg: &AppConfig, scope: &RuntimeScope) -> RecordingSession {
    let mut session = RecordingSession::new(runtime.clock.clone())
        .with_environment(EnvironmentInfo::detect(Some(&scope.working_dir)))
        .with_title_prefix(cfg.session.title_prefix.clone());
    session.subscribe_state(|change| {
        append_run_log(
            "debug",
            "session.state.changed",
            json!({
                "from": change.previous.as_str(),
                "to": change.current.as_str(),
            }),
        );
    });
    session
}

fn sink_for(runtime: &ProductionRuntime, cfg: &AppConfig, scope: &RuntimeScope) -> JsonFileSink {
    JsonFileSink::new(
        runtime.file_system.clone(),
        scope.resolve(&cfg.output.dir),
        cfg.output.pretty,
    )
}

fn record(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    scope: &RuntimeScope,
    title: Option<&str>,
) -> Result<i32, StepLogError> {
    let stdin = std::io::stdin();
    let mut prompter = LinePrompter::new(stdin.lock(), std::io::stdout());
    record_with(runtime, cfg, scope, title, &mut prompter)
}

/// A failing console or feed still stops the session and writes the
/// artifact; the first failure is returned afterwards.
fn record_with(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    scope: &RuntimeScope,
    title: Option<&str>,
    prompter: &mut dyn Prompter,
) -> Result<i32, StepLogError> {
    let (handle, driver) = SessionDriver::spawn(new_session(runtime, cfg, scope));
    let session_id = handle.start(title)?;
    let status = handle.status()?;
    announce(
        runtime,
        &session_id,
        &format!(
            "recording \"{}\"",
            status.title.as_deref().unwrap_or_default()
        ),
    )?;

    let poller = match &cfg.feed.path {
        Some(path) => {
            let path = scope.resolve(path);
            let reader = if cfg.feed.start_at_end {
                FeedReader::attach_at_end(&path)?
            } else {
                FeedReader::new(&path)
            };
            append_run_log(
                "info",
                "feed.attached",
                json!({ "path": path.display().to_string(), "offset": reader.offset() }),
            );
            Some(FeedPoller::spawn(
                reader,
                handle.clone(),
                runtime.clock.clone(),
                Duration::from_millis(cfg.feed.poll_interval_ms),
            ))
        }
        None => None,
    };

    let console_result = run_console(&handle, prompter, runtime.terminal.as_ref());

    // Drain the feed before the session stops so late lines are not dropped.
    let drained = match poller {
        Some(poller) => poller.finish().map(|_| ()),
        None => Ok(()),
    };
    let outcome = match &console_result {
        Ok(outcome) => outcome.clone(),
        Err(error) => {
            append_run_log(
                "error",
                "console.failed",
                json!({ "session_id": session_id, "error": error.to_string() }),
            );
            StopOutcome::default()
        }
    };
    if handle.status()?.state == SessionState::Paused {
        handle.resume()?;
    }
    let artifact = handle.stop(outcome)?;
    drop(handle);
    driver.join()?;

    let path = sink_for(runtime, cfg, scope).write(&artifact)?;
    console_result?;
    drained?;
    summarize(runtime, &artifact, &path)?;
    Ok(0)
}

fn convert(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    scope: &RuntimeScope,
    title: Option<&str>,
    outcome: StopOutcome,
) -> Result<i32, StepLogError> {
    let Some(feed_path) = cfg.feed.path.as_ref().map(|path| scope.resolve(path)) else {
        return Err(StepLogError::Cli("convert requires --feed".to_string()));
    };
    if !runtime.file_system.exists(&feed_path) {
        return Err(StepLogError::Io(format!(
            "feed not found: {}",
            feed_path.display()
        )));
    }

    let mut session = new_session(runtime, cfg, scope);
    session.start(title)?;
    let mut reader = FeedReader::new(&feed_path);
    let report = reader.poll(&mut session)?;
    let artifact = session.stop(outcome)?;

    let path = sink_for(runtime, cfg, scope).write(&artifact)?;
    if report.skipped > 0 {
        runtime
            .terminal
            .write_line(&format!("skipped {} malformed feed lines", report.skipped))?;
    }
    summarize(runtime, &artifact, &path)?;
    Ok(0)
}

fn show(runtime: &ProductionRuntime, scope: &RuntimeScope, path: &Path) -> Result<i32, StepLogError> {
    let text = runtime.file_system.read_to_string(&scope.resolve(path))?;
    let artifact = Artifact::from_json(&text)?;
    runtime.terminal.write_line(render_markdown(&artifact).trim_end())?;
    Ok(0)
}

/// Human line on a terminal, key=value line otherwise.
fn announce(runtime: &ProductionRuntime, session_id: &str, message: &str) -> Result<(), StepLogError> {
    if runtime.terminal.stdin_is_tty() {
        runtime.terminal.write_line(message)
    } else {
        runtime
            .terminal
            .write_line(&structured_fallback_line(session_id, "recording", message))
    }
}

fn summarize(runtime: &ProductionRuntime, artifact: &Artifact, path: &Path) -> Result<(), StepLogError> {
    runtime.terminal.write_line(&format!(
        "saved {} steps ({}) to {}",
        artifact.steps.len(),
        artifact.outcome.status.as_str(),
        path.display()
    ))
}
