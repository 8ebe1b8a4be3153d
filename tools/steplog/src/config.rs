use crate::errors::StepLogError;
use crate::logging::{DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::runtime::FileSystem;
use crate::session::DEFAULT_TITLE_PREFIX;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MIN_PAYLOAD_BYTES: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub feed_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub feed: FeedConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub title_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedConfig {
    pub path: Option<PathBuf>,
    pub poll_interval_ms: u64,
    /// Attach `record` at the current end of an existing feed file.
    pub start_at_end: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub pretty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

/// Directories every relative config path is resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeScope {
    pub process_cwd: PathBuf,
    pub working_dir: PathBuf,
}

impl RuntimeScope {
    pub fn resolve(&self, path: &Path) -> PathBuf {
        absolutize_path(&self.working_dir, path)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig {
                title_prefix: DEFAULT_TITLE_PREFIX.to_string(),
            },
            feed: FeedConfig {
                path: None,
                poll_interval_ms: 500,
                start_at_end: true,
            },
            output: OutputConfig {
                dir: PathBuf::from(".steplog/sessions"),
                pretty: true,
            },
            logging: LoggingConfig {
                path: PathBuf::from(".steplog/logs/run.jsonl"),
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    session: Option<PartialSessionConfig>,
    feed: Option<PartialFeedConfig>,
    output: Option<PartialOutputConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSessionConfig {
    title_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialFeedConfig {
    path: Option<PathBuf>,
    poll_interval_ms: Option<u64>,
    start_at_end: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialOutputConfig {
    dir: Option<PathBuf>,
    pretty: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<(AppConfig, RuntimeScope), StepLogError> {
    let mut cfg = AppConfig::default();
    let scope = resolve_scope(process_cwd, overrides);

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(&absolutize_path(process_cwd, path))?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| StepLogError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;
    Ok((cfg, scope))
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(session) = partial.session {
        if let Some(value) = session.title_prefix {
            cfg.session.title_prefix = value;
        }
    }

    if let Some(feed) = partial.feed {
        if let Some(path) = feed.path {
            cfg.feed.path = Some(path);
        }
        if let Some(value) = feed.poll_interval_ms {
            cfg.feed.poll_interval_ms = value;
        }
        if let Some(value) = feed.start_at_end {
            cfg.feed.start_at_end = value;
        }
    }

    if let Some(output) = partial.output {
        if let Some(dir) = output.dir {
            cfg.output.dir = dir;
        }
        if let Some(value) = output.pretty {
            cfg.output.pretty = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(path) = logging.path {
            cfg.logging.path = path;
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(feed) = &overrides.feed_path {
        cfg.feed.path = Some(feed.clone());
    }
    if let Some(dir) = &overrides.output_dir {
        cfg.output.dir = dir.clone();
    }
}

pub fn resolve_scope(process_cwd: &Path, overrides: &CliOverrides) -> RuntimeScope {
    let working_dir = match &overrides.working_dir {
        Some(path) => absolutize_path(process_cwd, path),
        None => process_cwd.to_path_buf(),
    };
    RuntimeScope {
        process_cwd: process_cwd.to_path_buf(),
        working_dir,
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), StepLogError> {
    if cfg.feed.poll_interval_ms == 0 {
        return Err(StepLogError::InvalidConfig(
            "feed.poll_interval_ms must be greater than zero".to_string(),
        ));
    }

    if cfg.output.dir.as_os_str().is_empty() || cfg.output.dir.to_string_lossy().trim().is_empty()
    {
        return Err(StepLogError::InvalidConfig(
            "output.dir must not be blank".to_string(),
        ));
    }

    if cfg.session.title_prefix.trim().is_empty() {
        return Err(StepLogError::InvalidConfig(
            "session.title_prefix must not be blank".to_string(),
        ));
    }

    if cfg.logging.max_payload_bytes < MIN_PAYLOAD_BYTES {
        return Err(StepLogError::InvalidConfig(format!(
            "logging.max_payload_bytes must be at least {MIN_PAYLOAD_BYTES}"
        )));
    }

    Ok(())
}
