use crate::artifact::Artifact;
use crate::errors::StepLogError;
use crate::logging::append_run_log;
use crate::runtime::FileSystem;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SLUG_MAX_CHARS: usize = 48;

/// Destination for finished artifacts.
pub trait ArtifactSink {
    /// Persist `artifact` and return where it went.
    fn write(&self, artifact: &Artifact) -> Result<PathBuf, StepLogError>;
}

/// Writes `<dir>/<title-slug>-<id>.json`.
pub struct JsonFileSink {
    file_system: Arc<dyn FileSystem>,
    dir: PathBuf,
    pretty: bool,
}

impl JsonFileSink {
    pub fn new(file_system: Arc<dyn FileSystem>, dir: impl Into<PathBuf>, pretty: bool) -> Self {
        Self {
            file_system,
            dir: dir.into(),
            pretty,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, artifact: &Artifact) -> PathBuf {
        let slug = slugify(&artifact.metadata.title);
        let name = if slug.is_empty() {
            format!("{}.json", artifact.metadata.id)
        } else {
            format!("{slug}-{}.json", artifact.metadata.id)
        };
        self.dir.join(name)
    }
}

impl ArtifactSink for JsonFileSink {
    fn write(&self, artifact: &Artifact) -> Result<PathBuf, StepLogError> {
        let body = artifact.to_json(self.pretty)?;
        let path = self.path_for(artifact);
        self.file_system.create_dir_all(&self.dir)?;
        if let Err(err) = self.file_system.write_string(&path, &format!("{body}\n")) {
            append_run_log(
                "error",
                "sink.write.failed",
                json!({ "path": path.display().to_string(), "error": err.to_string() }),
            );
            return Err(err);
        }
        append_run_log(
            "info",
            "sink.write.completed",
            json!({
                "path": path.display().to_string(),
                "session_id": artifact.metadata.id,
                "steps": artifact.steps.len(),
            }),
        );
        Ok(path)
    }
}

/// Lowercase ASCII alphanumerics joined by single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let mut slug = slug.trim_end_matches('-').to_string();
    if slug.len() > SLUG_MAX_CHARS {
        slug.truncate(SLUG_MAX_CHARS);
        slug = slug.trim_end_matches('-').to_string();
    }
    slug
}
