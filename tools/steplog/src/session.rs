use crate::artifact::{assemble, Artifact, EnvironmentInfo, SessionSnapshot, StopOutcome};
use crate::errors::StepLogError;
use crate::logging::append_run_log;
use crate::observers::{Observers, StateChange, SubscriptionId};
use crate::step::{
    step_id, ActionDetails, ActionStep, CheckpointStep, ErrorStep, NoteStep, PromptDetails,
    PromptStep, Step, StepPayload, TerminalDetails, TerminalStep,
};
use crate::runtime::Clock;
use crate::types::{NoteCategory, SessionState, StepKind, TerminalOutcome};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;

pub const DEFAULT_TITLE_PREFIX: &str = "Session";

/// Capability handed to producers. Producers call these opportunistically;
/// whether the write is accepted is the session's decision.
pub trait Recorder {
    fn record(&mut self, payload: StepPayload);

    fn add_prompt(&mut self, content: &str, details: PromptDetails) {
        self.record(StepPayload::Prompt(PromptStep::new(content, details)));
    }

    fn add_action(&mut self, summary: &str, details: ActionDetails) {
        self.record(StepPayload::Action(ActionStep::new(summary, details)));
    }

    fn add_note(&mut self, content: &str, category: Option<NoteCategory>) {
        self.record(StepPayload::Note(NoteStep {
            content: content.to_string(),
            category,
        }));
    }

    fn add_checkpoint(&mut self, name: &str, summary: &str) {
        self.record(StepPayload::Checkpoint(CheckpointStep {
            name: name.to_string(),
            summary: summary.to_string(),
        }));
    }

    fn add_error(&mut self, message: &str, resolved: bool, resolution: Option<&str>) {
        self.record(StepPayload::Error(ErrorStep {
            message: message.to_string(),
            resolved,
            resolution: resolution
                .filter(|text| !text.trim().is_empty())
                .map(str::to_string),
        }));
    }

    fn add_terminal(&mut self, command: &str, outcome: TerminalOutcome, details: TerminalDetails) {
        self.record(StepPayload::Terminal(TerminalStep::new(
            command, outcome, details,
        )));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub total_steps: usize,
    pub by_kind: BTreeMap<StepKind, usize>,
    pub files_created: usize,
    pub files_modified: usize,
    /// Distinct paths across the created and modified sets.
    pub files_touched: usize,
}

impl SessionStats {
    pub fn count(&self, kind: StepKind) -> usize {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub id: Option<String>,
    pub title: Option<String>,
    pub elapsed_seconds: u64,
    pub stats: SessionStats,
}

/// Every mutation takes `&mut self`, so accepting a step never interleaves
/// with another producer.
pub struct RecordingSession {
    clock: Arc<dyn Clock>,
    environment: EnvironmentInfo,
    title_prefix: String,
    observers: Observers,
    state: SessionState,
    id: String,
    title: String,
    started_at: Option<SystemTime>,
    paused_at: Option<SystemTime>,
    paused_total: Duration,
    last_elapsed: u64,
    next_sequence: u64,
    steps: Vec<Step>,
    files_created: BTreeSet<String>,
    files_modified: BTreeSet<String>,
}

impl RecordingSession {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            environment: EnvironmentInfo::detect(None),
            title_prefix: DEFAULT_TITLE_PREFIX.to_string(),
            observers: Observers::default(),
            state: SessionState::Idle,
            id: String::new(),
            title: String::new(),
            started_at: None,
            paused_at: None,
            paused_total: Duration::ZERO,
            last_elapsed: 0,
            next_sequence: 0,
            steps: Vec::new(),
            files_created: BTreeSet::new(),
            files_modified: BTreeSet::new(),
        }
    }

    pub fn with_environment(mut self, environment: EnvironmentInfo) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_title_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.title_prefix = prefix.into();
        self
    }

    // ── transitions ───────────────────────────────────────────────────────────

    /// `idle → recording`. Returns the fresh session id.
    pub fn start(&mut self, title: Option<&str>) -> Result<String, StepLogError> {
        if self.state != SessionState::Idle {
            return Err(StepLogError::Protocol(format!(
                "cannot start: session is already {}",
                self.state.as_str()
            )));
        }

        let now = self.clock.now();
        self.reset();
        self.id = uuid::Uuid::new_v4().to_string();
        self.title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => title.to_string(),
            None => default_title(&self.title_prefix, now),
        };
        self.started_at = Some(now);
        append_run_log(
            "info",
            "session.started",
            json!({ "session_id": self.id, "title": self.title }),
        );
        self.transition(SessionState::Recording);
        Ok(self.id.clone())
    }

    /// `recording → idle`. Assembles the artifact, then clears every trace of
    /// the run from the session.
    pub fn stop(&mut self, outcome: StopOutcome) -> Result<Artifact, StepLogError> {
        if self.state != SessionState::Recording {
            return Err(StepLogError::Protocol(format!(
                "cannot stop: session is {}",
                self.state.as_str()
            )));
        }

        let now = self.clock.now();
        let snapshot = SessionSnapshot {
            id: std::mem::take(&mut self.id),
            title: std::mem::take(&mut self.title),
            started_at: self.started_at.unwrap_or(now),
            duration_seconds: self.elapsed_at(now),
            steps: std::mem::take(&mut self.steps),
            files_created: std::mem::take(&mut self.files_created),
            files_modified: std::mem::take(&mut self.files_modified),
            environment: self.environment.clone(),
        };
        let artifact = assemble(snapshot, outcome);
        self.reset();

        append_run_log(
            "info",
            "session.stopped",
            json!({
                "session_id": artifact.metadata.id,
                "steps": artifact.steps.len(),
                "duration_seconds": artifact.metadata.duration_seconds,
                "status": artifact.outcome.status.as_str(),
            }),
        );
        self.transition(SessionState::Idle);
        Ok(artifact)
    }

    /// `recording → paused`. Freezes the elapsed-time clock.
    pub fn pause(&mut self) -> Result<(), StepLogError> {
        if self.state != SessionState::Recording {
            return Err(StepLogError::Protocol(format!(
                "cannot pause: session is {}",
                self.state.as_str()
            )));
        }
        self.paused_at = Some(self.clock.now());
        append_run_log("info", "session.paused", json!({ "session_id": self.id }));
        self.transition(SessionState::Paused);
        Ok(())
    }

    /// `paused → recording`. Paused wall time is excluded from all later
    /// elapsed values.
    pub fn resume(&mut self) -> Result<(), StepLogError> {
        if self.state != SessionState::Paused {
            return Err(StepLogError::Protocol(format!(
                "cannot resume: session is {}",
                self.state.as_str()
            )));
        }
        let now = self.clock.now();
        if let Some(paused_at) = self.paused_at.take() {
            let paused_for = now.duration_since(paused_at).unwrap_or_default();
            self.paused_total = self.paused_total.saturating_add(paused_for);
        }
        append_run_log(
            "info",
            "session.resumed",
            json!({ "session_id": self.id, "paused_seconds": self.paused_total.as_secs() }),
        );
        self.transition(SessionState::Recording);
        Ok(())
    }

    // ── mutation ──────────────────────────────────────────────────────────────

    /// Append a step if recording and its primary text is not blank; otherwise
    /// drop it. Returns the accepted step.
    pub fn append(&mut self, payload: StepPayload) -> Option<&Step> {
        if self.state != SessionState::Recording {
            append_run_log(
                "debug",
                "session.step.skipped",
                json!({
                    "state": self.state.as_str(),
                    "kind": payload.kind().as_str(),
                }),
            );
            return None;
        }
        if payload.headline().trim().is_empty() {
            append_run_log(
                "warn",
                "session.step.skipped",
                json!({
                    "state": self.state.as_str(),
                    "kind": payload.kind().as_str(),
                    "reason": "blank_content",
                }),
            );
            return None;
        }

        if let StepPayload::Action(action) = &payload {
            merge_paths(&mut self.files_created, action.files_created.as_deref());
            merge_paths(&mut self.files_modified, action.files_modified.as_deref());
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let elapsed_seconds = self.elapsed_at(self.clock.now());
        self.last_elapsed = elapsed_seconds;

        self.steps.push(Step {
            id: step_id(&self.id, sequence),
            sequence,
            elapsed_seconds,
            payload,
        });
        let step = self.steps.last()?;

        append_run_log(
            "debug",
            "session.step.accepted",
            json!({
                "session_id": self.id,
                "sequence": step.sequence,
                "kind": step.kind().as_str(),
                "elapsed_seconds": step.elapsed_seconds,
            }),
        );
        self.observers.notify_step(step);
        Some(step)
    }

    // ── observation ───────────────────────────────────────────────────────────

    pub fn subscribe_state(
        &mut self,
        callback: impl FnMut(&StateChange) + Send + 'static,
    ) -> SubscriptionId {
        self.observers.subscribe_state(callback)
    }

    pub fn subscribe_steps(&mut self, callback: impl FnMut(&Step) + Send + 'static) -> SubscriptionId {
        self.observers.subscribe_steps(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    // ── queries ───────────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == SessionState::Recording
    }

    pub fn id(&self) -> Option<&str> {
        (!self.id.is_empty()).then_some(self.id.as_str())
    }

    pub fn title(&self) -> Option<&str> {
        (!self.title.is_empty()).then_some(self.title.as_str())
    }

    pub fn elapsed_seconds(&self) -> u64 {
        if self.started_at.is_none() {
            return 0;
        }
        self.elapsed_at(self.clock.now())
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn prompt_count(&self) -> usize {
        self.count_kind(StepKind::Prompt)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn stats(&self) -> SessionStats {
        let mut by_kind = BTreeMap::new();
        for step in &self.steps {
            *by_kind.entry(step.kind()).or_insert(0) += 1;
        }
        SessionStats {
            total_steps: self.steps.len(),
            by_kind,
            files_created: self.files_created.len(),
            files_modified: self.files_modified.len(),
            files_touched: self.files_created.union(&self.files_modified).count(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            id: self.id().map(str::to_string),
            title: self.title().map(str::to_string),
            elapsed_seconds: self.elapsed_seconds(),
            stats: self.stats(),
        }
    }

    // ── internals ─────────────────────────────────────────────────────────────

    fn count_kind(&self, kind: StepKind) -> usize {
        self.steps.iter().filter(|step| step.kind() == kind).count()
    }

    /// Active (unpaused) seconds since start; never smaller than the last
    /// value handed out, even if the wall clock steps backwards.
    fn elapsed_at(&self, now: SystemTime) -> u64 {
        let Some(started_at) = self.started_at else {
            return 0;
        };
        let reference = self.paused_at.unwrap_or(now);
        let active = reference
            .duration_since(started_at)
            .unwrap_or_default()
            .saturating_sub(self.paused_total);
        active.as_secs().max(self.last_elapsed)
    }

    fn transition(&mut self, next: SessionState) {
        let change = StateChange {
            previous: self.state,
            current: next,
        };
        self.state = next;
        self.observers.notify_state(&change);
    }

    fn reset(&mut self) {
        self.id.clear();
        self.title.clear();
        self.started_at = None;
        self.paused_at = None;
        self.paused_total = Duration::ZERO;
        self.last_elapsed = 0;
        self.next_sequence = 0;
        self.steps.clear();
        self.files_created.clear();
        self.files_modified.clear();
    }
}

impl Recorder for RecordingSession {
    fn record(&mut self, payload: StepPayload) {
        let _ = self.append(payload);
    }
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("state", &self.state)
            .field("id", &self.id)
            .field("title", &self.title)
            .field("steps", &self.steps.len())
            .field("observers", &self.observers)
            .finish()
    }
}

fn merge_paths(into: &mut BTreeSet<String>, paths: Option<&[String]>) {
    for path in paths.unwrap_or_default() {
        into.insert(path.clone());
    }
}

fn default_title(prefix: &str, now: SystemTime) -> String {
    format!("{prefix} {}", OffsetDateTime::from(now).date())
}
