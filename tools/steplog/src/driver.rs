use crate::artifact::{Artifact, StopOutcome};
use crate::errors::StepLogError;
use crate::logging::append_run_log;
use crate::session::{Recorder, RecordingSession, SessionStatus};
use crate::step::StepPayload;
use serde_json::json;
use std::thread;
use tokio::sync::{mpsc, oneshot};

const COMMAND_CAPACITY: usize = 128;

type Reply<T> = oneshot::Sender<Result<T, StepLogError>>;

#[derive(Debug)]
enum Command {
    Start {
        title: Option<String>,
        reply: Reply<String>,
    },
    Stop {
        outcome: StopOutcome,
        reply: Reply<Artifact>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Record(StepPayload),
}

/// Owns the session on its own thread; receive order is acceptance order.
pub struct SessionDriver {
    join: thread::JoinHandle<RecordingSession>,
}

impl SessionDriver {
    /// Move `session` onto its own thread. The thread exits once every
    /// `DriverHandle` has been dropped.
    pub fn spawn(session: RecordingSession) -> (DriverHandle, SessionDriver) {
        let (tx, mut rx) = mpsc::channel::<Command>(COMMAND_CAPACITY);
        let join = thread::spawn(move || {
            let mut session = session;
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    Command::Start { title, reply } => {
                        let _ = reply.send(session.start(title.as_deref()));
                    }
                    Command::Stop { outcome, reply } => {
                        let _ = reply.send(session.stop(outcome));
                    }
                    Command::Pause { reply } => {
                        let _ = reply.send(session.pause());
                    }
                    Command::Resume { reply } => {
                        let _ = reply.send(session.resume());
                    }
                    Command::Status { reply } => {
                        let _ = reply.send(session.status());
                    }
                    Command::Record(payload) => {
                        session.record(payload);
                    }
                }
            }
            session
        });
        (DriverHandle { tx }, SessionDriver { join })
    }

    /// Wait for the driver loop to finish and take the session back.
    pub fn join(self) -> Result<RecordingSession, StepLogError> {
        self.join
            .join()
            .map_err(|_| StepLogError::ChannelClosed("session driver panicked".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct DriverHandle {
    tx: mpsc::Sender<Command>,
}

impl DriverHandle {
    pub fn start(&self, title: Option<&str>) -> Result<String, StepLogError> {
        self.request(|reply| Command::Start {
            title: title.map(str::to_string),
            reply,
        })?
    }

    pub fn stop(&self, outcome: StopOutcome) -> Result<Artifact, StepLogError> {
        self.request(|reply| Command::Stop { outcome, reply })?
    }

    pub fn pause(&self) -> Result<(), StepLogError> {
        self.request(|reply| Command::Pause { reply })?
    }

    pub fn resume(&self) -> Result<(), StepLogError> {
        self.request(|reply| Command::Resume { reply })?
    }

    pub fn status(&self) -> Result<SessionStatus, StepLogError> {
        self.request(|reply| Command::Status { reply })
    }

    fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, StepLogError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .blocking_send(build(reply_tx))
            .map_err(|e| StepLogError::ChannelClosed(e.to_string()))?;
        reply_rx
            .blocking_recv()
            .map_err(|e| StepLogError::ChannelClosed(e.to_string()))
    }
}

impl Recorder for DriverHandle {
    fn record(&mut self, payload: StepPayload) {
        let kind = payload.kind();
        if self.tx.blocking_send(Command::Record(payload)).is_err() {
            append_run_log(
                "warn",
                "driver.record.dropped",
                json!({ "kind": kind.as_str(), "reason": "driver closed" }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeClock;
    use crate::step::PromptDetails;
    use crate::types::SessionState;
    use std::sync::Arc;

    fn driver() -> (DriverHandle, SessionDriver) {
        SessionDriver::spawn(RecordingSession::new(Arc::new(FakeClock::default())))
    }

    #[test]
    fn control_errors_travel_back_to_the_caller() {
        let (handle, driver) = driver();
        assert!(matches!(
            handle.stop(StopOutcome::default()),
            Err(StepLogError::Protocol(_))
        ));
        handle.start(Some("T")).expect("start");
        assert!(handle.start(Some("T")).is_err());
        drop(handle);
        let session = driver.join().expect("join");
        assert_eq!(session.state(), SessionState::Recording);
    }

    #[test]
    fn concurrent_producers_keep_their_own_order() {
        let (handle, driver) = driver();
        handle.start(Some("T")).expect("start");

        let workers = (0..4)
            .map(|worker| {
                let mut producer = handle.clone();
                thread::spawn(move || {
                    for n in 0..25 {
                        producer.add_note(&format!("w{worker}-{n}"), None);
                    }
                })
            })
            .collect::<Vec<_>>();
        for worker in workers {
            worker.join().expect("producer thread");
        }

        let artifact = handle.stop(StopOutcome::default()).expect("stop");
        assert_eq!(artifact.steps.len(), 100);
        for (index, step) in artifact.steps.iter().enumerate() {
            assert_eq!(step.sequence, index as u64);
        }
        for worker in 0..4 {
            let prefix = format!("w{worker}-");
            let own = artifact
                .steps
                .iter()
                .map(|step| step.payload.headline().to_string())
                .filter(|text| text.starts_with(&prefix))
                .collect::<Vec<_>>();
            let expected = (0..25).map(|n| format!("w{worker}-{n}")).collect::<Vec<_>>();
            assert_eq!(own, expected);
        }

        drop(handle);
        driver.join().expect("join");
    }

    #[test]
    fn status_reflects_recorded_steps() {
        let (handle, driver) = driver();
        handle.start(Some("Status")).expect("start");
        let mut producer = handle.clone();
        producer.add_prompt("hello", PromptDetails::default());

        let status = handle.status().expect("status");
        assert_eq!(status.state, SessionState::Recording);
        assert_eq!(status.title.as_deref(), Some("Status"));
        assert_eq!(status.stats.total_steps, 1);

        drop(producer);
        drop(handle);
        driver.join().expect("join");
    }

    #[test]
    fn idle_writes_through_a_handle_are_dropped() {
        let (handle, driver) = driver();
        let mut producer = handle.clone();
        producer.add_note("before start", None);
        let status = handle.status().expect("status");
        assert_eq!(status.state, SessionState::Idle);
        assert_eq!(status.stats.total_steps, 0);

        drop(producer);
        drop(handle);
        let session = driver.join().expect("join");
        assert_eq!(session.step_count(), 0);
    }
}
