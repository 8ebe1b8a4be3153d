use crate::errors::StepLogError;
use crate::session::Recorder;
use crate::step::{ActionDetails, PromptDetails, TerminalDetails};
use crate::types::{NoteCategory, StepKind, TerminalOutcome};
use std::collections::VecDeque;
use std::io::{BufRead, Write};

pub trait Prompter {
    /// `Ok(None)` means the user cancelled or input is exhausted.
    fn ask(&mut self, label: &str) -> Result<Option<String>, StepLogError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    Submitted(StepKind),
    Cancelled,
}

/// How the required content is obtained and whether follow-ups are asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry<'a> {
    /// Content already supplied; record it without follow-up questions.
    Quick(&'a str),
    /// Ask for the content and every follow-up field.
    Guided,
}

pub struct ManualAdapter<'a> {
    prompter: &'a mut dyn Prompter,
}

impl<'a> ManualAdapter<'a> {
    pub fn new(prompter: &'a mut dyn Prompter) -> Self {
        Self { prompter }
    }

    pub fn capture_prompt(
        &mut self,
        recorder: &mut dyn Recorder,
        entry: Entry<'_>,
    ) -> Result<Capture, StepLogError> {
        let Some(content) = self.content(entry, "Prompt text")? else {
            return Ok(Capture::Cancelled);
        };
        let mut details = PromptDetails::default();
        if entry == Entry::Guided {
            details.context = self.file_list("Context files (comma separated, optional)")?;
            details.intent = self.optional("Intent (optional)")?;
        }
        recorder.add_prompt(&content, details);
        Ok(Capture::Submitted(StepKind::Prompt))
    }

    pub fn capture_action(
        &mut self,
        recorder: &mut dyn Recorder,
        entry: Entry<'_>,
    ) -> Result<Capture, StepLogError> {
        let Some(summary) = self.content(entry, "What was done")? else {
            return Ok(Capture::Cancelled);
        };
        let mut details = ActionDetails::default();
        if entry == Entry::Guided {
            details.files_created = self.file_list("Files created (comma separated, optional)")?;
            details.files_modified = self.file_list("Files modified (comma separated, optional)")?;
            details.files_deleted = self.file_list("Files deleted (comma separated, optional)")?;
            details.approach = self.optional("Approach (optional)")?;
        }
        recorder.add_action(&summary, details);
        Ok(Capture::Submitted(StepKind::Action))
    }

    pub fn capture_note(
        &mut self,
        recorder: &mut dyn Recorder,
        entry: Entry<'_>,
    ) -> Result<Capture, StepLogError> {
        let Some(content) = self.content(entry, "Note")? else {
            return Ok(Capture::Cancelled);
        };
        let category = if entry == Entry::Guided {
            let names = NoteCategory::ALL.map(NoteCategory::as_str).join("/");
            self.optional(&format!("Category ({names}, optional)"))?
                .as_deref()
                .and_then(NoteCategory::parse)
        } else {
            None
        };
        recorder.add_note(&content, category);
        Ok(Capture::Submitted(StepKind::Note))
    }

    pub fn capture_checkpoint(
        &mut self,
        recorder: &mut dyn Recorder,
        entry: Entry<'_>,
    ) -> Result<Capture, StepLogError> {
        let Some(name) = self.content(entry, "Checkpoint name")? else {
            return Ok(Capture::Cancelled);
        };
        let Some(summary) = self.required("Checkpoint summary")? else {
            return Ok(Capture::Cancelled);
        };
        recorder.add_checkpoint(&name, &summary);
        Ok(Capture::Submitted(StepKind::Checkpoint))
    }

    pub fn capture_error(
        &mut self,
        recorder: &mut dyn Recorder,
        entry: Entry<'_>,
    ) -> Result<Capture, StepLogError> {
        let Some(message) = self.content(entry, "Error message")? else {
            return Ok(Capture::Cancelled);
        };
        let (resolved, resolution) = if entry == Entry::Guided {
            let resolved = self
                .optional("Resolved? (y/N)")?
                .is_some_and(|answer| matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"));
            let resolution = if resolved {
                self.optional("How was it resolved (optional)")?
            } else {
                None
            };
            (resolved, resolution)
        } else {
            (false, None)
        };
        recorder.add_error(&message, resolved, resolution.as_deref());
        Ok(Capture::Submitted(StepKind::Error))
    }

    pub fn capture_terminal(
        &mut self,
        recorder: &mut dyn Recorder,
        entry: Entry<'_>,
    ) -> Result<Capture, StepLogError> {
        let Some(command) = self.content(entry, "Command")? else {
            return Ok(Capture::Cancelled);
        };
        if entry != Entry::Guided {
            recorder.add_terminal(&command, TerminalOutcome::Success, TerminalDetails::default());
            return Ok(Capture::Submitted(StepKind::Terminal));
        }

        let exit_code = self
            .optional("Exit code (optional)")?
            .and_then(|code| code.parse::<i32>().ok());
        let outcome = loop {
            let answer = self.optional("Outcome (success/failure/partial)")?;
            match answer {
                Some(text) => {
                    if let Some(outcome) = TerminalOutcome::parse(&text) {
                        break outcome;
                    }
                }
                None => match exit_code {
                    Some(code) => break TerminalOutcome::from_exit_code(code),
                    None => return Ok(Capture::Cancelled),
                },
            }
        };
        let summary = self.optional("Summary (optional)")?;
        recorder.add_terminal(&command, outcome, TerminalDetails { summary, exit_code });
        Ok(Capture::Submitted(StepKind::Terminal))
    }

    fn content(&mut self, entry: Entry<'_>, label: &str) -> Result<Option<String>, StepLogError> {
        match entry {
            Entry::Quick(text) if !text.trim().is_empty() => Ok(Some(text.trim().to_string())),
            _ => self.required(label),
        }
    }

    /// Re-asks until a non-blank answer arrives or the user cancels.
    fn required(&mut self, label: &str) -> Result<Option<String>, StepLogError> {
        loop {
            match self.prompter.ask(label)? {
                None => return Ok(None),
                Some(answer) if answer.trim().is_empty() => continue,
                Some(answer) => return Ok(Some(answer.trim().to_string())),
            }
        }
    }

    fn optional(&mut self, label: &str) -> Result<Option<String>, StepLogError> {
        Ok(self
            .prompter
            .ask(label)?
            .map(|answer| answer.trim().to_string())
            .filter(|answer| !answer.is_empty()))
    }

    fn file_list(&mut self, label: &str) -> Result<Option<Vec<String>>, StepLogError> {
        Ok(self.optional(label)?.map(|answer| parse_file_list(&answer)))
    }
}

pub fn parse_file_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}

/// Prompter over a line-oriented reader, echoing labels to `output`.
pub struct LinePrompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Next raw line, without a label. `None` at end of input.
    pub fn read_line(&mut self) -> Result<Option<String>, StepLogError> {
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .map_err(|e| StepLogError::Io(e.to_string()))?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

impl<R: BufRead, W: Write> Prompter for LinePrompter<R, W> {
    fn ask(&mut self, label: &str) -> Result<Option<String>, StepLogError> {
        write!(self.output, "{label}: ").map_err(|e| StepLogError::Io(e.to_string()))?;
        self.output
            .flush()
            .map_err(|e| StepLogError::Io(e.to_string()))?;
        self.read_line()
    }
}

/// Prompter fed from a fixed list of answers; records every label asked.
#[derive(Debug, Default, Clone)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    asked: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: Vec::new(),
        }
    }

    pub fn asked(&self) -> &[String] {
        &self.asked
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, label: &str) -> Result<Option<String>, StepLogError> {
        self.asked.push(label.to_string());
        Ok(self.answers.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepPayload;

    #[derive(Default)]
    struct Collect(Vec<StepPayload>);

    impl Recorder for Collect {
        fn record(&mut self, payload: StepPayload) {
            self.0.push(payload);
        }
    }

    #[test]
    fn blank_content_is_reasked_until_given() {
        let mut prompter = ScriptedPrompter::new(["", "   ", "Add login form", "", ""]);
        let mut sink = Collect::default();
        let outcome = ManualAdapter::new(&mut prompter)
            .capture_prompt(&mut sink, Entry::Guided)
            .expect("capture");

        assert_eq!(outcome, Capture::Submitted(StepKind::Prompt));
        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.0[0].headline(), "Add login form");
        assert_eq!(prompter.asked().len(), 5);
    }

    #[test]
    fn cancelling_records_nothing() {
        let mut prompter = ScriptedPrompter::new(Vec::<String>::new());
        let mut sink = Collect::default();
        let outcome = ManualAdapter::new(&mut prompter)
            .capture_note(&mut sink, Entry::Guided)
            .expect("capture");
        assert_eq!(outcome, Capture::Cancelled);
        assert!(sink.0.is_empty());
    }

    #[test]
    fn guided_action_collects_file_lists() {
        let mut prompter =
            ScriptedPrompter::new(["Wired up router", "src/router.rs", "src/main.rs, src/lib.rs", "", ""]);
        let mut sink = Collect::default();
        ManualAdapter::new(&mut prompter)
            .capture_action(&mut sink, Entry::Guided)
            .expect("capture");

        let StepPayload::Action(action) = &sink.0[0] else {
            panic!("expected action");
        };
        assert_eq!(action.files_created, Some(vec!["src/router.rs".to_string()]));
        assert_eq!(
            action.files_modified,
            Some(vec!["src/main.rs".to_string(), "src/lib.rs".to_string()])
        );
        assert_eq!(action.files_deleted, None);
        assert_eq!(action.approach, None);
    }

    #[test]
    fn quick_entry_skips_follow_ups() {
        let mut prompter = ScriptedPrompter::default();
        let mut sink = Collect::default();
        ManualAdapter::new(&mut prompter)
            .capture_note(&mut sink, Entry::Quick("Fixed a typo"))
            .expect("capture");
        assert!(prompter.asked().is_empty());
        assert_eq!(
            sink.0,
            vec![StepPayload::Note(crate::step::NoteStep {
                content: "Fixed a typo".to_string(),
                category: None
            })]
        );
    }

    #[test]
    fn guided_terminal_derives_outcome_from_exit_code() {
        let mut prompter = ScriptedPrompter::new(["cargo build", "101", "", "linker error"]);
        let mut sink = Collect::default();
        ManualAdapter::new(&mut prompter)
            .capture_terminal(&mut sink, Entry::Guided)
            .expect("capture");
        let StepPayload::Terminal(terminal) = &sink.0[0] else {
            panic!("expected terminal");
        };
        assert_eq!(terminal.outcome, TerminalOutcome::Failure);
        assert_eq!(terminal.exit_code, Some(101));
        assert_eq!(terminal.summary.as_deref(), Some("linker error"));
    }

    #[test]
    fn guided_error_asks_for_resolution_only_when_resolved() {
        let mut prompter = ScriptedPrompter::new(["borrow checker", "y", "cloned the Arc"]);
        let mut sink = Collect::default();
        ManualAdapter::new(&mut prompter)
            .capture_error(&mut sink, Entry::Guided)
            .expect("capture");
        let StepPayload::Error(error) = &sink.0[0] else {
            panic!("expected error");
        };
        assert!(error.resolved);
        assert_eq!(error.resolution.as_deref(), Some("cloned the Arc"));
    }

    #[test]
    fn line_prompter_reads_until_eof() {
        let input = std::io::Cursor::new("first\r\nsecond\n");
        let mut output = Vec::new();
        let mut prompter = LinePrompter::new(input, &mut output);
        assert_eq!(prompter.ask("A").expect("ask"), Some("first".to_string()));
        assert_eq!(prompter.ask("B").expect("ask"), Some("second".to_string()));
        assert_eq!(prompter.ask("C").expect("ask"), None);
        drop(prompter);
        assert_eq!(String::from_utf8(output).expect("utf8"), "A: B: C: ");
    }
}
