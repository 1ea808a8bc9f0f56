//! Step-level progress notifications.
//!
//! The pipeline reports `(index, total, description)` per stage to a
//! `ProgressSink`. Rendering is the sink's business; the console sink prints
//! one line per event.

use std::io::{self, Write};

use crossterm::style::Stylize;

use crate::install_state::InstallationStep;

/// Receiver of pipeline progress
pub trait ProgressSink {
    fn step_started(&mut self, step: InstallationStep);

    fn step_finished(&mut self, step: InstallationStep);

    /// A stage failed, fatally or not
    fn step_failed(&mut self, step: InstallationStep, message: &str);

    fn warning(&mut self, message: &str);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn step_started(&mut self, _step: InstallationStep) {}
    fn step_finished(&mut self, _step: InstallationStep) {}
    fn step_failed(&mut self, _step: InstallationStep, _message: &str) {}
    fn warning(&mut self, _message: &str) {}
}

/// A progress event as recorded by `RecordingProgress`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started(InstallationStep),
    Finished(InstallationStep),
    Failed(InstallationStep, String),
    Warning(String),
}

/// Keeps every event in memory
#[derive(Debug, Default, Clone)]
pub struct RecordingProgress {
    pub events: Vec<ProgressEvent>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps that reported as started, in order
    pub fn started(&self) -> Vec<InstallationStep> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Started(step) => Some(*step),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingProgress {
    fn step_started(&mut self, step: InstallationStep) {
        self.events.push(ProgressEvent::Started(step));
    }

    fn step_finished(&mut self, step: InstallationStep) {
        self.events.push(ProgressEvent::Finished(step));
    }

    fn step_failed(&mut self, step: InstallationStep, message: &str) {
        self.events.push(ProgressEvent::Failed(step, message.to_string()));
    }

    fn warning(&mut self, message: &str) {
        self.events.push(ProgressEvent::Warning(message.to_string()));
    }
}

/// Line-oriented terminal output, colored when `styled` is set
#[derive(Debug)]
pub struct ConsoleProgress<W: Write> {
    out: W,
    styled: bool,
}

impl ConsoleProgress<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout(), true)
    }
}

impl<W: Write> ConsoleProgress<W> {
    pub fn new(out: W, styled: bool) -> Self {
        Self { out, styled }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, tag: &str, color: fn(&str) -> String, text: &str) {
        let tag = if self.styled { color(tag) } else { tag.to_string() };
        // Write errors on stdout are ignored
        let _ = writeln!(self.out, "{tag} {text}");
        let _ = self.out.flush();
    }
}

impl<W: Write> ProgressSink for ConsoleProgress<W> {
    fn step_started(&mut self, step: InstallationStep) {
        let tag = format!("[{}/{}]", step.index, step.total);
        self.line(&tag, |s| s.cyan().bold().to_string(), step.description);
    }

    fn step_finished(&mut self, step: InstallationStep) {
        self.line("  ok", |s| s.green().to_string(), step.description);
    }

    fn step_failed(&mut self, step: InstallationStep, message: &str) {
        let text = format!("{}: {}", step.description, message);
        self.line("  FAILED", |s| s.red().bold().to_string(), &text);
    }

    fn warning(&mut self, message: &str) {
        self.line("  warning:", |s| s.yellow().to_string(), message);
    }
}
