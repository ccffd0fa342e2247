//! Progress events emitted by the orchestration layer.
//!
//! [`crate::step`] and [`crate::task`] never write to the terminal. They emit
//! [`RunEvent`]s to an [`EventSink`]; the console presenter, the JSONL run
//! log and the tracing bridge are all sinks.

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    TaskStarted {
        task_id: String,
        description: String,
        steps: usize,
        working_dir: String,
    },
    /// The task declares no steps; it completes immediately.
    NoSteps {
        task_id: String,
    },
    FilesSelected {
        count: usize,
    },
    StepStarted {
        step_number: usize,
        label: String,
        title: String,
        agent_id: String,
        max_attempts: u32,
    },
    PreCommandFailed {
        step_number: usize,
        command: String,
        output: String,
    },
    AttemptStarted {
        step_number: usize,
        attempt: u32,
        max_attempts: u32,
    },
    AgentFailed {
        step_number: usize,
        attempt: u32,
        message: String,
    },
    ValidationPassed {
        step_number: usize,
        attempt: u32,
        command: String,
    },
    ValidationFailed {
        step_number: usize,
        attempt: u32,
        command: String,
        description: String,
        output: String,
    },
    StepSucceeded {
        step_number: usize,
        label: String,
        attempts: u32,
    },
    SummaryUnavailable {
        step_number: usize,
        reason: String,
    },
    ArtifactRecorded {
        step_number: usize,
        label: String,
        summary: String,
    },
    StepFailed {
        step_number: usize,
        label: String,
        error: String,
        /// `true` when the step tolerates failure and the task moves on.
        continued: bool,
    },
    TaskCompleted {
        task_id: String,
        succeeded: usize,
        tolerated: usize,
    },
    /// `step_number` is `None` when the task failed before any step ran.
    TaskFailed {
        task_id: String,
        step_number: Option<usize>,
        error: String,
    },
}

impl RunEvent {
    /// Stable snake_case name, matching the serialized `event` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::TaskStarted { .. } => "task_started",
            RunEvent::NoSteps { .. } => "no_steps",
            RunEvent::FilesSelected { .. } => "files_selected",
            RunEvent::StepStarted { .. } => "step_started",
            RunEvent::PreCommandFailed { .. } => "pre_command_failed",
            RunEvent::AttemptStarted { .. } => "attempt_started",
            RunEvent::AgentFailed { .. } => "agent_failed",
            RunEvent::ValidationPassed { .. } => "validation_passed",
            RunEvent::ValidationFailed { .. } => "validation_failed",
            RunEvent::StepSucceeded { .. } => "step_succeeded",
            RunEvent::SummaryUnavailable { .. } => "summary_unavailable",
            RunEvent::ArtifactRecorded { .. } => "artifact_recorded",
            RunEvent::StepFailed { .. } => "step_failed",
            RunEvent::TaskCompleted { .. } => "task_completed",
            RunEvent::TaskFailed { .. } => "task_failed",
        }
    }
}

pub trait EventSink {
    fn emit(&self, event: &RunEvent);
}

/// Mirrors events into `tracing` diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &RunEvent) {
        match event {
            RunEvent::TaskStarted { task_id, steps, .. } => {
                info!(task = %task_id, steps, "task started");
            }
            RunEvent::NoSteps { task_id } => warn!(task = %task_id, "task has no steps"),
            RunEvent::FilesSelected { count } => info!(count, "context files selected"),
            RunEvent::StepStarted {
                step_number,
                label,
                agent_id,
                max_attempts,
                ..
            } => info!(step = step_number, label = %label, agent = %agent_id, max_attempts, "step started"),
            RunEvent::PreCommandFailed {
                step_number,
                command,
                ..
            } => warn!(step = step_number, command = %command, "pre-command failed"),
            RunEvent::AttemptStarted {
                step_number,
                attempt,
                max_attempts,
            } => info!(step = step_number, attempt, max_attempts, "attempt started"),
            RunEvent::AgentFailed {
                step_number,
                attempt,
                message,
            } => warn!(step = step_number, attempt, err = %message, "agent failed"),
            RunEvent::ValidationPassed {
                step_number,
                attempt,
                command,
            } => info!(step = step_number, attempt, command = %command, "validation passed"),
            RunEvent::ValidationFailed {
                step_number,
                attempt,
                command,
                ..
            } => warn!(step = step_number, attempt, command = %command, "validation failed"),
            RunEvent::StepSucceeded {
                step_number,
                attempts,
                ..
            } => info!(step = step_number, attempts, "step succeeded"),
            RunEvent::SummaryUnavailable {
                step_number,
                reason,
            } => warn!(step = step_number, reason = %reason, "no summary for step"),
            RunEvent::ArtifactRecorded {
                step_number,
                summary,
                ..
            } => info!(step = step_number, summary_chars = summary.chars().count(), "artifact recorded"),
            RunEvent::StepFailed {
                step_number,
                error,
                continued,
                ..
            } => warn!(step = step_number, err = %error, continued, "step failed"),
            RunEvent::TaskCompleted {
                task_id,
                succeeded,
                tolerated,
            } => info!(task = %task_id, succeeded, tolerated, "task completed"),
            RunEvent::TaskFailed {
                task_id,
                step_number,
                error,
            } => warn!(task = %task_id, step = ?step_number, err = %error, "task failed"),
        }
    }
}

/// Forwards every event to each sink in order.
#[derive(Default)]
pub struct FanOut<'a> {
    sinks: Vec<&'a dyn EventSink>,
}

impl<'a> FanOut<'a> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: &'a dyn EventSink) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanOut<'_> {
    fn emit(&self, event: &RunEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
