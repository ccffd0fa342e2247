//! Human-facing rendering of run events and task reports.

use std::cell::RefCell;
use std::error::Error;
use std::io::{self, Write};

use serde::Serialize;

use crate::core::feedback::truncate_tail;
use crate::events::{EventSink, RunEvent};
use crate::task::{StepReport, TaskError, TaskReport};

/// Characters of failing command output echoed to the terminal.
const CONSOLE_OUTPUT_CHARS: usize = 1_500;

/// Writes one line per notable event. Progress goes to stderr so stdout
/// stays free for the final report.
pub struct ConsolePresenter<W: Write> {
    out: RefCell<W>,
    total_steps: RefCell<usize>,
}

impl ConsolePresenter<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write> ConsolePresenter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: RefCell::new(out),
            total_steps: RefCell::new(0),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn line(&self, text: &str) {
        // Terminal output is best effort.
        let _ = writeln!(self.out.borrow_mut(), "{text}");
    }

    fn block(&self, text: &str) {
        for line in text.lines() {
            self.line(&format!("      | {line}"));
        }
    }
}

impl<W: Write> EventSink for ConsolePresenter<W> {
    fn emit(&self, event: &RunEvent) {
        match event {
            RunEvent::TaskStarted {
                task_id,
                description,
                steps,
                working_dir,
            } => {
                *self.total_steps.borrow_mut() = *steps;
                self.line(&format!("==> task {task_id}: {description}"));
                self.line(&format!("    working dir: {working_dir}"));
            }
            RunEvent::NoSteps { task_id } => {
                self.line(&format!("warning: task {task_id} has no steps"));
            }
            RunEvent::FilesSelected { count } => {
                self.line(&format!("    context files: {count}"));
            }
            RunEvent::StepStarted {
                step_number,
                title,
                agent_id,
                ..
            } => {
                let total = *self.total_steps.borrow();
                self.line(&format!("[{step_number}/{total}] {title} (agent: {agent_id})"));
            }
            RunEvent::PreCommandFailed {
                command, output, ..
            } => {
                self.line(&format!("    pre-command failed: {command}"));
                self.block(&truncate_tail(output, CONSOLE_OUTPUT_CHARS));
            }
            RunEvent::AttemptStarted {
                attempt,
                max_attempts,
                ..
            } => {
                if *attempt > 1 {
                    self.line(&format!("    retry {attempt}/{max_attempts}"));
                }
            }
            RunEvent::AgentFailed { message, .. } => {
                self.line(&format!("    agent error: {message}"));
            }
            RunEvent::ValidationPassed { command, .. } => {
                self.line(&format!("    ok   {command}"));
            }
            RunEvent::ValidationFailed {
                command, output, ..
            } => {
                self.line(&format!("    FAIL {command}"));
                self.block(&truncate_tail(output, CONSOLE_OUTPUT_CHARS));
            }
            RunEvent::StepSucceeded { attempts, .. } => {
                self.line(&format!("    done ({attempts} attempt(s))"));
            }
            RunEvent::SummaryUnavailable { reason, .. } => {
                self.line(&format!("    no handoff summary: {reason}"));
            }
            RunEvent::ArtifactRecorded { .. } => {}
            RunEvent::StepFailed {
                error, continued, ..
            } => {
                if *continued {
                    self.line(&format!("    failed, continuing: {error}"));
                } else {
                    self.line(&format!("    failed: {error}"));
                }
            }
            RunEvent::TaskCompleted { .. } | RunEvent::TaskFailed { .. } => {}
        }
    }
}

/// Final per-step table printed after a successful task.
pub fn render_report(report: &TaskReport) -> String {
    let mut buf = format!(
        "task {}: {} succeeded, {} tolerated\n",
        report.task_id,
        report.succeeded(),
        report.tolerated()
    );
    for step in &report.steps {
        match step {
            StepReport::Succeeded {
                step_number,
                label,
                attempts,
            } => buf.push_str(&format!(
                "  {step_number}. {label}: ok after {attempts} attempt(s)\n"
            )),
            StepReport::Tolerated {
                step_number,
                label,
                error,
            } => buf.push_str(&format!("  {step_number}. {label}: FAILED (tolerated) {error}\n")),
        }
    }
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

/// Contents of `summary.json` for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary<'a> {
    pub run_id: &'a str,
    pub task_id: &'a str,
    pub outcome: RunOutcome,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<&'a TaskReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<'a> RunSummary<'a> {
    pub fn new(
        run_id: &'a str,
        task_id: &'a str,
        elapsed_ms: u64,
        result: &'a Result<TaskReport, TaskError>,
    ) -> Self {
        let (outcome, report, error) = match result {
            Ok(report) => (RunOutcome::Succeeded, Some(report), None),
            Err(err) => (
                RunOutcome::Failed,
                None,
                Some(error_chain(err)),
            ),
        };
        Self {
            run_id,
            task_id,
            outcome,
            elapsed_ms,
            report,
            error,
        }
    }
}

/// `err` and its sources joined with `": "`, outermost first.
pub fn error_chain(err: &dyn Error) -> String {
    let mut buf = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        buf.push_str(": ");
        buf.push_str(&cause.to_string());
        source = cause.source();
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepError;

    fn report() -> TaskReport {
        TaskReport {
            task_id: "build".to_string(),
            steps: vec![
                StepReport::Succeeded {
                    step_number: 1,
                    label: "impl".to_string(),
                    attempts: 2,
                },
                StepReport::Tolerated {
                    step_number: 2,
                    label: "lint".to_string(),
                    error: "validation `ruff` (ruff) failed after 1 attempt(s)".to_string(),
                },
            ],
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn presenter_renders_progress_lines() {
        let presenter = ConsolePresenter::new(Vec::new());
        presenter.emit(&RunEvent::TaskStarted {
            task_id: "build".to_string(),
            description: "Build it".to_string(),
            steps: 2,
            working_dir: "/work".to_string(),
        });
        presenter.emit(&RunEvent::StepStarted {
            step_number: 1,
            label: "impl".to_string(),
            title: "Implement".to_string(),
            agent_id: "coder".to_string(),
            max_attempts: 2,
        });
        presenter.emit(&RunEvent::ValidationFailed {
            step_number: 1,
            attempt: 1,
            command: "pytest".to_string(),
            description: "pytest".to_string(),
            output: "E   assert 1 == 2".to_string(),
        });
        presenter.emit(&RunEvent::AttemptStarted {
            step_number: 1,
            attempt: 2,
            max_attempts: 2,
        });

        let text = String::from_utf8(presenter.into_inner()).expect("utf8");
        assert!(text.contains("==> task build: Build it"));
        assert!(text.contains("[1/2] Implement (agent: coder)"));
        assert!(text.contains("    FAIL pytest\n      | E   assert 1 == 2"));
        assert!(text.contains("    retry 2/2"));
    }

    #[test]
    fn report_lists_each_step() {
        let text = render_report(&report());
        assert!(text.starts_with("task build: 1 succeeded, 1 tolerated\n"));
        assert!(text.contains("  1. impl: ok after 2 attempt(s)"));
        assert!(text.contains("  2. lint: FAILED (tolerated)"));
    }

    #[test]
    fn summary_carries_error_chain() {
        let result: Result<TaskReport, TaskError> = Err(TaskError::Step {
            step_number: 1,
            label: "impl".to_string(),
            source: StepError::Precondition {
                command: "uv sync".to_string(),
                output: "offline".to_string(),
            },
        });
        let summary = RunSummary::new("run-1", "build", 42, &result);
        let value = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(value["outcome"], "failed");
        assert_eq!(
            value["error"],
            "step 1 (impl) failed: pre-command `uv sync` failed"
        );
        assert!(value.get("report").is_none());

        let ok: Result<TaskReport, TaskError> = Ok(report());
        let value = serde_json::to_value(RunSummary::new("run-2", "build", 7, &ok))
            .expect("serialize");
        assert_eq!(value["outcome"], "succeeded");
        assert_eq!(value["report"]["steps"][1]["status"], "tolerated");
    }
}
