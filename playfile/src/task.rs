//! Task orchestration: runs a task's steps in order and decides, per failed
//! step, whether the task aborts or moves on.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::core::artifacts::ArtifactStore;
use crate::core::invariants::unresolved_context_refs;
use crate::core::template::{referenced_inputs, render_inputs};
use crate::core::types::StepArtifact;
use crate::events::{EventSink, RunEvent};
use crate::io::agent::AgentClient;
use crate::io::config::RunnerConfig;
use crate::io::files::select_files;
use crate::io::validation::ValidationRunner;
use crate::step::{StepContext, StepError, StepExecutor};
use crate::workflow::{Agent, Playfile, Task};

#[derive(Debug, Error)]
pub enum TaskError {
    /// Problems found before any step ran. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("step {step_number} ({label}) failed")]
    Step {
        step_number: usize,
        label: String,
        source: StepError,
    },
}

/// Per-step result of a task that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepReport {
    Succeeded {
        step_number: usize,
        label: String,
        attempts: u32,
    },
    /// Failed, but the step allows the task to continue.
    Tolerated {
        step_number: usize,
        label: String,
        error: String,
    },
}

impl StepReport {
    pub fn step_number(&self) -> usize {
        match self {
            StepReport::Succeeded { step_number, .. } | StepReport::Tolerated { step_number, .. } => {
                *step_number
            }
        }
    }

    pub fn label(&self) -> &str {
        match self {
            StepReport::Succeeded { label, .. } | StepReport::Tolerated { label, .. } => label,
        }
    }

    pub fn is_tolerated(&self) -> bool {
        matches!(self, StepReport::Tolerated { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub steps: Vec<StepReport>,
    pub artifacts: Vec<StepArtifact>,
}

impl TaskReport {
    fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            steps: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.steps.iter().filter(|s| !s.is_tolerated()).count()
    }

    pub fn tolerated(&self) -> usize {
        self.steps.iter().filter(|s| s.is_tolerated()).count()
    }
}

/// Runs tasks of one playfile against an agent backend and a validator.
pub struct TaskRunner<'a, A: AgentClient, V: ValidationRunner> {
    playfile: &'a Playfile,
    base_dir: PathBuf,
    agent_client: &'a A,
    validator: &'a V,
    events: &'a dyn EventSink,
    config: &'a RunnerConfig,
    project_context: Option<&'a str>,
    log_dir: Option<PathBuf>,
}

impl<'a, A: AgentClient, V: ValidationRunner> TaskRunner<'a, A, V> {
    /// `base_dir` is the directory task working directories resolve against.
    pub fn new(
        playfile: &'a Playfile,
        base_dir: impl Into<PathBuf>,
        agent_client: &'a A,
        validator: &'a V,
        events: &'a dyn EventSink,
        config: &'a RunnerConfig,
    ) -> Self {
        Self {
            playfile,
            base_dir: base_dir.into(),
            agent_client,
            validator,
            events,
            config,
            project_context: None,
            log_dir: None,
        }
    }

    /// Free-form notes injected into every step prompt.
    pub fn with_project_context(mut self, text: &'a str) -> Self {
        self.project_context = Some(text);
        self
    }

    pub fn with_log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = Some(dir);
        self
    }

    /// Run every step of `task` in order with a fresh artifact store.
    #[instrument(skip_all, fields(task = %task.id))]
    pub fn run(
        &self,
        task: &Task,
        inputs: &BTreeMap<String, String>,
    ) -> Result<TaskReport, TaskError> {
        let working_dir = resolve_working_dir(&self.base_dir, &task.working_dir);
        self.events.emit(&RunEvent::TaskStarted {
            task_id: task.id.clone(),
            description: task.description.clone(),
            steps: task.steps.len(),
            working_dir: working_dir.display().to_string(),
        });

        let mut report = TaskReport::new(&task.id);
        if task.steps.is_empty() {
            self.events.emit(&RunEvent::NoSteps {
                task_id: task.id.clone(),
            });
            self.complete(&report);
            return Ok(report);
        }

        let (agents, context_files) = self
            .prepare(task, &working_dir, inputs)
            .inspect_err(|err| {
                self.events.emit(&RunEvent::TaskFailed {
                    task_id: task.id.clone(),
                    step_number: None,
                    error: err.to_string(),
                });
            })?;

        let executor = StepExecutor::new(self.agent_client, self.validator, self.events, self.config)
            .with_log_dir(self.log_dir.clone());
        let mut store = ArtifactStore::new();

        for (idx, step) in task.steps.iter().enumerate() {
            let step_number = idx + 1;
            let label = step.label(step_number);
            let agent = agents[idx];
            let prompt = render_inputs(step.prompt_template(), inputs);
            self.events.emit(&RunEvent::StepStarted {
                step_number,
                label: label.clone(),
                title: step.title(step_number),
                agent_id: agent.id.clone(),
                max_attempts: step.max_attempts(),
            });

            let ctx = StepContext {
                step_number,
                step,
                agent,
                working_dir: &working_dir,
                context_files: &context_files,
                project_context: self.project_context,
                prompt: &prompt,
                next_agent_role: agents.get(idx + 1).map(|next| next.role.as_str()),
            };
            match executor.execute(&ctx, &store) {
                Ok(outcome) => {
                    if let Some(summary) = outcome.summary {
                        self.events.emit(&RunEvent::ArtifactRecorded {
                            step_number,
                            label: label.clone(),
                            summary: summary.clone(),
                        });
                        store.add(StepArtifact {
                            step_number,
                            step_id: step.id.clone(),
                            agent_id: agent.id.clone(),
                            agent_role: agent.role.clone(),
                            summary,
                        });
                    }
                    report.steps.push(StepReport::Succeeded {
                        step_number,
                        label,
                        attempts: outcome.attempts,
                    });
                }
                Err(err) if step.continue_on_failure() => {
                    let error = err.to_string();
                    self.events.emit(&RunEvent::StepFailed {
                        step_number,
                        label: label.clone(),
                        error: error.clone(),
                        continued: true,
                    });
                    report.steps.push(StepReport::Tolerated {
                        step_number,
                        label,
                        error,
                    });
                }
                Err(err) => {
                    let error = err.to_string();
                    self.events.emit(&RunEvent::StepFailed {
                        step_number,
                        label: label.clone(),
                        error: error.clone(),
                        continued: false,
                    });
                    self.events.emit(&RunEvent::TaskFailed {
                        task_id: task.id.clone(),
                        step_number: Some(step_number),
                        error,
                    });
                    return Err(TaskError::Step {
                        step_number,
                        label,
                        source: err,
                    });
                }
            }
        }

        report.artifacts = store.artifacts().to_vec();
        self.complete(&report);
        Ok(report)
    }

    /// Checks that need no agent: agent ids, context references, working
    /// directory and file selection.
    fn prepare(
        &self,
        task: &Task,
        working_dir: &Path,
        inputs: &BTreeMap<String, String>,
    ) -> Result<(Vec<&'a Agent>, Vec<PathBuf>), TaskError> {
        let agents = self.resolve_agents(task)?;

        if self.config.strict_context {
            let unresolved = unresolved_context_refs(task);
            if !unresolved.is_empty() {
                return Err(TaskError::Configuration(unresolved.join("; ")));
            }
        }

        if !working_dir.is_dir() {
            return Err(TaskError::Configuration(format!(
                "working directory {} does not exist",
                working_dir.display()
            )));
        }

        for step in &task.steps {
            for name in referenced_inputs(step.prompt_template()) {
                if !inputs.contains_key(&name) {
                    warn!(input = %name, "prompt references an input that was not provided");
                }
            }
        }

        let context_files = select_files(working_dir, task.read_patterns())
            .map_err(|err| TaskError::Configuration(format!("{err:#}")))?
            .unwrap_or_default();
        if !context_files.is_empty() {
            self.events.emit(&RunEvent::FilesSelected {
                count: context_files.len(),
            });
        }
        Ok((agents, context_files))
    }

    fn resolve_agents(&self, task: &Task) -> Result<Vec<&'a Agent>, TaskError> {
        task.steps
            .iter()
            .enumerate()
            .map(|(idx, step)| {
                self.playfile.agent(&step.agent.agent_id).ok_or_else(|| {
                    TaskError::Configuration(format!(
                        "tasks/{}/{}: agent '{}' not found in configuration",
                        task.id,
                        step.label(idx + 1),
                        step.agent.agent_id
                    ))
                })
            })
            .collect()
    }

    fn complete(&self, report: &TaskReport) {
        self.events.emit(&RunEvent::TaskCompleted {
            task_id: report.task_id.clone(),
            succeeded: report.succeeded(),
            tolerated: report.tolerated(),
        });
    }
}

fn resolve_working_dir(base_dir: &Path, working_dir: &str) -> PathBuf {
    let joined = base_dir.join(working_dir);
    fs::canonicalize(&joined).unwrap_or(joined)
}
