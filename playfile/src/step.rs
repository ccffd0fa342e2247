//! Execution of a single step: pre-check, agent attempts with post-validation
//! and retry feedback, then an optional handoff summary for later steps.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::artifacts::ArtifactStore;
use crate::core::feedback::RetryFeedback;
use crate::core::types::ValidationFailure;
use crate::events::{EventSink, RunEvent};
use crate::io::agent::{AgentClient, AgentRequest, AgentRequestKind, agent_timeout};
use crate::io::config::RunnerConfig;
use crate::io::prompt::{PromptBuilder, StepPromptInputs};
use crate::io::validation::ValidationRunner;
use crate::workflow::{Agent, Step, Validation, ValidationCommand};

/// Final failure of a step. Raised once, after all attempts are spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("pre-command `{command}` failed")]
    Precondition { command: String, output: String },

    #[error("validation `{command}` ({description}) failed after {attempts} attempt(s)")]
    Validation {
        command: String,
        description: String,
        output: String,
        attempts: u32,
    },

    #[error("agent failed after {attempts} attempt(s): {message}")]
    Agent { attempts: u32, message: String },

    #[error("prompt rendering failed: {message}")]
    Prompt { message: String },
}

/// Everything one step needs from its task.
#[derive(Debug, Clone)]
pub struct StepContext<'a> {
    /// 1-based position within the task.
    pub step_number: usize,
    pub step: &'a Step,
    pub agent: &'a Agent,
    pub working_dir: &'a Path,
    pub context_files: &'a [PathBuf],
    pub project_context: Option<&'a str>,
    /// Step prompt with inputs already substituted.
    pub prompt: &'a str,
    /// Role of the next step's agent; `None` for the last step.
    pub next_agent_role: Option<&'a str>,
}

impl StepContext<'_> {
    pub fn label(&self) -> String {
        self.step.label(self.step_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub attempts: u32,
    /// Agent response of the successful attempt.
    pub output: String,
    /// Handoff summary; only requested when a later step exists.
    pub summary: Option<String>,
}

/// Result of one attempt. Attempts never raise; the executor decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Passed {
        output: String,
    },
    ValidationFailed {
        failure: ValidationFailure,
        output: String,
    },
    AgentFailed {
        message: String,
    },
}

pub struct StepExecutor<'a, A: AgentClient, V: ValidationRunner> {
    agent_client: &'a A,
    validator: &'a V,
    events: &'a dyn EventSink,
    config: &'a RunnerConfig,
    log_dir: Option<PathBuf>,
}

impl<'a, A: AgentClient, V: ValidationRunner> StepExecutor<'a, A, V> {
    pub fn new(
        agent_client: &'a A,
        validator: &'a V,
        events: &'a dyn EventSink,
        config: &'a RunnerConfig,
    ) -> Self {
        Self {
            agent_client,
            validator,
            events,
            config,
            log_dir: None,
        }
    }

    /// Tee agent output into `<dir>/step-<n>-attempt-<k>.log`.
    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }

    /// Drive one step to its final outcome.
    ///
    /// Pre-command failure ends the step immediately. Otherwise up to
    /// `max_attempts` attempts run; a validation failure becomes the next
    /// attempt's feedback, an agent failure leaves the feedback unchanged.
    #[instrument(skip_all, fields(step = ctx.step_number, agent = %ctx.agent.id))]
    pub fn execute(
        &self,
        ctx: &StepContext<'_>,
        artifacts: &ArtifactStore,
    ) -> Result<StepOutcome, StepError> {
        let validation = ctx.step.validation.as_ref();
        if let Some(command) = validation.and_then(|v| v.pre_command.as_deref()) {
            self.run_pre_command(ctx, command)?;
        }

        let max_attempts = ctx.step.max_attempts();
        let post_commands = validation
            .map(Validation::post_commands)
            .unwrap_or_default();
        let artifact_context = if artifacts.has_artifacts() {
            artifacts.context_for(Some(ctx.step.agent.context_from.as_slice()))
        } else {
            String::new()
        };

        let mut feedback = RetryFeedback::none();
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            self.events.emit(&RunEvent::AttemptStarted {
                step_number: ctx.step_number,
                attempt,
                max_attempts,
            });
            match self.run_attempt(ctx, &artifact_context, &post_commands, attempt, &feedback)? {
                AttemptResult::Passed { output } => {
                    self.events.emit(&RunEvent::StepSucceeded {
                        step_number: ctx.step_number,
                        label: ctx.label(),
                        attempts: attempt,
                    });
                    let summary = self.request_summary(ctx);
                    return Ok(StepOutcome {
                        attempts: attempt,
                        output,
                        summary,
                    });
                }
                AttemptResult::ValidationFailed { failure, .. } => {
                    last_error = Some(StepError::Validation {
                        command: failure.command.clone(),
                        description: failure.description.clone(),
                        output: failure.output.clone(),
                        attempts: attempt,
                    });
                    feedback = RetryFeedback::from_failures(vec![failure]);
                }
                AttemptResult::AgentFailed { message } => {
                    last_error = Some(StepError::Agent {
                        attempts: attempt,
                        message,
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| StepError::Agent {
            attempts: 0,
            message: "no attempts were made".to_string(),
        }))
    }

    /// One attempt: build the prompt, invoke the agent, run post-commands in
    /// order until the first failure.
    pub fn run_attempt(
        &self,
        ctx: &StepContext<'_>,
        artifact_context: &str,
        post_commands: &[ValidationCommand],
        attempt: u32,
        feedback: &RetryFeedback,
    ) -> Result<AttemptResult, StepError> {
        let rendered_feedback = feedback.render(self.config.feedback_output_limit_chars);
        let prompt = PromptBuilder::new(self.config.prompt_budget_bytes)
            .build_step(&StepPromptInputs {
                workdir: ctx.working_dir,
                context_files: ctx.context_files,
                project_context: ctx.project_context,
                artifact_context,
                feedback: rendered_feedback.as_deref(),
                attempt,
                prompt: ctx.prompt,
            })
            .map_err(|err| StepError::Prompt {
                message: format!("{err:#}"),
            })?;
        debug!(attempt, prompt_bytes = prompt.len(), "prompt built");

        let log_path = self.log_path(format!("step-{}-attempt-{attempt}.log", ctx.step_number));
        let request = self.request(ctx, AgentRequestKind::Work, prompt, log_path);
        let output = match self.agent_client.exec(&request) {
            Ok(output) => output,
            Err(err) => {
                let message = format!("{err:#}");
                self.events.emit(&RunEvent::AgentFailed {
                    step_number: ctx.step_number,
                    attempt,
                    message: message.clone(),
                });
                return Ok(AttemptResult::AgentFailed { message });
            }
        };

        for post in post_commands {
            let result = self.validator.run(&post.command, ctx.working_dir);
            if !result.success {
                let failure = ValidationFailure {
                    command: post.command.clone(),
                    description: post.description_or_command().to_string(),
                    output: result.output,
                };
                self.events.emit(&RunEvent::ValidationFailed {
                    step_number: ctx.step_number,
                    attempt,
                    command: failure.command.clone(),
                    description: failure.description.clone(),
                    output: failure.output.clone(),
                });
                return Ok(AttemptResult::ValidationFailed { failure, output });
            }
            self.events.emit(&RunEvent::ValidationPassed {
                step_number: ctx.step_number,
                attempt,
                command: post.command.clone(),
            });
        }
        Ok(AttemptResult::Passed { output })
    }

    fn run_pre_command(&self, ctx: &StepContext<'_>, command: &str) -> Result<(), StepError> {
        let result = self.validator.run(command, ctx.working_dir);
        if result.success {
            debug!(command, "pre-command passed");
            return Ok(());
        }
        self.events.emit(&RunEvent::PreCommandFailed {
            step_number: ctx.step_number,
            command: command.to_string(),
            output: result.output.clone(),
        });
        Err(StepError::Precondition {
            command: command.to_string(),
            output: result.output,
        })
    }

    /// Ask the agent for a handoff summary when a later step exists.
    /// Failures and blank answers are reported and yield `None`.
    fn request_summary(&self, ctx: &StepContext<'_>) -> Option<String> {
        let next_role = ctx.next_agent_role?;
        let prompt = match PromptBuilder::new(self.config.prompt_budget_bytes)
            .build_summary(Some(next_role))
        {
            Ok(prompt) => prompt,
            Err(err) => {
                self.summary_unavailable(ctx, format!("{err:#}"));
                return None;
            }
        };
        let log_path = self.log_path(format!("step-{}-summary.log", ctx.step_number));
        let request = self.request(ctx, AgentRequestKind::Summary, prompt, log_path);
        match self.agent_client.exec(&request) {
            Ok(summary) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
            Ok(_) => {
                self.summary_unavailable(ctx, "agent returned an empty summary".to_string());
                None
            }
            Err(err) => {
                self.summary_unavailable(ctx, format!("{err:#}"));
                None
            }
        }
    }

    fn summary_unavailable(&self, ctx: &StepContext<'_>, reason: String) {
        self.events.emit(&RunEvent::SummaryUnavailable {
            step_number: ctx.step_number,
            reason,
        });
    }

    fn request(
        &self,
        ctx: &StepContext<'_>,
        kind: AgentRequestKind,
        prompt: String,
        log_path: Option<PathBuf>,
    ) -> AgentRequest {
        AgentRequest {
            kind,
            agent: ctx.agent.clone(),
            prompt,
            workdir: ctx.working_dir.to_path_buf(),
            context_files: ctx.context_files.to_vec(),
            timeout: agent_timeout(ctx.agent, self.config.agent_timeout()),
            output_limit_bytes: self.config.agent_output_limit_bytes,
            log_path,
        }
    }

    fn log_path(&self, file_name: String) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| dir.join(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CheckResult, StepArtifact};
    use crate::test_support::{
        RecordingSink, ScriptedAgent, ScriptedValidator, agent, step, validated_step,
    };

    struct Fixture {
        agent: Agent,
        config: RunnerConfig,
        events: RecordingSink,
        workdir: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                agent: agent("coder", "Implementation Engineer"),
                config: RunnerConfig::default(),
                events: RecordingSink::default(),
                workdir: PathBuf::from("/work"),
            }
        }

        fn context<'a>(&'a self, step: &'a Step, next_role: Option<&'a str>) -> StepContext<'a> {
            StepContext {
                step_number: 1,
                step,
                agent: &self.agent,
                working_dir: &self.workdir,
                context_files: &[],
                project_context: None,
                prompt: "Implement the feature",
                next_agent_role: next_role,
            }
        }
    }

    fn retrying(max_retries: u32, command: &str) -> Validation {
        Validation {
            post_command: Some(command.to_string()),
            max_retries,
            ..Validation::default()
        }
    }

    #[test]
    fn no_validation_agent_failure_fails_first_attempt() {
        let fx = Fixture::new();
        let agent_client = ScriptedAgent::new().with_work(vec![Err("connection reset")]);
        let validator = ScriptedValidator::new();
        let executor = StepExecutor::new(&agent_client, &validator, &fx.events, &fx.config);
        let plain = step(Some("impl"), "coder");

        let err = executor
            .execute(&fx.context(&plain, None), &ArtifactStore::new())
            .expect_err("agent failure");
        match err {
            StepError::Agent { attempts, message } => {
                assert_eq!(attempts, 1);
                assert!(message.contains("connection reset"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(agent_client.work_count(), 1);
    }

    #[test]
    fn always_failing_validation_exhausts_attempts() {
        let fx = Fixture::new();
        let agent_client = ScriptedAgent::new();
        let validator =
            ScriptedValidator::new().with("pytest", vec![CheckResult::fail("1 failed")]);
        let executor = StepExecutor::new(&agent_client, &validator, &fx.events, &fx.config);
        let checked = validated_step(Some("impl"), "coder", retrying(2, "pytest"));

        let err = executor
            .execute(&fx.context(&checked, None), &ArtifactStore::new())
            .expect_err("validation failure");
        assert_eq!(
            err,
            StepError::Validation {
                command: "pytest".to_string(),
                description: "pytest".to_string(),
                output: "1 failed".to_string(),
                attempts: 3,
            }
        );
        assert_eq!(agent_client.work_count(), 3);
        assert_eq!(validator.calls(), vec!["pytest"; 3]);
        assert!(err.to_string().contains("pytest"));
    }

    #[test]
    fn success_on_second_attempt_stops_retrying() {
        let fx = Fixture::new();
        let agent_client = ScriptedAgent::new();
        let validator = ScriptedValidator::new().with(
            "pytest",
            vec![CheckResult::fail("assert 1 == 2"), CheckResult::pass("ok")],
        );
        let executor = StepExecutor::new(&agent_client, &validator, &fx.events, &fx.config);
        let checked = validated_step(Some("impl"), "coder", retrying(3, "pytest"));

        let outcome = executor
            .execute(&fx.context(&checked, None), &ArtifactStore::new())
            .expect("success");
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.summary, None);
        assert_eq!(agent_client.work_count(), 2);

        let prompts = agent_client.work_prompts();
        assert!(!prompts[0].contains("Validation Feedback"));
        assert!(prompts[1].contains("Command: `pytest`"));
        assert!(prompts[1].contains("assert 1 == 2"));
    }

    #[test]
    fn pre_command_failure_skips_agent() {
        let fx = Fixture::new();
        let agent_client = ScriptedAgent::new();
        let validator =
            ScriptedValidator::new().with("uv sync", vec![CheckResult::fail("no network")]);
        let executor = StepExecutor::new(&agent_client, &validator, &fx.events, &fx.config);
        let checked = validated_step(
            Some("impl"),
            "coder",
            Validation {
                pre_command: Some("uv sync".to_string()),
                max_retries: 5,
                ..Validation::default()
            },
        );

        let err = executor
            .execute(&fx.context(&checked, None), &ArtifactStore::new())
            .expect_err("precondition");
        assert_eq!(
            err,
            StepError::Precondition {
                command: "uv sync".to_string(),
                output: "no network".to_string(),
            }
        );
        assert_eq!(agent_client.work_count(), 0);
        assert_eq!(validator.calls(), vec!["uv sync"]);
    }

    #[test]
    fn agent_failure_keeps_previous_feedback() {
        let fx = Fixture::new();
        let agent_client = ScriptedAgent::new().with_work(vec![Ok("v1"), Err("timeout"), Ok("v3")]);
        let validator = ScriptedValidator::new().with(
            "pytest",
            vec![CheckResult::fail("E   missing import"), CheckResult::pass("ok")],
        );
        let executor = StepExecutor::new(&agent_client, &validator, &fx.events, &fx.config);
        let checked = validated_step(Some("impl"), "coder", retrying(2, "pytest"));

        let outcome = executor
            .execute(&fx.context(&checked, None), &ArtifactStore::new())
            .expect("success");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.output, "v3");

        let prompts = agent_client.work_prompts();
        assert!(prompts[1].contains("E   missing import"));
        assert!(prompts[2].contains("E   missing import"));
        assert_eq!(validator.calls().len(), 2);
    }

    #[test]
    fn post_commands_stop_at_first_failure() {
        let fx = Fixture::new();
        let agent_client = ScriptedAgent::new();
        let validator = ScriptedValidator::new().with("lint", vec![CheckResult::fail("E501")]);
        let executor = StepExecutor::new(&agent_client, &validator, &fx.events, &fx.config);
        let checked = validated_step(
            Some("impl"),
            "coder",
            Validation {
                post_commands: vec![
                    ValidationCommand {
                        command: "fmt".to_string(),
                        description: None,
                    },
                    ValidationCommand {
                        command: "lint".to_string(),
                        description: Some("Lint".to_string()),
                    },
                    ValidationCommand {
                        command: "test".to_string(),
                        description: None,
                    },
                ],
                ..Validation::default()
            },
        );

        let err = executor
            .execute(&fx.context(&checked, None), &ArtifactStore::new())
            .expect_err("lint fails");
        assert!(matches!(err, StepError::Validation { ref description, .. } if description == "Lint"));
        assert_eq!(validator.calls(), vec!["fmt", "lint"]);
    }

    #[test]
    fn summary_requested_only_when_next_step_exists() {
        let fx = Fixture::new();
        let agent_client = ScriptedAgent::new().with_summaries(vec![Ok("  Built the API.  ")]);
        let validator = ScriptedValidator::new();
        let executor = StepExecutor::new(&agent_client, &validator, &fx.events, &fx.config);
        let plain = step(Some("impl"), "coder");

        let outcome = executor
            .execute(&fx.context(&plain, Some("QA Engineer")), &ArtifactStore::new())
            .expect("success");
        assert_eq!(outcome.summary.as_deref(), Some("Built the API."));
        let summary_request = agent_client
            .requests()
            .into_iter()
            .find(|r| r.kind == AgentRequestKind::Summary)
            .expect("summary request");
        assert!(summary_request.prompt.contains("QA Engineer"));

        let last = executor
            .execute(&fx.context(&plain, None), &ArtifactStore::new())
            .expect("success");
        assert_eq!(last.summary, None);
        assert_eq!(agent_client.summary_count(), 1);
    }

    #[test]
    fn blank_or_failed_summary_is_not_fatal() {
        let fx = Fixture::new();
        let agent_client = ScriptedAgent::new().with_summaries(vec![Ok("   "), Err("quota")]);
        let validator = ScriptedValidator::new();
        let executor = StepExecutor::new(&agent_client, &validator, &fx.events, &fx.config);
        let plain = step(Some("impl"), "coder");

        for _ in 0..2 {
            let outcome = executor
                .execute(&fx.context(&plain, Some("Reviewer")), &ArtifactStore::new())
                .expect("success");
            assert_eq!(outcome.summary, None);
        }
        assert_eq!(
            fx.events
                .kinds()
                .iter()
                .filter(|kind| **kind == "summary_unavailable")
                .count(),
            2
        );
    }

    #[test]
    fn prompt_includes_filtered_artifacts() {
        let fx = Fixture::new();
        let agent_client = ScriptedAgent::new();
        let validator = ScriptedValidator::new();
        let executor = StepExecutor::new(&agent_client, &validator, &fx.events, &fx.config);

        let mut store = ArtifactStore::new();
        for (number, id, summary) in [(1, "plan", "Use flask."), (2, "schema", "Tables added.")] {
            store.add(StepArtifact {
                step_number: number,
                step_id: Some(id.to_string()),
                agent_id: "coder".to_string(),
                agent_role: "Planner".to_string(),
                summary: summary.to_string(),
            });
        }
        let mut focused = step(Some("impl"), "coder");
        focused.agent.context_from = vec!["schema".to_string(), "missing".to_string()];

        executor
            .execute(&fx.context(&focused, None), &store)
            .expect("success");
        let prompt = &agent_client.work_prompts()[0];
        assert!(prompt.contains("[Previous schema: Planner]\nTables added."));
        assert!(!prompt.contains("Use flask."));
    }

    #[test]
    fn events_trace_the_attempt_sequence() {
        let fx = Fixture::new();
        let agent_client = ScriptedAgent::new();
        let validator = ScriptedValidator::new().with(
            "pytest",
            vec![CheckResult::fail("boom"), CheckResult::pass("ok")],
        );
        let executor = StepExecutor::new(&agent_client, &validator, &fx.events, &fx.config);
        let checked = validated_step(Some("impl"), "coder", retrying(1, "pytest"));

        executor
            .execute(&fx.context(&checked, None), &ArtifactStore::new())
            .expect("success");
        assert_eq!(
            fx.events.kinds(),
            vec![
                "attempt_started",
                "validation_failed",
                "attempt_started",
                "validation_passed",
                "step_succeeded",
            ]
        );
    }
}
