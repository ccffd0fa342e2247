//! Semantic invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::core::duration::parse_duration;
use crate::workflow::{Agent, PROMPT_PARAM, Playfile, Step, Task};

/// Check semantic invariants of a parsed playfile:
/// - `version >= 1`
/// - No duplicate agent, task, or step ids
/// - Required text fields are non-empty
/// - `post_command` and `post_commands` are mutually exclusive
/// - Every step has a non-empty `prompt` parameter
/// - Agent limits are well formed
pub fn validate_playfile(playfile: &Playfile) -> Vec<String> {
    let mut errors = Vec::new();
    if playfile.version < 1 {
        errors.push(format!("version must be >= 1, got {}", playfile.version));
    }

    let mut agent_ids = HashSet::new();
    for agent in &playfile.agents {
        if !agent_ids.insert(agent.id.as_str()) {
            errors.push(format!("duplicate agent id '{}'", agent.id));
        }
        validate_agent(agent, &mut errors);
    }

    let mut task_ids = HashSet::new();
    for task in &playfile.tasks {
        if !task_ids.insert(task.id.as_str()) {
            errors.push(format!("duplicate task id '{}'", task.id));
        }
        validate_task(task, &mut errors);
    }
    errors
}

fn validate_agent(agent: &Agent, errors: &mut Vec<String>) {
    let path = format!("agents/{}", agent.id);
    if agent.id.trim().is_empty() {
        errors.push("agents: id cannot be empty".to_string());
    }
    for (field, value) in [
        ("role", &agent.role),
        ("model", &agent.model),
        ("instructions", &agent.instructions),
    ] {
        if value.trim().is_empty() {
            errors.push(format!("{path}: {field} cannot be empty"));
        }
    }
    if let Some(limits) = &agent.limits {
        if limits.iterations == Some(0) {
            errors.push(format!("{path}: limits.iterations must be >= 1"));
        }
        if let Some(runtime) = &limits.runtime
            && let Err(err) = parse_duration(runtime)
        {
            errors.push(format!("{path}: limits.runtime: {err}"));
        }
    }
}

fn validate_task(task: &Task, errors: &mut Vec<String>) {
    let path = format!("tasks/{}", task.id);
    if task.id.trim().is_empty() {
        errors.push("tasks: id cannot be empty".to_string());
    }
    if task.description.trim().is_empty() {
        errors.push(format!("{path}: description cannot be empty"));
    }

    let mut step_ids = HashSet::new();
    for (idx, step) in task.steps.iter().enumerate() {
        let step_path = format!("{path}/{}", step.label(idx + 1));
        if let Some(id) = &step.id {
            if id.trim().is_empty() {
                errors.push(format!("{step_path}: id cannot be empty"));
            } else if !step_ids.insert(id.as_str()) {
                errors.push(format!("{path}: duplicate step id '{id}'"));
            }
        }
        validate_step(step, &step_path, errors);
    }
}

fn validate_step(step: &Step, path: &str, errors: &mut Vec<String>) {
    if step.agent.agent_id.trim().is_empty() {
        errors.push(format!("{path}: agent 'use' field cannot be empty"));
    }
    if step.prompt_template().trim().is_empty() {
        errors.push(format!(
            "{path}: agent 'with.{PROMPT_PARAM}' is required and cannot be empty"
        ));
    }
    let Some(validation) = &step.validation else {
        return;
    };
    if validation.post_command.is_some() && !validation.post_commands.is_empty() {
        errors.push(format!(
            "{path}: cannot specify both post_command and post_commands"
        ));
    }
    if validation
        .pre_command
        .as_deref()
        .is_some_and(|cmd| cmd.trim().is_empty())
    {
        errors.push(format!("{path}: pre_command cannot be empty"));
    }
    if validation
        .post_command
        .as_deref()
        .is_some_and(|cmd| cmd.trim().is_empty())
    {
        errors.push(format!("{path}: post_command cannot be empty"));
    }
    for (idx, cmd) in validation.post_commands.iter().enumerate() {
        if cmd.command.trim().is_empty() {
            errors.push(format!("{path}: post_commands[{idx}] command cannot be empty"));
        }
    }
}

/// Steps referencing agents that the playfile does not define.
pub fn unknown_agent_refs(playfile: &Playfile) -> Vec<String> {
    let mut errors = Vec::new();
    for task in &playfile.tasks {
        for (idx, step) in task.steps.iter().enumerate() {
            if playfile.agent(&step.agent.agent_id).is_none() {
                errors.push(format!(
                    "tasks/{}/{}: agent '{}' not found in configuration",
                    task.id,
                    step.label(idx + 1),
                    step.agent.agent_id
                ));
            }
        }
    }
    errors
}

/// `context_from` entries that do not name an earlier step of the same task.
///
/// Self and forward references count as unresolved: an artifact is only
/// visible to steps after the one that produced it.
pub fn unresolved_context_refs(task: &Task) -> Vec<String> {
    let mut errors = Vec::new();
    let mut earlier: HashSet<&str> = HashSet::new();
    for (idx, step) in task.steps.iter().enumerate() {
        for id in &step.agent.context_from {
            if !earlier.contains(id.as_str()) {
                errors.push(format!(
                    "tasks/{}/{}: context_from '{}' does not name an earlier step",
                    task.id,
                    step.label(idx + 1),
                    id
                ));
            }
        }
        if let Some(id) = &step.id {
            earlier.insert(id.as_str());
        }
    }
    errors
}
