//! Test-only helpers: workflow builders and scripted collaborators.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::Path;

use anyhow::{Result, anyhow};

use crate::core::types::CheckResult;
use crate::events::{EventSink, RunEvent};
use crate::io::agent::{AgentClient, AgentRequest, AgentRequestKind};
use crate::io::validation::ValidationRunner;
use crate::workflow::{Agent, AgentInvocation, PROMPT_PARAM, Playfile, Step, Task, Validation};

/// Agent with inline instructions and no tools or limits.
pub fn agent(id: &str, role: &str) -> Agent {
    Agent {
        id: id.to_string(),
        role: role.to_string(),
        model: "sonnet".to_string(),
        instructions: format!("You are the {role}."),
        tools: None,
        limits: None,
    }
}

/// Playfile with a single `coder` agent and the given tasks.
pub fn playfile_with(tasks: Vec<Task>) -> Playfile {
    Playfile {
        version: 1,
        imports: Vec::new(),
        agents: vec![agent("coder", "Implementation Engineer")],
        tasks,
    }
}

/// Task rooted at `.` with no file patterns.
pub fn task_with_steps(id: &str, steps: Vec<Step>) -> Task {
    Task {
        id: id.to_string(),
        description: format!("{id} description"),
        working_dir: ".".to_string(),
        files: None,
        steps,
    }
}

/// Task whose working directory is `dir`.
pub fn task_in(dir: &Path, id: &str, steps: Vec<Step>) -> Task {
    Task {
        working_dir: dir.display().to_string(),
        ..task_with_steps(id, steps)
    }
}

/// Step without validation whose prompt names the step.
pub fn step(id: Option<&str>, agent_id: &str) -> Step {
    let mut params = BTreeMap::new();
    params.insert(
        PROMPT_PARAM.to_string(),
        format!("Work on {}", id.unwrap_or("the task")),
    );
    Step {
        id: id.map(str::to_string),
        name: None,
        agent: AgentInvocation {
            agent_id: agent_id.to_string(),
            params,
            context_from: Vec::new(),
        },
        validation: None,
    }
}

pub fn validated_step(id: Option<&str>, agent_id: &str, validation: Validation) -> Step {
    Step {
        validation: Some(validation),
        ..step(id, agent_id)
    }
}

/// Scratch directory pre-populated with `files` (relative path, contents).
pub fn workspace_with_files(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for (rel, contents) in files {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write workspace file");
    }
    dir
}

/// Agent client answering from queues.
///
/// Work requests pop from the work queue and fall back to `"done"`; summary
/// requests pop from the summary queue and fall back to a role-based line.
/// `Err` entries become invocation errors. Every request is recorded.
#[derive(Default)]
pub struct ScriptedAgent {
    work: RefCell<VecDeque<Result<String, String>>>,
    summaries: RefCell<VecDeque<Result<String, String>>>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_work(self, responses: Vec<Result<&str, &str>>) -> Self {
        self.work.borrow_mut().extend(owned(responses));
        self
    }

    pub fn with_summaries(self, responses: Vec<Result<&str, &str>>) -> Self {
        self.summaries.borrow_mut().extend(owned(responses));
        self
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }

    /// Prompts of work requests, in invocation order.
    pub fn work_prompts(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.kind == AgentRequestKind::Work)
            .map(|r| r.prompt.clone())
            .collect()
    }

    pub fn work_count(&self) -> usize {
        self.count(AgentRequestKind::Work)
    }

    pub fn summary_count(&self) -> usize {
        self.count(AgentRequestKind::Summary)
    }

    fn count(&self, kind: AgentRequestKind) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }
}

fn owned(responses: Vec<Result<&str, &str>>) -> impl Iterator<Item = Result<String, String>> {
    responses
        .into_iter()
        .map(|r| r.map(str::to_string).map_err(str::to_string))
}

impl AgentClient for ScriptedAgent {
    fn exec(&self, request: &AgentRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        let next = match request.kind {
            AgentRequestKind::Work => self.work.borrow_mut().pop_front(),
            AgentRequestKind::Summary => self.summaries.borrow_mut().pop_front(),
        };
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(match request.kind {
                AgentRequestKind::Work => "done".to_string(),
                AgentRequestKind::Summary => format!("{} finished its step.", request.agent.role),
            }),
        }
    }
}

/// Validator answering from per-command queues.
///
/// The last scripted result for a command repeats once the queue is down to
/// one entry; unscripted commands pass with `"ok"`.
#[derive(Default)]
pub struct ScriptedValidator {
    results: RefCell<HashMap<String, VecDeque<CheckResult>>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, command: &str, results: Vec<CheckResult>) -> Self {
        self.results
            .borrow_mut()
            .insert(command.to_string(), results.into());
        self
    }

    /// Commands run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl ValidationRunner for ScriptedValidator {
    fn run(&self, command: &str, _workdir: &Path) -> CheckResult {
        self.calls.borrow_mut().push(command.to_string());
        let mut results = self.results.borrow_mut();
        let Some(queue) = results.get_mut(command) else {
            return CheckResult::pass("ok");
        };
        if queue.len() > 1 {
            return queue.pop_front().unwrap_or_else(|| CheckResult::pass("ok"));
        }
        queue
            .front()
            .cloned()
            .unwrap_or_else(|| CheckResult::pass("ok"))
    }
}

/// Sink that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: RefCell<Vec<RunEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.borrow().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.borrow().iter().map(RunEvent::kind).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &RunEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}
