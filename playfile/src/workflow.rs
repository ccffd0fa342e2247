//! Immutable workflow model parsed from a playfile.
//!
//! Values are produced by [`crate::io::playfile`] and treated as read-only by
//! the orchestrator for the lifetime of a run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Parameter key holding a step's prompt template.
pub const PROMPT_PARAM: &str = "prompt";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Playfile {
    pub version: u32,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Playfile {
    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|agent| agent.id == id)
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn task_ids(&self) -> Vec<&str> {
        self.tasks.iter().map(|task| task.id.as_str()).collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    pub id: String,
    pub role: String,
    pub model: String,
    /// Inline instructions, or a path to an instructions file.
    pub instructions: String,
    #[serde(default)]
    pub tools: Option<ToolsConfig>,
    #[serde(default)]
    pub limits: Option<AgentLimits>,
}

impl Agent {
    /// Instructions are a file path only when they explicitly look like one.
    pub fn instructions_path(&self) -> Option<PathBuf> {
        let raw = self.instructions.as_str();
        let is_path = raw.ends_with(".md")
            || raw.ends_with(".txt")
            || raw.starts_with("./")
            || raw.starts_with("../")
            || raw.starts_with('/');
        is_path.then(|| PathBuf::from(raw))
    }

    /// Resolve instructions to text. Relative paths resolve against `base_dir`
    /// (the directory of the playfile), and a sibling `common.md` is prepended.
    pub fn instructions_content(&self, base_dir: &Path) -> Result<String> {
        let Some(path) = self.instructions_path() else {
            return Ok(self.instructions.clone());
        };
        let path = base_dir.join(path);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("read instructions {}", path.display()))?;
        let common_path = path.with_file_name("common.md");
        if common_path != path && common_path.is_file() {
            let common = fs::read_to_string(&common_path)
                .with_context(|| format!("read {}", common_path.display()))?;
            return Ok(format!("{common}\n\n{content}"));
        }
        Ok(content)
    }

    /// Tool allow-list for the agent CLI, `None` meaning "allow everything".
    ///
    /// Blacklist mode allows everything at this layer; denied commands are
    /// enforced by the agent service itself.
    pub fn allowed_tools(&self) -> Option<Vec<String>> {
        let tools = self.tools.as_ref()?;
        if tools.mode == ToolsMode::Blacklist {
            return None;
        }
        let allowed: Vec<String> = tools
            .commands
            .iter()
            .map(|cmd| format!("Bash({cmd}:*)"))
            .chain(tools.mcp.iter().map(|id| format!("mcp__{id}__*")))
            .collect();
        (!allowed.is_empty()).then_some(allowed)
    }

    pub fn runtime_limit(&self) -> Option<&str> {
        self.limits.as_ref()?.runtime.as_deref()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolsMode {
    Whitelist,
    Blacklist,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolsConfig {
    pub mode: ToolsMode,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub mcp: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentLimits {
    /// Maximum runtime, e.g. `"25m"` or `"1h"`.
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub iterations: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    #[serde(default)]
    pub files: Option<FilesConfig>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_working_dir() -> String {
    ".".to_string()
}

impl Task {
    pub fn read_patterns(&self) -> &[String] {
        self.files
            .as_ref()
            .map(|files| files.read.as_slice())
            .unwrap_or_default()
    }
}

/// File access hints. Advisory context for the agent, not an access boundary.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilesConfig {
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub agent: AgentInvocation,
    #[serde(default, rename = "validate")]
    pub validation: Option<Validation>,
}

impl Step {
    /// Label used in artifact headers and reports: the step id, or `Step N`.
    pub fn label(&self, step_number: usize) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("Step {step_number}"),
        }
    }

    /// Human-facing title: name, then id, then `Step N`.
    pub fn title(&self, step_number: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.label(step_number))
    }

    pub fn prompt_template(&self) -> &str {
        self.agent
            .params
            .get(PROMPT_PARAM)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn max_attempts(&self) -> u32 {
        self.validation
            .as_ref()
            .map(Validation::max_attempts)
            .unwrap_or(1)
    }

    /// Whether a failure of this step is tolerated by the enclosing task.
    ///
    /// The flag is declared on the step's validation block but governs
    /// task-level control flow: `true` means skip to the next step, `false`
    /// aborts the task.
    pub fn continue_on_failure(&self) -> bool {
        self.validation
            .as_ref()
            .is_some_and(|validation| validation.continue_on_failure)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentInvocation {
    #[serde(rename = "use")]
    pub agent_id: String,
    #[serde(default, rename = "with")]
    pub params: BTreeMap<String, String>,
    /// Step ids whose artifacts are injected. Empty means all prior artifacts.
    #[serde(default)]
    pub context_from: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Validation {
    #[serde(default)]
    pub pre_command: Option<String>,
    #[serde(default)]
    pub post_command: Option<String>,
    #[serde(default)]
    pub post_commands: Vec<ValidationCommand>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub continue_on_failure: bool,
}

impl Validation {
    /// Post-commands in declaration order, whichever form was used.
    pub fn post_commands(&self) -> Vec<ValidationCommand> {
        match &self.post_command {
            Some(command) => vec![ValidationCommand {
                command: command.clone(),
                description: None,
            }],
            None => self.post_commands.clone(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationCommand {
    pub command: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl ValidationCommand {
    pub fn description_or_command(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_with_instructions(instructions: &str) -> Agent {
        Agent {
            id: "coder".to_string(),
            role: "Coder".to_string(),
            model: "sonnet".to_string(),
            instructions: instructions.to_string(),
            tools: None,
            limits: None,
        }
    }

    #[test]
    fn instructions_path_only_for_explicit_paths() {
        assert!(
            agent_with_instructions("You are helpful")
                .instructions_path()
                .is_none()
        );
        assert!(
            agent_with_instructions("agents/coder.md")
                .instructions_path()
                .is_some()
        );
        assert!(
            agent_with_instructions("./agents/coder")
                .instructions_path()
                .is_some()
        );
    }

    #[test]
    fn instructions_content_prepends_common() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("agents");
        fs::create_dir_all(&dir).expect("agents dir");
        fs::write(dir.join("common.md"), "shared rules").expect("write common");
        fs::write(dir.join("coder.md"), "write code").expect("write coder");

        let content = agent_with_instructions("agents/coder.md")
            .instructions_content(temp.path())
            .expect("instructions");
        assert_eq!(content, "shared rules\n\nwrite code");
    }

    #[test]
    fn whitelist_tools_map_to_allowed_patterns() {
        let mut agent = agent_with_instructions("inline");
        agent.tools = Some(ToolsConfig {
            mode: ToolsMode::Whitelist,
            commands: vec!["git".to_string()],
            mcp: vec!["fs".to_string()],
        });
        assert_eq!(
            agent.allowed_tools(),
            Some(vec!["Bash(git:*)".to_string(), "mcp__fs__*".to_string()])
        );

        agent.tools = Some(ToolsConfig {
            mode: ToolsMode::Blacklist,
            commands: vec!["rm".to_string()],
            mcp: Vec::new(),
        });
        assert_eq!(agent.allowed_tools(), None);
    }

    #[test]
    fn single_post_command_takes_precedence() {
        let validation = Validation {
            post_command: Some("pytest".to_string()),
            max_retries: 2,
            ..Validation::default()
        };
        let commands = validation.post_commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, "pytest");
        assert_eq!(validation.max_attempts(), 3);
    }

    #[test]
    fn step_without_validation_has_one_attempt() {
        let step = Step {
            id: None,
            name: None,
            agent: AgentInvocation {
                agent_id: "coder".to_string(),
                params: BTreeMap::new(),
                context_from: Vec::new(),
            },
            validation: None,
        };
        assert_eq!(step.max_attempts(), 1);
        assert!(!step.continue_on_failure());
        assert_eq!(step.label(4), "Step 4");
        assert_eq!(step.prompt_template(), "");
    }
}
