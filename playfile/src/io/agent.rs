//! Agent client abstraction.
//!
//! The [`AgentClient`] trait decouples step orchestration from the agent
//! backend (an external agent CLI by default). Tests use scripted clients that
//! return canned responses without spawning processes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::duration::parse_duration;
use crate::core::feedback::truncate_tail;
use crate::io::config::AgentCommandConfig;
use crate::io::process::run_command_with_stream;
use crate::workflow::Agent;

/// Characters of agent stderr quoted in a failure message.
const STDERR_TAIL_CHARS: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRequestKind {
    /// The step's main work prompt.
    Work,
    /// Follow-up in the same conversation asking for a handoff summary.
    Summary,
}

/// Parameters for an agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub kind: AgentRequestKind,
    pub agent: Agent,
    pub prompt: String,
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Files selected from the task's read patterns.
    pub context_files: Vec<PathBuf>,
    pub timeout: Duration,
    /// Bytes of stdout/stderr kept in memory.
    pub output_limit_bytes: usize,
    /// Where agent stdout is teed line by line, when set.
    pub log_path: Option<PathBuf>,
}

/// Abstraction over agent backends. Returns the agent's final text response.
pub trait AgentClient {
    fn exec(&self, request: &AgentRequest) -> Result<String>;
}

/// Timeout for an agent: its declared runtime limit, else `default`.
pub fn agent_timeout(agent: &Agent, default: Duration) -> Duration {
    let Some(raw) = agent.runtime_limit() else {
        return default;
    };
    match parse_duration(raw) {
        Ok(limit) => limit,
        Err(err) => {
            warn!(agent = %agent.id, runtime = raw, err = %err, "ignoring invalid runtime limit");
            default
        }
    }
}

/// Client that spawns the configured agent CLI and feeds the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CliAgentClient {
    config: AgentCommandConfig,
    /// Directory that relative instruction paths resolve against.
    base_dir: PathBuf,
}

impl CliAgentClient {
    pub fn new(config: AgentCommandConfig, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            base_dir: base_dir.into(),
        }
    }

    fn build_command(&self, request: &AgentRequest) -> Result<Command> {
        let (program, leading) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent command is empty"))?;
        let instructions = request
            .agent
            .instructions_content(&self.base_dir)
            .with_context(|| format!("resolve instructions for agent '{}'", request.agent.id))?;

        let mut cmd = Command::new(program);
        cmd.args(leading)
            .current_dir(&request.workdir)
            .arg("--model")
            .arg(&request.agent.model)
            .arg("--append-system-prompt")
            .arg(instructions);
        if !self.config.permission_mode.is_empty() {
            cmd.arg("--permission-mode").arg(&self.config.permission_mode);
        }
        if let Some(tools) = request.agent.allowed_tools() {
            cmd.arg("--allowedTools").arg(tools.join(","));
        }
        for dir in context_dirs(&request.context_files) {
            cmd.arg("--add-dir").arg(dir);
        }
        if request.kind == AgentRequestKind::Summary {
            cmd.arg("--continue");
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        Ok(cmd)
    }
}

impl AgentClient for CliAgentClient {
    #[instrument(skip_all, fields(agent = %request.agent.id, kind = ?request.kind, timeout_secs = request.timeout.as_secs()))]
    fn exec(&self, request: &AgentRequest) -> Result<String> {
        if !request.workdir.is_dir() {
            bail!(
                "working directory {} does not exist",
                request.workdir.display()
            );
        }
        info!(workdir = %request.workdir.display(), "starting agent");

        let cmd = self.build_command(request)?;
        let output = run_command_with_stream(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
            request.log_path.as_deref(),
        )
        .with_context(|| format!("run agent '{}'", request.agent.id))?;

        if output.timed_out {
            warn!("agent timed out");
            bail!(
                "agent '{}' timed out after {} seconds",
                request.agent.id,
                request.timeout.as_secs()
            );
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "agent '{}' exited with status {:?}: {}",
                request.agent.id,
                output.status.code(),
                truncate_tail(stderr.trim(), STDERR_TAIL_CHARS)
            );
        }

        let response = output.stdout_text().trim().to_string();
        debug!(response_bytes = response.len(), "agent completed");
        Ok(response)
    }
}

/// Distinct parent directories of the context files, sorted.
fn context_dirs(files: &[PathBuf]) -> BTreeSet<&Path> {
    files
        .iter()
        .filter_map(|file| file.parent())
        .filter(|dir| !dir.as_os_str().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{AgentLimits, ToolsConfig, ToolsMode};

    fn agent() -> Agent {
        Agent {
            id: "coder".to_string(),
            role: "Coder".to_string(),
            model: "sonnet".to_string(),
            instructions: "Write tests first.".to_string(),
            tools: Some(ToolsConfig {
                mode: ToolsMode::Whitelist,
                commands: vec!["git".to_string()],
                mcp: Vec::new(),
            }),
            limits: None,
        }
    }

    fn request(workdir: &Path, kind: AgentRequestKind) -> AgentRequest {
        AgentRequest {
            kind,
            agent: agent(),
            prompt: "do work".to_string(),
            workdir: workdir.to_path_buf(),
            context_files: vec![
                workdir.join("src/a.py"),
                workdir.join("src/b.py"),
                workdir.join("docs/x.md"),
            ],
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
            log_path: None,
        }
    }

    /// Agent stand-in: echoes stdin, then its arguments one per line.
    fn echo_client(base_dir: &Path) -> CliAgentClient {
        CliAgentClient::new(
            AgentCommandConfig {
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    r#"cat; echo; for arg in "$@"; do echo "$arg"; done"#.to_string(),
                    "agent".to_string(),
                ],
                permission_mode: "bypassPermissions".to_string(),
            },
            base_dir,
        )
    }

    #[test]
    fn passes_prompt_and_flags() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let response = echo_client(root)
            .exec(&request(root, AgentRequestKind::Work))
            .expect("exec");
        let lines: Vec<&str> = response.lines().collect();

        assert_eq!(lines[0], "do work");
        let expected_dirs = [
            root.join("docs").display().to_string(),
            root.join("src").display().to_string(),
        ];
        assert_eq!(
            &lines[1..],
            &[
                "--model",
                "sonnet",
                "--append-system-prompt",
                "Write tests first.",
                "--permission-mode",
                "bypassPermissions",
                "--allowedTools",
                "Bash(git:*)",
                "--add-dir",
                expected_dirs[0].as_str(),
                "--add-dir",
                expected_dirs[1].as_str(),
            ]
        );
    }

    #[test]
    fn summary_requests_continue_the_conversation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let response = echo_client(temp.path())
            .exec(&request(temp.path(), AgentRequestKind::Summary))
            .expect("exec");
        assert_eq!(response.lines().last(), Some("--continue"));
    }

    #[test]
    fn tees_stdout_to_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_path = temp.path().join("logs/step-1.log");
        let mut req = request(temp.path(), AgentRequestKind::Work);
        req.log_path = Some(log_path.clone());

        echo_client(temp.path()).exec(&req).expect("exec");
        let log = std::fs::read_to_string(&log_path).expect("log");
        assert!(log.starts_with("do work\n"));
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let client = CliAgentClient::new(
            AgentCommandConfig {
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "cat >/dev/null; echo rate limited >&2; exit 4".to_string(),
                    "agent".to_string(),
                ],
                permission_mode: String::new(),
            },
            temp.path(),
        );
        let err = client
            .exec(&request(temp.path(), AgentRequestKind::Work))
            .expect_err("failure");
        let msg = err.to_string();
        assert!(msg.contains("Some(4)"));
        assert!(msg.contains("rate limited"));
    }

    #[test]
    fn timeout_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let client = CliAgentClient::new(
            AgentCommandConfig {
                command: vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string()],
                permission_mode: String::new(),
            },
            temp.path(),
        );
        let mut req = request(temp.path(), AgentRequestKind::Work);
        req.timeout = Duration::from_millis(300);
        let err = client.exec(&req).expect_err("timeout");
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn runtime_limit_overrides_default_timeout() {
        let default = Duration::from_secs(1800);
        let mut with_limit = agent();
        with_limit.limits = Some(AgentLimits {
            runtime: Some("25m".to_string()),
            iterations: None,
        });
        assert_eq!(agent_timeout(&with_limit, default), Duration::from_secs(1500));
        assert_eq!(agent_timeout(&agent(), default), default);
    }
}
