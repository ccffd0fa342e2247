//! Runner configuration stored under `.playfile/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Runner configuration (TOML).
///
/// Edited by humans; every field is optional and missing fields fall back to
/// the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Wall-clock bound for each pre/post validation command.
    pub validation_timeout_secs: u64,

    /// Wall-clock bound for an agent invocation when the agent declares no runtime limit.
    pub agent_timeout_secs: u64,

    /// Bytes of validation stdout/stderr kept in memory.
    pub validation_output_limit_bytes: usize,

    /// Bytes of agent stdout/stderr kept in memory.
    pub agent_output_limit_bytes: usize,

    /// Characters of each failing command's output replayed into the retry prompt.
    pub feedback_output_limit_chars: usize,

    /// Maximum bytes for the assembled step prompt before dropping sections.
    pub prompt_budget_bytes: usize,

    /// Fail a task up front when `context_from` names an unknown or later step.
    pub strict_context: bool,

    pub agent: AgentCommandConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentCommandConfig {
    /// Program and leading arguments of the agent CLI (e.g. `["claude","-p"]`).
    pub command: Vec<String>,

    /// Permission mode passed to the agent CLI; empty disables the flag.
    pub permission_mode: String,
}

impl Default for AgentCommandConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--output-format".to_string(),
                "text".to_string(),
            ],
            permission_mode: "bypassPermissions".to_string(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            validation_timeout_secs: 5 * 60,
            agent_timeout_secs: 30 * 60,
            validation_output_limit_bytes: 1_000_000,
            agent_output_limit_bytes: 1_000_000,
            feedback_output_limit_chars: 2_000,
            prompt_budget_bytes: 100_000,
            strict_context: false,
            agent: AgentCommandConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.validation_timeout_secs == 0 {
            return Err(anyhow!("validation_timeout_secs must be > 0"));
        }
        if self.agent_timeout_secs == 0 {
            return Err(anyhow!("agent_timeout_secs must be > 0"));
        }
        if self.validation_output_limit_bytes == 0 {
            return Err(anyhow!("validation_output_limit_bytes must be > 0"));
        }
        if self.agent_output_limit_bytes == 0 {
            return Err(anyhow!("agent_output_limit_bytes must be > 0"));
        }
        if self.feedback_output_limit_chars == 0 {
            return Err(anyhow!("feedback_output_limit_chars must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
