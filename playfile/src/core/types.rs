//! Shared deterministic types for the orchestration core.
//!
//! These types define stable contracts between core components and the
//! orchestration layer. They do not depend on external state or I/O.

use serde::{Deserialize, Serialize};

/// Handoff summary produced by a completed step for later steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepArtifact {
    /// 1-based position of the producing step within its task.
    pub step_number: usize,
    pub step_id: Option<String>,
    pub agent_id: String,
    pub agent_role: String,
    pub summary: String,
}

impl StepArtifact {
    /// Render as a labeled context block.
    pub fn format_for_context(&self) -> String {
        let label = match &self.step_id {
            Some(id) => id.clone(),
            None => format!("Step {}", self.step_number),
        };
        format!(
            "[Previous {label}: {}]\n{}\n",
            self.agent_role,
            self.summary.trim()
        )
    }
}

/// Outcome of a single validation command.
///
/// Timeouts and spawn errors are reported as `success: false` with an
/// explanatory `output`, never as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub success: bool,
    pub output: String,
}

impl CheckResult {
    pub fn pass(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn fail(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// A post-command that failed during an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub command: String,
    pub description: String,
    pub output: String,
}
