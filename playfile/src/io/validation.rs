//! Validation command runner for pre/post step checks.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::types::CheckResult;
use crate::io::process::{run_command_with_timeout, shell_command};

pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Runs a single shell check and reports the outcome. Never fails: spawn and
/// timeout problems come back as `success: false` with an explanation.
pub trait ValidationRunner {
    fn run(&self, command: &str, workdir: &Path) -> CheckResult;
}

/// Runs checks through `sh -c` with a wall-clock bound.
#[derive(Debug, Clone)]
pub struct ShellValidationRunner {
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Default for ShellValidationRunner {
    fn default() -> Self {
        Self::new(DEFAULT_VALIDATION_TIMEOUT, DEFAULT_OUTPUT_LIMIT_BYTES)
    }
}

impl ShellValidationRunner {
    pub fn new(timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            timeout,
            output_limit_bytes,
        }
    }
}

impl ValidationRunner for ShellValidationRunner {
    #[instrument(skip_all, fields(command = command, workdir = %workdir.display()))]
    fn run(&self, command: &str, workdir: &Path) -> CheckResult {
        if !workdir.is_dir() {
            return CheckResult::fail(format!(
                "Error running command: working directory {} does not exist",
                workdir.display()
            ));
        }

        let cmd = shell_command(command, workdir);
        let output =
            match run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes) {
                Ok(output) => output,
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "validation command could not run");
                    return CheckResult::fail(format!("Error running command: {err:#}"));
                }
            };

        if output.timed_out {
            return CheckResult::fail(format!(
                "Command timed out after {} seconds",
                self.timeout.as_secs()
            ));
        }

        let text = output.combined_text();
        debug!(exit_code = ?output.status.code(), "validation command finished");
        if output.success() {
            CheckResult::pass(text)
        } else {
            CheckResult::fail(text)
        }
    }
}
