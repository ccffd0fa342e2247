//! Stable exit codes for playfile CLI commands.

/// Command succeeded (a tolerated step failure still counts as success).
pub const OK: i32 = 0;
/// Invalid playfile, config, usage, or an unknown task/agent.
pub const INVALID: i32 = 1;
/// A step failed and its task was aborted.
pub const TASK_FAILED: i32 = 2;
