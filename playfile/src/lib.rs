//! Step orchestration engine for playfile workflows.
//!
//! A playfile declares agents and tasks. A task is an ordered list of steps;
//! each step hands a prompt to an external agent, validates the result with
//! shell commands, and retries with failure feedback until the checks pass or
//! the retry budget runs out. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (artifact context, input
//!   templating, retry feedback, invariants). No I/O, fully testable in
//!   isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, globbing, process
//!   execution, config and playfile loading).
//!
//! Orchestration modules ([`step`], [`task`]) coordinate core logic with I/O
//! and report progress through [`events`]; [`report`] renders those events for
//! a terminal.

pub mod core;
pub mod events;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod report;
pub mod step;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
