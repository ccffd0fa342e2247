//! I/O helpers for the orchestration layer.

pub mod agent;
pub mod config;
pub mod files;
pub mod playfile;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod validation;
