//! Run logging under `.playfile/runs/<run-id>/`.
//!
//! Every [`RunEvent`] is appended to `events.jsonl` as it happens; agent
//! output is teed into `logs/`; `summary.json` is written once at the end.

use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::events::{EventSink, RunEvent};

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub events_path: PathBuf,
    pub summary_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl RunPaths {
    pub fn new(root: &Path, run_id: &str) -> Self {
        let dir = root.join(".playfile").join("runs").join(run_id);
        Self {
            events_path: dir.join("events.jsonl"),
            summary_path: dir.join("summary.json"),
            logs_dir: dir.join("logs"),
            dir,
        }
    }
}

/// Append-only JSONL event recorder for one run.
pub struct RunLog {
    run_id: String,
    paths: RunPaths,
    started: Instant,
    writer: RefCell<BufWriter<File>>,
}

impl RunLog {
    /// Create a fresh run directory under `root` for `task_id`.
    pub fn create(root: &Path, task_id: &str) -> Result<Self> {
        let runs_dir = root.join(".playfile").join("runs");
        fs::create_dir_all(&runs_dir)
            .with_context(|| format!("create runs dir {}", runs_dir.display()))?;
        let run_id = create_unique_run_dir(&runs_dir, task_id)?;
        let paths = RunPaths::new(root, &run_id);
        let file = File::create(&paths.events_path)
            .with_context(|| format!("create {}", paths.events_path.display()))?;
        debug!(run_id = %run_id, dir = %paths.dir.display(), "run log created");
        Ok(Self {
            run_id,
            paths,
            started: Instant::now(),
            writer: RefCell::new(BufWriter::new(file)),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn write_summary<T: Serialize>(&self, summary: &T) -> Result<()> {
        self.writer
            .borrow_mut()
            .flush()
            .with_context(|| format!("flush {}", self.paths.events_path.display()))?;
        let mut buf = serde_json::to_string_pretty(summary)?;
        buf.push('\n');
        fs::write(&self.paths.summary_path, buf)
            .with_context(|| format!("write {}", self.paths.summary_path.display()))
    }

    fn append(&self, event: &RunEvent) -> Result<()> {
        let mut value = serde_json::to_value(event)?;
        value["elapsed_ms"] = json!(self.elapsed_ms());
        let mut writer = self.writer.borrow_mut();
        serde_json::to_writer(&mut *writer, &value)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl EventSink for RunLog {
    fn emit(&self, event: &RunEvent) {
        if let Err(err) = self.append(event) {
            warn!(err = %format!("{err:#}"), path = %self.paths.events_path.display(), "failed to append run event");
        }
    }
}

fn create_unique_run_dir(runs_dir: &Path, task_id: &str) -> Result<String> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let slug: String = task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let base = format!("run-{slug}-{secs}");
    for suffix in 1..=999u32 {
        let id = if suffix == 1 {
            base.clone()
        } else {
            format!("{base}-{suffix}")
        };
        match fs::create_dir(runs_dir.join(&id)) {
            Ok(()) => return Ok(id),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("create run dir for '{id}'"));
            }
        }
    }
    Err(anyhow!(
        "unable to create unique run dir from base '{base}' (too many runs this second)"
    ))
}
