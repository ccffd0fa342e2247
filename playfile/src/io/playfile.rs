//! Playfile loading: YAML document -> schema check -> typed model -> invariants.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::invariants::validate_playfile;
use crate::workflow::{Agent, Playfile, Task};

const PLAYFILE_SCHEMA: &str = include_str!("../schemas/playfile.schema.json");

/// File name looked up when no playfile path is given.
pub const DEFAULT_PLAYFILE: &str = "playfile.yaml";

/// An imported document contributes agents and tasks; `version` is optional.
#[derive(Debug, Deserialize)]
struct PlayfileFragment {
    #[serde(default)]
    imports: Vec<String>,
    #[serde(default)]
    agents: Vec<Agent>,
    #[serde(default)]
    tasks: Vec<Task>,
}

/// Load a playfile from disk, merging its imports.
///
/// Imports resolve relative to the importing file and may nest; a file that
/// was already merged is skipped.
pub fn load_playfile(path: &Path) -> Result<Playfile> {
    let value = read_document(path)?;
    let mut playfile: Playfile = serde_json::from_value(value)
        .with_context(|| format!("parse playfile {}", path.display()))?;

    let mut visited = HashSet::new();
    visited.insert(canonical(path));
    let imports = playfile.imports.clone();
    for import in &imports {
        merge_import(&mut playfile, &resolve_import(path, import), &mut visited)?;
    }

    check_invariants(&playfile)
        .with_context(|| format!("invalid playfile {}", path.display()))?;
    debug!(
        path = %path.display(),
        agents = playfile.agents.len(),
        tasks = playfile.tasks.len(),
        "playfile loaded"
    );
    Ok(playfile)
}

/// Parse a playfile from a string. Imports are not resolved.
pub fn parse_playfile(raw: &str) -> Result<Playfile> {
    let value = parse_document(raw)?;
    let playfile: Playfile = serde_json::from_value(value).context("parse playfile")?;
    if !playfile.imports.is_empty() {
        warn!(
            imports = playfile.imports.len(),
            "imports are ignored when parsing from a string"
        );
    }
    check_invariants(&playfile)?;
    Ok(playfile)
}

fn merge_import(
    playfile: &mut Playfile,
    path: &Path,
    visited: &mut HashSet<PathBuf>,
) -> Result<()> {
    if !visited.insert(canonical(path)) {
        debug!(path = %path.display(), "import already merged");
        return Ok(());
    }
    let value = read_document(path)?;
    let fragment: PlayfileFragment = serde_json::from_value(value)
        .with_context(|| format!("parse import {}", path.display()))?;
    debug!(
        path = %path.display(),
        agents = fragment.agents.len(),
        tasks = fragment.tasks.len(),
        "merging import"
    );
    playfile.agents.extend(fragment.agents);
    playfile.tasks.extend(fragment.tasks);
    for nested in &fragment.imports {
        merge_import(playfile, &resolve_import(path, nested), visited)?;
    }
    Ok(())
}

fn resolve_import(importer: &Path, import: &str) -> PathBuf {
    let base = importer.parent().unwrap_or_else(|| Path::new("."));
    base.join(import)
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn read_document(path: &Path) -> Result<Value> {
    if !path.is_file() {
        bail!("playfile not found: {}", path.display());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_document(&raw).with_context(|| format!("load {}", path.display()))
}

/// YAML -> JSON value, rejecting non-mapping documents, then schema check.
fn parse_document(raw: &str) -> Result<Value> {
    let value: Value = serde_yaml::from_str(raw).context("invalid YAML")?;
    if !value.is_object() {
        bail!("playfile must be a mapping at the top level");
    }
    let schema: Value = serde_json::from_str(PLAYFILE_SCHEMA).context("parse playfile schema")?;
    validate_schema(&value, &schema)?;
    Ok(value)
}

/// Validate JSON instance against a JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

fn check_invariants(playfile: &Playfile) -> Result<()> {
    let errors = validate_playfile(playfile);
    if !errors.is_empty() {
        bail!("invariant violations:\n- {}", errors.join("\n- "));
    }
    Ok(())
}
