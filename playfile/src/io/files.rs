//! Expansion of a task's read patterns into concrete context files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use tracing::{debug, warn};

/// Expand glob `patterns` relative to `working_dir` into regular files.
///
/// Returns `None` when no patterns are configured or nothing matched. `**`
/// matches recursively; wildcards do not match a leading `.`, so hidden files
/// and directories need a literal dot in the pattern. The working directory
/// is matched literally. Directories are skipped; files matched by several
/// patterns are listed once, in first-match order. The result is advisory
/// context for the agent, not an access boundary.
pub fn select_files(working_dir: &Path, patterns: &[String]) -> Result<Option<Vec<PathBuf>>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    let root = PathBuf::from(Pattern::escape(&working_dir.to_string_lossy()));
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    for pattern in patterns {
        let full = root.join(pattern);
        let entries = glob::glob_with(&full.to_string_lossy(), options)
            .with_context(|| format!("invalid read pattern '{pattern}'"))?;
        let mut matched = 0usize;
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    warn!(pattern = %pattern, err = %err, "skipping unreadable path");
                    continue;
                }
            };
            if path.is_file() && seen.insert(path.clone()) {
                matched += 1;
                files.push(path);
            }
        }
        debug!(pattern = %pattern, matched, "expanded read pattern");
    }

    if files.is_empty() {
        return Ok(None);
    }
    Ok(Some(files))
}
