//! Step prompt builder with budgeted, droppable sections.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use tracing::{debug, warn};

const STEP_TEMPLATE: &str = include_str!("prompts/step.md");
const SUMMARY_TEMPLATE: &str = include_str!("prompts/summary.md");

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 3] = ["files", "project", "artifacts"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section marker regex")
});

/// Everything a single attempt's prompt is assembled from.
#[derive(Debug, Clone)]
pub struct StepPromptInputs<'a> {
    pub workdir: &'a Path,
    pub context_files: &'a [PathBuf],
    /// Free-form project notes (e.g. from `--context-file`).
    pub project_context: Option<&'a str>,
    /// Output of `ArtifactStore::context_for`; empty when nothing applies.
    pub artifact_context: &'a str,
    /// Rendered retry feedback; `None` on a first attempt.
    pub feedback: Option<&'a str>,
    pub attempt: u32,
    /// Step prompt after input substitution.
    pub prompt: &'a str,
}

#[derive(Debug, Clone, Copy)]
struct TemplateSection<'t> {
    key: &'t str,
    required: bool,
    source: &'t str,
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Builds step prompts within a byte budget, dropping optional context first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_step(&self, input: &StepPromptInputs<'_>) -> Result<String> {
        let env = environment()?;
        let files: Vec<String> = input
            .context_files
            .iter()
            .map(|path| display_relative(path, input.workdir))
            .collect();
        let ctx = context! {
            workdir => input.workdir.display().to_string(),
            files => files,
            project => non_blank(input.project_context),
            artifacts => non_blank(Some(input.artifact_context)),
            feedback => non_blank(input.feedback),
            attempt => input.attempt,
            prompt => input.prompt.trim(),
        };

        let mut sections = Vec::new();
        for section in template_sections(STEP_TEMPLATE) {
            let content = env
                .render_str(section.source, ctx.clone())
                .with_context(|| format!("render step prompt section '{}'", section.key))?;
            let content = content.trim();
            if content.is_empty() {
                continue;
            }
            sections.push(ParsedSection {
                key: section.key.to_string(),
                required: section.required,
                content: content.to_string(),
            });
        }
        apply_budget(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }

    /// Follow-up prompt asking the agent to summarize its work for the next step.
    pub fn build_summary(&self, next_role: Option<&str>) -> Result<String> {
        let env = environment()?;
        let rendered = env
            .get_template("summary")?
            .render(context! { next_role => non_blank(next_role) })
            .context("render summary prompt")?;
        Ok(rendered.trim().to_string())
    }
}

fn environment() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("summary", SUMMARY_TEMPLATE)
        .context("load summary template")?;
    Ok(env)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn display_relative(path: &Path, workdir: &Path) -> String {
    path.strip_prefix(workdir)
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Split template source on `<!-- section:KEY required|droppable -->` markers.
///
/// Markers are read from the template, never from rendered output, so
/// interpolated text cannot open a section of its own.
fn template_sections(source: &str) -> Vec<TemplateSection<'_>> {
    let markers: Vec<_> = SECTION_RE.captures_iter(source).collect();
    let mut sections = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(source.len());
        sections.push(TemplateSection {
            key: key.as_str(),
            required: kind.as_str() == "required",
            source: &source[whole.end()..end],
        });
    }
    sections
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // Required sections are never cut; the agent sees the full task.
    let len = total(sections);
    if len > budget {
        warn!(len, budget, "prompt exceeds budget after dropping optional sections");
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
