//! Input substitution for step prompt templates.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static INPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*inputs\.([A-Za-z0-9_-]+)\s*\}\}").expect("input placeholder regex")
});

/// Substitute `{{ inputs.<name> }}` placeholders with caller-supplied values.
///
/// Placeholders without a matching input are left verbatim so the agent sees
/// exactly what was authored. Substituted values are not re-scanned.
pub fn render_inputs(template: &str, inputs: &BTreeMap<String, String>) -> String {
    INPUT_RE
        .replace_all(template, |caps: &Captures<'_>| match inputs.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Names referenced by `{{ inputs.<name> }}` placeholders, in first-use order.
pub fn referenced_inputs(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in INPUT_RE.captures_iter(template) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
