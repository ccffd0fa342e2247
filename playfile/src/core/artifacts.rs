//! Ordered, id-addressable store of step artifacts for one task run.

use std::collections::HashMap;

use crate::core::types::StepArtifact;

const CONTEXT_HEADING: &str = "## Context from Previous Steps\n";

/// Artifacts accumulated while a task runs.
///
/// Owned by a single task run and discarded with it; artifacts never cross
/// task boundaries.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    artifacts: Vec<StepArtifact>,
    by_id: HashMap<String, usize>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an artifact. Artifacts carrying a step id are also indexed by it;
    /// a later artifact with the same id replaces the index entry.
    pub fn add(&mut self, artifact: StepArtifact) {
        if let Some(id) = &artifact.step_id {
            self.by_id.insert(id.clone(), self.artifacts.len());
        }
        self.artifacts.push(artifact);
    }

    /// Render artifact context for a step.
    ///
    /// `None` (or an empty id list) selects every artifact in insertion order.
    /// Otherwise only artifacts whose step id is listed are rendered, in the
    /// order of `ids`; unknown ids are skipped. Returns an empty string when
    /// nothing is selected.
    pub fn context_for(&self, ids: Option<&[String]>) -> String {
        let selected: Vec<&StepArtifact> = match ids {
            Some(ids) if !ids.is_empty() => ids
                .iter()
                .filter_map(|id| self.by_id.get(id))
                .map(|&idx| &self.artifacts[idx])
                .collect(),
            _ => self.artifacts.iter().collect(),
        };
        if selected.is_empty() {
            return String::new();
        }

        let mut parts = Vec::with_capacity(selected.len() + 1);
        parts.push(CONTEXT_HEADING.to_string());
        parts.extend(selected.iter().map(|artifact| artifact.format_for_context()));
        parts.join("\n")
    }

    pub fn has_artifacts(&self) -> bool {
        !self.artifacts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.by_id.contains_key(step_id)
    }

    pub fn artifacts(&self) -> &[StepArtifact] {
        &self.artifacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(step_number: usize, step_id: Option<&str>, summary: &str) -> StepArtifact {
        StepArtifact {
            step_number,
            step_id: step_id.map(str::to_string),
            agent_id: format!("agent-{step_number}"),
            agent_role: format!("Role {step_number}"),
            summary: summary.to_string(),
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn empty_store_renders_nothing() {
        let store = ArtifactStore::new();
        assert!(!store.has_artifacts());
        assert_eq!(store.context_for(None), "");
    }

    #[test]
    fn all_artifacts_render_in_insertion_order() {
        let mut store = ArtifactStore::new();
        store.add(artifact(1, Some("plan"), "planned"));
        store.add(artifact(2, None, "built"));

        let context = store.context_for(None);
        assert!(context.starts_with("## Context from Previous Steps\n"));
        let plan = context.find("[Previous plan: Role 1]").expect("plan block");
        let built = context.find("[Previous Step 2: Role 2]").expect("step 2 block");
        assert!(plan < built);
        assert!(context.contains("planned"));
        assert!(context.contains("built"));
    }

    /// Repeated rendering without intervening `add` is stable.
    #[test]
    fn context_rendering_is_idempotent() {
        let mut store = ArtifactStore::new();
        store.add(artifact(1, Some("a"), "first"));
        store.add(artifact(2, Some("b"), "second"));

        assert_eq!(store.context_for(None), store.context_for(None));
    }

    #[test]
    fn filtered_context_follows_requested_order() {
        let mut store = ArtifactStore::new();
        store.add(artifact(1, Some("a"), "first"));
        store.add(artifact(2, Some("b"), "second"));
        store.add(artifact(3, Some("c"), "third"));

        let context = store.context_for(Some(ids(&["c", "a"]).as_slice()));
        let c = context.find("[Previous c:").expect("c block");
        let a = context.find("[Previous a:").expect("a block");
        assert!(c < a);
        assert!(!context.contains("[Previous b:"));
    }

    #[test]
    fn unknown_ids_are_skipped() {
        let mut store = ArtifactStore::new();
        store.add(artifact(1, Some("a"), "first"));

        assert_eq!(store.context_for(Some(ids(&["missing-id"]).as_slice())), "");
        let context = store.context_for(Some(ids(&["missing-id", "a"]).as_slice()));
        assert!(context.contains("[Previous a: Role 1]"));
    }

    #[test]
    fn empty_id_list_selects_everything() {
        let mut store = ArtifactStore::new();
        store.add(artifact(1, None, "first"));

        assert_eq!(store.context_for(Some(Vec::new().as_slice())), store.context_for(None));
    }

    #[test]
    fn colliding_ids_resolve_to_latest() {
        let mut store = ArtifactStore::new();
        store.add(artifact(1, Some("dup"), "old"));
        store.add(artifact(2, Some("dup"), "new"));

        let context = store.context_for(Some(ids(&["dup"]).as_slice()));
        assert!(context.contains("new"));
        assert!(!context.contains("old"));
        assert_eq!(store.len(), 2);
        assert!(store.contains("dup"));
    }
}
