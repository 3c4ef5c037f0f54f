//! Merge algorithm for included filesystem trees.
//!
//! The root descriptor is the base accumulator; each include is merged into
//! it in declaration order, so whatever is already present wins unless the
//! incoming entry says otherwise.
//!
//! # Merge Rules
//!
//! - A key only in the include is copied in
//! - An include entry carrying `"final": true` replaces the existing entry
//! - Two folders under the same key merge their `content` recursively
//! - Anything else keeps the existing entry and records a conflict; in
//!   strict mode the conflict is an error instead

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{ConductorError, Result};

/// Marker field that lets an include override an existing entry.
pub const FINAL_MARKER: &str = "final";

/// What happened during a merge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Entries copied from the include
    pub added: Vec<String>,
    /// Entries replaced because the include marked them final
    pub replaced: Vec<String>,
    /// Entries kept because the include collided with them
    pub skipped: Vec<String>,
}

impl MergeOutcome {
    fn absorb(&mut self, other: MergeOutcome) {
        self.added.extend(other.added);
        self.replaced.extend(other.replaced);
        self.skipped.extend(other.skipped);
    }
}

/// Merges filesystem trees.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeMerger {
    strict: bool,
}

impl TreeMerger {
    /// A merger that warns and skips on conflicts.
    pub fn lenient() -> Self {
        Self { strict: false }
    }

    /// A merger that fails on conflicts.
    pub fn strict() -> Self {
        Self { strict: true }
    }

    /// Merge `sub` into `parent`.
    pub fn merge(
        &self,
        parent: &mut Map<String, Value>,
        sub: &Map<String, Value>,
    ) -> Result<MergeOutcome> {
        self.merge_at("", parent, sub)
    }

    fn merge_at(
        &self,
        prefix: &str,
        parent: &mut Map<String, Value>,
        sub: &Map<String, Value>,
    ) -> Result<MergeOutcome> {
        let mut outcome = MergeOutcome::default();

        for (key, sub_entry) in sub {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}/{key}")
            };

            if !parent.contains_key(key) {
                parent.insert(key.clone(), sub_entry.clone());
                outcome.added.push(path);
                continue;
            }
            let Some(parent_entry) = parent.get_mut(key) else {
                continue;
            };

            if is_final(sub_entry) {
                *parent_entry = sub_entry.clone();
                outcome.replaced.push(path);
                continue;
            }

            if let (Some(sub_content), true) =
                (folder_content(sub_entry), folder_content(parent_entry).is_some())
            {
                if let Some(parent_content) = folder_content_mut(parent_entry) {
                    let nested = self.merge_at(&path, parent_content, sub_content)?;
                    outcome.absorb(nested);
                }
                continue;
            }

            let message = format!(
                "cannot merge {} into {}",
                describe(sub_entry),
                describe(parent_entry)
            );
            if self.strict {
                return Err(ConductorError::MergeConflict { path, message });
            }
            warn!("Skipping include entry '{}': {}", path, message);
            outcome.skipped.push(path);
        }

        Ok(outcome)
    }
}

/// Merge `sub` into `parent` with lenient conflict handling.
pub fn merge_tree(parent: &mut Map<String, Value>, sub: &Map<String, Value>) -> MergeOutcome {
    // Lenient merging never produces an error.
    TreeMerger::lenient()
        .merge(parent, sub)
        .unwrap_or_default()
}

fn is_final(entry: &Value) -> bool {
    entry
        .get(FINAL_MARKER)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn is_folder(entry: &Value) -> bool {
    entry
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.eq_ignore_ascii_case("folder"))
}

fn folder_content(entry: &Value) -> Option<&Map<String, Value>> {
    if is_folder(entry) {
        entry.get("content").and_then(Value::as_object)
    } else {
        None
    }
}

fn folder_content_mut(entry: &mut Value) -> Option<&mut Map<String, Value>> {
    if is_folder(entry) {
        entry.get_mut("content").and_then(Value::as_object_mut)
    } else {
        None
    }
}

fn describe(entry: &Value) -> String {
    match entry.get("type").and_then(Value::as_str) {
        Some(kind) => format!("a {kind}"),
        None => "an untyped entry".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn disjoint_trees_merge_to_union() {
        let mut parent = tree(json!({
            "a.txt": {"type": "file", "content": "a"}
        }));
        let sub = tree(json!({
            "b.txt": {"type": "file", "content": "b"}
        }));

        let outcome = merge_tree(&mut parent, &sub);

        assert_eq!(parent.len(), 2);
        assert_eq!(parent["a.txt"]["content"], "a");
        assert_eq!(parent["b.txt"]["content"], "b");
        assert_eq!(outcome.added, vec!["b.txt".to_string()]);
    }

    #[test]
    fn final_entry_replaces_verbatim() {
        let mut parent = tree(json!({
            "conf": {"type": "folder", "content": {"x": {"type": "file", "content": "x"}}}
        }));
        let sub = tree(json!({
            "conf": {"type": "file", "content": "flat", "final": true}
        }));

        let outcome = merge_tree(&mut parent, &sub);

        assert_eq!(parent["conf"], sub["conf"]);
        assert_eq!(outcome.replaced, vec!["conf".to_string()]);
    }

    #[test]
    fn existing_entry_wins_without_final() {
        let mut parent = tree(json!({
            "a.txt": {"type": "file", "content": "root"}
        }));
        let sub = tree(json!({
            "a.txt": {"type": "file", "content": "include"}
        }));

        let outcome = merge_tree(&mut parent, &sub);

        assert_eq!(parent["a.txt"]["content"], "root");
        assert_eq!(outcome.skipped, vec!["a.txt".to_string()]);
    }

    #[test]
    fn folder_vs_file_collision_is_skipped() {
        let original = json!({"type": "folder", "content": {}});
        let mut parent = tree(json!({ "lib": original.clone() }));
        let sub = tree(json!({
            "lib": {"type": "file", "content": "oops"}
        }));

        let outcome = TreeMerger::lenient().merge(&mut parent, &sub).unwrap();

        assert_eq!(parent["lib"], original);
        assert_eq!(outcome.skipped, vec!["lib".to_string()]);
    }

    #[test]
    fn folders_merge_recursively() {
        let mut parent = tree(json!({
            "etc": {"type": "folder", "content": {
                "a.conf": {"type": "file", "content": "a"},
                "nested": {"type": "folder", "content": {}}
            }}
        }));
        let sub = tree(json!({
            "etc": {"type": "folder", "content": {
                "b.conf": {"type": "file", "content": "b"},
                "nested": {"type": "folder", "content": {
                    "c.conf": {"type": "file", "content": "c"}
                }}
            }}
        }));

        let outcome = merge_tree(&mut parent, &sub);

        let etc = &parent["etc"]["content"];
        assert_eq!(etc["a.conf"]["content"], "a");
        assert_eq!(etc["b.conf"]["content"], "b");
        assert_eq!(etc["nested"]["content"]["c.conf"]["content"], "c");
        assert_eq!(
            outcome.added,
            vec!["etc/b.conf".to_string(), "etc/nested/c.conf".to_string()]
        );
    }

    #[test]
    fn strict_mode_fails_on_conflict() {
        let mut parent = tree(json!({
            "lib": {"type": "folder", "content": {}}
        }));
        let sub = tree(json!({
            "lib": {"type": "file", "content": "oops"}
        }));

        let err = TreeMerger::strict().merge(&mut parent, &sub).unwrap_err();

        match err {
            ConductorError::MergeConflict { path, .. } => assert_eq!(path, "lib"),
            other => panic!("expected MergeConflict, got {other:?}"),
        }
    }

    #[test]
    fn strict_mode_still_honours_final() {
        let mut parent = tree(json!({
            "lib": {"type": "folder", "content": {}}
        }));
        let sub = tree(json!({
            "lib": {"type": "file", "content": "ok", "final": true}
        }));

        TreeMerger::strict().merge(&mut parent, &sub).unwrap();

        assert_eq!(parent["lib"]["content"], "ok");
    }

    #[test]
    fn sequential_includes_keep_first_writer() {
        let mut parent = tree(json!({}));
        let first = tree(json!({"x": {"type": "file", "content": "first"}}));
        let second = tree(json!({"x": {"type": "file", "content": "second"}}));

        merge_tree(&mut parent, &first);
        merge_tree(&mut parent, &second);

        assert_eq!(parent["x"]["content"], "first");
    }

    #[test]
    fn folder_type_matches_case_insensitively() {
        let mut parent = tree(json!({
            "conf": {"type": "Folder", "content": {"a.txt": {"type": "file", "content": "a"}}}
        }));
        let sub = tree(json!({
            "conf": {"type": "folder", "content": {"b.txt": {"type": "file", "content": "b"}}}
        }));

        TreeMerger::strict().merge(&mut parent, &sub).unwrap();

        let content = parent["conf"]["content"].as_object().unwrap();
        assert!(content.contains_key("a.txt"));
        assert!(content.contains_key("b.txt"));
    }
}
