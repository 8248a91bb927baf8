//! The fixed pipeline topology (spec.md §4.4): which stage follows another,
//! and how a successor task's payload is derived from its predecessor's.

use patchwright_db::models::StageKind;
use serde_json::{Map, Value};

/// Payload keys the dispatcher always copies from predecessor to successor,
/// overlaid by (and overridable by) the completed handler's `metadata`.
pub const ESSENTIAL_KEYS: &[&str] = &[
    "repo_url",
    "branch",
    "commit_sha",
    "build_logs",
    "scm",
    "working_directory",
    "fix_branch",
];

/// Return the stage that follows `kind` on success, or `None` if `kind` is
/// the terminal stage.
pub fn successor(kind: StageKind) -> Option<StageKind> {
    match kind {
        StageKind::Plan => Some(StageKind::Repo),
        StageKind::Repo => Some(StageKind::Retrieve),
        StageKind::Retrieve => Some(StageKind::Patch),
        StageKind::Patch => Some(StageKind::Validate),
        StageKind::Validate => Some(StageKind::CreatePr),
        StageKind::CreatePr => Some(StageKind::Notify),
        StageKind::Notify => None,
    }
}

/// Build a successor task's payload from a predecessor's payload `current`
/// and its completion `metadata`.
///
/// For every essential key: take it from `metadata` if present there,
/// otherwise keep the value already in `current` (if any). Any other key in
/// `metadata` is also copied through, so a stage can hand arbitrary
/// additional context to the next one (e.g. `previous_failure_reason` is
/// not essential but still flows this way when a handler sets it).
///
/// Non-essential keys already in `current` that are not restated in
/// `metadata` are dropped -- only essential keys and this completion's
/// metadata survive a stage boundary.
pub fn propagate(current: &Value, metadata: &Value) -> Value {
    let current_obj = current.as_object();
    let metadata_obj = metadata.as_object();

    let mut next = Map::new();

    for key in ESSENTIAL_KEYS {
        let from_metadata = metadata_obj.and_then(|m| m.get(*key));
        let from_current = current_obj.and_then(|c| c.get(*key));
        if let Some(v) = from_metadata.or(from_current) {
            next.insert((*key).to_string(), v.clone());
        }
    }

    if let Some(m) = metadata_obj {
        for (k, v) in m {
            next.insert(k.clone(), v.clone());
        }
    }

    Value::Object(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn successor_follows_documented_order() {
        assert_eq!(successor(StageKind::Plan), Some(StageKind::Repo));
        assert_eq!(successor(StageKind::Repo), Some(StageKind::Retrieve));
        assert_eq!(successor(StageKind::Retrieve), Some(StageKind::Patch));
        assert_eq!(successor(StageKind::Patch), Some(StageKind::Validate));
        assert_eq!(successor(StageKind::Validate), Some(StageKind::CreatePr));
        assert_eq!(successor(StageKind::CreatePr), Some(StageKind::Notify));
        assert_eq!(successor(StageKind::Notify), None);
    }

    #[test]
    fn propagate_keeps_essential_keys_absent_from_metadata() {
        let current = json!({
            "repo_url": "https://git.example.com/x/svc.git",
            "branch": "main",
            "commit_sha": "abc1234",
            "unrelated": "dropped",
        });
        let metadata = json!({ "plan_id": 7 });

        let next = propagate(&current, &metadata);
        assert_eq!(next["repo_url"], "https://git.example.com/x/svc.git");
        assert_eq!(next["branch"], "main");
        assert_eq!(next["commit_sha"], "abc1234");
        assert_eq!(next["plan_id"], 7);
        assert!(next.get("unrelated").is_none());
    }

    #[test]
    fn propagate_metadata_overrides_essential_key() {
        let current = json!({ "working_directory": "/work/build-1" });
        let metadata = json!({ "working_directory": "/work/build-1/retry" });

        let next = propagate(&current, &metadata);
        assert_eq!(next["working_directory"], "/work/build-1/retry");
    }

    #[test]
    fn propagate_with_empty_metadata_is_identity_over_essential_keys() {
        let current = json!({
            "repo_url": "https://git.example.com/x/svc.git",
            "fix_branch": "ci-fix/42",
        });
        let next = propagate(&current, &json!({}));
        assert_eq!(next["repo_url"], current["repo_url"]);
        assert_eq!(next["fix_branch"], current["fix_branch"]);
    }
}
