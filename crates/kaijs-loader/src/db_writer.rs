//! The document-DB writer.
//!
//! Per envelope: run the handler (which re-reads and re-merges on every
//! iteration), validate the computed document, diff it against the stored
//! document, and apply the minimal `$set`-style update under a version
//! filter. A concurrent writer bumping the version in between makes the
//! filter miss; the loop then recomputes from the fresh document.

use kaijs_domain::{KaijsError, SpoolMessage};
use kaijs_state::paths::{get_path, paths_pack_array};
use kaijs_state::{StateError, UpdateSet};
use serde_json::Value;
use tracing::{debug, warn};

use crate::dispatch::DispatchRegistry;
use crate::handlers::{DbHandler, HandlerContext};

/// OCC iterations before the writer gives up; exhaustion is fatal.
pub const MAX_UPDATE_RETRIES: u32 = 30;

/// Metadata paths owned by the store; never part of a computed update.
const META_PATHS: &[&str] = &["_id", "_version", "_updated"];

/// Compute the minimal update set turning `current` into `computed`.
///
/// - Arrays are replaced wholesale: an array-valued path on the new side
///   always wins, even when element-wise equal.
/// - Scalars are emitted only when the value differs from `current`.
/// - Null new values never overwrite; an empty-object leaf does not
///   overwrite an existing value.
pub fn mk_update_set(current: &Value, computed: &Value) -> UpdateSet {
    let paths_new = paths_pack_array(computed);
    let mut update = UpdateSet::new();

    for path in paths_new {
        let Some(new_value) = get_path(computed, &path) else {
            continue;
        };
        if new_value.is_null() {
            continue;
        }
        let old_value = get_path(current, &path);
        if is_empty_object(new_value) && old_value.is_some() {
            continue;
        }
        if let Some(old_value) = old_value {
            if equal_by_path(old_value, new_value) {
                continue;
            }
        }
        update.insert(path, new_value.clone());
    }
    update
}

/// Strict-equality analog of the diff comparator: scalars compare by
/// value; arrays and objects only compare equal when they are the same
/// instance (so diffing a document against itself yields nothing, while
/// independently built containers always differ).
fn equal_by_path(old_value: &Value, new_value: &Value) -> bool {
    if std::ptr::eq(old_value, new_value) {
        return true;
    }
    match (old_value, new_value) {
        (Value::Array(_), _) | (_, Value::Array(_)) => false,
        (Value::Object(_), _) | (_, Value::Object(_)) => false,
        _ => old_value == new_value,
    }
}

fn is_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(|map| map.is_empty())
}

/// Process one envelope down the document-DB path. Returns the post-image
/// of the stored document.
pub async fn process(
    ctx: &HandlerContext,
    registry: &DispatchRegistry<dyn DbHandler>,
    env: &SpoolMessage,
) -> Result<Value, KaijsError> {
    let handler = registry.dispatch(&env.broker_topic)?;

    for attempt in 0..MAX_UPDATE_RETRIES {
        let computed = handler.handle(ctx, env).await?;
        computed.validate()?;
        let atype = computed.artifact_type;
        let aid = computed.aid.clone();
        let computed = serde_json::to_value(&computed)?;

        let current = ctx
            .store
            .find_or_create(atype, &aid)
            .await
            .map_err(state_error)?;

        let mut update_set = mk_update_set(&current, &computed);
        for meta in META_PATHS {
            update_set.remove(*meta);
        }
        // Scalars in the set differ from the stored document by
        // construction; only wholesale-array entries can be deep-equal. If
        // every entry is, the message changed nothing (a redelivery) and no
        // version bump must happen.
        let unchanged = update_set
            .iter()
            .all(|(path, value)| get_path(&current, path) == Some(value));
        if unchanged {
            debug!(aid = %aid, "document already up to date");
            return Ok(computed);
        }

        let current_version = current
            .get("_version")
            .and_then(Value::as_u64)
            .ok_or_else(|| KaijsError::Storage(format!("document {aid} without _version")))?;

        let outcome = ctx
            .store
            .find_one_and_update(atype, &aid, current_version, &update_set)
            .await
            .map_err(state_error)?;

        if outcome.updated_existing {
            return Ok(outcome.document.unwrap_or(computed));
        }
        warn!(aid = %aid, attempt, "concurrent update detected, retrying");
    }

    let computed = handler.handle(ctx, env).await?;
    Err(KaijsError::UpdateConflictExhausted {
        attempts: MAX_UPDATE_RETRIES,
        atype: computed.artifact_type.as_str().to_string(),
        aid: computed.aid,
    })
}

pub(crate) fn state_error(err: StateError) -> KaijsError {
    match err {
        StateError::DocumentTooLarge { size } => KaijsError::ToLargeDocument { size },
        other => KaijsError::Storage(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn specificity_of_the_minimal_diff() {
        let current = json!({"a": 1, "b": {"x": 2, "y": [1, 2]}, "c": "keep"});
        let computed = json!({"a": 1, "b": {"x": 3, "y": [1, 2], "z": null}, "d": "new"});

        let update = mk_update_set(&current, &computed);
        let paths: Vec<&str> = update.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["b.x", "b.y", "d"]);
        assert_eq!(update["b.x"], json!(3));
        // The array is rewritten wholesale even though element-wise equal.
        assert_eq!(update["b.y"], json!([1, 2]));
        assert_eq!(update["d"], json!("new"));
    }

    #[test]
    fn diffing_a_document_against_itself_is_empty() {
        let doc = json!({
            "a": 1,
            "b": {"y": [1, 2]},
            "states": [{"kai_state": {"msg_id": "m-1"}}]
        });
        assert!(mk_update_set(&doc, &doc).is_empty());
    }

    #[test]
    fn null_new_values_do_not_overwrite() {
        let current = json!({"a": "kept"});
        let computed = json!({"a": null});
        assert!(mk_update_set(&current, &computed).is_empty());
    }

    #[test]
    fn empty_object_does_not_overwrite_but_is_created() {
        let current = json!({"a": {"deep": 1}});
        let computed = json!({"a": {}, "b": {}});
        let update = mk_update_set(&current, &computed);
        assert!(!update.contains_key("a"));
        assert_eq!(update["b"], json!({}));
    }

    #[test]
    fn missing_paths_on_the_new_side_are_never_deleted() {
        let current = json!({"a": 1, "c": "keep"});
        let computed = json!({"a": 1});
        assert!(mk_update_set(&current, &computed).is_empty());
    }

    #[test]
    fn scalar_type_changes_are_emitted() {
        let current = json!({"a": "1"});
        let computed = json!({"a": 1});
        let update = mk_update_set(&current, &computed);
        assert_eq!(update["a"], json!(1));
    }

    #[test]
    fn every_emitted_path_resolves_on_the_new_side() {
        let current = json!({"x": {"y": 1}});
        let computed = json!({"x": {"y": 2, "z": {"w": [3]}}});
        let update = mk_update_set(&current, &computed);
        for (path, value) in &update {
            assert_eq!(get_path(&computed, path), Some(value));
        }
    }
}
