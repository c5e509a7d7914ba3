//! Dotted-path utilities over JSON documents.
//!
//! The document writer and the stores exchange updates as maps of dotted
//! paths to values. Enumeration treats arrays as opaque leaves: a changed
//! array is always replaced wholesale, never element-wise.

use serde_json::{Map, Value};

/// Enumerate the dotted paths of `value`, stopping descent at arrays and at
/// empty objects (both are leaves).
pub fn paths_pack_array(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    if let Value::Object(map) = value {
        for (key, val) in map {
            collect(val, key.clone(), &mut out);
        }
    }
    out
}

fn collect(value: &Value, prefix: String, out: &mut Vec<String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, val) in map {
                collect(val, format!("{prefix}.{key}"), out);
            }
        }
        _ => out.push(prefix),
    }
}

/// Resolve a dotted path. Numeric segments index into arrays.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cursor = value;
    for segment in path.split('.') {
        cursor = match cursor {
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            other => other.get(segment)?,
        };
    }
    Some(cursor)
}

/// Set a dotted path, creating intermediate objects as needed.
///
/// A numeric segment only indexes into an existing array; the pack-array
/// enumeration never emits paths through arrays, so intermediate arrays are
/// never created here.
pub fn set_path(target: &mut Value, path: &str, new_value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut cursor = target;
    for (idx, segment) in segments.iter().enumerate() {
        let last = idx == segments.len() - 1;
        if let Value::Array(items) = cursor {
            let Some(slot) = segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get_mut(i))
            else {
                return;
            };
            if last {
                *slot = new_value;
                return;
            }
            cursor = slot;
            continue;
        }
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let map = cursor.as_object_mut().expect("object ensured above");
        if last {
            map.insert((*segment).to_string(), new_value);
            return;
        }
        cursor = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// `states.0.kai_state` -> `states[0].kai_state`.
pub fn dotted_to_bracketed(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 4);
    for segment in path.split('.') {
        if segment.chars().all(|c| c.is_ascii_digit()) && !segment.is_empty() {
            out.push('[');
            out.push_str(segment);
            out.push(']');
        } else {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(segment);
        }
    }
    out
}

/// `states[0].kai_state` -> `states.0.kai_state`.
pub fn bracketed_to_dotted(path: &str) -> String {
    path.replace('[', ".").replace(']', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enumeration_stops_at_arrays_and_empty_objects() {
        let doc = json!({
            "a": 1,
            "b": {"x": 2, "y": [1, 2], "empty": {}},
            "states": [{"kai_state": {"msg_id": "m"}}]
        });
        let mut paths = paths_pack_array(&doc);
        paths.sort();
        assert_eq!(paths, vec!["a", "b.empty", "b.x", "b.y", "states"]);
    }

    #[test]
    fn scalar_root_has_no_paths() {
        assert!(paths_pack_array(&json!(42)).is_empty());
        assert!(paths_pack_array(&json!({})).is_empty());
    }

    #[test]
    fn get_path_resolves_nested_and_indexed_values() {
        let doc = json!({"b": {"y": [1, {"z": 3}]}});
        assert_eq!(get_path(&doc, "b.y"), Some(&json!([1, {"z": 3}])));
        assert_eq!(get_path(&doc, "b.y.1.z"), Some(&json!(3)));
        assert_eq!(get_path(&doc, "b.missing"), None);
        assert_eq!(get_path(&doc, "b.y.7"), None);
    }

    #[test]
    fn set_path_creates_intermediate_objects() {
        let mut doc = json!({"a": 1});
        set_path(&mut doc, "b.x", json!(3));
        assert_eq!(doc, json!({"a": 1, "b": {"x": 3}}));
    }

    #[test]
    fn set_path_overwrites_scalars_and_arrays() {
        let mut doc = json!({"b": {"x": 2, "y": [1]}});
        set_path(&mut doc, "b.x", json!(3));
        set_path(&mut doc, "b.y", json!([1, 2]));
        assert_eq!(doc, json!({"b": {"x": 3, "y": [1, 2]}}));
    }

    #[test]
    fn set_path_indexes_into_existing_arrays() {
        let mut doc = json!({"y": [{"z": 1}, {"z": 2}]});
        set_path(&mut doc, "y.1.z", json!(9));
        assert_eq!(doc, json!({"y": [{"z": 1}, {"z": 9}]}));
    }

    #[test]
    fn bracket_conversion_round_trips() {
        assert_eq!(dotted_to_bracketed("states.0.kai_state"), "states[0].kai_state");
        assert_eq!(bracketed_to_dotted("states[0].kai_state"), "states.0.kai_state");
        assert_eq!(dotted_to_bracketed("a.b"), "a.b");
    }
}
