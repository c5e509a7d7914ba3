//! Payload transforms for RPM-family builds (brew, koji, koji-cs, copr).

use kaijs_domain::{KaijsError, SpoolMessage};
use serde_json::{json, Value};

use super::{id_string, loose_bool, required_str};

/// Modern (>= 1.0) layout: everything under `body.artifact`.
pub fn payload_v1(env: &SpoolMessage) -> Result<Value, KaijsError> {
    let body = &env.body;
    let task_id = id_string(body.pointer("/artifact/id"))
        .ok_or_else(|| KaijsError::Validation("missing required field: artifact.id".to_string()))?;
    let mut payload = json!({
        "task_id": task_id,
        "nvr": required_str(body, "/artifact/nvr")?,
        "issuer": required_str(body, "/artifact/issuer")?,
        "component": required_str(body, "/artifact/component")?,
        "scratch": loose_bool(body.pointer("/artifact/scratch")).unwrap_or(false),
    });
    if let Some(build_id) = id_string(body.pointer("/artifact/build_id")) {
        payload["build_id"] = json!(build_id);
    }
    if let Some(source) = body.pointer("/artifact/source").and_then(Value::as_str) {
        payload["source"] = json!(source);
    }
    Ok(payload)
}

/// 0.x layout: like V1, with top-level fallbacks for fields the early
/// producers kept outside `artifact`.
pub fn payload_v0(env: &SpoolMessage) -> Result<Value, KaijsError> {
    let body = &env.body;
    let at = |nested: &str, top: &str| -> Option<Value> {
        body.pointer(nested)
            .or_else(|| body.get(top))
            .filter(|v| !v.is_null())
            .cloned()
    };
    let task_id = id_string(at("/artifact/id", "task_id").as_ref())
        .ok_or_else(|| KaijsError::Validation("missing required field: artifact.id".to_string()))?;
    let str_field = |nested: &str, top: &str| -> Result<String, KaijsError> {
        at(nested, top)
            .as_ref()
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| KaijsError::Validation(format!("missing required field: {top}")))
    };
    let mut payload = json!({
        "task_id": task_id,
        "nvr": str_field("/artifact/nvr", "nvr")?,
        "issuer": str_field("/artifact/issuer", "issuer")?,
        "component": str_field("/artifact/component", "component")?,
        "scratch": loose_bool(at("/artifact/scratch", "scratch").as_ref()).unwrap_or(false),
    });
    if let Some(source) = at("/artifact/source", "source").as_ref().and_then(Value::as_str) {
        payload["source"] = json!(source);
    }
    Ok(payload)
}

/// Typed searchable projection of an RPM payload.
pub fn searchable(payload: Value) -> Result<Value, KaijsError> {
    let typed: kaijs_domain::searchable::SearchableRpm = serde_json::from_value(payload)?;
    Ok(serde_json::to_value(typed)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(body: Value) -> SpoolMessage {
        SpoolMessage::new_at(
            1_700_000_000,
            "umb",
            "m-1",
            "VirtualTopic.eng.ci.osci.brew-build.test.complete",
            body,
            json!({}),
            None,
        )
    }

    #[test]
    fn v1_extracts_the_artifact_block() {
        let env = envelope(json!({
            "version": "1.1.14",
            "artifact": {
                "id": 57_915_437,
                "nvr": "gcompris-qt-1.1-1.fc33",
                "issuer": "bodhi",
                "component": "gcompris-qt",
                "scratch": "False",
                "source": "git://src/gcompris-qt"
            }
        }));
        let payload = payload_v1(&env).unwrap();
        assert_eq!(payload["task_id"], json!("57915437"));
        assert_eq!(payload["scratch"], json!(false));
        assert_eq!(payload["source"], json!("git://src/gcompris-qt"));
    }

    #[test]
    fn v1_requires_nvr() {
        let env = envelope(json!({
            "version": "1.1.14",
            "artifact": {"id": 1, "issuer": "bodhi", "component": "x"}
        }));
        assert!(payload_v1(&env).is_err());
    }

    #[test]
    fn v0_falls_back_to_top_level_fields() {
        let env = envelope(json!({
            "version": "0.1.0",
            "artifact": {"id": 1},
            "nvr": "x-1-1",
            "issuer": "bodhi",
            "component": "x"
        }));
        let payload = payload_v0(&env).unwrap();
        assert_eq!(payload["nvr"], json!("x-1-1"));
        assert_eq!(payload["scratch"], json!(false));
    }

    #[test]
    fn searchable_round_trips_through_the_typed_projection() {
        let value = searchable(json!({
            "task_id": "111",
            "nvr": "x-1-1",
            "issuer": "bodhi",
            "component": "x",
            "scratch": false
        }))
        .unwrap();
        assert_eq!(value["task_id"], json!("111"));
        assert!(value.get("gate_tag_name").is_none());
    }
}
