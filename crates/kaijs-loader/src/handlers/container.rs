//! Payload transforms for container-image test messages.
//!
//! The brew-build-complete handler is authoritative for the container
//! payload shape; test messages reuse the same projection. `id` is the
//! manifest-list digest.

use kaijs_domain::{KaijsError, SpoolMessage};
use serde_json::{json, Value};

use super::{id_string, loose_bool, required_str};

pub fn payload_v1(env: &SpoolMessage) -> Result<Value, KaijsError> {
    let body = &env.body;
    let mut payload = json!({
        "id": required_str(body, "/artifact/id")?,
        "nvr": required_str(body, "/artifact/nvr")?,
        "issuer": required_str(body, "/artifact/issuer")?,
        "task_id": id_string(body.pointer("/artifact/task_id")).unwrap_or_default(),
        "scratch": loose_bool(body.pointer("/artifact/scratch")).unwrap_or(false),
    });
    if let Some(source) = body.pointer("/artifact/source").and_then(Value::as_str) {
        payload["source"] = json!(source);
    }
    if let Some(subtypes) = body.pointer("/artifact/osbs_subtypes").and_then(Value::as_array) {
        payload["osbs_subtypes"] = json!(subtypes);
    }
    Ok(payload)
}

/// Typed searchable projection of a container-image payload.
pub fn searchable(payload: Value) -> Result<Value, KaijsError> {
    let typed: kaijs_domain::searchable::SearchableContainerImage =
        serde_json::from_value(payload)?;
    Ok(serde_json::to_value(typed)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_id_and_nvr_are_required() {
        let env = SpoolMessage::new_at(
            1_700_000_000,
            "umb",
            "m-1",
            "VirtualTopic.eng.ci.osci.redhat-container-image.test.complete",
            json!({
                "version": "1.0.0",
                "artifact": {
                    "id": "sha256:1fae9a1e5bf8",
                    "nvr": "ubi9-container-9.4-1",
                    "issuer": "osbs",
                    "task_id": 52_279_531,
                    "scratch": false,
                    "osbs_subtypes": ["operator_appregistry"]
                }
            }),
            json!({}),
            None,
        );
        let payload = payload_v1(&env).unwrap();
        assert_eq!(payload["id"], json!("sha256:1fae9a1e5bf8"));
        assert_eq!(payload["task_id"], json!("52279531"));
        assert_eq!(payload["osbs_subtypes"], json!(["operator_appregistry"]));
    }
}
