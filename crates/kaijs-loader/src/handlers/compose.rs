//! Payload transforms for productmd composes.

use kaijs_domain::{KaijsError, SpoolMessage};
use serde_json::{json, Value};

use super::required_str;

/// Composes carry their id under `artifact.id`; the compose type
/// (production, nightly, ...) is optional.
pub fn payload_v1(env: &SpoolMessage) -> Result<Value, KaijsError> {
    let body = &env.body;
    let mut payload = json!({
        "compose_id": required_str(body, "/artifact/id")?,
    });
    if let Some(compose_type) = body
        .pointer("/artifact/compose_type")
        .and_then(Value::as_str)
    {
        payload["compose_type"] = json!(compose_type);
    }
    Ok(payload)
}

/// Typed searchable projection of a compose payload.
pub fn searchable(payload: Value) -> Result<Value, KaijsError> {
    let typed: kaijs_domain::searchable::SearchableCompose = serde_json::from_value(payload)?;
    Ok(serde_json::to_value(typed)?)
}
