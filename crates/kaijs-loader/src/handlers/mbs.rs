//! Payload transforms for module builds (MBS).

use kaijs_domain::{KaijsError, SpoolMessage};
use serde_json::{json, Value};

use super::{id_string, required_str};

/// Modern (>= 1.0) layout: everything under `body.artifact`.
pub fn payload_v1(env: &SpoolMessage) -> Result<Value, KaijsError> {
    let body = &env.body;
    let mbs_id = id_string(body.pointer("/artifact/id")).ok_or_else(|| {
        KaijsError::Validation("missing required field: artifact.id".to_string())
    })?;
    let name = required_str(body, "/artifact/name")?;
    let stream = required_str(body, "/artifact/stream")?;
    let version = required_str(body, "/artifact/version")?;
    let context = required_str(body, "/artifact/context")?;
    let nsvc = body
        .pointer("/artifact/nsvc")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{name}:{stream}:{version}:{context}"));
    let mut payload = json!({
        "mbs_id": mbs_id,
        "nsvc": nsvc,
        "name": name,
        "stream": stream,
        "version": version,
        "context": context,
        "issuer": required_str(body, "/artifact/issuer")?,
    });
    if let Some(nvr) = body.pointer("/artifact/nvr").and_then(Value::as_str) {
        payload["nvr"] = json!(nvr);
    }
    Ok(payload)
}

/// 0.x layout: only the NSVC tuple and issuer are reliable; the id may be
/// missing, in which case the NSVC itself identifies the module build.
pub fn payload_v0(env: &SpoolMessage) -> Result<Value, KaijsError> {
    let body = &env.body;
    let nsvc = required_str(body, "/artifact/nsvc")?;
    let mbs_id = id_string(body.pointer("/artifact/id")).unwrap_or_else(|| nsvc.clone());
    let mut parts = nsvc.split(':');
    let mut part = || parts.next().unwrap_or_default().to_string();
    Ok(json!({
        "mbs_id": mbs_id,
        "nsvc": nsvc,
        "name": part(),
        "stream": part(),
        "version": part(),
        "context": part(),
        "issuer": required_str(body, "/artifact/issuer")?,
    }))
}

/// Typed searchable projection of an MBS payload.
pub fn searchable(payload: Value) -> Result<Value, KaijsError> {
    let typed: kaijs_domain::searchable::SearchableMbs = serde_json::from_value(payload)?;
    Ok(serde_json::to_value(typed)?)
}
