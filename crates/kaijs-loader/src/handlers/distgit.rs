//! Payload transforms for dist-git pull-request messages.

use kaijs_domain::{KaijsError, SpoolMessage};
use serde_json::{json, Value};

use super::{id_string, required_str};

pub fn payload_v1(env: &SpoolMessage) -> Result<Value, KaijsError> {
    let body = &env.body;
    let uid = id_string(body.pointer("/artifact/id"))
        .or_else(|| id_string(body.pointer("/artifact/uid")))
        .ok_or_else(|| KaijsError::Validation("missing required field: artifact.id".to_string()))?;
    Ok(json!({
        "uid": uid,
        "repository": required_str(body, "/artifact/repository")?,
        "comment_id": id_string(body.pointer("/artifact/comment_id")).unwrap_or_default(),
        "commit_hash": required_str(body, "/artifact/commit_hash")?,
        "issuer": required_str(body, "/artifact/issuer")?,
    }))
}

/// Typed searchable projection of a dist-git PR payload.
pub fn searchable(payload: Value) -> Result<Value, KaijsError> {
    let typed: kaijs_domain::searchable::SearchableDistGitPr = serde_json::from_value(payload)?;
    Ok(serde_json::to_value(typed)?)
}
