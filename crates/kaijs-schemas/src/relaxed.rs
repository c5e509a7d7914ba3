//! Relaxed validation for pre-1.0 CI messages.
//!
//! Versions below 1.0 predate the schemas repository; they are checked
//! against declarative required-field tables discriminated by
//! `body.artifact.type`. Unknown fields are always allowed; the tables
//! declare the required subset only.

use kaijs_domain::KaijsError;
use serde_json::Value;

/// Required dotted paths per artifact family for 0.x CI messages.
pub const RELAXED_CI_REQUIRED: &[(&str, &[&str])] = &[
    (
        "brew-build",
        &["artifact.id", "artifact.component", "artifact.issuer", "run.url"],
    ),
    (
        "koji-build",
        &["artifact.id", "artifact.component", "artifact.issuer", "run.url"],
    ),
    (
        "koji-build-cs",
        &["artifact.id", "artifact.component", "artifact.issuer", "run.url"],
    ),
    (
        "copr-build",
        &["artifact.id", "artifact.component", "artifact.issuer", "run.url"],
    ),
    (
        "redhat-module",
        &["artifact.id", "artifact.nsvc", "artifact.issuer", "run.url"],
    ),
    (
        "fedora-module",
        &["artifact.id", "artifact.nsvc", "artifact.issuer", "run.url"],
    ),
    ("productmd-compose", &["artifact.id", "run.url"]),
    (
        "redhat-container-image",
        &["artifact.id", "artifact.nvr", "artifact.issuer", "run.url"],
    ),
    (
        "dist-git-pr",
        &["artifact.id", "artifact.repository", "artifact.issuer", "run.url"],
    ),
];

/// Resolve a dotted path against a JSON value.
pub fn get_dotted<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cursor = value;
    for segment in path.split('.') {
        cursor = cursor.get(segment)?;
    }
    Some(cursor)
}

/// Check that every dotted path resolves to a present, non-null value.
pub fn require_paths(body: &Value, required: &[&str]) -> Result<(), KaijsError> {
    for path in required {
        match get_dotted(body, path) {
            Some(Value::Null) | None => {
                return Err(KaijsError::Validation(format!(
                    "missing required field: {path}"
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Validate a 0.x CI message body.
pub fn validate_relaxed_ci(body: &Value) -> Result<(), KaijsError> {
    let family = get_dotted(body, "artifact.type")
        .and_then(Value::as_str)
        .ok_or_else(|| KaijsError::Validation("missing artifact.type".to_string()))?;
    let Some((_, required)) = RELAXED_CI_REQUIRED.iter().find(|(f, _)| *f == family) else {
        return Err(KaijsError::Validation(format!(
            "unknown artifact type: {family}"
        )));
    };
    require_paths(body, required)
}
