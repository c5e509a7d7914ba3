//! The two-path message validator.
//!
//! CI topics (containing `".ci."`) are validated strictly against the
//! schemas repository for versions >= 1.0 and against the relaxed tables
//! for 0.x. Non-CI topics match an ordered registry of declarative shapes;
//! first match wins.

use std::sync::Arc;

use kaijs_domain::{KaijsError, SpoolMessage};
use regex::Regex;
use serde_json::Value;

use crate::catalog::{CatalogError, SchemaCatalog};
use crate::relaxed::{require_paths, validate_relaxed_ci};

type ShapeCheck = fn(&Value) -> Result<(), KaijsError>;

/// Validates spool messages before dispatch.
pub struct Validator {
    catalog: Arc<SchemaCatalog>,
    shapes: Vec<(Regex, ShapeCheck)>,
}

impl Validator {
    /// Build a validator over a schema catalog, registering the non-CI
    /// topic shapes in specificity order.
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        let shapes: Vec<(Regex, ShapeCheck)> = vec![
            (
                Regex::new(r"\.buildsys\.tag$").expect("static regex"),
                check_buildsys_tag,
            ),
            (
                Regex::new(r"^VirtualTopic\.eng\.brew\.build\.tag$").expect("static regex"),
                check_brew_tag,
            ),
            (
                Regex::new(r"^VirtualTopic\.eng\.brew\.build\.complete$").expect("static regex"),
                check_brew_build_complete,
            ),
            (
                Regex::new(r"\.errata_automation\.brew-build\.run\.finished$")
                    .expect("static regex"),
                check_errata_automation,
            ),
        ];
        Validator { catalog, shapes }
    }

    /// Validate one envelope. `Ok(())` means the message may be dispatched.
    pub fn validate(&self, env: &SpoolMessage) -> Result<(), KaijsError> {
        env.check_shape()?;
        // The declarative registry wins over the CI version split: some of
        // its topics (errata automation) ride CI namespaces but carry no
        // `version`.
        for (pattern, check) in &self.shapes {
            if pattern.is_match(&env.broker_topic) {
                return check(&env.body);
            }
        }
        if env.broker_topic.contains(".ci.") {
            self.validate_ci(env)
        } else {
            Err(KaijsError::NoValidationSchema(env.broker_topic.clone()))
        }
    }

    fn validate_ci(&self, env: &SpoolMessage) -> Result<(), KaijsError> {
        let version = env
            .body_version()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| KaijsError::WrongVersion(env.broker_topic.clone()))?;

        if version.starts_with("0.") {
            return validate_relaxed_ci(&env.body);
        }

        let path = strict_schema_path(&env.broker_topic)
            .ok_or_else(|| KaijsError::NoValidationSchema(env.broker_topic.clone()))?;
        let schema = self
            .catalog
            .compiled(version, &path)
            .map_err(|err| map_catalog_error(err, &env.broker_topic))?;
        if let Err(errors) = schema.validate(&env.body) {
            let detail: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(KaijsError::Validation(detail.join("; ")));
        }
        Ok(())
    }

}

/// `schemas/<x>.<y>.<z>.json` from the topic's last three dot-segments.
fn strict_schema_path(topic: &str) -> Option<String> {
    let segments: Vec<&str> = topic.split('.').collect();
    if segments.len() < 3 {
        return None;
    }
    let tail = &segments[segments.len() - 3..];
    Some(format!("schemas/{}.{}.{}.json", tail[0], tail[1], tail[2]))
}

fn map_catalog_error(err: CatalogError, topic: &str) -> KaijsError {
    match err {
        CatalogError::NotFound { .. } => KaijsError::NoValidationSchema(topic.to_string()),
        other => KaijsError::Validation(other.to_string()),
    }
}

fn check_buildsys_tag(body: &Value) -> Result<(), KaijsError> {
    require_paths(body, &["build_id", "tag", "owner", "name", "version", "release"])
}

fn check_brew_tag(body: &Value) -> Result<(), KaijsError> {
    require_paths(body, &["tag.name", "build"])
}

fn check_brew_build_complete(body: &Value) -> Result<(), KaijsError> {
    require_paths(body, &["info"])
}

fn check_errata_automation(body: &Value) -> Result<(), KaijsError> {
    require_paths(body, &["task_id", "errata_status"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::path::Path;

    fn write(dir: &Path, path: &str, content: &str) {
        let full = dir.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    fn fixture_validator() -> (tempfile::TempDir, Validator) {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "schemas/brew-build.test.complete.json",
            concat!(
                "type: object\n",
                "required: [version, artifact, run]\n",
                "properties:\n",
                "  version:\n    type: string\n",
                "  artifact:\n",
                "    type: object\n",
                "    required: [type, id]\n",
                "  run:\n",
                "    type: object\n",
                "    required: [url]\n",
            ),
        );
        let catalog = SchemaCatalog::from_dir(dir.path());
        let validator = Validator::new(catalog);
        (dir, validator)
    }

    fn envelope(topic: &str, body: Value) -> SpoolMessage {
        SpoolMessage::new_at(1_700_000_000, "umb", "m-1", topic, body, json!({}), None)
    }

    #[test]
    fn strict_path_accepts_a_modern_message() {
        let (_dir, validator) = fixture_validator();
        let env = envelope(
            "VirtualTopic.eng.ci.osci.brew-build.test.complete",
            json!({
                "version": "1.1.14",
                "artifact": {"type": "brew-build", "id": 111},
                "run": {"url": "https://jenkins/job/7"}
            }),
        );
        assert!(validator.validate(&env).is_ok());
    }

    #[test]
    fn strict_path_reports_schema_violations() {
        let (_dir, validator) = fixture_validator();
        let env = envelope(
            "VirtualTopic.eng.ci.osci.brew-build.test.complete",
            json!({"version": "1.1.14", "artifact": {"type": "brew-build", "id": 111}}),
        );
        assert!(matches!(
            validator.validate(&env),
            Err(KaijsError::Validation(_))
        ));
    }

    #[test]
    fn relaxed_path_accepts_version_0_1_0() {
        let (_dir, validator) = fixture_validator();
        let env = envelope(
            "VirtualTopic.eng.ci.osci.brew-build.test.complete",
            json!({
                "version": "0.1.0",
                "artifact": {
                    "type": "brew-build",
                    "id": 111,
                    "component": "gcompris-qt",
                    "issuer": "bodhi"
                },
                "run": {"url": "https://jenkins/job/7"}
            }),
        );
        assert!(validator.validate(&env).is_ok());
    }

    #[test]
    fn ci_topic_without_version_is_a_wrong_version_error() {
        let (_dir, validator) = fixture_validator();
        let env = envelope(
            "VirtualTopic.eng.ci.osci.brew-build.test.complete",
            json!({"artifact": {"type": "brew-build"}}),
        );
        let err = validator.validate(&env).unwrap_err();
        assert!(matches!(err, KaijsError::WrongVersion(_)));
        assert!(err.to_string().contains("missing 'version'"));
    }

    #[test]
    fn unknown_schema_topic_is_no_validation_schema() {
        let (_dir, validator) = fixture_validator();
        let env = envelope(
            "VirtualTopic.eng.ci.osci.brew-build.test.started",
            json!({"version": "1.1.14"}),
        );
        assert!(matches!(
            validator.validate(&env),
            Err(KaijsError::NoValidationSchema(_))
        ));
    }

    #[test]
    fn buildsys_tag_shape_is_enforced() {
        let (_dir, validator) = fixture_validator();
        let good = envelope(
            "org.fedoraproject.prod.buildsys.tag",
            json!({
                "build_id": 1728223,
                "tag": "f33-updates",
                "owner": "bodhi",
                "name": "gcompris-qt",
                "version": "1.1",
                "release": "1.fc33"
            }),
        );
        assert!(validator.validate(&good).is_ok());

        let bad = envelope(
            "org.fedoraproject.prod.buildsys.tag",
            json!({"build_id": 1728223}),
        );
        assert!(matches!(
            validator.validate(&bad),
            Err(KaijsError::Validation(_))
        ));
    }

    #[test]
    fn errata_automation_with_null_task_id_is_dropped_by_validation() {
        let (_dir, validator) = fixture_validator();
        let env = envelope(
            "eng.errata_automation.brew-build.run.finished",
            json!({"task_id": null, "errata_status": "SHIPPED_LIVE"}),
        );
        assert!(matches!(
            validator.validate(&env),
            Err(KaijsError::Validation(_))
        ));
    }

    #[test]
    fn unmatched_non_ci_topic_is_no_validation_schema() {
        let (_dir, validator) = fixture_validator();
        let env = envelope("org.fedoraproject.prod.bodhi.update.request", json!({}));
        assert!(matches!(
            validator.validate(&env),
            Err(KaijsError::NoValidationSchema(_))
        ));
    }

    #[test]
    fn strict_schema_path_uses_the_last_three_segments() {
        assert_eq!(
            strict_schema_path("VirtualTopic.eng.ci.osci.brew-build.test.complete").unwrap(),
            "schemas/brew-build.test.complete.json"
        );
        assert!(strict_schema_path("a.b").is_none());
    }
}
