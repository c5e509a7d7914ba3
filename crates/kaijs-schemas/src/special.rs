//! Special-purpose schemas applied by handlers, not the top-level validator.

use std::sync::OnceLock;

use kaijs_domain::KaijsError;
use regex::Regex;
use serde_json::Value;

use crate::relaxed::require_paths;

fn gate_tag_rpm_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(supp-)?rhel-[89]\.\d+(\.\d+)?(-z)?-gate$").expect("static regex")
    })
}

fn gate_tag_module_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(supp-)?rhel-[89]\.\d+(\.\d+)?(-z)?-modules-gate$").expect("static regex")
    })
}

fn bad_issuer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)freshmaker|cpaas").expect("static regex"))
}

/// Gate-tag check for RPM brew builds (`gate_tag_brew_build`).
pub fn gate_tag_brew_build(tag_name: &str) -> Result<(), KaijsError> {
    if gate_tag_rpm_re().is_match(tag_name) {
        Ok(())
    } else {
        Err(KaijsError::NoNeedToProcess(format!(
            "tag {tag_name} is not an rpm gate tag"
        )))
    }
}

/// Gate-tag check for module builds (`gate_tag_redhat_module`).
pub fn gate_tag_redhat_module(tag_name: &str) -> Result<(), KaijsError> {
    if gate_tag_module_re().is_match(tag_name) {
        Ok(())
    } else {
        Err(KaijsError::NoNeedToProcess(format!(
            "tag {tag_name} is not a modules gate tag"
        )))
    }
}

/// Issuer filter: automated rebuild pipelines are not gating subjects.
pub fn valid_artifact_issuer(issuer: &str) -> Result<(), KaijsError> {
    if bad_issuer_re().is_match(issuer) {
        Err(KaijsError::NoNeedToProcess(format!(
            "issuer {issuer} is filtered"
        )))
    } else {
        Ok(())
    }
}

/// Shape of a build-system `getBuild` reply, checked before the reply is
/// allowed anywhere near a document.
pub fn koji_build_info(build: &Value) -> Result<(), KaijsError> {
    require_paths(build, &["task_id", "nvr", "owner_name"])?;
    if !build["task_id"].is_i64() && !build["task_id"].is_u64() {
        return Err(KaijsError::Validation(
            "koji build info: task_id is not an integer".to_string(),
        ));
    }
    if build["nvr"].as_str().map_or(true, str::is_empty) {
        return Err(KaijsError::Validation(
            "koji build info: nvr is not a non-empty string".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rpm_gate_tags_match() {
        for tag in ["rhel-8.9.0-gate", "rhel-9.4-gate", "supp-rhel-8.10-z-gate"] {
            assert!(gate_tag_brew_build(tag).is_ok(), "{tag}");
        }
    }

    #[test]
    fn non_gate_tags_are_declined() {
        for tag in ["rhel-8.9.0-candidate", "f33-updates", "rhel-7.9-gate"] {
            assert!(matches!(
                gate_tag_brew_build(tag),
                Err(KaijsError::NoNeedToProcess(_))
            ));
        }
    }

    #[test]
    fn module_gate_tags_are_distinct_from_rpm_ones() {
        assert!(gate_tag_redhat_module("rhel-8.9.0-modules-gate").is_ok());
        assert!(gate_tag_redhat_module("rhel-8.9.0-gate").is_err());
        assert!(gate_tag_brew_build("rhel-8.9.0-modules-gate").is_err());
    }

    #[test]
    fn rebuild_pipeline_issuers_are_filtered_case_insensitively() {
        assert!(valid_artifact_issuer("FreshMaker").is_err());
        assert!(valid_artifact_issuer("cpaas-bot").is_err());
        assert!(valid_artifact_issuer("bodhi").is_ok());
    }

    #[test]
    fn koji_build_info_accepts_a_getbuild_reply() {
        let build = json!({
            "task_id": 111,
            "nvr": "gcompris-qt-1.1-1.fc33",
            "owner_name": "bodhi",
            "extra": {"source": {"original_url": "git://src/gcompris-qt"}}
        });
        assert!(koji_build_info(&build).is_ok());
    }

    #[test]
    fn koji_build_info_rejects_null_task_id() {
        let build = json!({"task_id": null, "nvr": "x-1-1", "owner_name": "o"});
        assert!(koji_build_info(&build).is_err());
    }

    #[test]
    fn koji_build_info_rejects_missing_nvr() {
        let build = json!({"task_id": 1, "owner_name": "o"});
        assert!(koji_build_info(&build).is_err());
    }
}
