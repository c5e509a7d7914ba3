//! Searchable projections for the search index.
//!
//! The index stores a parent document per artifact and a child document per
//! broker message, joined on one index per `(context, artifact_type)`.
//! Handlers are the only site performing field extraction; everything past
//! them speaks these typed forms.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::artifact::ArtifactType;
use crate::envelope::SpoolMessage;

/// Flat projection of an RPM-ish build (koji, brew, copr).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchableRpm {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    pub nvr: String,
    pub issuer: String,
    pub component: String,
    pub scratch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_tag_name: Option<String>,
}

/// Flat projection of a module build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchableMbs {
    pub mbs_id: String,
    pub nsvc: String,
    pub name: String,
    pub stream: String,
    pub version: String,
    pub context: String,
    pub issuer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nvr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_tag_name: Option<String>,
}

/// Flat projection of a productmd compose.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchableCompose {
    pub compose_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose_type: Option<String>,
}

/// Flat projection of a container image; `id` is the manifest-list digest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchableContainerImage {
    pub id: String,
    pub nvr: String,
    pub issuer: String,
    pub task_id: String,
    pub scratch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub osbs_subtypes: Option<Vec<String>>,
}

/// Flat projection of a dist-git pull request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchableDistGitPr {
    pub uid: String,
    pub repository: String,
    pub comment_id: String,
    pub commit_hash: String,
    pub issuer: String,
}

/// Any artifact projection, discriminated by the artifact family at the
/// document level rather than inside the projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Searchable {
    Rpm(SearchableRpm),
    Mbs(SearchableMbs),
    Compose(SearchableCompose),
    ContainerImage(SearchableContainerImage),
    DistGitPr(SearchableDistGitPr),
}

/// Parent document id: `"<artifact_type>-<artifact_id>"`.
pub fn parent_doc_id(atype: ArtifactType, aid: &str) -> String {
    format!("{}-{}", atype.as_str(), aid)
}

/// Assemble the parent (artifact) document.
///
/// The parent carries the searchable projection and the join marker; it is
/// created only on first observation and never overwritten afterwards.
pub fn parent_doc(atype: ArtifactType, aid: &str, searchable: Value) -> Value {
    json!({
        "searchable": searchable,
        "type": atype.as_str(),
        "aid": aid,
        "artifact_message": {"name": "artifact"},
    })
}

/// Assemble the child (message) document.
///
/// The child carries the per-message projection plus the raw envelope, and
/// points at its parent through the join field.
pub fn child_doc(env: &SpoolMessage, searchable: Value, parent_id: &str) -> Value {
    json!({
        "searchable": searchable,
        "rawmsg": env,
        "artifact_message": {"name": "message", "parent": parent_id},
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> SpoolMessage {
        SpoolMessage::new_at(
            1_700_000_000,
            "umb",
            "m-9",
            "VirtualTopic.eng.ci.osci.brew-build.test.complete",
            json!({"version": "1.1.14"}),
            json!({}),
            None,
        )
    }

    #[test]
    fn parent_doc_id_joins_type_and_aid() {
        assert_eq!(
            parent_doc_id(ArtifactType::BrewBuild, "111"),
            "brew-build-111"
        );
    }

    #[test]
    fn parent_carries_the_artifact_join() {
        let doc = parent_doc(
            ArtifactType::BrewBuild,
            "111",
            serde_json::to_value(SearchableRpm {
                task_id: "111".to_string(),
                nvr: "gcompris-qt-1.1-1.fc33".to_string(),
                issuer: "bodhi".to_string(),
                component: "gcompris-qt".to_string(),
                scratch: false,
                ..Default::default()
            })
            .unwrap(),
        );
        assert_eq!(doc["artifact_message"]["name"], json!("artifact"));
        assert_eq!(doc["searchable"]["nvr"], json!("gcompris-qt-1.1-1.fc33"));
        assert_eq!(doc["type"], json!("brew-build"));
    }

    #[test]
    fn child_points_at_its_parent_and_keeps_the_raw_envelope() {
        let env = envelope();
        let doc = child_doc(&env, json!({"nvr": "x-1-1"}), "brew-build-111");
        assert_eq!(doc["artifact_message"]["name"], json!("message"));
        assert_eq!(doc["artifact_message"]["parent"], json!("brew-build-111"));
        assert_eq!(doc["rawmsg"]["broker_msg_id"], json!("m-9"));
    }

    #[test]
    fn optional_projection_fields_are_omitted_when_absent() {
        let value = serde_json::to_value(SearchableRpm::default()).unwrap();
        assert!(value.get("source").is_none());
        assert!(value.get("gate_tag_name").is_none());
    }
}
