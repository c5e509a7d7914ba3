//! The per-artifact aggregation document.
//!
//! One document exists per `(artifact_type, artifact_id)`. `_version` starts
//! at 1 and is bumped by every successful update; it is the only tool
//! preventing lost updates when concurrent writers touch one artifact.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifact::{ArtifactType, PayloadSlot};
use crate::error::KaijsError;
use crate::state::{Stage, StateName};

/// Days before a scratch-build document may be expired.
pub const SCRATCH_BUILD_TTL_DAYS: i64 = 60;
/// Days before a container-image document may be expired.
pub const CONTAINER_IMAGE_TTL_DAYS: i64 = 182;

/// Origin of a state entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub creator: String,
    pub reason: String,
}

impl Origin {
    /// The loader's origin stamp for broker-delivered messages.
    pub fn loader() -> Self {
        Origin {
            creator: "kaijs-loader".to_string(),
            reason: "broker message".to_string(),
        }
    }
}

/// The canonical per-message state record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KaiState {
    pub thread_id: String,
    pub msg_id: String,
    pub version: String,
    pub stage: Stage,
    pub state: StateName,
    pub timestamp: i64,
    pub origin: Origin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_case_name: Option<String>,
}

/// One observed broker message attached to an artifact document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactState {
    pub kai_state: KaiState,
    pub broker_msg_body: Value,
    pub broker_msg_topic: String,
}

/// The artifact document persisted in the document DB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "_version")]
    pub version: u64,

    #[serde(rename = "_updated")]
    pub updated: DateTime<Utc>,

    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,

    pub aid: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpm_build: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mbs_build: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dist_git_pr: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub productmd_compose: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<ArtifactState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<DateTime<Utc>>,
}

impl ArtifactDocument {
    /// A fresh document at `_version` 1 with no payload and no states.
    pub fn new(artifact_type: ArtifactType, aid: impl Into<String>) -> Self {
        ArtifactDocument {
            id: None,
            version: 1,
            updated: Utc::now(),
            artifact_type,
            aid: aid.into(),
            rpm_build: None,
            mbs_build: None,
            dist_git_pr: None,
            productmd_compose: None,
            states: Vec::new(),
            expire_at: None,
        }
    }

    /// Whether a state with this broker message id is already recorded.
    pub fn has_state(&self, msg_id: &str) -> bool {
        self.states.iter().any(|s| s.kai_state.msg_id == msg_id)
    }

    /// Append a state entry unless its `msg_id` is already present.
    ///
    /// Returns `true` when the entry was appended.
    pub fn add_state(&mut self, state: ArtifactState) -> bool {
        if self.has_state(&state.kai_state.msg_id) {
            return false;
        }
        self.states.push(state);
        true
    }

    /// Write the payload into the family's slot, replacing any prior value.
    pub fn set_payload(&mut self, payload: Value) {
        match self.artifact_type.payload_slot() {
            PayloadSlot::RpmBuild => self.rpm_build = Some(payload),
            PayloadSlot::MbsBuild => self.mbs_build = Some(payload),
            PayloadSlot::DistGitPr => self.dist_git_pr = Some(payload),
            PayloadSlot::ProductmdCompose => self.productmd_compose = Some(payload),
        }
    }

    /// The payload sub-object, if one has been extracted yet.
    pub fn payload(&self) -> Option<&Value> {
        self.rpm_build
            .as_ref()
            .or(self.mbs_build.as_ref())
            .or(self.dist_git_pr.as_ref())
            .or(self.productmd_compose.as_ref())
    }

    /// Set the TTL hint: scratch builds expire after 60 days, container
    /// images after 182 days. Anything else never expires.
    pub fn apply_expiry(&mut self, scratch: bool, now: DateTime<Utc>) {
        if self.artifact_type == ArtifactType::RedhatContainerImage {
            self.expire_at = Some(now + Duration::days(CONTAINER_IMAGE_TTL_DAYS));
        } else if scratch {
            self.expire_at = Some(now + Duration::days(SCRATCH_BUILD_TTL_DAYS));
        }
    }

    /// Structural self-check applied before any write.
    pub fn validate(&self) -> Result<(), KaijsError> {
        if self.aid.is_empty() {
            return Err(KaijsError::Validation("document aid is empty".to_string()));
        }
        if self.version == 0 {
            return Err(KaijsError::Validation(
                "document _version must be >= 1".to_string(),
            ));
        }
        let slots = [
            self.rpm_build.is_some(),
            self.mbs_build.is_some(),
            self.dist_git_pr.is_some(),
            self.productmd_compose.is_some(),
        ];
        if slots.iter().filter(|p| **p).count() > 1 {
            return Err(KaijsError::Validation(
                "more than one payload sub-object present".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for state in &self.states {
            let ks = &state.kai_state;
            if ks.msg_id.is_empty() {
                return Err(KaijsError::Validation(
                    "state entry without msg_id".to_string(),
                ));
            }
            if ks.thread_id.is_empty() {
                return Err(KaijsError::Validation(format!(
                    "state {} without thread_id",
                    ks.msg_id
                )));
            }
            if !seen.insert(ks.msg_id.as_str()) {
                return Err(KaijsError::Validation(format!(
                    "duplicate state for msg_id {}",
                    ks.msg_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(msg_id: &str) -> ArtifactState {
        ArtifactState {
            kai_state: KaiState {
                thread_id: "t-1".to_string(),
                msg_id: msg_id.to_string(),
                version: "1.1.14".to_string(),
                stage: Stage::Test,
                state: StateName::Complete,
                timestamp: 1_700_000_000,
                origin: Origin::loader(),
                test_case_name: Some("osci.brew-build.tier0".to_string()),
            },
            broker_msg_body: json!({"version": "1.1.14"}),
            broker_msg_topic: "VirtualTopic.eng.ci.osci.brew-build.test.complete".to_string(),
        }
    }

    #[test]
    fn fresh_document_starts_at_version_one() {
        let doc = ArtifactDocument::new(ArtifactType::BrewBuild, "111");
        assert_eq!(doc.version, 1);
        assert!(doc.states.is_empty());
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn add_state_dedupes_on_msg_id() {
        let mut doc = ArtifactDocument::new(ArtifactType::BrewBuild, "111");
        assert!(doc.add_state(state("m-1")));
        assert!(!doc.add_state(state("m-1")));
        assert!(doc.add_state(state("m-2")));
        assert_eq!(doc.states.len(), 2);
    }

    #[test]
    fn set_payload_targets_the_family_slot() {
        let mut doc = ArtifactDocument::new(ArtifactType::RedhatModule, "3155");
        doc.set_payload(json!({"nsvc": "perl:5.30:820200402/x"}));
        assert!(doc.mbs_build.is_some());
        assert!(doc.rpm_build.is_none());
    }

    #[test]
    fn two_payload_slots_fail_validation() {
        let mut doc = ArtifactDocument::new(ArtifactType::BrewBuild, "111");
        doc.rpm_build = Some(json!({}));
        doc.mbs_build = Some(json!({}));
        assert!(doc.validate().is_err());
    }

    #[test]
    fn scratch_build_expires_after_sixty_days() {
        let now = Utc::now();
        let mut doc = ArtifactDocument::new(ArtifactType::BrewBuild, "111");
        doc.apply_expiry(true, now);
        assert_eq!(doc.expire_at, Some(now + Duration::days(60)));
    }

    #[test]
    fn container_image_expires_after_182_days_even_when_not_scratch() {
        let now = Utc::now();
        let mut doc = ArtifactDocument::new(ArtifactType::RedhatContainerImage, "sha256:abc");
        doc.apply_expiry(false, now);
        assert_eq!(doc.expire_at, Some(now + Duration::days(182)));
    }

    #[test]
    fn non_scratch_build_never_expires() {
        let mut doc = ArtifactDocument::new(ArtifactType::KojiBuild, "111");
        doc.apply_expiry(false, Utc::now());
        assert!(doc.expire_at.is_none());
    }

    #[test]
    fn document_serializes_with_underscore_meta_fields() {
        let doc = ArtifactDocument::new(ArtifactType::BrewBuild, "111");
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["_version"], json!(1));
        assert_eq!(value["type"], json!("brew-build"));
        assert_eq!(value["aid"], json!("111"));
        assert!(value.get("rpm_build").is_none());
    }
}
