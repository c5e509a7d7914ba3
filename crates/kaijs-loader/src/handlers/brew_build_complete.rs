//! Brew build-complete handler.
//!
//! Only OSBS container builds are processed; every other build kind is
//! declined. This handler is the authoritative source for the
//! container-image payload shape.

use async_trait::async_trait;
use kaijs_domain::{
    child_doc, parent_doc, parent_doc_id, ArtifactDocument, ArtifactType, KaijsError,
    SpoolMessage,
};
use kaijs_schemas::special::valid_artifact_issuer;
use kaijs_state::IndexUpdate;
use serde_json::{json, Value};

use super::{container, id_string, loose_bool, required_str, HandlerContext};
use crate::index_writer::{context_from_topic, index_name, RETRY_ON_CONFLICT};

/// Media type carrying the manifest-list digest that identifies the image.
const MANIFEST_LIST_TYPE: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

pub struct BrewBuildCompleteHandler;

struct Image {
    aid: String,
    payload: Value,
    searchable: Value,
}

impl BrewBuildCompleteHandler {
    fn extract(&self, env: &SpoolMessage) -> Result<Image, KaijsError> {
        let info = env
            .body
            .get("info")
            .filter(|i| i.is_object())
            .ok_or_else(|| KaijsError::Validation("missing required field: info".to_string()))?;

        let kind = info
            .pointer("/extra/osbs_build/kind")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if kind != "container_build" {
            return Err(KaijsError::NoNeedToProcess(format!(
                "brew build kind {:?} is not a container build",
                kind
            )));
        }

        let digest = info
            .pointer("/extra/image/index/digests")
            .and_then(|digests| digests.get(MANIFEST_LIST_TYPE))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                KaijsError::Validation("container build without manifest-list digest".to_string())
            })?
            .to_string();

        let issuer = required_str(info, "/owner_name")?;
        valid_artifact_issuer(&issuer)?;

        let mut payload = json!({
            "id": digest.clone(),
            "nvr": required_str(info, "/nvr")?,
            "issuer": issuer,
            "task_id": id_string(info.pointer("/extra/container_koji_task_id"))
                .or_else(|| id_string(info.get("task_id")))
                .unwrap_or_default(),
            "scratch": loose_bool(info.get("scratch")).unwrap_or(false),
        });
        if let Some(source) = info.get("source").and_then(Value::as_str) {
            payload["source"] = json!(source);
        }
        if let Some(subtypes) = info
            .pointer("/extra/osbs_build/subtypes")
            .and_then(Value::as_array)
        {
            payload["osbs_subtypes"] = json!(subtypes);
        }

        let searchable = container::searchable(payload.clone())?;
        Ok(Image {
            aid: digest,
            payload,
            searchable,
        })
    }
}

#[async_trait]
impl super::DbHandler for BrewBuildCompleteHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        env: &SpoolMessage,
    ) -> Result<ArtifactDocument, KaijsError> {
        let image = self.extract(env)?;
        let current = ctx
            .store
            .find_or_create(ArtifactType::RedhatContainerImage, &image.aid)
            .await
            .map_err(crate::db_writer::state_error)?;
        let mut doc: ArtifactDocument = serde_json::from_value(current)?;
        doc.set_payload(image.payload);
        if doc.expire_at.is_none() {
            doc.apply_expiry(false, chrono::Utc::now());
        }
        Ok(doc)
    }
}

#[async_trait]
impl super::IndexHandler for BrewBuildCompleteHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        env: &SpoolMessage,
    ) -> Result<Vec<IndexUpdate>, KaijsError> {
        let image = self.extract(env)?;
        let atype = ArtifactType::RedhatContainerImage;
        let parent_id = parent_doc_id(atype, &image.aid);
        let index = index_name(
            &ctx.index_prefix,
            context_from_topic(&env.broker_topic),
            atype,
        );
        Ok(vec![
            IndexUpdate {
                doc_id: parent_id.clone(),
                index_name: index.clone(),
                routing: parent_id.clone(),
                doc: Value::Object(Default::default()),
                upsert: Some(parent_doc(atype, &image.aid, image.searchable.clone())),
                doc_as_upsert: false,
                retry_on_conflict: RETRY_ON_CONFLICT,
            },
            IndexUpdate {
                doc_id: env.broker_msg_id.clone(),
                index_name: index,
                routing: parent_id.clone(),
                doc: child_doc(env, image.searchable, &parent_id),
                upsert: None,
                doc_as_upsert: true,
                retry_on_conflict: RETRY_ON_CONFLICT,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container_body() -> Value {
        json!({
            "info": {
                "nvr": "ubi9-container-9.4-1",
                "owner_name": "osbs",
                "scratch": false,
                "source": "git://pkgs/containers/ubi9",
                "extra": {
                    "container_koji_task_id": 52_279_531,
                    "osbs_build": {"kind": "container_build", "subtypes": ["operator"]},
                    "image": {"index": {"digests": {
                        "application/vnd.docker.distribution.manifest.list.v2+json":
                            "sha256:1fae9a1e5bf8"
                    }}}
                }
            }
        })
    }

    fn envelope(body: Value) -> SpoolMessage {
        SpoolMessage::new_at(
            1_700_000_000,
            "umb",
            "m-1",
            "VirtualTopic.eng.brew.build.complete",
            body,
            json!({}),
            None,
        )
    }

    #[test]
    fn container_builds_yield_the_manifest_digest_id() {
        let image = BrewBuildCompleteHandler
            .extract(&envelope(container_body()))
            .unwrap();
        assert_eq!(image.aid, "sha256:1fae9a1e5bf8");
        assert_eq!(image.payload["task_id"], json!("52279531"));
        assert_eq!(image.payload["osbs_subtypes"], json!(["operator"]));
    }

    #[test]
    fn rpm_builds_are_declined() {
        let mut body = container_body();
        body["info"]["extra"]["osbs_build"]["kind"] = json!("rpm_build");
        assert!(matches!(
            BrewBuildCompleteHandler.extract(&envelope(body)),
            Err(KaijsError::NoNeedToProcess(_))
        ));
    }

    #[test]
    fn container_build_without_digest_is_invalid() {
        let mut body = container_body();
        body["info"]["extra"]["image"] = json!({});
        assert!(matches!(
            BrewBuildCompleteHandler.extract(&envelope(body)),
            Err(KaijsError::Validation(_))
        ));
    }
}
