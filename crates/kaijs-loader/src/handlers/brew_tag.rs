//! Brew build-tag handler.
//!
//! A tag event either concerns a module build (the build carries an MBS id
//! in its typeinfo) or a plain RPM build; each branch accepts only its own
//! gate-tag pattern and declines everything else.

use async_trait::async_trait;
use kaijs_domain::{
    child_doc, parent_doc, parent_doc_id, ArtifactDocument, ArtifactType, KaijsError,
    SpoolMessage,
};
use kaijs_schemas::special::{gate_tag_brew_build, gate_tag_redhat_module, valid_artifact_issuer};
use kaijs_state::IndexUpdate;
use serde_json::{json, Value};

use super::{id_string, loose_bool, mbs, required_str, rpm, HandlerContext};
use crate::index_writer::{context_from_topic, index_name, RETRY_ON_CONFLICT};

pub struct BrewTagHandler;

struct Tagged {
    atype: ArtifactType,
    aid: String,
    payload: Value,
    searchable: Value,
}

impl BrewTagHandler {
    fn extract(&self, env: &SpoolMessage) -> Result<Tagged, KaijsError> {
        let body = &env.body;
        let tag_name = required_str(body, "/tag/name")?;
        let build = body
            .get("build")
            .filter(|b| b.is_object())
            .ok_or_else(|| KaijsError::Validation("missing required field: build".to_string()))?;

        let mbs_id = id_string(build.pointer("/extra/typeinfo/module/module_build_service_id"));
        if let Some(mbs_id) = mbs_id {
            gate_tag_redhat_module(&tag_name)?;
            let module = build
                .pointer("/extra/typeinfo/module")
                .cloned()
                .unwrap_or(Value::Null);
            let issuer = required_str(build, "/owner_name")?;
            valid_artifact_issuer(&issuer)?;
            let name = required_str(&module, "/name")?;
            let stream = required_str(&module, "/stream")?;
            let version = required_str(&module, "/version")?;
            let context = required_str(&module, "/context")?;
            let payload = json!({
                "mbs_id": mbs_id,
                "nsvc": format!("{name}:{stream}:{version}:{context}"),
                "name": name,
                "stream": stream,
                "version": version,
                "context": context,
                "issuer": issuer,
                "nvr": build.get("nvr").and_then(Value::as_str),
                "gate_tag_name": tag_name,
            });
            let searchable = mbs::searchable(payload.clone())?;
            return Ok(Tagged {
                atype: ArtifactType::RedhatModule,
                aid: mbs_id,
                payload,
                searchable,
            });
        }

        gate_tag_brew_build(&tag_name)?;
        let task_id = id_string(build.get("task_id")).ok_or_else(|| {
            KaijsError::Validation("missing required field: build.task_id".to_string())
        })?;
        let issuer = required_str(build, "/owner_name")?;
        valid_artifact_issuer(&issuer)?;
        let mut payload = json!({
            "task_id": task_id,
            "nvr": required_str(build, "/nvr")?,
            "issuer": issuer,
            "component": required_str(build, "/package_name")?,
            "scratch": loose_bool(build.get("scratch")).unwrap_or(false),
            "gate_tag_name": tag_name,
        });
        if let Some(build_id) = id_string(build.get("build_id")) {
            payload["build_id"] = json!(build_id);
        }
        let searchable = rpm::searchable(payload.clone())?;
        Ok(Tagged {
            atype: ArtifactType::BrewBuild,
            aid: task_id,
            payload,
            searchable,
        })
    }
}

#[async_trait]
impl super::DbHandler for BrewTagHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        env: &SpoolMessage,
    ) -> Result<ArtifactDocument, KaijsError> {
        let tagged = self.extract(env)?;
        let current = ctx
            .store
            .find_or_create(tagged.atype, &tagged.aid)
            .await
            .map_err(crate::db_writer::state_error)?;
        let mut doc: ArtifactDocument = serde_json::from_value(current)?;
        doc.set_payload(tagged.payload);
        Ok(doc)
    }
}

#[async_trait]
impl super::IndexHandler for BrewTagHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        env: &SpoolMessage,
    ) -> Result<Vec<IndexUpdate>, KaijsError> {
        let tagged = self.extract(env)?;
        let parent_id = parent_doc_id(tagged.atype, &tagged.aid);
        let index = index_name(
            &ctx.index_prefix,
            context_from_topic(&env.broker_topic),
            tagged.atype,
        );
        Ok(vec![
            IndexUpdate {
                doc_id: parent_id.clone(),
                index_name: index.clone(),
                routing: parent_id.clone(),
                doc: Value::Object(Default::default()),
                upsert: Some(parent_doc(tagged.atype, &tagged.aid, tagged.searchable.clone())),
                doc_as_upsert: false,
                retry_on_conflict: RETRY_ON_CONFLICT,
            },
            IndexUpdate {
                doc_id: env.broker_msg_id.clone(),
                index_name: index,
                routing: parent_id.clone(),
                doc: child_doc(env, tagged.searchable, &parent_id),
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

    fn envelope(body: Value) -> SpoolMessage {
        SpoolMessage::new_at(
            1_700_000_000,
            "umb",
            "m-1",
            "VirtualTopic.eng.brew.build.tag",
            body,
            json!({}),
            None,
        )
    }

    #[test]
    fn rpm_branch_requires_an_rpm_gate_tag() {
        let env = envelope(json!({
            "tag": {"name": "rhel-9.4.0-gate"},
            "build": {
                "task_id": 57_915_437,
                "build_id": 2_345_678,
                "nvr": "bash-5.1.8-9.el9",
                "owner_name": "jdoe",
                "package_name": "bash",
                "scratch": false
            }
        }));
        let tagged = BrewTagHandler.extract(&env).unwrap();
        assert_eq!(tagged.atype, ArtifactType::BrewBuild);
        assert_eq!(tagged.aid, "57915437");
        assert_eq!(tagged.payload["gate_tag_name"], json!("rhel-9.4.0-gate"));
    }

    #[test]
    fn module_branch_is_selected_by_the_mbs_id() {
        let env = envelope(json!({
            "tag": {"name": "rhel-8.9.0-modules-gate"},
            "build": {
                "task_id": 1,
                "nvr": "perl-5.30-8090020200402",
                "owner_name": "mbs",
                "package_name": "perl",
                "extra": {"typeinfo": {"module": {
                    "module_build_service_id": 3155,
                    "name": "perl",
                    "stream": "5.30",
                    "version": "820200402",
                    "context": "deadbeef"
                }}}
            }
        }));
        let tagged = BrewTagHandler.extract(&env).unwrap();
        assert_eq!(tagged.atype, ArtifactType::RedhatModule);
        assert_eq!(tagged.aid, "3155");
        assert_eq!(tagged.payload["nsvc"], json!("perl:5.30:820200402:deadbeef"));
    }

    #[test]
    fn non_gate_tags_are_declined() {
        let env = envelope(json!({
            "tag": {"name": "rhel-9.4.0-candidate"},
            "build": {"task_id": 1, "nvr": "x-1-1", "owner_name": "o", "package_name": "x"}
        }));
        assert!(matches!(
            BrewTagHandler.extract(&env),
            Err(KaijsError::NoNeedToProcess(_))
        ));
    }

    #[test]
    fn module_build_against_rpm_gate_tag_is_declined() {
        let env = envelope(json!({
            "tag": {"name": "rhel-8.9.0-gate"},
            "build": {
                "owner_name": "mbs",
                "extra": {"typeinfo": {"module": {"module_build_service_id": 3155}}}
            }
        }));
        assert!(matches!(
            BrewTagHandler.extract(&env),
            Err(KaijsError::NoNeedToProcess(_))
        ));
    }

    #[test]
    fn filtered_issuers_are_declined() {
        let env = envelope(json!({
            "tag": {"name": "rhel-9.4.0-gate"},
            "build": {
                "task_id": 1,
                "nvr": "x-1-1",
                "owner_name": "freshmaker",
                "package_name": "x"
            }
        }));
        assert!(matches!(
            BrewTagHandler.extract(&env),
            Err(KaijsError::NoNeedToProcess(_))
        ));
    }
}
