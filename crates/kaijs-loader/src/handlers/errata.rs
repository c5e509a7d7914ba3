//! Errata-tool automation-finished handler.
//!
//! An extra-light event: the task id anchors it to a brew build and the
//! errata status is folded into the build's payload. Events without a task
//! id never reach this handler (the validator drops them).

use async_trait::async_trait;
use kaijs_domain::{
    child_doc, parent_doc, parent_doc_id, ArtifactDocument, ArtifactType, KaijsError,
    SpoolMessage,
};
use kaijs_state::IndexUpdate;
use serde_json::{json, Value};

use super::{id_string, required_str, HandlerContext};
use crate::index_writer::{context_from_topic, index_name, RETRY_ON_CONFLICT};

pub struct ErrataAutomationHandler;

impl ErrataAutomationHandler {
    fn extract(&self, env: &SpoolMessage) -> Result<(String, Value), KaijsError> {
        let body = &env.body;
        let task_id = id_string(body.get("task_id")).ok_or_else(|| {
            KaijsError::Validation("missing required field: task_id".to_string())
        })?;
        let mut errata = json!({
            "errata_status": required_str(body, "/errata_status")?,
        });
        if let Some(errata_id) = id_string(body.get("errata_id")) {
            errata["errata_id"] = json!(errata_id);
        }
        let payload = json!({
            "task_id": task_id,
            "errata_automation": errata,
        });
        Ok((task_id, payload))
    }
}

#[async_trait]
impl super::DbHandler for ErrataAutomationHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        env: &SpoolMessage,
    ) -> Result<ArtifactDocument, KaijsError> {
        let (aid, payload) = self.extract(env)?;
        let current = ctx
            .store
            .find_or_create(ArtifactType::BrewBuild, &aid)
            .await
            .map_err(crate::db_writer::state_error)?;
        let mut doc: ArtifactDocument = serde_json::from_value(current)?;
        // Merge over the existing payload: an errata event must not erase
        // fields a build-test message already contributed.
        let mut merged = doc.rpm_build.clone().unwrap_or_else(|| json!({}));
        if let (Some(target), Some(update)) = (merged.as_object_mut(), payload.as_object()) {
            for (key, value) in update {
                target.insert(key.clone(), value.clone());
            }
        }
        doc.set_payload(merged);
        Ok(doc)
    }
}

#[async_trait]
impl super::IndexHandler for ErrataAutomationHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        env: &SpoolMessage,
    ) -> Result<Vec<IndexUpdate>, KaijsError> {
        let (aid, payload) = self.extract(env)?;
        let atype = ArtifactType::BrewBuild;
        let parent_id = parent_doc_id(atype, &aid);
        let index = index_name(
            &ctx.index_prefix,
            context_from_topic(&env.broker_topic),
            atype,
        );
        let searchable = json!({
            "task_id": aid,
            "errata_automation": payload["errata_automation"].clone(),
        });
        Ok(vec![
            IndexUpdate {
                doc_id: parent_id.clone(),
                index_name: index.clone(),
                routing: parent_id.clone(),
                doc: Value::Object(Default::default()),
                upsert: Some(parent_doc(atype, &aid, searchable.clone())),
                doc_as_upsert: false,
                retry_on_conflict: RETRY_ON_CONFLICT,
            },
            IndexUpdate {
                doc_id: env.broker_msg_id.clone(),
                index_name: index,
                routing: parent_id.clone(),
                doc: child_doc(env, searchable, &parent_id),
                upsert: None,
                doc_as_upsert: true,
                retry_on_conflict: RETRY_ON_CONFLICT,
            },
        ])
    }
}
