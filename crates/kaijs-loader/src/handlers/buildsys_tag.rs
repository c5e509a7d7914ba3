//! Koji buildsys-tag handler (fedora and centos-stream brokers).
//!
//! Tag events carry only the build id and NVR components; the handler
//! enriches them with one `getBuild` lookup before assembling the payload.
//! The reply is shape-checked by the retry wrapper.

use async_trait::async_trait;
use kaijs_domain::{
    child_doc, parent_doc, parent_doc_id, ArtifactDocument, ArtifactType, KaijsError,
    SpoolMessage,
};
use kaijs_schemas::special::valid_artifact_issuer;
use kaijs_state::IndexUpdate;
use serde_json::{json, Value};

use super::{id_string, loose_bool, required_str, rpm, HandlerContext};
use crate::index_writer::{context_from_topic, index_name, RETRY_ON_CONFLICT};
use crate::koji::{get_build_with_retry, RetryPolicy};

pub struct BuildsysTagHandler {
    atype: ArtifactType,
    retry: RetryPolicy,
}

impl BuildsysTagHandler {
    pub fn new(atype: ArtifactType) -> Self {
        BuildsysTagHandler {
            atype,
            retry: RetryPolicy::default(),
        }
    }

    #[cfg(test)]
    pub fn with_retry(atype: ArtifactType, retry: RetryPolicy) -> Self {
        BuildsysTagHandler { atype, retry }
    }

    async fn extract(
        &self,
        ctx: &HandlerContext,
        env: &SpoolMessage,
    ) -> Result<(String, Value), KaijsError> {
        let body = &env.body;
        let build_id = body
            .get("build_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                KaijsError::Validation("missing required field: build_id".to_string())
            })?;
        let issuer = required_str(body, "/owner")?;
        valid_artifact_issuer(&issuer)?;

        let build = get_build_with_retry(ctx.koji.as_ref(), build_id, self.retry).await?;
        let task_id = id_string(build.get("task_id")).ok_or_else(|| {
            KaijsError::Validation("koji build info: task_id is not an integer".to_string())
        })?;

        let mut payload = json!({
            "task_id": task_id,
            "build_id": build_id.to_string(),
            "nvr": required_str(&build, "/nvr")?,
            "issuer": issuer,
            "component": required_str(body, "/name")?,
            "scratch": loose_bool(build.pointer("/extra/scratch")).unwrap_or(false),
        });
        if let Some(source) = build
            .pointer("/extra/source/original_url")
            .and_then(Value::as_str)
        {
            payload["source"] = json!(source);
        }
        let aid = task_id;
        Ok((aid, payload))
    }
}

#[async_trait]
impl super::DbHandler for BuildsysTagHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        env: &SpoolMessage,
    ) -> Result<ArtifactDocument, KaijsError> {
        let (aid, payload) = self.extract(ctx, env).await?;
        let current = ctx
            .store
            .find_or_create(self.atype, &aid)
            .await
            .map_err(crate::db_writer::state_error)?;
        let mut doc: ArtifactDocument = serde_json::from_value(current)?;
        let scratch = loose_bool(payload.get("scratch")).unwrap_or(false);
        doc.set_payload(payload);
        if doc.expire_at.is_none() {
            doc.apply_expiry(scratch, chrono::Utc::now());
        }
        Ok(doc)
    }
}

#[async_trait]
impl super::IndexHandler for BuildsysTagHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        env: &SpoolMessage,
    ) -> Result<Vec<IndexUpdate>, KaijsError> {
        let (aid, payload) = self.extract(ctx, env).await?;
        let searchable = rpm::searchable(payload)?;
        let parent_id = parent_doc_id(self.atype, &aid);
        let index = index_name(
            &ctx.index_prefix,
            context_from_topic(&env.broker_topic),
            self.atype,
        );
        Ok(vec![
            IndexUpdate {
                doc_id: parent_id.clone(),
                index_name: index.clone(),
                routing: parent_id.clone(),
                doc: Value::Object(Default::default()),
                upsert: Some(parent_doc(self.atype, &aid, searchable.clone())),
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
