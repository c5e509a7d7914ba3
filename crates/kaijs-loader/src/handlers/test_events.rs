//! The generic CI test-event handler.
//!
//! Every `*.test.{queued,running,complete,error}` family shares one
//! protocol: extract the family payload via the version registry, check the
//! issuer, then either fold the payload and a new state entry into the
//! artifact document (DB path) or emit the parent/child pair (index path).
//! Families differ only in artifact type, transforms, and the id field.

use async_trait::async_trait;
use chrono::Utc;
use kaijs_domain::{
    child_doc, make_state, parent_doc, parent_doc_id, ArtifactDocument, ArtifactState,
    ArtifactType, KaijsError, SpoolMessage,
};
use kaijs_state::IndexUpdate;
use serde_json::Value;

use super::{loose_bool, HandlerContext};
use crate::dispatch::TransformRegistry;
use crate::handlers::{compose, container, distgit, mbs, rpm};
use crate::index_writer::{context_from_topic, index_name, RETRY_ON_CONFLICT};

type SearchableFn = fn(Value) -> Result<Value, KaijsError>;

pub struct TestEventHandler {
    atype: ArtifactType,
    transforms: TransformRegistry,
    to_searchable: SearchableFn,
    aid_field: &'static str,
    check_issuer: bool,
}

struct Extracted {
    payload: Value,
    aid: String,
    scratch: bool,
}

impl TestEventHandler {
    fn extract(&self, env: &SpoolMessage) -> Result<Extracted, KaijsError> {
        let version = env
            .body_version()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| KaijsError::WrongVersion(env.broker_topic.clone()))?;
        let transform = self.transforms.for_version(version)?;
        let payload = transform(env)?;

        if self.check_issuer {
            if let Some(issuer) = payload.get("issuer").and_then(Value::as_str) {
                kaijs_schemas::special::valid_artifact_issuer(issuer)?;
            }
        }

        let aid = payload
            .get(self.aid_field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                KaijsError::Validation(format!("payload without {}", self.aid_field))
            })?;
        let scratch = loose_bool(payload.get("scratch")).unwrap_or(false);
        Ok(Extracted {
            payload,
            aid,
            scratch,
        })
    }
}

#[async_trait]
impl super::DbHandler for TestEventHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        env: &SpoolMessage,
    ) -> Result<ArtifactDocument, KaijsError> {
        let extracted = self.extract(env)?;
        let current = ctx
            .store
            .find_or_create(self.atype, &extracted.aid)
            .await
            .map_err(crate::db_writer::state_error)?;
        let mut doc: ArtifactDocument = serde_json::from_value(current)?;
        doc.set_payload(extracted.payload);

        let kai_state = make_state(env)?;
        doc.add_state(ArtifactState {
            kai_state,
            broker_msg_body: env.body.clone(),
            broker_msg_topic: env.broker_topic.clone(),
        });

        if doc.expire_at.is_none() {
            doc.apply_expiry(extracted.scratch, Utc::now());
        }
        Ok(doc)
    }
}

#[async_trait]
impl super::IndexHandler for TestEventHandler {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        env: &SpoolMessage,
    ) -> Result<Vec<IndexUpdate>, KaijsError> {
        let extracted = self.extract(env)?;
        // The state derivation must succeed even though the index document
        // does not embed it; a message without a thread anchor is invalid.
        make_state(env)?;

        let searchable = (self.to_searchable)(extracted.payload)?;
        let parent_id = parent_doc_id(self.atype, &extracted.aid);
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
                upsert: Some(parent_doc(self.atype, &extracted.aid, searchable.clone())),
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

fn rpm_transforms() -> TransformRegistry {
    let mut transforms = TransformRegistry::new();
    transforms
        .register(r"^0\.", rpm::payload_v0)
        .register(r"^.*$", rpm::payload_v1);
    transforms
}

fn mbs_transforms() -> TransformRegistry {
    let mut transforms = TransformRegistry::new();
    transforms
        .register(r"^0\.", mbs::payload_v0)
        .register(r"^.*$", mbs::payload_v1);
    transforms
}

fn single(transform: crate::dispatch::Transform) -> TransformRegistry {
    let mut transforms = TransformRegistry::new();
    transforms.register(r"^.*$", transform);
    transforms
}

pub fn brew_build() -> TestEventHandler {
    TestEventHandler {
        atype: ArtifactType::BrewBuild,
        transforms: rpm_transforms(),
        to_searchable: rpm::searchable,
        aid_field: "task_id",
        check_issuer: true,
    }
}

pub fn koji_build_cs() -> TestEventHandler {
    TestEventHandler {
        atype: ArtifactType::KojiBuildCs,
        transforms: rpm_transforms(),
        to_searchable: rpm::searchable,
        aid_field: "task_id",
        check_issuer: true,
    }
}

pub fn copr_build() -> TestEventHandler {
    TestEventHandler {
        atype: ArtifactType::CoprBuild,
        transforms: rpm_transforms(),
        to_searchable: rpm::searchable,
        aid_field: "task_id",
        check_issuer: false,
    }
}

pub fn redhat_module() -> TestEventHandler {
    TestEventHandler {
        atype: ArtifactType::RedhatModule,
        transforms: mbs_transforms(),
        to_searchable: mbs::searchable,
        aid_field: "mbs_id",
        check_issuer: true,
    }
}

pub fn fedora_module() -> TestEventHandler {
    TestEventHandler {
        atype: ArtifactType::FedoraModule,
        transforms: mbs_transforms(),
        to_searchable: mbs::searchable,
        aid_field: "mbs_id",
        check_issuer: false,
    }
}

pub fn productmd_compose() -> TestEventHandler {
    TestEventHandler {
        atype: ArtifactType::ProductmdCompose,
        transforms: single(compose::payload_v1),
        to_searchable: compose::searchable,
        aid_field: "compose_id",
        check_issuer: false,
    }
}

pub fn container_image() -> TestEventHandler {
    TestEventHandler {
        atype: ArtifactType::RedhatContainerImage,
        transforms: single(container::payload_v1),
        to_searchable: container::searchable,
        aid_field: "id",
        check_issuer: true,
    }
}

pub fn dist_git_pr() -> TestEventHandler {
    TestEventHandler {
        atype: ArtifactType::DistGitPr,
        transforms: single(distgit::payload_v1),
        to_searchable: distgit::searchable,
        aid_field: "uid",
        check_issuer: false,
    }
}
