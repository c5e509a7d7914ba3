//! Topic handlers.
//!
//! Each handler family transforms envelopes of one topic group into either
//! an updated artifact document (document-DB path) or a parent/child pair
//! of index updates (search-index path). The global registries are built
//! once at startup, most-specific patterns first, and are read-only
//! afterwards.

pub mod brew_build_complete;
pub mod brew_tag;
pub mod buildsys_tag;
pub mod compose;
pub mod container;
pub mod distgit;
pub mod errata;
pub mod mbs;
pub mod rpm;
pub mod test_events;

use std::sync::Arc;

use async_trait::async_trait;
use kaijs_domain::{ArtifactDocument, ArtifactType, KaijsError, SpoolMessage};
use kaijs_state::{ArtifactStore, IndexUpdate};
use serde_json::Value;

use crate::dispatch::DispatchRegistry;
use crate::koji::KojiClient;

/// Shared collaborators handed to every handler invocation.
pub struct HandlerContext {
    pub store: Arc<dyn ArtifactStore>,
    pub koji: Arc<dyn KojiClient>,
    /// Prefix for every search-index name.
    pub index_prefix: String,
}

/// Document-DB path: produce the computed artifact document for one
/// envelope. The writer diffs it against the stored document and applies
/// the minimal update under optimistic concurrency.
#[async_trait]
pub trait DbHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        env: &SpoolMessage,
    ) -> Result<ArtifactDocument, KaijsError>;
}

/// Search-index path: produce the bulk updates for one envelope, typically
/// a create-only parent upsert plus a child document.
#[async_trait]
pub trait IndexHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &HandlerContext,
        env: &SpoolMessage,
    ) -> Result<Vec<IndexUpdate>, KaijsError>;
}

/// Both dispatch registries, built in one pass so the two paths stay in
/// lockstep on topic coverage.
pub struct Registries {
    pub db: DispatchRegistry<dyn DbHandler>,
    pub index: DispatchRegistry<dyn IndexHandler>,
}

/// Build the global topic registries.
///
/// Registration order is the specificity order: exact per-broker patterns
/// precede the `.ci.` family catch-alls, which precede nothing. There is
/// no global fallback; an unmatched topic is `NoAssociatedHandler`.
pub fn registry() -> Registries {
    let mut db: DispatchRegistry<dyn DbHandler> = DispatchRegistry::new();
    let mut index: DispatchRegistry<dyn IndexHandler> = DispatchRegistry::new();

    let koji_cs = Arc::new(test_events::koji_build_cs());
    let brew = Arc::new(test_events::brew_build());
    let copr = Arc::new(test_events::copr_build());
    let fedora_module = Arc::new(test_events::fedora_module());
    let redhat_module = Arc::new(test_events::redhat_module());
    let compose = Arc::new(test_events::productmd_compose());
    let container = Arc::new(test_events::container_image());
    let dist_git = Arc::new(test_events::dist_git_pr());
    let brew_tag = Arc::new(brew_tag::BrewTagHandler);
    let brew_complete = Arc::new(brew_build_complete::BrewBuildCompleteHandler);
    let buildsys_fedora = Arc::new(buildsys_tag::BuildsysTagHandler::new(ArtifactType::KojiBuild));
    let buildsys_centos =
        Arc::new(buildsys_tag::BuildsysTagHandler::new(ArtifactType::KojiBuildCs));
    let errata = Arc::new(errata::ErrataAutomationHandler);

    const STATE_TAIL: &str = r"(complete|queued|running|error)$";

    let pairs: Vec<(String, Arc<test_events::TestEventHandler>)> = vec![
        (
            format!(r"^org\.centos\.prod\.ci\.koji-build\.test\.{STATE_TAIL}"),
            koji_cs,
        ),
        (
            format!(r"^org\.centos\.prod\.ci\.fedora-module\.test\.{STATE_TAIL}"),
            fedora_module,
        ),
        (
            format!(r"\.ci\.(.*\.)?brew-build\.test\.{STATE_TAIL}"),
            brew,
        ),
        (
            format!(r"\.ci\.(.*\.)?copr-build\.test\.{STATE_TAIL}"),
            copr,
        ),
        (
            format!(r"\.ci\.(.*\.)?redhat-module\.test\.{STATE_TAIL}"),
            redhat_module,
        ),
        (
            format!(r"\.ci\.(.*\.)?productmd-compose\.(test|build)\.{STATE_TAIL}"),
            compose,
        ),
        (
            format!(r"\.ci\.(.*\.)?redhat-container-image\.test\.{STATE_TAIL}"),
            container,
        ),
        (
            format!(r"\.ci\.(.*\.)?dist-git-pr\.test\.{STATE_TAIL}"),
            dist_git,
        ),
    ];
    for (pattern, handler) in pairs {
        db.register(&pattern, handler.clone() as Arc<dyn DbHandler>);
        index.register(&pattern, handler as Arc<dyn IndexHandler>);
    }

    db.register(
        r"\.errata_automation\.brew-build\.run\.finished$",
        errata.clone() as Arc<dyn DbHandler>,
    );
    index.register(
        r"\.errata_automation\.brew-build\.run\.finished$",
        errata as Arc<dyn IndexHandler>,
    );

    db.register(
        r"^VirtualTopic\.eng\.brew\.build\.tag$",
        brew_tag.clone() as Arc<dyn DbHandler>,
    );
    index.register(
        r"^VirtualTopic\.eng\.brew\.build\.tag$",
        brew_tag as Arc<dyn IndexHandler>,
    );

    db.register(
        r"^VirtualTopic\.eng\.brew\.build\.complete$",
        brew_complete.clone() as Arc<dyn DbHandler>,
    );
    index.register(
        r"^VirtualTopic\.eng\.brew\.build\.complete$",
        brew_complete as Arc<dyn IndexHandler>,
    );

    db.register(
        r"^org\.fedoraproject\.prod\.buildsys\.tag$",
        buildsys_fedora.clone() as Arc<dyn DbHandler>,
    );
    index.register(
        r"^org\.fedoraproject\.prod\.buildsys\.tag$",
        buildsys_fedora as Arc<dyn IndexHandler>,
    );
    db.register(
        r"^org\.centos\.prod\.buildsys\.tag$",
        buildsys_centos.clone() as Arc<dyn DbHandler>,
    );
    index.register(
        r"^org\.centos\.prod\.buildsys\.tag$",
        buildsys_centos as Arc<dyn IndexHandler>,
    );

    Registries { db, index }
}

/// Stringify an id field that may arrive as a number or a string.
pub(crate) fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A boolean that may arrive as a JSON bool or a "true"/"false" string.
pub(crate) fn loose_bool(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" | "True" => Some(true),
            "false" | "False" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Required string field, reported by its dotted name on failure.
pub(crate) fn required_str(value: &Value, pointer: &str) -> Result<String, KaijsError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            KaijsError::Validation(format!(
                "missing required field: {}",
                pointer.trim_start_matches('/').replace('/', ".")
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registries_cover_both_paths_identically() {
        let registries = registry();
        assert_eq!(registries.db.len(), registries.index.len());

        for topic in [
            "org.centos.prod.ci.koji-build.test.complete",
            "org.centos.prod.ci.fedora-module.test.error",
            "VirtualTopic.eng.ci.osci.brew-build.test.complete",
            "VirtualTopic.eng.ci.redhat-module.test.queued",
            "VirtualTopic.eng.ci.osci.productmd-compose.test.running",
            "VirtualTopic.eng.ci.osci.redhat-container-image.test.complete",
            "VirtualTopic.eng.ci.osci.dist-git-pr.test.complete",
            "VirtualTopic.eng.ci.errata_automation.brew-build.run.finished",
            "VirtualTopic.eng.brew.build.tag",
            "VirtualTopic.eng.brew.build.complete",
            "org.fedoraproject.prod.buildsys.tag",
            "org.centos.prod.buildsys.tag",
        ] {
            assert!(registries.db.lookup(topic).is_some(), "db misses {topic}");
            assert!(
                registries.index.lookup(topic).is_some(),
                "index misses {topic}"
            );
        }
    }

    #[test]
    fn unknown_topics_have_no_handler() {
        let registries = registry();
        assert!(registries
            .db
            .lookup("org.fedoraproject.prod.bodhi.update.request")
            .is_none());
        assert!(registries
            .db
            .lookup("VirtualTopic.eng.ci.osci.brew-build.test.started")
            .is_none());
    }

    #[test]
    fn id_string_accepts_numbers_and_strings() {
        assert_eq!(id_string(Some(&json!(111))), Some("111".to_string()));
        assert_eq!(id_string(Some(&json!("111"))), Some("111".to_string()));
        assert_eq!(id_string(Some(&json!(""))), None);
        assert_eq!(id_string(Some(&json!(null))), None);
        assert_eq!(id_string(None), None);
    }

    #[test]
    fn loose_bool_accepts_stringly_flags() {
        assert_eq!(loose_bool(Some(&json!(true))), Some(true));
        assert_eq!(loose_bool(Some(&json!("false"))), Some(false));
        assert_eq!(loose_bool(Some(&json!("yes"))), None);
    }
}
