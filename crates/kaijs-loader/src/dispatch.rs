//! Regex-keyed registries.
//!
//! Both dispatch decisions in the loader are ordered first-match lookups:
//! topic to handler, and message version to payload transform. Registration
//! order is the specificity order: subgroup patterns must be registered
//! before catch-alls, and the design deliberately depends on it.

use std::sync::Arc;

use kaijs_domain::{KaijsError, SpoolMessage};
use regex::Regex;
use serde_json::Value;

/// Ordered `(topic pattern, handler)` registry; first match wins.
pub struct DispatchRegistry<H: ?Sized> {
    entries: Vec<(Regex, Arc<H>)>,
}

impl<H: ?Sized> Default for DispatchRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ?Sized> DispatchRegistry<H> {
    pub fn new() -> Self {
        DispatchRegistry {
            entries: Vec::new(),
        }
    }

    /// Append an entry. Panics on an invalid pattern: registries are built
    /// once at startup from static patterns.
    pub fn register(&mut self, pattern: &str, handler: Arc<H>) {
        let regex = Regex::new(pattern)
            .unwrap_or_else(|err| panic!("invalid dispatch pattern {pattern}: {err}"));
        self.entries.push((regex, handler));
    }

    /// The handler of the first matching pattern, if any.
    pub fn lookup(&self, topic: &str) -> Option<Arc<H>> {
        self.entries
            .iter()
            .find(|(pattern, _)| pattern.is_match(topic))
            .map(|(_, handler)| Arc::clone(handler))
    }

    /// Like `lookup`, but a miss is a `NoAssociatedHandler` error.
    pub fn dispatch(&self, topic: &str) -> Result<Arc<H>, KaijsError> {
        self.lookup(topic)
            .ok_or_else(|| KaijsError::NoAssociatedHandler(topic.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A payload transform: envelope in, extracted payload out.
pub type Transform = fn(&SpoolMessage) -> Result<Value, KaijsError>;

/// Ordered `(version pattern, transform)` registry; first match wins.
/// Handlers register a catch-all `.*` mapping to the V1 transform last.
pub struct TransformRegistry {
    entries: Vec<(Regex, Transform)>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformRegistry {
    pub fn new() -> Self {
        TransformRegistry {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, pattern: &str, transform: Transform) -> &mut Self {
        let regex = Regex::new(pattern)
            .unwrap_or_else(|err| panic!("invalid version pattern {pattern}: {err}"));
        self.entries.push((regex, transform));
        self
    }

    /// The transform for a message version.
    pub fn for_version(&self, version: &str) -> Result<Transform, KaijsError> {
        self.entries
            .iter()
            .find(|(pattern, _)| pattern.is_match(version))
            .map(|(_, transform)| *transform)
            .ok_or_else(|| {
                KaijsError::NoValidationSchema(format!("no transform for version {version}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    trait Named: Send + Sync {
        fn name(&self) -> &'static str;
    }

    struct Fixed(&'static str);
    impl Named for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }
    }

    fn registry() -> DispatchRegistry<dyn Named> {
        let mut registry: DispatchRegistry<dyn Named> = DispatchRegistry::new();
        registry.register(
            r"^org\.centos\.prod\.ci\.koji-build\.test\.",
            Arc::new(Fixed("koji-cs")),
        );
        registry.register(r"\.ci\..*\.brew-build\.test\.", Arc::new(Fixed("brew")));
        registry
    }

    #[test]
    fn first_match_wins_in_registration_order() {
        let registry = registry();
        let handler = registry
            .lookup("org.centos.prod.ci.koji-build.test.complete")
            .unwrap();
        assert_eq!(handler.name(), "koji-cs");

        let handler = registry
            .lookup("VirtualTopic.eng.ci.osci.brew-build.test.complete")
            .unwrap();
        assert_eq!(handler.name(), "brew");
    }

    #[test]
    fn unmatched_topic_is_no_associated_handler() {
        let registry = registry();
        assert!(matches!(
            registry.dispatch("org.fedoraproject.prod.bodhi.update"),
            Err(KaijsError::NoAssociatedHandler(_))
        ));
    }

    fn t_v0(_: &SpoolMessage) -> Result<Value, KaijsError> {
        Ok(json!("v0"))
    }
    fn t_v1(_: &SpoolMessage) -> Result<Value, KaijsError> {
        Ok(json!("v1"))
    }

    #[test]
    fn version_registry_prefers_specific_over_catch_all() {
        let mut transforms = TransformRegistry::new();
        transforms.register(r"^0\.", t_v0).register(r"^.*$", t_v1);

        let env = SpoolMessage::new_at(0, "p", "m", "a.b", json!({}), json!({}), None);
        assert_eq!(transforms.for_version("0.1.0").unwrap()(&env).unwrap(), json!("v0"));
        assert_eq!(transforms.for_version("1.1.14").unwrap()(&env).unwrap(), json!("v1"));
    }
}
