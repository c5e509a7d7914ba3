//! Schema catalog and message validation.
//!
//! The catalog maintains a bare mirror of the schemas Git repository and
//! resolves `(version_tag, path)` to a compiled draft-07 validator. The
//! validator applies the strict path for message versions >= 1.0 and a
//! relaxed declarative path for versions below, plus a registry of shapes
//! for non-CI topics.

pub mod catalog;
pub mod relaxed;
pub mod special;
pub mod validate;

pub use catalog::SchemaCatalog;
pub use validate::Validator;
