//! Domain model for the kaijs CI-message pipeline.
//!
//! Everything that crosses a process boundary in kaijs is defined here:
//!
//! - `SpoolMessage`: the envelope written to the on-disk spool by a listener
//!   and consumed by the loader.
//! - `ArtifactType` / `ArtifactDocument`: the artifact-centric aggregation
//!   model persisted to the document DB, one document per `(type, aid)`.
//! - `KaiState`: one observed broker message, appended to `states[]` and
//!   deduplicated by broker message id.
//! - Searchable projections: the flat parent/child views stored in the
//!   search index.
//! - The error taxonomy and the commit/rollback disposition of each error.

pub mod artifact;
pub mod document;
pub mod envelope;
pub mod error;
pub mod searchable;
pub mod state;
pub mod thread_id;

pub use artifact::{ArtifactType, PayloadSlot};
pub use document::{ArtifactDocument, ArtifactState, KaiState, Origin};
pub use envelope::SpoolMessage;
pub use error::{Disposition, KaijsError};
pub use searchable::{child_doc, parent_doc, parent_doc_id, Searchable};
pub use state::{make_state, stage_state_from_topic, test_case_name, Stage, StateName};
pub use thread_id::derive_thread_id;

/// Result type for kaijs domain operations.
pub type Result<T> = std::result::Result<T, KaijsError>;
