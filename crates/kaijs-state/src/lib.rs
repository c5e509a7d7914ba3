//! Storage abstractions and backends for kaijs.
//!
//! The pipeline core speaks two traits:
//!
//! - `ArtifactStore`: per-artifact document aggregation with
//!   find-and-modify semantics (the post-image of every update is
//!   returned), plus the invalid-message and raw-message sinks.
//! - `SearchIndex`: bulk parent/child document upserts.
//!
//! In-memory fakes satisfy both contracts for tests; `SurrealArtifactStore`
//! is the production document-DB backend.

mod error;
pub mod fakes;
pub mod paths;
mod storage_traits;
mod surreal_artifacts;

pub use error::StateError;
pub use storage_traits::{
    ArtifactStore, IndexUpdate, InvalidRecord, SearchIndex, UpdateOutcome, UpdateSet,
    INVALID_RECORD_TTL_DAYS, MAX_DOCUMENT_BYTES,
};
pub use surreal_artifacts::SurrealArtifactStore;

/// Result type for storage operations.
pub type StateResult<T> = std::result::Result<T, StateError>;
