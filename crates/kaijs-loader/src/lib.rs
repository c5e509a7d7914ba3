//! The kaijs loader.
//!
//! Consumes envelopes from the on-disk spool in a strict serial loop:
//! pop, validate, dispatch, transform, write, commit-or-rollback. Two write
//! paths exist behind one dispatch mechanism: the document-DB path
//! aggregates per-artifact state under optimistic concurrency, and the
//! search-index path batches parent/child upserts into bulk requests.

pub mod config;
pub mod db_writer;
pub mod dispatch;
pub mod handlers;
pub mod index_writer;
pub mod koji;
pub mod run;

pub use config::LoaderConfig;
pub use dispatch::{DispatchRegistry, TransformRegistry};
pub use handlers::HandlerContext;
pub use run::{Loader, WriterMode};
