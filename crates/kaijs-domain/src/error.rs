//! Error taxonomy for the kaijs pipeline.
//!
//! Every failure the loader can observe maps to one `KaijsError` variant, and
//! every variant maps to exactly one `Disposition`. The loop never decides
//! ad hoc what to do with a failed envelope: it asks `Disposition::of`.

/// Errors surfaced by validation, dispatch, transformation and persistence.
#[derive(Debug, thiserror::Error)]
pub enum KaijsError {
    /// The envelope popped from the spool does not have the required shape.
    #[error("envelope shape violation: {0}")]
    EnvelopeShape(String),

    /// A CI-topic message is missing 'version' in its body (or it is empty).
    #[error("missing 'version' in message body: {0}")]
    WrongVersion(String),

    /// No schema is registered for the message's topic.
    #[error("no validation schema matches topic {0}")]
    NoValidationSchema(String),

    /// The message body failed schema validation (strict or relaxed).
    #[error("validation failed: {0}")]
    Validation(String),

    /// No entry in the dispatch registry matches the topic.
    #[error("no associated handler for topic {0}")]
    NoAssociatedHandler(String),

    /// The handler inspected the message and declined it (not an error).
    #[error("no need to process: {0}")]
    NoNeedToProcess(String),

    /// No thread-id anchor could be derived from the body.
    #[error("cannot derive thread id: {0}")]
    NoThreadId(String),

    /// The artifact document exceeds the 16 MiB storage limit.
    #[error("document exceeds 16 MiB limit: {size} bytes")]
    ToLargeDocument { size: usize },

    /// The optimistic-concurrency update loop ran out of attempts.
    #[error("update conflict not resolved after {attempts} attempts for {atype}/{aid}")]
    UpdateConflictExhausted {
        attempts: u32,
        atype: String,
        aid: String,
    },

    /// A datastore operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A bulk flush to the search index failed; the whole batch rolls back.
    #[error("bulk index flush failed: {0}")]
    BulkFlush(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the loader loop does with the envelope after a handler outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Commit the envelope; its effects are durable.
    Commit,
    /// Commit the envelope after recording it in the invalid sink.
    CommitInvalid,
    /// Commit the envelope silently; no sink record.
    CommitSilent,
    /// Roll the envelope back and terminate the process.
    Fatal,
}

impl Disposition {
    /// Classify an error per the failure policy table.
    pub fn of(err: &KaijsError) -> Disposition {
        match err {
            KaijsError::EnvelopeShape(_) => Disposition::Commit,
            KaijsError::WrongVersion(_)
            | KaijsError::NoValidationSchema(_)
            | KaijsError::Validation(_)
            | KaijsError::NoAssociatedHandler(_)
            | KaijsError::NoThreadId(_)
            | KaijsError::ToLargeDocument { .. } => Disposition::CommitInvalid,
            KaijsError::NoNeedToProcess(_) => Disposition::CommitSilent,
            KaijsError::UpdateConflictExhausted { .. }
            | KaijsError::Storage(_)
            | KaijsError::BulkFlush(_)
            | KaijsError::Io(_) => Disposition::Fatal,
            KaijsError::Serialization(_) => Disposition::CommitInvalid,
        }
    }
}
