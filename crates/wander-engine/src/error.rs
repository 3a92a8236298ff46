use thiserror::Error;

use wander_media::MediaError;
use wander_store::StoreError;

/// Error taxonomy of the engine.  The transport layer maps the first four
/// variants to 4xx responses; `ExternalDependency` during deletion is
/// downgraded to a warning before it ever reaches a caller.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Entity or membership entry absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller lacks admin/ownership rights for the attempted mutation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Duplicate membership/join-request, duplicate unique field, or a
    /// transition that lost against concurrent writers too many times.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed or self-contradictory input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The blob store (or another external collaborator) failed.
    #[error("External dependency failure: {0}")]
    ExternalDependency(String),

    /// Stored data violates one of its own invariants (e.g. a chat whose
    /// linked group no longer exists).  Operations log these and proceed
    /// best-effort on the entity actually found; only unrecoverable cases
    /// surface.
    #[error("Internal inconsistency: {0}")]
    Inconsistency(String),

    /// Store-level failure that maps to no taxonomy entry.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => EngineError::NotFound("record not found".to_string()),
            other => EngineError::Store(other),
        }
    }
}

impl From<MediaError> for EngineError {
    fn from(e: MediaError) -> Self {
        EngineError::ExternalDependency(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
