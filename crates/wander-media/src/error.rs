use thiserror::Error;

/// Errors produced by the media gateway.
#[derive(Error, Debug)]
pub enum MediaError {
    /// The storage backend failed (I/O, permissions, ...).
    #[error("Blob storage error: {0}")]
    Storage(String),

    /// A storage path tried to escape the gateway's base directory.
    #[error("Invalid blob path: {0}")]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, MediaError>;
