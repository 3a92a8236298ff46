//! # wander-media
//!
//! Gateway to the external blob store that holds post media, profile
//! pictures, and group pictures.
//!
//! The store is fallible and only best-effort from the engine's point of
//! view: deleting a blob that is already gone is a success, and a failed
//! deletion must never block deletion of the record that referenced it.
//! The engine depends on the [`MediaGateway`] trait; [`FsMediaGateway`] is
//! the filesystem-backed implementation.

mod error;
mod gateway;

pub use error::MediaError;
pub use gateway::{FsMediaGateway, MediaGateway};
