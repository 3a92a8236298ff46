//! # wander-store
//!
//! Persistent entity store for the Wander backend, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! collection.  Membership rows are keyed `(entity_id, user_id)` so the
//! engine's state-machine preconditions are O(1) lookups, and the `groups`
//! and `chats` tables carry a `revision` counter that every membership
//! mutation compare-and-bumps inside a transaction.

pub mod chats;
pub mod comments;
pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod posts;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
