//! # wander-engine
//!
//! The membership & cascading-consistency core of the Wander backend.
//!
//! This crate owns the rules that the thin request/response layer above it
//! must never reimplement:
//!
//! - **Membership state machine** ([`membership`], [`chats`]): invite /
//!   request / approve / reject / remove / leave transitions for groups and
//!   for standalone group chats, serialized per entity by optimistic
//!   revision checks.
//! - **Linked-chat mirror** ([`mirror`]): every approved-set or admin
//!   change on a group is replayed onto the linked chat's member list.
//! - **Cascading deletion coordinator** ([`deletion`]): deletes a group,
//!   chat, post, or user together with every record and media blob that
//!   would otherwise dangle.
//! - **Repair pass** ([`repair`]): reconciles the group↔chat cross-links
//!   after a crashed creation handshake or a half-applied mirror.
//!
//! All operations re-read current state before acting; nothing is cached in
//! memory.  A failure aborts the remaining steps of one request but never
//! rolls back committed ones; every step is idempotent so a client retry
//! converges.

use std::sync::{Arc, Mutex, MutexGuard};

use wander_media::MediaGateway;
use wander_store::Database;

pub mod chats;
pub mod deletion;
pub mod membership;
pub mod notify;
pub mod repair;
pub mod social;

mod error;
mod mirror;

#[cfg(test)]
pub(crate) mod testutil;

pub use chats::{ChatLeaveOutcome, NewGroupChat};
pub use deletion::{BlobFailure, DeletionSummary};
pub use error::{EngineError, Result};
pub use membership::{next_admin, InviteResponse, LeaveOutcome, NewGroup, RequestDecision};
pub use notify::Notifier;
pub use repair::RepairReport;
pub use social::{NewPost, NewUser};

/// How many times a membership transition is retried when its revision
/// check loses against a concurrent writer.
pub(crate) const MAX_TRANSITION_RETRIES: usize = 4;

/// The backend core.  One instance is shared by all concurrent requests.
///
/// Operations lock the store only for individual reads/writes and never
/// across an await point; cross-step consistency comes from the per-entity
/// revision counters, not from the lock.
pub struct Engine<G: MediaGateway> {
    db: Arc<Mutex<Database>>,
    media: Arc<G>,
    notifier: Notifier,
}

impl<G: MediaGateway> Engine<G> {
    pub fn new(db: Database, media: G, notifier: Notifier) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            media: Arc::new(media),
            notifier,
        }
    }

    /// Lock the store for a short sequence of statements.
    pub(crate) fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| EngineError::Inconsistency("store lock poisoned".to_string()))
    }

    pub fn media(&self) -> &G {
        &self.media
    }
}
