//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the transport layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wander_shared::MediaRef;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user.  Identity verification happens upstream; the store
/// only records the external-auth UID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Unique user identifier.
    pub id: Uuid,
    /// UID assigned by the external identity provider.
    pub auth_uid: String,
    pub full_name: Option<String>,
    /// Unique e-mail address.
    pub email: String,
    pub birth_date: Option<DateTime<Utc>>,
    /// cca3 code of the user's home country.
    pub origin_country: Option<String>,
    pub gender: Option<String>,
    /// Profile picture, if any.
    pub profile_image: Option<MediaRef>,
    /// cca3 codes of countries the user has visited.
    pub visited_countries: Vec<String>,
    /// cca3 codes of countries on the user's wishlist.
    pub wishlist_countries: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// Membership state of a user within a group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    /// Invited by the admin, awaiting the user's response.
    Pending,
    /// Requested to join, awaiting the admin's response.
    PendingApproval,
    /// Full member.
    Approved,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Pending => "pending",
            MembershipStatus::PendingApproval => "pending_approval",
            MembershipStatus::Approved => "approved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MembershipStatus::Pending),
            "pending_approval" => Some(MembershipStatus::PendingApproval),
            "approved" => Some(MembershipStatus::Approved),
            _ => None,
        }
    }
}

/// A travel group.  Created together with its linked group chat; the
/// `linked_chat_id` cross-link is denormalized state that the repair pass
/// can reconcile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// cca3 codes of the countries the group is about.
    pub countries: Vec<String>,
    /// The single group admin.  Always present in `group_members` with
    /// status `approved`.
    pub admin_id: Uuid,
    pub is_private: bool,
    /// Group picture, if any.
    pub image: Option<MediaRef>,
    /// The 1:1 linked group chat, once the creation handshake completed.
    pub linked_chat_id: Option<Uuid>,
    /// Optimistic-concurrency counter, bumped by every membership mutation.
    pub revision: i64,
    pub created_at: DateTime<Utc>,
}

/// One membership entry of a group, keyed `(group_id, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMember {
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub status: MembershipStatus,
    /// Join order within the group; drives deterministic admin handoff.
    pub position: i64,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Role of a chat member.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    Admin,
    Member,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::Admin => "admin",
            ChatRole::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(ChatRole::Admin),
            "member" => Some(ChatRole::Member),
            _ => None,
        }
    }
}

/// A conversation: either a direct (1:1) chat, a standalone group chat, or
/// the mirror chat linked to a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: Uuid,
    /// Display name; direct chats have none.
    pub name: Option<String>,
    pub is_group: bool,
    /// Exactly one member holds the admin role in a group chat; direct
    /// chats have no admin.
    pub admin_id: Option<Uuid>,
    /// Set when this chat mirrors a group (inverse of `Group::linked_chat_id`).
    pub linked_group_id: Option<Uuid>,
    /// Denormalized pointer to the most recent message, for list previews.
    pub latest_message_id: Option<Uuid>,
    /// Optimistic-concurrency counter, bumped by every membership mutation.
    pub revision: i64,
    pub created_at: DateTime<Utc>,
}

/// One member entry of a chat, keyed `(chat_id, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMember {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub role: ChatRole,
    pub position: i64,
}

/// A pending join request on a standalone group chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRequest {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    /// Free-form note the requester attached.
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Post & Comment
// ---------------------------------------------------------------------------

/// A feed post.  `group_id == None` means a personal/public post; `Some`
/// scopes the post to a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub text: String,
    pub group_id: Option<Uuid>,
    /// Attached media blobs, owned by this post.
    pub media: Vec<MediaRef>,
    /// cca3 codes tagged on the post.
    pub tagged_countries: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A comment on a post.  Always destroyed together with its parent post.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Row-mapping helpers shared by the per-collection CRUD files
// ---------------------------------------------------------------------------

pub(crate) fn col_uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn col_uuid_opt(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        Uuid::parse_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

pub(crate) fn col_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn col_ts_opt(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    })
    .transpose()
}

/// Decode a JSON-encoded list column (country codes, media descriptors).
pub(crate) fn col_json<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Build an `Option<MediaRef>` out of a nullable url/path column pair.
pub(crate) fn media_from_cols(url: Option<String>, path: Option<String>) -> Option<MediaRef> {
    url.map(|url| MediaRef { url, storage_path: path })
}
