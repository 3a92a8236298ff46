//! Event payloads emitted by the engine for realtime fan-out.
//!
//! The engine decides *what* to emit and *when*; delivery to connected
//! clients is the job of an external collaborator that consumes these from
//! a channel.  Everything here is fire-and-forget from the engine's point
//! of view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which collection an event refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Group,
    Chat,
    Post,
    Comment,
    Message,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Group => "group",
            EntityKind::Chat => "chat",
            EntityKind::Post => "post",
            EntityKind::Comment => "comment",
            EntityKind::Message => "message",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a membership snapshot: the user plus their status (group
/// side) or role (chat side), already stringified for the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberSummary {
    pub user_id: Uuid,
    pub state: String,
}

/// An event handed to the realtime delivery layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// A group's or chat's member list changed; carries the new snapshot.
    MembershipChanged {
        entity: EntityKind,
        id: Uuid,
        members: Vec<MemberSummary>,
    },
    /// An entity was deleted (root of a cascade or an individual record).
    EntityDeleted { entity: EntityKind, id: Uuid },
    /// A message was created and should be pushed to the chat's members.
    MessageCreated {
        message_id: Uuid,
        chat_id: Uuid,
        sender_id: Uuid,
        content: String,
        sent_at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_tag() {
        let ev = RealtimeEvent::EntityDeleted {
            entity: EntityKind::Group,
            id: Uuid::new_v4(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"entity_deleted\""));
        assert!(json.contains("\"entity\":\"group\""));
    }
}
