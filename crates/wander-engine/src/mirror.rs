//! Mirroring of group membership into the linked group chat.
//!
//! Whenever a group mutation changes the approved member set or the admin,
//! the equivalent mutation is applied to the linked chat.  The mirror never
//! creates or deletes chat documents, and it always resolves the chat by a
//! `linked_group_id` lookup at mirror time: when the chat was concurrently
//! deleted, the mirror degrades to a no-op and the dangling link is left
//! for the repair pass, with the group's own state staying authoritative.

use tracing::debug;
use uuid::Uuid;

use wander_media::MediaGateway;
use wander_store::{Chat, ChatRole, Group};

use crate::error::Result;
use crate::Engine;

impl<G: MediaGateway> Engine<G> {
    /// Chat mirroring `group`, if it still exists.
    fn mirror_target(&self, group: &Group) -> Result<Option<Chat>> {
        let chat = self.db()?.find_chat_by_linked_group(group.id)?;
        if chat.is_none() {
            debug!(group = %group.id, "no linked chat found; mirror is a no-op");
        }
        Ok(chat)
    }

    /// Add a newly approved group member to the linked chat.  Idempotent.
    pub(crate) fn mirror_member_added(&self, group: &Group, user_id: Uuid) -> Result<()> {
        let Some(chat) = self.mirror_target(group)? else {
            return Ok(());
        };
        self.db()?
            .insert_chat_member_if_absent(chat.id, user_id, ChatRole::Member)?;
        Ok(())
    }

    /// Remove a departed group member from the linked chat.  Idempotent.
    pub(crate) fn mirror_member_removed(&self, group: &Group, user_id: Uuid) -> Result<()> {
        let Some(chat) = self.mirror_target(group)? else {
            return Ok(());
        };
        self.db()?.remove_chat_member_if_present(chat.id, user_id)?;
        Ok(())
    }

    /// Replay an admin handoff onto the linked chat: demote the old admin's
    /// entry, promote (or insert) the new admin's entry.
    pub(crate) fn mirror_admin_transferred(
        &self,
        group: &Group,
        old_admin: Uuid,
        new_admin: Uuid,
    ) -> Result<()> {
        let Some(chat) = self.mirror_target(group)? else {
            return Ok(());
        };
        self.db()?
            .set_chat_admin(chat.id, Some(old_admin), new_admin)?;
        Ok(())
    }
}
