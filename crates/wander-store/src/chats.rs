//! CRUD operations for [`Chat`] records, their member entries, and the
//! join-request queue of standalone group chats.
//!
//! Two families of member mutations exist on purpose:
//!
//! * compare-and-set helpers (`remove_chat_member`, `transfer_chat_admin`, ...)
//!   bump `chats.revision` and are used by the standalone-chat state
//!   machine, exactly like the group-side helpers in `groups.rs`;
//! * unversioned idempotent helpers (`insert_chat_member_if_absent`,
//!   `remove_chat_member_if_present`, `set_chat_admin`) are used by the
//!   group→chat mirror, where the group's own revision already serialized
//!   the transition and the chat side only has to converge.

use rusqlite::{params, Transaction};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{col_ts, col_uuid, col_uuid_opt, Chat, ChatMember, ChatRole, JoinRequest};

const CHAT_COLS: &str =
    "id, name, is_group, admin_id, linked_group_id, latest_message_id, revision, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Chats
    // ------------------------------------------------------------------

    /// Insert a new chat record (no member entries).
    pub fn create_chat(&self, chat: &Chat) -> Result<()> {
        self.conn().execute(
            "INSERT INTO chats (id, name, is_group, admin_id, linked_group_id, \
             latest_message_id, revision, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                chat.id.to_string(),
                chat.name,
                chat.is_group as i32,
                chat.admin_id.map(|u| u.to_string()),
                chat.linked_group_id.map(|g| g.to_string()),
                chat.latest_message_id.map(|m| m.to_string()),
                chat.revision,
                chat.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single chat by UUID.
    pub fn get_chat(&self, id: Uuid) -> Result<Chat> {
        self.conn()
            .query_row(
                &format!("SELECT {CHAT_COLS} FROM chats WHERE id = ?1"),
                params![id.to_string()],
                row_to_chat,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// The chat mirroring `group_id`, if one exists.
    ///
    /// Mirror operations always resolve the chat through this lookup rather
    /// than trusting `groups.linked_chat_id`, so a concurrently deleted
    /// chat degrades to a no-op instead of recreating the link.
    pub fn find_chat_by_linked_group(&self, group_id: Uuid) -> Result<Option<Chat>> {
        match self.conn().query_row(
            &format!("SELECT {CHAT_COLS} FROM chats WHERE linked_group_id = ?1"),
            params![group_id.to_string()],
            row_to_chat,
        ) {
            Ok(chat) => Ok(Some(chat)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    /// Find the direct (1:1) chat containing both users, if any.
    pub fn find_direct_chat_between(&self, a: Uuid, b: Uuid) -> Result<Option<Chat>> {
        match self.conn().query_row(
            &format!(
                "SELECT {CHAT_COLS} FROM chats
                 WHERE is_group = 0
                   AND EXISTS (SELECT 1 FROM chat_members
                               WHERE chat_id = chats.id AND user_id = ?1)
                   AND EXISTS (SELECT 1 FROM chat_members
                               WHERE chat_id = chats.id AND user_id = ?2)
                 LIMIT 1"
            ),
            params![a.to_string(), b.to_string()],
            row_to_chat,
        ) {
            Ok(chat) => Ok(Some(chat)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    /// All chats that claim to mirror a group.  Used by the repair pass.
    pub fn list_linked_chats(&self) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHAT_COLS} FROM chats WHERE linked_group_id IS NOT NULL"
        ))?;
        let rows = stmt.query_map([], row_to_chat)?;
        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    /// Update the denormalized latest-message pointer.
    pub fn set_latest_message(&self, chat_id: Uuid, message_id: Option<Uuid>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chats SET latest_message_id = ?2 WHERE id = ?1",
            params![chat_id.to_string(), message_id.map(|m| m.to_string())],
        )?;
        Ok(affected > 0)
    }

    /// Delete a chat together with its member entries and join requests.
    /// Returns `true` if the chat existed.
    pub fn delete_chat(&mut self, id: Uuid) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "DELETE FROM chat_members WHERE chat_id = ?1",
            params![id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM chat_join_requests WHERE chat_id = ?1",
            params![id.to_string()],
        )?;
        let affected = tx.execute("DELETE FROM chats WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Member entries — mirror side (idempotent, unversioned)
    // ------------------------------------------------------------------

    /// Set-add of a member entry.  Returns `true` when a row was inserted,
    /// `false` when the member already existed.
    pub fn insert_chat_member_if_absent(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        role: ChatRole,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO chat_members (chat_id, user_id, role, position)
             VALUES (?1, ?2, ?3,
                     (SELECT COALESCE(MAX(position), 0) + 1 FROM chat_members WHERE chat_id = ?1))",
            params![chat_id.to_string(), user_id.to_string(), role.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Set-remove of a member entry.  Removing an absent member is a no-op.
    pub fn remove_chat_member_if_present(&self, chat_id: Uuid, user_id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Two-step admin handoff on the chat side: demote the old admin's
    /// entry, upsert the new admin's entry with the admin role, and point
    /// `chats.admin_id` at the new admin, all in one transaction.
    pub fn set_chat_admin(
        &mut self,
        chat_id: Uuid,
        old_admin: Option<Uuid>,
        new_admin: Uuid,
    ) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        if let Some(old) = old_admin {
            tx.execute(
                "UPDATE chat_members SET role = 'member' WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id.to_string(), old.to_string()],
            )?;
        }
        tx.execute(
            "INSERT INTO chat_members (chat_id, user_id, role, position)
             VALUES (?1, ?2, 'admin',
                     (SELECT COALESCE(MAX(position), 0) + 1 FROM chat_members WHERE chat_id = ?1))
             ON CONFLICT(chat_id, user_id) DO UPDATE SET role = 'admin'",
            params![chat_id.to_string(), new_admin.to_string()],
        )?;
        let affected = tx.execute(
            "UPDATE chats SET admin_id = ?2 WHERE id = ?1",
            params![chat_id.to_string(), new_admin.to_string()],
        )?;
        tx.commit()?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Member entries — standalone chats (compare-and-set)
    // ------------------------------------------------------------------

    pub fn get_chat_member(&self, chat_id: Uuid, user_id: Uuid) -> Result<Option<ChatMember>> {
        match self.conn().query_row(
            "SELECT chat_id, user_id, role, position FROM chat_members
             WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string()],
            row_to_chat_member,
        ) {
            Ok(member) => Ok(Some(member)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    /// All member entries of a chat in join order.
    pub fn list_chat_members(&self, chat_id: Uuid) -> Result<Vec<ChatMember>> {
        let mut stmt = self.conn().prepare(
            "SELECT chat_id, user_id, role, position FROM chat_members
             WHERE chat_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![chat_id.to_string()], row_to_chat_member)?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Every chat membership entry of one user.
    pub fn list_chat_memberships_for_user(&self, user_id: Uuid) -> Result<Vec<ChatMember>> {
        let mut stmt = self.conn().prepare(
            "SELECT chat_id, user_id, role, position FROM chat_members WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map(params![user_id.to_string()], row_to_chat_member)?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Remove a member entry, guarded by the chat's revision.
    pub fn remove_chat_member(
        &mut self,
        chat_id: Uuid,
        user_id: Uuid,
        expected_rev: i64,
    ) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        if !bump_chat_revision(&tx, chat_id, expected_rev)? {
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Hand the admin role to `new_admin`, optionally removing a leaving
    /// member's entry, guarded by the chat's revision.
    pub fn transfer_chat_admin(
        &mut self,
        chat_id: Uuid,
        new_admin: Uuid,
        remove_member: Option<Uuid>,
        expected_rev: i64,
    ) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        if !bump_chat_revision(&tx, chat_id, expected_rev)? {
            return Ok(false);
        }
        tx.execute(
            "UPDATE chat_members SET role = 'member' WHERE chat_id = ?1 AND role = 'admin'",
            params![chat_id.to_string()],
        )?;
        tx.execute(
            "UPDATE chat_members SET role = 'admin' WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), new_admin.to_string()],
        )?;
        tx.execute(
            "UPDATE chats SET admin_id = ?2 WHERE id = ?1",
            params![chat_id.to_string(), new_admin.to_string()],
        )?;
        if let Some(leaving) = remove_member {
            tx.execute(
                "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id.to_string(), leaving.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Join requests (standalone group chats)
    // ------------------------------------------------------------------

    pub fn get_chat_join_request(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<JoinRequest>> {
        match self.conn().query_row(
            "SELECT chat_id, user_id, message, created_at FROM chat_join_requests
             WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string()],
            row_to_join_request,
        ) {
            Ok(req) => Ok(Some(req)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    /// Pending join requests of a chat, oldest first.
    pub fn list_chat_join_requests(&self, chat_id: Uuid) -> Result<Vec<JoinRequest>> {
        let mut stmt = self.conn().prepare(
            "SELECT chat_id, user_id, message, created_at FROM chat_join_requests
             WHERE chat_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![chat_id.to_string()], row_to_join_request)?;
        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    /// Queue a join request, guarded by the chat's revision.
    pub fn add_chat_join_request(&mut self, request: &JoinRequest, expected_rev: i64) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        if !bump_chat_revision(&tx, request.chat_id, expected_rev)? {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO chat_join_requests (chat_id, user_id, message, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                request.chat_id.to_string(),
                request.user_id.to_string(),
                request.message,
                request.created_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Drop a join request (rejection), guarded by the chat's revision.
    pub fn remove_chat_join_request(
        &mut self,
        chat_id: Uuid,
        user_id: Uuid,
        expected_rev: i64,
    ) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        if !bump_chat_revision(&tx, chat_id, expected_rev)? {
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM chat_join_requests WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Approve a join request: the request row becomes a member entry in
    /// one transaction, guarded by the chat's revision.
    pub fn approve_chat_join_request(
        &mut self,
        chat_id: Uuid,
        user_id: Uuid,
        expected_rev: i64,
    ) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        if !bump_chat_revision(&tx, chat_id, expected_rev)? {
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM chat_join_requests WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.to_string(), user_id.to_string()],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO chat_members (chat_id, user_id, role, position)
             VALUES (?1, ?2, 'member',
                     (SELECT COALESCE(MAX(position), 0) + 1 FROM chat_members WHERE chat_id = ?1))",
            params![chat_id.to_string(), user_id.to_string()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Drop every pending join request filed by `user`.  Used by the
    /// user-deletion closure.
    pub fn delete_chat_join_requests_for_user(&self, user_id: Uuid) -> Result<u64> {
        let affected = self.conn().execute(
            "DELETE FROM chat_join_requests WHERE user_id = ?1",
            params![user_id.to_string()],
        )?;
        Ok(affected as u64)
    }
}

/// Compare-and-bump of the chat's revision counter.
fn bump_chat_revision(tx: &Transaction<'_>, chat_id: Uuid, expected: i64) -> Result<bool> {
    let affected = tx.execute(
        "UPDATE chats SET revision = revision + 1 WHERE id = ?1 AND revision = ?2",
        params![chat_id.to_string(), expected],
    )?;
    Ok(affected > 0)
}

/// Map a `rusqlite::Row` to a [`Chat`].
fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let is_group: i32 = row.get(2)?;

    Ok(Chat {
        id: col_uuid(row, 0)?,
        name: row.get(1)?,
        is_group: is_group != 0,
        admin_id: col_uuid_opt(row, 3)?,
        linked_group_id: col_uuid_opt(row, 4)?,
        latest_message_id: col_uuid_opt(row, 5)?,
        revision: row.get(6)?,
        created_at: col_ts(row, 7)?,
    })
}

fn row_to_chat_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMember> {
    let role_str: String = row.get(2)?;
    let role = ChatRole::parse(&role_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown chat role: {role_str}").into(),
        )
    })?;

    Ok(ChatMember {
        chat_id: col_uuid(row, 0)?,
        user_id: col_uuid(row, 1)?,
        role,
        position: row.get(3)?,
    })
}

fn row_to_join_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<JoinRequest> {
    Ok(JoinRequest {
        chat_id: col_uuid(row, 0)?,
        user_id: col_uuid(row, 1)?,
        message: row.get(2)?,
        created_at: col_ts(row, 3)?,
    })
}
