//! CRUD operations for [`Group`] records and their membership entries.
//!
//! Membership mutations are compare-and-set transactions: they bump
//! `groups.revision` only when the caller's snapshot is still current and
//! report a stale snapshot as `Ok(false)`, leaving the engine to re-read
//! and retry.  This is what serializes concurrent admin actions on the
//! same group without a lock manager.

use rusqlite::{params, Transaction};
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{
    col_json, col_ts, col_uuid, col_uuid_opt, media_from_cols, Group, GroupMember,
    MembershipStatus,
};

const GROUP_COLS: &str = "id, name, description, countries, admin_id, is_private, image_url, \
                          image_path, linked_chat_id, revision, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Insert a new group record (no membership entries).
    pub fn create_group(&self, group: &Group) -> Result<()> {
        self.conn().execute(
            "INSERT INTO groups (id, name, description, countries, admin_id, is_private, \
             image_url, image_path, linked_chat_id, revision, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                group.id.to_string(),
                group.name,
                group.description,
                serde_json::to_string(&group.countries)?,
                group.admin_id.to_string(),
                group.is_private as i32,
                group.image.as_ref().map(|m| m.url.clone()),
                group.image.as_ref().and_then(|m| m.storage_path.clone()),
                group.linked_chat_id.map(|c| c.to_string()),
                group.revision,
                group.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single group by UUID.
    pub fn get_group(&self, id: Uuid) -> Result<Group> {
        self.conn()
            .query_row(
                &format!("SELECT {GROUP_COLS} FROM groups WHERE id = ?1"),
                params![id.to_string()],
                row_to_group,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// List every group, ordered by creation date.  Used by the repair pass.
    pub fn list_groups(&self) -> Result<Vec<Group>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {GROUP_COLS} FROM groups ORDER BY created_at ASC"))?;
        let rows = stmt.query_map([], row_to_group)?;
        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }
        Ok(groups)
    }

    /// Groups whose `admin_id` is `user`.  Used by the user-deletion closure
    /// to catch groups whose admin lost their membership entry.
    pub fn list_groups_administered_by(&self, user: Uuid) -> Result<Vec<Group>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {GROUP_COLS} FROM groups WHERE admin_id = ?1"))?;
        let rows = stmt.query_map(params![user.to_string()], row_to_group)?;
        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }
        Ok(groups)
    }

    /// Store (or clear) the cross-link to the mirror chat.
    pub fn set_group_linked_chat(&self, id: Uuid, chat_id: Option<Uuid>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE groups SET linked_chat_id = ?2 WHERE id = ?1",
            params![id.to_string(), chat_id.map(|c| c.to_string())],
        )?;
        Ok(affected > 0)
    }

    /// Delete a group together with its membership entries (they are part
    /// of the group document).  Returns `true` if the group existed.
    pub fn delete_group(&mut self, id: Uuid) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "DELETE FROM group_members WHERE group_id = ?1",
            params![id.to_string()],
        )?;
        let affected = tx.execute("DELETE FROM groups WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Membership entries (compare-and-set on groups.revision)
    // ------------------------------------------------------------------

    /// Fetch one membership entry.
    pub fn get_group_member(&self, group_id: Uuid, user_id: Uuid) -> Result<Option<GroupMember>> {
        match self.conn().query_row(
            "SELECT group_id, user_id, status, position FROM group_members
             WHERE group_id = ?1 AND user_id = ?2",
            params![group_id.to_string(), user_id.to_string()],
            row_to_group_member,
        ) {
            Ok(member) => Ok(Some(member)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    /// All membership entries of a group in join order.
    pub fn list_group_members(&self, group_id: Uuid) -> Result<Vec<GroupMember>> {
        let mut stmt = self.conn().prepare(
            "SELECT group_id, user_id, status, position FROM group_members
             WHERE group_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![group_id.to_string()], row_to_group_member)?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Every group membership entry of one user.
    pub fn list_group_memberships_for_user(&self, user_id: Uuid) -> Result<Vec<GroupMember>> {
        let mut stmt = self.conn().prepare(
            "SELECT group_id, user_id, status, position FROM group_members
             WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map(params![user_id.to_string()], row_to_group_member)?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Add a membership entry at the end of the join order.
    ///
    /// Returns `Ok(false)` without writing when `expected_rev` is stale.
    pub fn add_group_member(
        &mut self,
        group_id: Uuid,
        user_id: Uuid,
        status: MembershipStatus,
        expected_rev: i64,
    ) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        if !bump_group_revision(&tx, group_id, expected_rev)? {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO group_members (group_id, user_id, status, position)
             VALUES (?1, ?2, ?3,
                     (SELECT COALESCE(MAX(position), 0) + 1 FROM group_members WHERE group_id = ?1))",
            params![group_id.to_string(), user_id.to_string(), status.as_str()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Change the status of an existing membership entry.
    pub fn set_group_member_status(
        &mut self,
        group_id: Uuid,
        user_id: Uuid,
        status: MembershipStatus,
        expected_rev: i64,
    ) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        if !bump_group_revision(&tx, group_id, expected_rev)? {
            return Ok(false);
        }
        tx.execute(
            "UPDATE group_members SET status = ?3 WHERE group_id = ?1 AND user_id = ?2",
            params![group_id.to_string(), user_id.to_string(), status.as_str()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Remove a membership entry entirely (back to the `none` state).
    pub fn remove_group_member(
        &mut self,
        group_id: Uuid,
        user_id: Uuid,
        expected_rev: i64,
    ) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        if !bump_group_revision(&tx, group_id, expected_rev)? {
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group_id.to_string(), user_id.to_string()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Hand the admin role to `new_admin`, optionally removing a leaving
    /// member's entry in the same transaction.
    pub fn transfer_group_admin(
        &mut self,
        group_id: Uuid,
        new_admin: Uuid,
        remove_member: Option<Uuid>,
        expected_rev: i64,
    ) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        if !bump_group_revision(&tx, group_id, expected_rev)? {
            return Ok(false);
        }
        tx.execute(
            "UPDATE groups SET admin_id = ?2 WHERE id = ?1",
            params![group_id.to_string(), new_admin.to_string()],
        )?;
        if let Some(leaving) = remove_member {
            tx.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![group_id.to_string(), leaving.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }
}

/// Compare-and-bump of the group's revision counter; the caller rolls back
/// (by dropping the transaction) when the snapshot was stale.
fn bump_group_revision(tx: &Transaction<'_>, group_id: Uuid, expected: i64) -> Result<bool> {
    let affected = tx.execute(
        "UPDATE groups SET revision = revision + 1 WHERE id = ?1 AND revision = ?2",
        params![group_id.to_string(), expected],
    )?;
    Ok(affected > 0)
}

/// Map a `rusqlite::Row` to a [`Group`].
fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    let image_url: Option<String> = row.get(6)?;
    let image_path: Option<String> = row.get(7)?;
    let is_private: i32 = row.get(5)?;

    Ok(Group {
        id: col_uuid(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        countries: col_json(row, 3)?,
        admin_id: col_uuid(row, 4)?,
        is_private: is_private != 0,
        image: media_from_cols(image_url, image_path),
        linked_chat_id: col_uuid_opt(row, 8)?,
        revision: row.get(9)?,
        created_at: col_ts(row, 10)?,
    })
}

fn row_to_group_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupMember> {
    let status_str: String = row.get(2)?;
    let status = MembershipStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown membership status: {status_str}").into(),
        )
    })?;

    Ok(GroupMember {
        group_id: col_uuid(row, 0)?,
        user_id: col_uuid(row, 1)?,
        status,
        position: row.get(3)?,
    })
}
