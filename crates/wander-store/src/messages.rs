use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{col_ts, col_uuid, Message};

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                message.sender_id.to_string(),
                message.content,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                "SELECT id, chat_id, sender_id, content, created_at
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn list_messages_for_chat(
        &self,
        chat_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, chat_id, sender_id, content, created_at
             FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map(params![chat_id.to_string(), limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Id of the most recent message in a chat, for repairing the
    /// denormalized preview pointer.
    pub fn latest_message_id_for_chat(&self, chat_id: Uuid) -> Result<Option<Uuid>> {
        match self.conn().query_row(
            "SELECT id FROM messages WHERE chat_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            params![chat_id.to_string()],
            |row| col_uuid(row, 0),
        ) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    pub fn delete_message(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Drop every message of a chat.  Returns the number of rows removed.
    pub fn delete_messages_for_chat(&self, chat_id: Uuid) -> Result<u64> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE chat_id = ?1",
            params![chat_id.to_string()],
        )?;
        Ok(affected as u64)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: col_uuid(row, 0)?,
        chat_id: col_uuid(row, 1)?,
        sender_id: col_uuid(row, 2)?,
        content: row.get(3)?,
        created_at: col_ts(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn latest_message_follows_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("t.db")).unwrap();

        let chat = crate::models::Chat {
            id: Uuid::new_v4(),
            name: None,
            is_group: false,
            admin_id: None,
            linked_group_id: None,
            latest_message_id: None,
            revision: 0,
            created_at: Utc::now(),
        };
        db.create_chat(&chat).unwrap();

        let sender = Uuid::new_v4();
        let old = Message {
            id: Uuid::new_v4(),
            chat_id: chat.id,
            sender_id: sender,
            content: "first".to_string(),
            created_at: Utc::now() - Duration::minutes(5),
        };
        let new = Message {
            id: Uuid::new_v4(),
            chat_id: chat.id,
            sender_id: sender,
            content: "second".to_string(),
            created_at: Utc::now(),
        };
        db.insert_message(&old).unwrap();
        db.insert_message(&new).unwrap();

        assert_eq!(db.latest_message_id_for_chat(chat.id).unwrap(), Some(new.id));

        db.delete_message(new.id).unwrap();
        assert_eq!(db.latest_message_id_for_chat(chat.id).unwrap(), Some(old.id));

        assert_eq!(db.delete_messages_for_chat(chat.id).unwrap(), 1);
        assert_eq!(db.latest_message_id_for_chat(chat.id).unwrap(), None);
    }
}
