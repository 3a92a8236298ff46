use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{col_ts, col_uuid, Comment};

impl Database {
    pub fn insert_comment(&self, comment: &Comment) -> Result<()> {
        self.conn().execute(
            "INSERT INTO comments (id, post_id, author_id, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                comment.id.to_string(),
                comment.post_id.to_string(),
                comment.author_id.to_string(),
                comment.text,
                comment.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_comment(&self, id: Uuid) -> Result<Comment> {
        self.conn()
            .query_row(
                "SELECT id, post_id, author_id, text, created_at
                 FROM comments WHERE id = ?1",
                params![id.to_string()],
                row_to_comment,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Comments of a post, oldest first.
    pub fn list_comments_for_post(&self, post_id: Uuid) -> Result<Vec<Comment>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, post_id, author_id, text, created_at
             FROM comments
             WHERE post_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![post_id.to_string()], row_to_comment)?;

        let mut comments = Vec::new();
        for row in rows {
            comments.push(row?);
        }
        Ok(comments)
    }

    pub fn delete_comment(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM comments WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    /// Drop every comment of a post.  Returns the number of rows removed.
    pub fn delete_comments_for_post(&self, post_id: Uuid) -> Result<u64> {
        let affected = self.conn().execute(
            "DELETE FROM comments WHERE post_id = ?1",
            params![post_id.to_string()],
        )?;
        Ok(affected as u64)
    }
}

fn row_to_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: col_uuid(row, 0)?,
        post_id: col_uuid(row, 1)?,
        author_id: col_uuid(row, 2)?,
        text: row.get(3)?,
        created_at: col_ts(row, 4)?,
    })
}
