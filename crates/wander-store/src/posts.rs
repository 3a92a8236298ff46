//! CRUD operations for [`Post`] records and their like sets.

use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{col_json, col_ts, col_uuid, col_uuid_opt, Post};

const POST_COLS: &str = "id, author_id, text, group_id, media, tagged_countries, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Posts
    // ------------------------------------------------------------------

    /// Insert a new post.
    pub fn create_post(&self, post: &Post) -> Result<()> {
        self.conn().execute(
            "INSERT INTO posts (id, author_id, text, group_id, media, tagged_countries, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                post.id.to_string(),
                post.author_id.to_string(),
                post.text,
                post.group_id.map(|g| g.to_string()),
                serde_json::to_string(&post.media)?,
                serde_json::to_string(&post.tagged_countries)?,
                post.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single post by UUID.
    pub fn get_post(&self, id: Uuid) -> Result<Post> {
        self.conn()
            .query_row(
                &format!("SELECT {POST_COLS} FROM posts WHERE id = ?1"),
                params![id.to_string()],
                row_to_post,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Posts scoped to a group, newest first.
    pub fn list_posts_for_group(&self, group_id: Uuid) -> Result<Vec<Post>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {POST_COLS} FROM posts WHERE group_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![group_id.to_string()], row_to_post)?;
        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    /// All posts written by `author`, newest first.
    pub fn list_posts_by_author(&self, author_id: Uuid) -> Result<Vec<Post>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {POST_COLS} FROM posts WHERE author_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![author_id.to_string()], row_to_post)?;
        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    /// Delete a post together with its like set (part of the post document).
    /// Returns `true` if the post existed.  Comments are counted and removed
    /// separately by the deletion coordinator.
    pub fn delete_post(&mut self, id: Uuid) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "DELETE FROM post_likes WHERE post_id = ?1",
            params![id.to_string()],
        )?;
        let affected = tx.execute("DELETE FROM posts WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Likes
    // ------------------------------------------------------------------

    /// Set-add a like.  Returns `true` when the like was new.
    pub fn add_post_like(&self, post_id: Uuid, user_id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO post_likes (post_id, user_id) VALUES (?1, ?2)",
            params![post_id.to_string(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Set-remove a like.  Removing an absent like is a no-op.
    pub fn remove_post_like(&self, post_id: Uuid, user_id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id.to_string(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn post_like_exists(&self, post_id: Uuid, user_id: Uuid) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn count_post_likes(&self, post_id: Uuid) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
            params![post_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Drop every like placed by `user`, across all posts.  Used by the
    /// user-deletion closure.
    pub fn delete_likes_by_user(&self, user_id: Uuid) -> Result<u64> {
        let affected = self.conn().execute(
            "DELETE FROM post_likes WHERE user_id = ?1",
            params![user_id.to_string()],
        )?;
        Ok(affected as u64)
    }
}

/// Map a `rusqlite::Row` to a [`Post`].
fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: col_uuid(row, 0)?,
        author_id: col_uuid(row, 1)?,
        text: row.get(2)?,
        group_id: col_uuid_opt(row, 3)?,
        media: col_json(row, 4)?,
        tagged_countries: col_json(row, 5)?,
        created_at: col_ts(row, 6)?,
    })
}
