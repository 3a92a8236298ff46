//! CRUD operations for [`User`] records and the follow graph.

use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{col_json, col_ts, col_ts_opt, col_uuid, media_from_cols, User};

const USER_COLS: &str = "id, auth_uid, full_name, email, birth_date, origin_country, gender, \
                         profile_image_url, profile_image_path, visited_countries, \
                         wishlist_countries, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Insert a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, auth_uid, full_name, email, birth_date, origin_country, \
             gender, profile_image_url, profile_image_path, visited_countries, \
             wishlist_countries, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                user.id.to_string(),
                user.auth_uid,
                user.full_name,
                user.email,
                user.birth_date.map(|d| d.to_rfc3339()),
                user.origin_country,
                user.gender,
                user.profile_image.as_ref().map(|m| m.url.clone()),
                user.profile_image.as_ref().and_then(|m| m.storage_path.clone()),
                serde_json::to_string(&user.visited_countries)?,
                serde_json::to_string(&user.wishlist_countries)?,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single user by UUID.
    pub fn get_user(&self, id: Uuid) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Look up a user by e-mail address.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        match self.conn().query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE email = ?1"),
            params![email],
            row_to_user,
        ) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(StoreError::Sqlite(other)),
        }
    }

    /// Delete a user record.  Returns `true` if a row was deleted.
    ///
    /// Referencing rows (memberships, likes, follows) must already be gone;
    /// clearing them is the deletion coordinator's job.
    pub fn delete_user(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Follow graph
    // ------------------------------------------------------------------

    /// Record `follower -> followee`.  Re-adding an existing edge is a no-op.
    pub fn add_follow(&self, follower: Uuid, followee: Uuid) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO follows (follower_id, followee_id) VALUES (?1, ?2)",
            params![follower.to_string(), followee.to_string()],
        )?;
        Ok(())
    }

    /// Remove `follower -> followee`.  Returns `true` if an edge existed.
    pub fn remove_follow(&self, follower: Uuid, followee: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower.to_string(), followee.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn is_following(&self, follower: Uuid, followee: Uuid) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower.to_string(), followee.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Users that `user` follows, in follow order.
    pub fn list_following(&self, user: Uuid) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn().prepare(
            "SELECT followee_id FROM follows WHERE follower_id = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![user.to_string()], |row| col_uuid(row, 0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Users that follow `user`.
    pub fn list_followers(&self, user: Uuid) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn().prepare(
            "SELECT follower_id FROM follows WHERE followee_id = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![user.to_string()], |row| col_uuid(row, 0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Drop every follow edge touching `user`, in either direction.
    /// Returns the number of edges removed.
    pub fn delete_follows_involving(&self, user: Uuid) -> Result<u64> {
        let affected = self.conn().execute(
            "DELETE FROM follows WHERE follower_id = ?1 OR followee_id = ?1",
            params![user.to_string()],
        )?;
        Ok(affected as u64)
    }
}

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let image_url: Option<String> = row.get(7)?;
    let image_path: Option<String> = row.get(8)?;

    Ok(User {
        id: col_uuid(row, 0)?,
        auth_uid: row.get(1)?,
        full_name: row.get(2)?,
        email: row.get(3)?,
        birth_date: col_ts_opt(row, 4)?,
        origin_country: row.get(5)?,
        gender: row.get(6)?,
        profile_image: media_from_cols(image_url, image_path),
        visited_countries: col_json(row, 9)?,
        wishlist_countries: col_json(row, 10)?,
        created_at: col_ts(row, 11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_user(email: &str) -> User {
        User {
            id: Uuid::new_v4(),
            auth_uid: format!("auth-{email}"),
            full_name: Some("Test Traveler".to_string()),
            email: email.to_string(),
            birth_date: None,
            origin_country: Some("NOR".to_string()),
            gender: None,
            profile_image: None,
            visited_countries: vec!["ISL".to_string(), "JPN".to_string()],
            wishlist_countries: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn user_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("t.db")).unwrap();

        let user = test_user("a@example.com");
        db.create_user(&user).unwrap();

        let loaded = db.get_user(user.id).unwrap();
        assert_eq!(loaded, user);
        assert!(db.find_user_by_email("a@example.com").unwrap().is_some());
        assert!(db.find_user_by_email("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn follow_edges() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("t.db")).unwrap();

        let a = test_user("a@example.com");
        let b = test_user("b@example.com");
        db.create_user(&a).unwrap();
        db.create_user(&b).unwrap();

        db.add_follow(a.id, b.id).unwrap();
        db.add_follow(a.id, b.id).unwrap(); // idempotent
        assert!(db.is_following(a.id, b.id).unwrap());
        assert_eq!(db.list_followers(b.id).unwrap(), vec![a.id]);

        assert_eq!(db.delete_follows_involving(b.id).unwrap(), 1);
        assert!(!db.is_following(a.id, b.id).unwrap());
    }
}
