//! v001 -- Initial schema creation.
//!
//! Creates the five core collections (`users`, `groups`, `chats`, `posts`
//! plus `comments`, `messages`) and their membership/reference side tables.
//!
//! Cascading deletion is performed by the engine's deletion coordinator,
//! never by the schema: the coordinator must count deleted rows and delete
//! media blobs, so there is no `ON DELETE CASCADE` here.  Foreign keys are
//! declared where the coordinator actively cleans the referencing rows;
//! `comments.author_id` and `messages.sender_id` carry none, those rows may
//! outlive their author as unreachable leaves.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id                 TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    auth_uid           TEXT NOT NULL UNIQUE,        -- external-auth UID
    full_name          TEXT,
    email              TEXT NOT NULL UNIQUE,
    birth_date         TEXT,                        -- ISO-8601 / RFC-3339
    origin_country     TEXT,                        -- cca3 code
    gender             TEXT,
    profile_image_url  TEXT,
    profile_image_path TEXT,                        -- gateway storage path
    visited_countries  TEXT NOT NULL DEFAULT '[]',  -- JSON array of cca3 codes
    wishlist_countries TEXT NOT NULL DEFAULT '[]',
    created_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS follows (
    follower_id TEXT NOT NULL,
    followee_id TEXT NOT NULL,

    PRIMARY KEY (follower_id, followee_id),
    FOREIGN KEY (follower_id) REFERENCES users(id),
    FOREIGN KEY (followee_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_follows_followee ON follows(followee_id);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id             TEXT PRIMARY KEY NOT NULL,
    name           TEXT NOT NULL,
    description    TEXT,
    countries      TEXT NOT NULL DEFAULT '[]',
    admin_id       TEXT NOT NULL,
    is_private     INTEGER NOT NULL DEFAULT 1,
    image_url      TEXT,
    image_path     TEXT,
    linked_chat_id TEXT,                            -- cross-link, repaired out of band; no FK
    revision       INTEGER NOT NULL DEFAULT 0,      -- optimistic-concurrency counter
    created_at     TEXT NOT NULL,

    FOREIGN KEY (admin_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL,
    user_id  TEXT NOT NULL,
    status   TEXT NOT NULL,                         -- pending | pending_approval | approved
    position INTEGER NOT NULL,                      -- join order, monotonic per group

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(id),
    FOREIGN KEY (user_id)  REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id                TEXT PRIMARY KEY NOT NULL,
    name              TEXT,
    is_group          INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    admin_id          TEXT,                         -- group chats only
    linked_group_id   TEXT UNIQUE,                  -- inverse of groups.linked_chat_id; no FK
    latest_message_id TEXT,                         -- denormalized preview pointer; no FK
    revision          INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_members (
    chat_id  TEXT NOT NULL,
    user_id  TEXT NOT NULL,
    role     TEXT NOT NULL DEFAULT 'member',        -- admin | member
    position INTEGER NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id),
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_chat_members_user ON chat_members(user_id);

CREATE TABLE IF NOT EXISTS chat_join_requests (
    chat_id    TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    message    TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id),
    FOREIGN KEY (user_id) REFERENCES users(id)
);

-- ----------------------------------------------------------------
-- Posts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS posts (
    id               TEXT PRIMARY KEY NOT NULL,
    author_id        TEXT NOT NULL,
    text             TEXT NOT NULL,
    group_id         TEXT,                          -- NULL = personal/public post
    media            TEXT NOT NULL DEFAULT '[]',    -- JSON array of {url, storage_path}
    tagged_countries TEXT NOT NULL DEFAULT '[]',
    created_at       TEXT NOT NULL,

    FOREIGN KEY (author_id) REFERENCES users(id),
    FOREIGN KEY (group_id)  REFERENCES groups(id)
);

CREATE INDEX IF NOT EXISTS idx_posts_group  ON posts(group_id);
CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(author_id, created_at DESC);

CREATE TABLE IF NOT EXISTS post_likes (
    post_id TEXT NOT NULL,
    user_id TEXT NOT NULL,

    PRIMARY KEY (post_id, user_id),
    FOREIGN KEY (post_id) REFERENCES posts(id),
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_post_likes_user ON post_likes(user_id);

-- ----------------------------------------------------------------
-- Comments
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS comments (
    id         TEXT PRIMARY KEY NOT NULL,
    post_id    TEXT NOT NULL,
    author_id  TEXT NOT NULL,                       -- no FK, sender may be deleted first
    text       TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (post_id) REFERENCES posts(id)
);

CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id, created_at ASC);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,
    chat_id    TEXT NOT NULL,
    sender_id  TEXT NOT NULL,                       -- no FK, sender may be deleted first
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
