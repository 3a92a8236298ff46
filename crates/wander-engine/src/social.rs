//! User accounts, the follow graph, posts, comments, and messages.
//!
//! Thin rules on top of the store: uniqueness checks, ownership checks,
//! and the denormalized latest-message pointer.  The heavy lifting
//! (membership, cascades) lives in the sibling modules.

use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use wander_media::MediaGateway;
use wander_shared::{EntityKind, MediaRef};
use wander_store::{Comment, MembershipStatus, Message, Post, StoreError, User};

use crate::error::{EngineError, Result};
use crate::Engine;

/// How long the sender of a message may still delete it.
const MESSAGE_DELETE_WINDOW_MINS: i64 = 15;

/// Parameters for [`Engine::create_user`].
#[derive(Debug, Clone)]
pub struct NewUser {
    pub auth_uid: String,
    pub full_name: Option<String>,
    pub email: String,
    pub birth_date: Option<chrono::DateTime<Utc>>,
    pub origin_country: Option<String>,
    pub gender: Option<String>,
    pub profile_image: Option<MediaRef>,
}

/// Parameters for [`Engine::create_post`].
#[derive(Debug, Clone)]
pub struct NewPost {
    pub author_id: Uuid,
    pub text: String,
    pub media: Vec<MediaRef>,
    /// `None` publishes a personal/public post; `Some` scopes the post to
    /// a group the author must be an approved member of.
    pub group_id: Option<Uuid>,
    pub tagged_countries: Vec<String>,
}

impl<G: MediaGateway> Engine<G> {
    // ------------------------------------------------------------------
    // Users & follows
    // ------------------------------------------------------------------

    /// Register a user on first login.  The e-mail address is unique.
    pub async fn create_user(&self, new: NewUser) -> Result<User> {
        if new.email.trim().is_empty() || new.auth_uid.trim().is_empty() {
            return Err(EngineError::InvalidArgument(
                "email and auth uid are required".to_string(),
            ));
        }

        let user = User {
            id: Uuid::new_v4(),
            auth_uid: new.auth_uid,
            full_name: new.full_name,
            email: new.email.trim().to_string(),
            birth_date: new.birth_date,
            origin_country: new.origin_country,
            gender: new.gender,
            profile_image: new.profile_image,
            visited_countries: vec![],
            wishlist_countries: vec![],
            created_at: Utc::now(),
        };

        {
            let db = self.db()?;
            if db.find_user_by_email(&user.email)?.is_some() {
                return Err(EngineError::Conflict(
                    "a user with this email already exists".to_string(),
                ));
            }
            db.create_user(&user)?;
        }

        info!(user = %user.id, "User created");
        Ok(user)
    }

    /// Follow `target` if not yet following, unfollow otherwise.  Keeps the
    /// two follow sets symmetric.  Returns whether `actor` now follows.
    pub async fn toggle_follow(&self, actor: Uuid, target: Uuid) -> Result<bool> {
        if actor == target {
            return Err(EngineError::InvalidArgument(
                "users cannot follow themselves".to_string(),
            ));
        }

        let db = self.db()?;
        db.get_user(actor)?;
        db.get_user(target)?;

        let now_following = if db.is_following(actor, target)? {
            db.remove_follow(actor, target)?;
            false
        } else {
            db.add_follow(actor, target)?;
            true
        };

        info!(actor = %actor, target = %target, following = now_following, "Follow toggled");
        Ok(now_following)
    }

    // ------------------------------------------------------------------
    // Posts
    // ------------------------------------------------------------------

    /// Publish a post.  Group posts require an approved membership.
    pub async fn create_post(&self, new: NewPost) -> Result<Post> {
        let text = new.text.trim();
        if text.is_empty() {
            return Err(EngineError::InvalidArgument("post text is required".to_string()));
        }

        let post = Post {
            id: Uuid::new_v4(),
            author_id: new.author_id,
            text: text.to_string(),
            group_id: new.group_id,
            media: new.media,
            tagged_countries: new.tagged_countries,
            created_at: Utc::now(),
        };

        {
            let db = self.db()?;
            db.get_user(new.author_id)?;
            if let Some(group_id) = new.group_id {
                db.get_group(group_id)?;
                let member = db.get_group_member(group_id, new.author_id)?;
                if !member.is_some_and(|m| m.status == MembershipStatus::Approved) {
                    return Err(EngineError::Forbidden(
                        "only approved members can post in a group".to_string(),
                    ));
                }
            }
            db.create_post(&post)?;
        }

        info!(post = %post.id, author = %post.author_id, group = ?post.group_id, "Post created");
        Ok(post)
    }

    /// Like a post if not yet liked, unlike otherwise.  Returns whether the
    /// user now likes the post and the current like count.
    pub async fn toggle_like(&self, post_id: Uuid, user_id: Uuid) -> Result<(bool, u64)> {
        let db = self.db()?;
        db.get_post(post_id)?;
        db.get_user(user_id)?;

        let now_liked = if db.post_like_exists(post_id, user_id)? {
            db.remove_post_like(post_id, user_id)?;
            false
        } else {
            db.add_post_like(post_id, user_id)?;
            true
        };

        Ok((now_liked, db.count_post_likes(post_id)?))
    }

    // ------------------------------------------------------------------
    // Comments
    // ------------------------------------------------------------------

    /// Comment on a post.
    pub async fn add_comment(&self, post_id: Uuid, author_id: Uuid, text: String) -> Result<Comment> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(EngineError::InvalidArgument(
                "comment text is required".to_string(),
            ));
        }

        let comment = Comment {
            id: Uuid::new_v4(),
            post_id,
            author_id,
            text,
            created_at: Utc::now(),
        };

        {
            let db = self.db()?;
            db.get_post(post_id)?;
            db.get_user(author_id)?;
            db.insert_comment(&comment)?;
        }

        info!(comment = %comment.id, post = %post_id, "Comment added");
        Ok(comment)
    }

    /// Delete a single comment.  Allowed for the comment's author and for
    /// the owner of the post it sits under.
    pub async fn delete_comment(&self, comment_id: Uuid, acting_user: Uuid) -> Result<()> {
        let comment = self.db()?.get_comment(comment_id)?;

        let mut allowed = comment.author_id == acting_user;
        if !allowed {
            match self.db()?.get_post(comment.post_id) {
                Ok(post) => allowed = post.author_id == acting_user,
                Err(StoreError::NotFound) => {
                    // orphaned comment; fall through with author-only rights
                    warn!(comment = %comment_id, "comment's parent post is gone");
                }
                Err(e) => return Err(e.into()),
            }
        }
        if !allowed {
            return Err(EngineError::Forbidden(
                "only the comment author or the post owner can delete a comment".to_string(),
            ));
        }

        self.db()?.delete_comment(comment_id)?;
        self.notifier.entity_deleted(EntityKind::Comment, comment_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Send a message into a chat the sender is a member of.  Updates the
    /// chat's latest-message pointer and emits a created event for fan-out.
    pub async fn send_message(
        &self,
        chat_id: Uuid,
        sender_id: Uuid,
        content: String,
    ) -> Result<Message> {
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(EngineError::InvalidArgument(
                "message content is required".to_string(),
            ));
        }

        let message = Message {
            id: Uuid::new_v4(),
            chat_id,
            sender_id,
            content,
            created_at: Utc::now(),
        };

        {
            let db = self.db()?;
            db.get_chat(chat_id)?;
            if db.get_chat_member(chat_id, sender_id)?.is_none() {
                return Err(EngineError::Forbidden(
                    "only chat members can send messages".to_string(),
                ));
            }
            db.insert_message(&message)?;
            db.set_latest_message(chat_id, Some(message.id))?;
        }

        self.notifier.message_created(
            message.id,
            message.chat_id,
            message.sender_id,
            message.content.clone(),
            message.created_at,
        );
        Ok(message)
    }

    /// Delete a message.  Sender only, and only within a fixed window of
    /// sending.  Repairs the chat's latest-message pointer when the
    /// deleted message was the preview.
    pub async fn delete_message(&self, message_id: Uuid, acting_user: Uuid) -> Result<()> {
        let message = self.db()?.get_message(message_id)?;

        if message.sender_id != acting_user {
            return Err(EngineError::Forbidden(
                "only the sender can delete a message".to_string(),
            ));
        }
        if Utc::now() - message.created_at > Duration::minutes(MESSAGE_DELETE_WINDOW_MINS) {
            return Err(EngineError::Forbidden(
                "the deletion window for this message has passed".to_string(),
            ));
        }

        {
            let db = self.db()?;
            db.delete_message(message_id)?;
            match db.get_chat(message.chat_id) {
                Ok(chat) if chat.latest_message_id == Some(message_id) => {
                    let latest = db.latest_message_id_for_chat(message.chat_id)?;
                    db.set_latest_message(message.chat_id, latest)?;
                }
                Ok(_) => {}
                Err(StoreError::NotFound) => {
                    warn!(message = %message_id, "message's chat is gone");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.notifier.entity_deleted(EntityKind::Message, message_id);
        Ok(())
    }
}
