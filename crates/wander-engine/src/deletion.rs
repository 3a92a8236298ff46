//! Cascading deletion coordinator.
//!
//! Given a root entity — group, chat, post, or user — this module computes
//! the dependent closure and deletes it in a safe order: media blobs and
//! leaf records first, the most-referenced record last.  A crash mid-cascade
//! then leaves at worst some unreachable leaf records, never a surviving
//! record with a dangling reference.
//!
//! Blob deletions are best-effort: they run concurrently per step through
//! [`Engine::delete_blobs`], failures are collected into the summary and
//! reported, and no blob failure ever blocks deletion of the logical
//! records.  Database steps have no compensation; every step is idempotent
//! so a client retry of the whole operation converges.

use std::collections::HashSet;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use wander_media::MediaGateway;
use wander_shared::{EntityKind, MediaRef};
use wander_store::{Chat, Group, Post};

use crate::error::{EngineError, Result};
use crate::membership::HandoffOutcome;
use crate::Engine;

/// One blob that could not be deleted.  Informational: the logical deletion
/// proceeded regardless.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BlobFailure {
    pub path: String,
    pub reason: String,
}

/// Counts of everything a cascade removed, returned to the caller.
#[derive(Debug, Default, Serialize)]
pub struct DeletionSummary {
    pub posts: u64,
    pub comments: u64,
    pub messages: u64,
    pub chats: u64,
    pub blobs_deleted: u64,
    pub blob_failures: Vec<BlobFailure>,
}

impl DeletionSummary {
    fn merge(&mut self, other: DeletionSummary) {
        self.posts += other.posts;
        self.comments += other.comments;
        self.messages += other.messages;
        self.chats += other.chats;
        self.blobs_deleted += other.blobs_deleted;
        self.blob_failures.extend(other.blob_failures);
    }
}

impl<G: MediaGateway> Engine<G> {
    // ------------------------------------------------------------------
    // Public entry points
    // ------------------------------------------------------------------

    /// Delete a post, its comments, and its media blobs.
    ///
    /// Allowed for the post's author and, for group posts, the group admin.
    pub async fn delete_post(&self, post_id: Uuid, acting_user: Uuid) -> Result<DeletionSummary> {
        let post = self.db()?.get_post(post_id)?;

        let mut allowed = post.author_id == acting_user;
        if !allowed {
            if let Some(group_id) = post.group_id {
                allowed = self.db()?.get_group(group_id)?.admin_id == acting_user;
            }
        }
        if !allowed {
            return Err(EngineError::Forbidden(
                "only the author or the group admin can delete a post".to_string(),
            ));
        }

        let mut summary = DeletionSummary::default();
        self.delete_post_records(&post, &mut summary).await?;
        Ok(summary)
    }

    /// Delete a standalone chat and its messages.
    ///
    /// The caller must be a member; for group chats, the admin.  Chats
    /// linked to a group are deleted through the group cascade only.
    pub async fn delete_chat(&self, chat_id: Uuid, acting_user: Uuid) -> Result<DeletionSummary> {
        let (chat, member) = {
            let db = self.db()?;
            (db.get_chat(chat_id)?, db.get_chat_member(chat_id, acting_user)?)
        };

        if chat.linked_group_id.is_some() {
            return Err(EngineError::InvalidArgument(
                "this chat mirrors a group; delete the group instead".to_string(),
            ));
        }
        if member.is_none() {
            return Err(EngineError::Forbidden(
                "only members can delete a chat".to_string(),
            ));
        }
        if chat.is_group && chat.admin_id != Some(acting_user) {
            return Err(EngineError::Forbidden(
                "only the chat admin can delete a group chat".to_string(),
            ));
        }

        self.delete_chat_closure(&chat).await
    }

    /// Delete a group with all its posts (and their comments and blobs),
    /// its linked chat (and messages), and its own image blob.
    ///
    /// Admin only.
    pub async fn delete_group(&self, group_id: Uuid, acting_user: Uuid) -> Result<DeletionSummary> {
        let group = self.db()?.get_group(group_id)?;
        if group.admin_id != acting_user {
            return Err(EngineError::Forbidden(
                "only the group admin can delete the group".to_string(),
            ));
        }
        self.delete_group_closure(&group).await
    }

    /// Full account deletion.
    ///
    /// Deletes the user's profile image and posts, scrubs their id from
    /// every follow set, like set, membership list, and join-request queue
    /// (handing off or cascading groups/chats they administered), and
    /// finally deletes the user record itself.  Comments and messages the
    /// user wrote elsewhere are left behind as unreachable leaves.  The
    /// external identity provider reacts to the emitted deletion event.
    pub async fn delete_user(&self, user_id: Uuid, acting_user: Uuid) -> Result<DeletionSummary> {
        if user_id != acting_user {
            return Err(EngineError::Forbidden(
                "accounts can only be deleted by their owner".to_string(),
            ));
        }
        let user = self.db()?.get_user(user_id)?;
        let mut summary = DeletionSummary::default();

        // profile image blob, best-effort
        if let Some(image) = &user.profile_image {
            self.delete_blobs(std::slice::from_ref(image), &mut summary).await;
        }

        // the user's own posts (including their group posts)
        let posts = self.db()?.list_posts_by_author(user_id)?;
        for post in &posts {
            self.delete_post_records(post, &mut summary).await?;
        }

        // scrub the id out of every like set and the follow graph
        {
            let db = self.db()?;
            db.delete_likes_by_user(user_id)?;
            db.delete_follows_involving(user_id)?;
        }

        // group memberships: hand off or cascade
        let memberships = self.db()?.list_group_memberships_for_user(user_id)?;
        let mut handled = HashSet::new();
        for membership in memberships {
            handled.insert(membership.group_id);
            self.evict_from_group(membership.group_id, user_id, &mut summary).await?;
        }
        // groups that still name this user as admin without a membership
        // entry violate the admin invariant; evict best-effort anyway
        let administered = self.db()?.list_groups_administered_by(user_id)?;
        for group in administered {
            if handled.insert(group.id) {
                warn!(group = %group.id, user = %user_id, "group admin had no membership entry");
                self.evict_from_group(group.id, user_id, &mut summary).await?;
            }
        }

        // chat memberships: standalone chats are handed off or deleted,
        // leftover mirror rows and direct-chat rows are simply removed
        let chat_memberships = self.db()?.list_chat_memberships_for_user(user_id)?;
        for membership in chat_memberships {
            self.evict_from_chat(membership.chat_id, user_id, &mut summary).await?;
        }
        self.db()?.delete_chat_join_requests_for_user(user_id)?;

        self.db()?.delete_user(user_id)?;
        self.notifier.entity_deleted(EntityKind::User, user_id);
        info!(user = %user_id, posts = summary.posts, "User account deleted");
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Closures
    // ------------------------------------------------------------------

    /// Blobs → comments → post record.
    pub(crate) async fn delete_post_records(
        &self,
        post: &Post,
        summary: &mut DeletionSummary,
    ) -> Result<()> {
        self.delete_blobs(&post.media, summary).await;
        {
            let mut db = self.db()?;
            summary.comments += db.delete_comments_for_post(post.id)?;
            if db.delete_post(post.id)? {
                summary.posts += 1;
            }
        }
        self.notifier.entity_deleted(EntityKind::Post, post.id);
        Ok(())
    }

    /// Messages → chat record.
    pub(crate) async fn delete_chat_closure(&self, chat: &Chat) -> Result<DeletionSummary> {
        let mut summary = DeletionSummary::default();
        {
            let mut db = self.db()?;
            summary.messages += db.delete_messages_for_chat(chat.id)?;
            if db.delete_chat(chat.id)? {
                summary.chats += 1;
            }
        }
        self.notifier.entity_deleted(EntityKind::Chat, chat.id);
        Ok(summary)
    }

    /// Posts (each with comments and blobs) → linked chat (with messages)
    /// → group image blob → group record.
    pub(crate) async fn delete_group_closure(&self, group: &Group) -> Result<DeletionSummary> {
        let mut summary = DeletionSummary::default();

        let posts = self.db()?.list_posts_for_group(group.id)?;
        for post in &posts {
            self.delete_post_records(post, &mut summary).await?;
        }

        let linked = self.db()?.find_chat_by_linked_group(group.id)?;
        if let Some(chat) = linked {
            let chat_summary = self.delete_chat_closure(&chat).await?;
            summary.merge(chat_summary);
        }

        if let Some(image) = &group.image {
            self.delete_blobs(std::slice::from_ref(image), &mut summary).await;
        }

        self.db()?.delete_group(group.id)?;
        self.notifier.entity_deleted(EntityKind::Group, group.id);
        info!(
            group = %group.id,
            posts = summary.posts,
            comments = summary.comments,
            messages = summary.messages,
            blob_failures = summary.blob_failures.len(),
            "Group deleted"
        );
        Ok(summary)
    }

    /// Remove one user from one group during account deletion, handing off
    /// the admin role or cascading the whole group when they were the last
    /// approved member.  A group that vanished concurrently is skipped.
    async fn evict_from_group(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        summary: &mut DeletionSummary,
    ) -> Result<()> {
        let outcome = match self.remove_membership_with_handoff(group_id, user_id) {
            Ok(outcome) => outcome,
            Err(EngineError::NotFound(_)) => {
                warn!(group = %group_id, "group vanished during account deletion");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        match outcome {
            HandoffOutcome::Removed => {}
            HandoffOutcome::Transferred(new_admin) => {
                info!(group = %group_id, new_admin = %new_admin, "admin role handed off during account deletion");
            }
            HandoffOutcome::LastMember => {
                let group = self.db()?.get_group(group_id)?;
                let group_summary = self.delete_group_closure(&group).await?;
                summary.merge(group_summary);
            }
        }
        Ok(())
    }

    /// Remove one user from one chat during account deletion.
    async fn evict_from_chat(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        summary: &mut DeletionSummary,
    ) -> Result<()> {
        // bind before matching so the store guard is released
        let found = self.db()?.get_chat(chat_id);
        let chat = match found {
            Ok(chat) => chat,
            Err(wander_store::StoreError::NotFound) => {
                self.db()?.remove_chat_member_if_present(chat_id, user_id)?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // standalone group chat administered by the user: hand off or delete
        if chat.is_group && chat.linked_group_id.is_none() && chat.admin_id == Some(user_id) {
            let members = self.db()?.list_chat_members(chat_id)?;
            match members
                .iter()
                .filter(|m| m.user_id != user_id)
                .min_by_key(|m| m.position)
                .map(|m| m.user_id)
            {
                Some(new_admin) => {
                    self.db()?.set_chat_admin(chat_id, Some(user_id), new_admin)?;
                    self.db()?.remove_chat_member_if_present(chat_id, user_id)?;
                }
                None => {
                    let chat_summary = self.delete_chat_closure(&chat).await?;
                    summary.merge(chat_summary);
                }
            }
            return Ok(());
        }

        // mirror rows and direct chats: a plain set-remove converges
        self.db()?.remove_chat_member_if_present(chat_id, user_id)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Blob handling
    // ------------------------------------------------------------------

    /// Best-effort deletion of a batch of blobs, concurrently.
    ///
    /// Descriptors without a stored path fall back to resolving the path
    /// from the URL; unresolvable and failed deletions land in
    /// `summary.blob_failures` and are otherwise swallowed.
    pub(crate) async fn delete_blobs(&self, refs: &[MediaRef], summary: &mut DeletionSummary) {
        let mut paths = Vec::new();
        for media in refs {
            let resolved = media
                .storage_path
                .clone()
                .or_else(|| self.media.resolve_blob_path(&media.url));
            match resolved {
                Some(path) => paths.push(path),
                None => summary.blob_failures.push(BlobFailure {
                    path: media.url.clone(),
                    reason: "no storage path and URL is not resolvable".to_string(),
                }),
            }
        }

        let results = join_all(paths.iter().map(|p| self.media.delete_blob(p))).await;
        for (path, result) in paths.into_iter().zip(results) {
            match result {
                Ok(()) => summary.blobs_deleted += 1,
                Err(e) => {
                    warn!(path = %path, error = %e, "blob deletion failed; continuing");
                    summary.blob_failures.push(BlobFailure {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::NewGroup;
    use crate::notify::Notifier;
    use crate::social::NewPost;
    use crate::testutil::TestBed;
    use crate::chats::NewGroupChat;
    use wander_media::MediaError;
    use wander_shared::RealtimeEvent;
    use wander_store::Database;

    /// Gateway whose backend is down for some paths.
    struct FlakyGateway;

    impl MediaGateway for FlakyGateway {
        async fn delete_blob(&self, path: &str) -> std::result::Result<(), MediaError> {
            if path.contains("broken") {
                Err(MediaError::Storage("backend unavailable".to_string()))
            } else {
                Ok(())
            }
        }

        fn resolve_blob_path(&self, url: &str) -> Option<String> {
            url.split_once("/media/").map(|(_, p)| p.to_string())
        }
    }

    async fn stored_media(bed: &TestBed, path: &str) -> wander_shared::MediaRef {
        let media = bed.engine.media();
        media.store_blob(path, b"bytes").await.unwrap();
        wander_shared::MediaRef::new(media.public_url(path), path)
    }

    #[tokio::test]
    async fn group_cascade_is_complete() {
        let mut bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let commenter = bed.user("commenter").await;
        let group = bed.group(admin.id, false).await;
        bed.engine.request_to_join(group.id, commenter.id).await.unwrap();
        let chat_id = group.linked_chat_id.unwrap();

        let m1 = stored_media(&bed, "posts/one-a.jpg").await;
        let m2 = stored_media(&bed, "posts/one-b.jpg").await;
        let p1 = bed
            .engine
            .create_post(NewPost {
                author_id: admin.id,
                text: "two pictures".to_string(),
                media: vec![m1, m2],
                group_id: Some(group.id),
                tagged_countries: vec![],
            })
            .await
            .unwrap();
        let p2 = bed
            .engine
            .create_post(NewPost {
                author_id: admin.id,
                text: "no pictures".to_string(),
                media: vec![],
                group_id: Some(group.id),
                tagged_countries: vec![],
            })
            .await
            .unwrap();
        bed.engine
            .add_comment(p2.id, commenter.id, "nice".to_string())
            .await
            .unwrap();
        bed.engine
            .send_message(chat_id, admin.id, "welcome".to_string())
            .await
            .unwrap();
        bed.drain_events();

        let summary = bed.engine.delete_group(group.id, admin.id).await.unwrap();
        assert_eq!(summary.posts, 2);
        assert_eq!(summary.comments, 1);
        assert_eq!(summary.messages, 1);
        assert_eq!(summary.chats, 1);
        assert_eq!(summary.blobs_deleted, 2);
        assert!(summary.blob_failures.is_empty());

        let db = bed.engine.db().unwrap();
        assert!(db.get_group(group.id).is_err());
        assert!(db.get_chat(chat_id).is_err());
        assert!(db.get_post(p1.id).is_err());
        assert!(db.get_post(p2.id).is_err());
        assert!(db.list_posts_for_group(group.id).unwrap().is_empty());
        assert!(db.list_messages_for_chat(chat_id, 10, 0).unwrap().is_empty());
        drop(db);

        assert!(!bed.engine.media().blob_exists("posts/one-a.jpg").await);
        assert!(!bed.engine.media().blob_exists("posts/one-b.jpg").await);

        let deleted: Vec<_> = bed
            .events()
            .into_iter()
            .filter(|e| matches!(e, RealtimeEvent::EntityDeleted { .. }))
            .collect();
        assert!(deleted.len() >= 4); // two posts, chat, group
    }

    #[tokio::test]
    async fn non_admin_cannot_delete_group() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let member = bed.user("member").await;
        let group = bed.group(admin.id, false).await;
        bed.engine.request_to_join(group.id, member.id).await.unwrap();

        let err = bed.engine.delete_group(group.id, member.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[tokio::test]
    async fn post_cascade_deletes_comments_and_blobs() {
        let bed = TestBed::new().await;
        let author = bed.user("author").await;
        let commenter = bed.user("commenter").await;

        let media = stored_media(&bed, "posts/solo.jpg").await;
        let post = bed
            .engine
            .create_post(NewPost {
                author_id: author.id,
                text: "hello".to_string(),
                media: vec![media],
                group_id: None,
                tagged_countries: vec![],
            })
            .await
            .unwrap();
        bed.engine
            .add_comment(post.id, commenter.id, "first".to_string())
            .await
            .unwrap();

        // a stranger may not delete it
        let err = bed.engine.delete_post(post.id, commenter.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let summary = bed.engine.delete_post(post.id, author.id).await.unwrap();
        assert_eq!(summary.posts, 1);
        assert_eq!(summary.comments, 1);
        assert_eq!(summary.blobs_deleted, 1);
        assert!(!bed.engine.media().blob_exists("posts/solo.jpg").await);
    }

    #[tokio::test]
    async fn chat_deletion_authorization() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let member = bed.user("member").await;
        let outsider = bed.user("outsider").await;

        let chat = bed
            .engine
            .create_group_chat(NewGroupChat {
                name: "doomed".to_string(),
                creator_id: admin.id,
                member_ids: vec![member.id],
            })
            .await
            .unwrap();
        bed.engine
            .send_message(chat.id, member.id, "anyone here".to_string())
            .await
            .unwrap();

        let err = bed.engine.delete_chat(chat.id, outsider.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
        let err = bed.engine.delete_chat(chat.id, member.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let summary = bed.engine.delete_chat(chat.id, admin.id).await.unwrap();
        assert_eq!(summary.messages, 1);
        assert_eq!(summary.chats, 1);
    }

    #[tokio::test]
    async fn linked_chat_cannot_be_deleted_directly() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let group = bed.group(admin.id, true).await;

        let err = bed
            .engine
            .delete_chat(group.linked_chat_id.unwrap(), admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn blob_failures_never_block_the_cascade() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("wander.db")).unwrap();
        let engine = Engine::new(db, FlakyGateway, Notifier::disabled());

        let author = engine
            .create_user(crate::social::NewUser {
                auth_uid: "auth-flaky".to_string(),
                full_name: None,
                email: "flaky@example.com".to_string(),
                birth_date: None,
                origin_country: None,
                gender: None,
                profile_image: None,
            })
            .await
            .unwrap();

        let post = engine
            .create_post(NewPost {
                author_id: author.id,
                text: "half the blobs are stuck".to_string(),
                media: vec![
                    wander_shared::MediaRef::new("https://cdn/media/ok.jpg", "ok.jpg"),
                    wander_shared::MediaRef::new("https://cdn/media/broken.jpg", "broken.jpg"),
                    wander_shared::MediaRef::url_only("opaque-legacy-url"),
                ],
                group_id: None,
                tagged_countries: vec![],
            })
            .await
            .unwrap();

        let summary = engine.delete_post(post.id, author.id).await.unwrap();
        assert_eq!(summary.posts, 1);
        assert_eq!(summary.blobs_deleted, 1);
        assert_eq!(summary.blob_failures.len(), 2);
        // the post is gone even though blobs failed
        assert!(engine.db().unwrap().get_post(post.id).is_err());
    }

    #[tokio::test]
    async fn user_deletion_scrubs_references() {
        let bed = TestBed::new().await;
        let doomed = bed.user("doomed").await;
        let friend = bed.user("friend").await;
        let heir = bed.user("heir").await;

        // follow graph in both directions
        bed.engine.toggle_follow(doomed.id, friend.id).await.unwrap();
        bed.engine.toggle_follow(friend.id, doomed.id).await.unwrap();

        // a like on someone else's post
        let post = bed
            .engine
            .create_post(NewPost {
                author_id: friend.id,
                text: "keep this".to_string(),
                media: vec![],
                group_id: None,
                tagged_countries: vec![],
            })
            .await
            .unwrap();
        bed.engine.toggle_like(post.id, doomed.id).await.unwrap();

        // a group the doomed user administers, with an heir
        let group = bed.group(doomed.id, false).await;
        bed.engine.request_to_join(group.id, heir.id).await.unwrap();

        // a direct chat and a message that will be orphaned
        let dm = bed
            .engine
            .create_or_access_direct_chat(doomed.id, friend.id)
            .await
            .unwrap();
        bed.engine
            .send_message(dm.id, doomed.id, "goodbye".to_string())
            .await
            .unwrap();

        // the doomed user's own post
        bed.engine
            .create_post(NewPost {
                author_id: doomed.id,
                text: "delete this with me".to_string(),
                media: vec![],
                group_id: None,
                tagged_countries: vec![],
            })
            .await
            .unwrap();

        let summary = bed.engine.delete_user(doomed.id, doomed.id).await.unwrap();
        assert_eq!(summary.posts, 1);

        let db = bed.engine.db().unwrap();
        assert!(db.get_user(doomed.id).is_err());
        assert!(db.list_followers(friend.id).unwrap().is_empty());
        assert!(db.list_following(friend.id).unwrap().is_empty());
        assert_eq!(db.count_post_likes(post.id).unwrap(), 0);

        // the group survived with the heir as admin
        let group = db.get_group(group.id).unwrap();
        assert_eq!(group.admin_id, heir.id);
        let chat = db.get_chat(group.linked_chat_id.unwrap()).unwrap();
        assert_eq!(chat.admin_id, Some(heir.id));

        // direct chat lost the member row; the message stays as an orphan
        assert!(db.get_chat_member(dm.id, doomed.id).unwrap().is_none());
        assert_eq!(db.list_messages_for_chat(dm.id, 10, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn user_deletion_cascades_sole_admin_group() {
        let bed = TestBed::new().await;
        let doomed = bed.user("doomed").await;
        let group = bed.group(doomed.id, true).await;
        let chat_id = group.linked_chat_id.unwrap();

        let err = bed.engine.delete_user(doomed.id, group.admin_id).await;
        assert!(err.is_ok()); // acting == owner here; sanity

        let db = bed.engine.db().unwrap();
        assert!(db.get_group(group.id).is_err());
        assert!(db.get_chat(chat_id).is_err());
    }

    #[tokio::test]
    async fn only_the_owner_deletes_the_account() {
        let bed = TestBed::new().await;
        let a = bed.user("a").await;
        let b = bed.user("b").await;

        let err = bed.engine.delete_user(a.id, b.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }
}
