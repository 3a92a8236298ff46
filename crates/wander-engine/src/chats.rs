//! Chat creation and the standalone-chat membership state machine.
//!
//! Standalone group chats (no linked group) run the same transition shapes
//! as groups — request, approve/reject, remove, leave with admin handoff or
//! last-member deletion — against `chat_join_requests` and `chat_members`.
//! Chats that mirror a group reject all of these: their membership is
//! governed by the group side and arrives through the mirror.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use wander_media::MediaGateway;
use wander_shared::{EntityKind, MemberSummary};
use wander_store::{Chat, ChatMember, ChatRole, JoinRequest};

use crate::deletion::DeletionSummary;
use crate::error::{EngineError, Result};
use crate::membership::RequestDecision;
use crate::{Engine, MAX_TRANSITION_RETRIES};

/// Parameters for [`Engine::create_group_chat`].
#[derive(Debug, Clone)]
pub struct NewGroupChat {
    pub name: String,
    pub creator_id: Uuid,
    /// Initial members besides the creator.
    pub member_ids: Vec<Uuid>,
}

/// What happened when a member left a chat.
#[derive(Debug)]
pub enum ChatLeaveOutcome {
    Left(Vec<ChatMember>),
    AdminTransferred {
        new_admin: Uuid,
        members: Vec<ChatMember>,
    },
    /// The last member left; the chat and its messages were deleted.
    ChatDeleted(DeletionSummary),
}

/// First remaining member in join order; standalone chats have no pending
/// states, so every entry is eligible.
fn next_chat_admin(members: &[ChatMember], leaving: Uuid) -> Option<Uuid> {
    members
        .iter()
        .filter(|m| m.user_id != leaving)
        .min_by_key(|m| m.position)
        .map(|m| m.user_id)
}

fn chat_member_summaries(members: &[ChatMember]) -> Vec<MemberSummary> {
    members
        .iter()
        .map(|m| MemberSummary {
            user_id: m.user_id,
            state: m.role.as_str().to_string(),
        })
        .collect()
}

/// The operations below only apply to group chats that own their member
/// list (no linked group).
fn require_standalone_group_chat(chat: &Chat) -> Result<()> {
    if !chat.is_group {
        return Err(EngineError::InvalidArgument(
            "not a group chat".to_string(),
        ));
    }
    if chat.linked_group_id.is_some() {
        return Err(EngineError::InvalidArgument(
            "membership of this chat is managed through its linked group".to_string(),
        ));
    }
    Ok(())
}

impl<G: MediaGateway> Engine<G> {
    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Return the existing direct chat between two users, or create it.
    pub async fn create_or_access_direct_chat(&self, a: Uuid, b: Uuid) -> Result<Chat> {
        if a == b {
            return Err(EngineError::InvalidArgument(
                "a direct chat needs two distinct users".to_string(),
            ));
        }

        let db = self.db()?;
        db.get_user(a)?;
        db.get_user(b)?;

        if let Some(existing) = db.find_direct_chat_between(a, b)? {
            return Ok(existing);
        }

        let chat = Chat {
            id: Uuid::new_v4(),
            name: None,
            is_group: false,
            admin_id: None,
            linked_group_id: None,
            latest_message_id: None,
            revision: 0,
            created_at: Utc::now(),
        };
        db.create_chat(&chat)?;
        db.insert_chat_member_if_absent(chat.id, a, ChatRole::Member)?;
        db.insert_chat_member_if_absent(chat.id, b, ChatRole::Member)?;

        info!(chat = %chat.id, "Direct chat created");
        Ok(chat)
    }

    /// Create a standalone group chat with the creator as admin.
    pub async fn create_group_chat(&self, new: NewGroupChat) -> Result<Chat> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidArgument("chat name is required".to_string()));
        }

        let chat = Chat {
            id: Uuid::new_v4(),
            name: Some(name.to_string()),
            is_group: true,
            admin_id: Some(new.creator_id),
            linked_group_id: None,
            latest_message_id: None,
            revision: 0,
            created_at: Utc::now(),
        };

        {
            let db = self.db()?;
            db.get_user(new.creator_id)?;
            for member in &new.member_ids {
                db.get_user(*member)?;
            }
            db.create_chat(&chat)?;
            db.insert_chat_member_if_absent(chat.id, new.creator_id, ChatRole::Admin)?;
            for member in &new.member_ids {
                if *member != new.creator_id {
                    db.insert_chat_member_if_absent(chat.id, *member, ChatRole::Member)?;
                }
            }
        }

        info!(chat = %chat.id, creator = %new.creator_id, "Group chat created");
        Ok(chat)
    }

    // ------------------------------------------------------------------
    // Join requests
    // ------------------------------------------------------------------

    /// Queue a join request on a standalone group chat.
    pub async fn request_to_join_chat(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        message: Option<String>,
    ) -> Result<Vec<JoinRequest>> {
        for _ in 0..MAX_TRANSITION_RETRIES {
            let (chat, member, existing) = {
                let db = self.db()?;
                db.get_user(user_id)?;
                let chat = db.get_chat(chat_id)?;
                let member = db.get_chat_member(chat_id, user_id)?;
                let existing = db.get_chat_join_request(chat_id, user_id)?;
                (chat, member, existing)
            };
            require_standalone_group_chat(&chat)?;

            if member.is_some() {
                return Err(EngineError::Conflict(
                    "user is already a member of this chat".to_string(),
                ));
            }
            if existing.is_some() {
                return Err(EngineError::Conflict(
                    "user already has a pending join request".to_string(),
                ));
            }

            let request = JoinRequest {
                chat_id,
                user_id,
                message: message.clone().unwrap_or_default(),
                created_at: Utc::now(),
            };
            let applied = self.db()?.add_chat_join_request(&request, chat.revision)?;
            if !applied {
                continue;
            }

            info!(chat = %chat_id, user = %user_id, "Chat join requested");
            return Ok(self.db()?.list_chat_join_requests(chat_id)?);
        }
        Err(stale_chat(chat_id))
    }

    /// The chat admin approves or rejects a pending join request.
    pub async fn respond_to_chat_join_request(
        &self,
        chat_id: Uuid,
        admin_id: Uuid,
        target_id: Uuid,
        decision: RequestDecision,
    ) -> Result<Vec<ChatMember>> {
        for _ in 0..MAX_TRANSITION_RETRIES {
            let (chat, request) = {
                let db = self.db()?;
                (db.get_chat(chat_id)?, db.get_chat_join_request(chat_id, target_id)?)
            };
            require_standalone_group_chat(&chat)?;

            if chat.admin_id != Some(admin_id) {
                return Err(EngineError::Forbidden(
                    "only the chat admin can respond to join requests".to_string(),
                ));
            }
            if request.is_none() {
                return Err(EngineError::NotFound(
                    "no pending join request for this user".to_string(),
                ));
            }

            let applied = {
                let mut db = self.db()?;
                match decision {
                    RequestDecision::Approve => {
                        db.approve_chat_join_request(chat_id, target_id, chat.revision)?
                    }
                    RequestDecision::Reject => {
                        db.remove_chat_join_request(chat_id, target_id, chat.revision)?
                    }
                }
            };
            if !applied {
                continue;
            }

            info!(chat = %chat_id, user = %target_id, ?decision, "Chat join request resolved");
            return self.publish_chat_members(chat_id);
        }
        Err(stale_chat(chat_id))
    }

    // ------------------------------------------------------------------
    // Removal & leaving
    // ------------------------------------------------------------------

    /// The chat admin removes a member.
    pub async fn remove_chat_member(
        &self,
        chat_id: Uuid,
        admin_id: Uuid,
        target_id: Uuid,
    ) -> Result<Vec<ChatMember>> {
        for _ in 0..MAX_TRANSITION_RETRIES {
            let (chat, member) = {
                let db = self.db()?;
                (db.get_chat(chat_id)?, db.get_chat_member(chat_id, target_id)?)
            };
            require_standalone_group_chat(&chat)?;

            if chat.admin_id != Some(admin_id) {
                return Err(EngineError::Forbidden(
                    "only the chat admin can remove members".to_string(),
                ));
            }
            if target_id == admin_id {
                return Err(EngineError::InvalidArgument(
                    "the admin cannot remove themself; leave the chat instead".to_string(),
                ));
            }
            if member.is_none() {
                return Err(EngineError::NotFound(
                    "user is not a member of this chat".to_string(),
                ));
            }

            let applied = self.db()?.remove_chat_member(chat_id, target_id, chat.revision)?;
            if !applied {
                continue;
            }

            info!(chat = %chat_id, user = %target_id, "Chat member removed");
            return self.publish_chat_members(chat_id);
        }
        Err(stale_chat(chat_id))
    }

    /// A member leaves a standalone group chat.  A departing admin hands
    /// the role to the next member in join order; the last member's
    /// departure deletes the chat and its messages.
    pub async fn leave_chat(&self, chat_id: Uuid, user_id: Uuid) -> Result<ChatLeaveOutcome> {
        for _ in 0..MAX_TRANSITION_RETRIES {
            let (chat, members) = {
                let db = self.db()?;
                (db.get_chat(chat_id)?, db.list_chat_members(chat_id)?)
            };
            require_standalone_group_chat(&chat)?;

            if !members.iter().any(|m| m.user_id == user_id) {
                return Err(EngineError::InvalidArgument(
                    "user is not a member of this chat".to_string(),
                ));
            }

            if chat.admin_id == Some(user_id) {
                match next_chat_admin(&members, user_id) {
                    Some(new_admin) => {
                        let applied = self.db()?.transfer_chat_admin(
                            chat_id,
                            new_admin,
                            Some(user_id),
                            chat.revision,
                        )?;
                        if !applied {
                            continue;
                        }
                        info!(chat = %chat_id, user = %user_id, new_admin = %new_admin, "Chat admin left, role handed off");
                        let members = self.publish_chat_members(chat_id)?;
                        return Ok(ChatLeaveOutcome::AdminTransferred { new_admin, members });
                    }
                    None => {
                        let summary = self.delete_chat_closure(&chat).await?;
                        info!(chat = %chat_id, user = %user_id, "Last member left, chat deleted");
                        return Ok(ChatLeaveOutcome::ChatDeleted(summary));
                    }
                }
            }

            let applied = self.db()?.remove_chat_member(chat_id, user_id, chat.revision)?;
            if !applied {
                continue;
            }
            info!(chat = %chat_id, user = %user_id, "Chat member left");
            let members = self.publish_chat_members(chat_id)?;
            return Ok(ChatLeaveOutcome::Left(members));
        }
        Err(stale_chat(chat_id))
    }

    /// Read the current member list and emit a membership-changed event.
    pub(crate) fn publish_chat_members(&self, chat_id: Uuid) -> Result<Vec<ChatMember>> {
        let members = self.db()?.list_chat_members(chat_id)?;
        self.notifier
            .membership_changed(EntityKind::Chat, chat_id, chat_member_summaries(&members));
        Ok(members)
    }
}

fn stale_chat(chat_id: Uuid) -> EngineError {
    EngineError::Conflict(format!(
        "chat {chat_id} was modified concurrently too many times; retry"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestBed;

    #[tokio::test]
    async fn direct_chat_is_created_once() {
        let bed = TestBed::new().await;
        let a = bed.user("a").await;
        let b = bed.user("b").await;

        let first = bed.engine.create_or_access_direct_chat(a.id, b.id).await.unwrap();
        let second = bed.engine.create_or_access_direct_chat(b.id, a.id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(!first.is_group);

        let err = bed
            .engine
            .create_or_access_direct_chat(a.id, a.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn join_request_flow_on_standalone_chat() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let joiner = bed.user("joiner").await;

        let chat = bed
            .engine
            .create_group_chat(NewGroupChat {
                name: "Patagonia 2027".to_string(),
                creator_id: admin.id,
                member_ids: vec![],
            })
            .await
            .unwrap();

        let requests = bed
            .engine
            .request_to_join_chat(chat.id, joiner.id, Some("room for one more?".to_string()))
            .await
            .unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].message, "room for one more?");

        // duplicate request conflicts
        let err = bed
            .engine
            .request_to_join_chat(chat.id, joiner.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        // only the admin may respond
        let err = bed
            .engine
            .respond_to_chat_join_request(chat.id, joiner.id, joiner.id, RequestDecision::Approve)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let members = bed
            .engine
            .respond_to_chat_join_request(chat.id, admin.id, joiner.id, RequestDecision::Approve)
            .await
            .unwrap();
        assert!(members.iter().any(|m| m.user_id == joiner.id));
        assert!(bed
            .engine
            .db()
            .unwrap()
            .get_chat_join_request(chat.id, joiner.id)
            .unwrap()
            .is_none());

        // a member requesting again conflicts as "already a member"
        let err = bed
            .engine
            .request_to_join_chat(chat.id, joiner.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn linked_chat_rejects_direct_membership_ops() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let joiner = bed.user("joiner").await;
        let group = bed.group(admin.id, true).await;
        let chat_id = group.linked_chat_id.unwrap();

        let err = bed
            .engine
            .request_to_join_chat(chat_id, joiner.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));

        let err = bed.engine.leave_chat(chat_id, admin.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn chat_admin_handoff_follows_join_order() {
        let bed = TestBed::new().await;
        let a = bed.user("a").await;
        let b = bed.user("b").await;
        let c = bed.user("c").await;

        let chat = bed
            .engine
            .create_group_chat(NewGroupChat {
                name: "hiking".to_string(),
                creator_id: a.id,
                member_ids: vec![b.id, c.id],
            })
            .await
            .unwrap();

        let outcome = bed.engine.leave_chat(chat.id, a.id).await.unwrap();
        let ChatLeaveOutcome::AdminTransferred { new_admin, members } = outcome else {
            panic!("expected admin transfer");
        };
        assert_eq!(new_admin, b.id);
        assert_eq!(members.len(), 2);

        let loaded = bed.engine.db().unwrap().get_chat(chat.id).unwrap();
        assert_eq!(loaded.admin_id, Some(b.id));
    }

    #[tokio::test]
    async fn last_member_leaving_deletes_chat_and_messages() {
        let bed = TestBed::new().await;
        let a = bed.user("a").await;

        let chat = bed
            .engine
            .create_group_chat(NewGroupChat {
                name: "solo".to_string(),
                creator_id: a.id,
                member_ids: vec![],
            })
            .await
            .unwrap();
        bed.engine
            .send_message(chat.id, a.id, "hello?".to_string())
            .await
            .unwrap();

        let outcome = bed.engine.leave_chat(chat.id, a.id).await.unwrap();
        let ChatLeaveOutcome::ChatDeleted(summary) = outcome else {
            panic!("expected chat deletion");
        };
        assert_eq!(summary.messages, 1);
        assert!(bed.engine.db().unwrap().get_chat(chat.id).is_err());
    }

    #[tokio::test]
    async fn remove_chat_member_rules() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let member = bed.user("member").await;

        let chat = bed
            .engine
            .create_group_chat(NewGroupChat {
                name: "rules".to_string(),
                creator_id: admin.id,
                member_ids: vec![member.id],
            })
            .await
            .unwrap();

        let err = bed
            .engine
            .remove_chat_member(chat.id, member.id, admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let err = bed
            .engine
            .remove_chat_member(chat.id, admin.id, admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));

        let members = bed
            .engine
            .remove_chat_member(chat.id, admin.id, member.id)
            .await
            .unwrap();
        assert!(!members.iter().any(|m| m.user_id == member.id));

        let err = bed
            .engine
            .remove_chat_member(chat.id, admin.id, member.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
