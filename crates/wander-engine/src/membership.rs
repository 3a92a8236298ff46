//! Group membership state machine.
//!
//! Per `(group, user)` pair the states are `none → pending_approval →
//! approved | none` on the user-initiated path and `none → pending →
//! approved | none` on the admin-initiated invite path; `approved` and
//! `none` are terminal.
//!
//! Every operation is a read-validate-write cycle: it re-reads the group
//! and the membership entry, checks its preconditions, and commits through
//! a store helper that compare-and-bumps the group's revision.  Losing the
//! revision race re-runs the whole cycle, so two admins acting on the same
//! group at once (approve vs. remove, leave vs. remove) serialize instead
//! of losing updates.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use wander_media::MediaGateway;
use wander_shared::{EntityKind, MediaRef, MemberSummary};
use wander_store::{Chat, ChatRole, Group, GroupMember, MembershipStatus};

use crate::deletion::DeletionSummary;
use crate::error::{EngineError, Result};
use crate::{Engine, MAX_TRANSITION_RETRIES};

/// Parameters for [`Engine::create_group`].
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub name: String,
    pub description: Option<String>,
    /// cca3 codes of the countries the group is about.
    pub countries: Vec<String>,
    pub is_private: bool,
    pub image: Option<MediaRef>,
    pub admin_id: Uuid,
}

/// Admin's decision on a pending join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    Approve,
    Reject,
}

/// Invitee's response to a pending invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteResponse {
    Accept,
    Decline,
}

/// What happened when a member left a group.
#[derive(Debug)]
pub enum LeaveOutcome {
    /// A regular member left; the remaining member list.
    Left(Vec<GroupMember>),
    /// The admin left and the role moved to the next member in join order.
    AdminTransferred {
        new_admin: Uuid,
        members: Vec<GroupMember>,
    },
    /// The last approved member left; the group and everything hanging off
    /// it was deleted.
    GroupDeleted(DeletionSummary),
}

/// Internal result of [`Engine::remove_membership_with_handoff`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HandoffOutcome {
    /// A non-admin entry was removed (group and mirror updated).
    Removed,
    /// The departing user was admin; the role moved to this user.
    Transferred(Uuid),
    /// The departing user was the last approved member; nothing was
    /// written — the caller must run the group-deletion closure.
    LastMember,
}

/// Deterministic admin handoff: the first remaining approved member in
/// join order becomes the new admin.
pub fn next_admin(members: &[GroupMember], leaving: Uuid) -> Option<Uuid> {
    members
        .iter()
        .filter(|m| m.user_id != leaving && m.status == MembershipStatus::Approved)
        .min_by_key(|m| m.position)
        .map(|m| m.user_id)
}

pub(crate) fn member_summaries(members: &[GroupMember]) -> Vec<MemberSummary> {
    members
        .iter()
        .map(|m| MemberSummary {
            user_id: m.user_id,
            state: m.status.as_str().to_string(),
        })
        .collect()
}

impl<G: MediaGateway> Engine<G> {
    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a group together with its linked group chat.
    ///
    /// The handshake writes group, membership entry, chat, chat membership,
    /// and finally the `linked_chat_id` cross-reference.  A crash in
    /// between leaves a detectably-inconsistent state that
    /// [`Engine::repair_links`] reconciles; it never leaves a chat that
    /// considers itself linked to a group holding a different link.
    pub async fn create_group(&self, new: NewGroup) -> Result<Group> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidArgument("group name is required".to_string()));
        }

        let now = Utc::now();
        let group = Group {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: new.description,
            countries: new.countries,
            admin_id: new.admin_id,
            is_private: new.is_private,
            image: new.image,
            linked_chat_id: None,
            revision: 0,
            created_at: now,
        };
        let chat = Chat {
            id: Uuid::new_v4(),
            name: Some(group.name.clone()),
            is_group: true,
            admin_id: Some(new.admin_id),
            linked_group_id: Some(group.id),
            latest_message_id: None,
            revision: 0,
            created_at: now,
        };

        {
            let mut db = self.db()?;
            db.get_user(new.admin_id)?; // admin must exist
            db.create_group(&group)?;
            db.add_group_member(group.id, new.admin_id, MembershipStatus::Approved, 0)?;
            db.create_chat(&chat)?;
            db.insert_chat_member_if_absent(chat.id, new.admin_id, ChatRole::Admin)?;
            db.set_group_linked_chat(group.id, Some(chat.id))?;
        }

        info!(group = %group.id, chat = %chat.id, admin = %new.admin_id, "Group created");

        Ok(Group {
            linked_chat_id: Some(chat.id),
            revision: 1,
            ..group
        })
    }

    // ------------------------------------------------------------------
    // Join requests
    // ------------------------------------------------------------------

    /// A user asks to join a group.
    ///
    /// Public groups admit immediately (and mirror into the linked chat);
    /// private groups queue a `pending_approval` entry.  Any existing entry
    /// of any status is a conflict.
    pub async fn request_to_join(&self, group_id: Uuid, user_id: Uuid) -> Result<Vec<GroupMember>> {
        for _ in 0..MAX_TRANSITION_RETRIES {
            let (group, entry) = {
                let db = self.db()?;
                db.get_user(user_id)?;
                (db.get_group(group_id)?, db.get_group_member(group_id, user_id)?)
            };

            if entry.is_some() {
                return Err(EngineError::Conflict(
                    "user already has a membership entry for this group".to_string(),
                ));
            }

            let status = if group.is_private {
                MembershipStatus::PendingApproval
            } else {
                MembershipStatus::Approved
            };

            let applied = self
                .db()?
                .add_group_member(group_id, user_id, status, group.revision)?;
            if !applied {
                continue;
            }

            if status == MembershipStatus::Approved {
                self.mirror_member_added(&group, user_id)?;
            }

            info!(group = %group_id, user = %user_id, status = status.as_str(), "Join requested");
            return self.publish_group_members(group_id);
        }
        Err(stale_group(group_id))
    }

    /// The admin approves or rejects a pending join request.
    pub async fn respond_to_join_request(
        &self,
        group_id: Uuid,
        admin_id: Uuid,
        target_id: Uuid,
        decision: RequestDecision,
    ) -> Result<Vec<GroupMember>> {
        for _ in 0..MAX_TRANSITION_RETRIES {
            let (group, entry) = {
                let db = self.db()?;
                (db.get_group(group_id)?, db.get_group_member(group_id, target_id)?)
            };

            if group.admin_id != admin_id {
                return Err(EngineError::Forbidden(
                    "only the group admin can respond to join requests".to_string(),
                ));
            }
            match entry {
                Some(e) if e.status == MembershipStatus::PendingApproval => {}
                _ => {
                    return Err(EngineError::NotFound(
                        "no pending join request for this user".to_string(),
                    ))
                }
            }

            let applied = {
                let mut db = self.db()?;
                match decision {
                    RequestDecision::Approve => db.set_group_member_status(
                        group_id,
                        target_id,
                        MembershipStatus::Approved,
                        group.revision,
                    )?,
                    RequestDecision::Reject => {
                        db.remove_group_member(group_id, target_id, group.revision)?
                    }
                }
            };
            if !applied {
                continue;
            }

            if decision == RequestDecision::Approve {
                self.mirror_member_added(&group, target_id)?;
            }

            info!(group = %group_id, user = %target_id, ?decision, "Join request resolved");
            return self.publish_group_members(group_id);
        }
        Err(stale_group(group_id))
    }

    // ------------------------------------------------------------------
    // Invitations
    // ------------------------------------------------------------------

    /// The admin invites a user; creates a `pending` entry.
    pub async fn invite_user(
        &self,
        group_id: Uuid,
        admin_id: Uuid,
        invitee_id: Uuid,
    ) -> Result<Vec<GroupMember>> {
        for _ in 0..MAX_TRANSITION_RETRIES {
            let (group, entry) = {
                let db = self.db()?;
                db.get_user(invitee_id)?;
                (db.get_group(group_id)?, db.get_group_member(group_id, invitee_id)?)
            };

            if group.admin_id != admin_id {
                return Err(EngineError::Forbidden(
                    "only the group admin can invite users".to_string(),
                ));
            }
            if entry.is_some() {
                return Err(EngineError::Conflict(
                    "user is already a member or has a pending entry".to_string(),
                ));
            }

            let applied = self.db()?.add_group_member(
                group_id,
                invitee_id,
                MembershipStatus::Pending,
                group.revision,
            )?;
            if !applied {
                continue;
            }

            info!(group = %group_id, invitee = %invitee_id, "User invited");
            return self.publish_group_members(group_id);
        }
        Err(stale_group(group_id))
    }

    /// The invitee accepts or declines a pending invitation.
    pub async fn respond_to_invitation(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        response: InviteResponse,
    ) -> Result<Vec<GroupMember>> {
        for _ in 0..MAX_TRANSITION_RETRIES {
            let (group, entry) = {
                let db = self.db()?;
                (db.get_group(group_id)?, db.get_group_member(group_id, user_id)?)
            };

            match entry {
                Some(e) if e.status == MembershipStatus::Pending => {}
                _ => {
                    return Err(EngineError::NotFound(
                        "no pending invitation for this user".to_string(),
                    ))
                }
            }

            let applied = {
                let mut db = self.db()?;
                match response {
                    InviteResponse::Accept => db.set_group_member_status(
                        group_id,
                        user_id,
                        MembershipStatus::Approved,
                        group.revision,
                    )?,
                    InviteResponse::Decline => {
                        db.remove_group_member(group_id, user_id, group.revision)?
                    }
                }
            };
            if !applied {
                continue;
            }

            if response == InviteResponse::Accept {
                self.mirror_member_added(&group, user_id)?;
            }

            info!(group = %group_id, user = %user_id, ?response, "Invitation resolved");
            return self.publish_group_members(group_id);
        }
        Err(stale_group(group_id))
    }

    // ------------------------------------------------------------------
    // Removal & leaving
    // ------------------------------------------------------------------

    /// The admin removes a member (any status).  The admin cannot remove
    /// themself; that is the leave/transfer path.
    pub async fn remove_member(
        &self,
        group_id: Uuid,
        admin_id: Uuid,
        target_id: Uuid,
    ) -> Result<Vec<GroupMember>> {
        for _ in 0..MAX_TRANSITION_RETRIES {
            let (group, entry) = {
                let db = self.db()?;
                (db.get_group(group_id)?, db.get_group_member(group_id, target_id)?)
            };

            if group.admin_id != admin_id {
                return Err(EngineError::Forbidden(
                    "only the group admin can remove members".to_string(),
                ));
            }
            if target_id == admin_id {
                return Err(EngineError::InvalidArgument(
                    "the admin cannot remove themself; leave the group instead".to_string(),
                ));
            }
            if entry.is_none() {
                return Err(EngineError::NotFound(
                    "user has no membership entry in this group".to_string(),
                ));
            }

            let applied = self
                .db()?
                .remove_group_member(group_id, target_id, group.revision)?;
            if !applied {
                continue;
            }

            self.mirror_member_removed(&group, target_id)?;

            info!(group = %group_id, user = %target_id, "Member removed");
            return self.publish_group_members(group_id);
        }
        Err(stale_group(group_id))
    }

    /// A member leaves the group.
    ///
    /// A departing admin hands the role to the first remaining approved
    /// member in join order; if nobody remains, the group and everything
    /// hanging off it is deleted.
    pub async fn leave(&self, group_id: Uuid, user_id: Uuid) -> Result<LeaveOutcome> {
        let entry = self.db()?.get_group_member(group_id, user_id)?;
        match entry {
            Some(e) if e.status == MembershipStatus::Approved => {}
            _ => {
                return Err(EngineError::InvalidArgument(
                    "user is not an approved member of this group".to_string(),
                ))
            }
        }

        match self.remove_membership_with_handoff(group_id, user_id)? {
            HandoffOutcome::Removed => {
                info!(group = %group_id, user = %user_id, "Member left");
                let members = self.publish_group_members(group_id)?;
                Ok(LeaveOutcome::Left(members))
            }
            HandoffOutcome::Transferred(new_admin) => {
                info!(group = %group_id, user = %user_id, new_admin = %new_admin, "Admin left, role handed off");
                let members = self.publish_group_members(group_id)?;
                Ok(LeaveOutcome::AdminTransferred { new_admin, members })
            }
            HandoffOutcome::LastMember => {
                let group = self.db()?.get_group(group_id)?;
                let summary = self.delete_group_closure(&group).await?;
                info!(group = %group_id, user = %user_id, "Last member left, group deleted");
                Ok(LeaveOutcome::GroupDeleted(summary))
            }
        }
    }

    /// Remove `user_id`'s membership entry, handing off the admin role when
    /// needed.  Shared by [`Engine::leave`] and the user-deletion closure;
    /// mirrors every change into the linked chat.
    pub(crate) fn remove_membership_with_handoff(
        &self,
        group_id: Uuid,
        user_id: Uuid,
    ) -> Result<HandoffOutcome> {
        for _ in 0..MAX_TRANSITION_RETRIES {
            let (group, members) = {
                let db = self.db()?;
                (db.get_group(group_id)?, db.list_group_members(group_id)?)
            };

            if group.admin_id != user_id {
                let applied = self
                    .db()?
                    .remove_group_member(group_id, user_id, group.revision)?;
                if !applied {
                    continue;
                }
                self.mirror_member_removed(&group, user_id)?;
                return Ok(HandoffOutcome::Removed);
            }

            match next_admin(&members, user_id) {
                Some(new_admin) => {
                    let applied = self.db()?.transfer_group_admin(
                        group_id,
                        new_admin,
                        Some(user_id),
                        group.revision,
                    )?;
                    if !applied {
                        continue;
                    }
                    self.mirror_admin_transferred(&group, user_id, new_admin)?;
                    self.mirror_member_removed(&group, user_id)?;
                    return Ok(HandoffOutcome::Transferred(new_admin));
                }
                None => return Ok(HandoffOutcome::LastMember),
            }
        }
        Err(stale_group(group_id))
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Read the current member list and emit a membership-changed event.
    pub(crate) fn publish_group_members(&self, group_id: Uuid) -> Result<Vec<GroupMember>> {
        let members = self.db()?.list_group_members(group_id)?;
        self.notifier
            .membership_changed(EntityKind::Group, group_id, member_summaries(&members));

        // single-admin invariant check; tolerated but loud
        let group = self.db()?.get_group(group_id)?;
        let admin_ok = members
            .iter()
            .any(|m| m.user_id == group.admin_id && m.status == MembershipStatus::Approved);
        if !admin_ok {
            warn!(group = %group_id, admin = %group.admin_id, "group admin has no approved membership entry");
        }

        Ok(members)
    }
}

fn stale_group(group_id: Uuid) -> EngineError {
    EngineError::Conflict(format!(
        "group {group_id} was modified concurrently too many times; retry"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestBed;
    use wander_shared::RealtimeEvent;

    fn approved(members: &[GroupMember]) -> Vec<Uuid> {
        members
            .iter()
            .filter(|m| m.status == MembershipStatus::Approved)
            .map(|m| m.user_id)
            .collect()
    }

    #[test]
    fn next_admin_is_first_remaining_by_join_order() {
        let gid = Uuid::new_v4();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let members = vec![
            GroupMember { group_id: gid, user_id: a, status: MembershipStatus::Approved, position: 1 },
            GroupMember { group_id: gid, user_id: b, status: MembershipStatus::Approved, position: 2 },
            GroupMember { group_id: gid, user_id: c, status: MembershipStatus::Approved, position: 3 },
        ];
        assert_eq!(next_admin(&members, a), Some(b));
        assert_eq!(next_admin(&members, b), Some(a));
    }

    #[test]
    fn next_admin_skips_non_approved_entries() {
        let gid = Uuid::new_v4();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let members = vec![
            GroupMember { group_id: gid, user_id: a, status: MembershipStatus::Approved, position: 1 },
            GroupMember { group_id: gid, user_id: b, status: MembershipStatus::Pending, position: 2 },
            GroupMember { group_id: gid, user_id: c, status: MembershipStatus::Approved, position: 3 },
        ];
        assert_eq!(next_admin(&members, a), Some(c));
        let only_pending = &members[1..2];
        assert_eq!(next_admin(only_pending, a), None);
    }

    #[tokio::test]
    async fn create_group_links_both_sides() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;

        let group = bed.group(admin.id, true).await;
        let chat_id = group.linked_chat_id.expect("linked chat set");

        let db = bed.engine.db().unwrap();
        let chat = db.get_chat(chat_id).unwrap();
        assert_eq!(chat.linked_group_id, Some(group.id));
        assert_eq!(chat.admin_id, Some(admin.id));
        assert!(chat.is_group);

        let member = db.get_group_member(group.id, admin.id).unwrap().unwrap();
        assert_eq!(member.status, MembershipStatus::Approved);
        let chat_member = db.get_chat_member(chat_id, admin.id).unwrap().unwrap();
        assert_eq!(chat_member.role, ChatRole::Admin);
    }

    #[tokio::test]
    async fn private_join_request_then_approval_mirrors_into_chat() {
        let mut bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let visitor = bed.user("visitor").await;
        let group = bed.group(admin.id, true).await;
        let chat_id = group.linked_chat_id.unwrap();
        bed.drain_events();

        let members = bed.engine.request_to_join(group.id, visitor.id).await.unwrap();
        let entry = members.iter().find(|m| m.user_id == visitor.id).unwrap();
        assert_eq!(entry.status, MembershipStatus::PendingApproval);
        // no chat mirror yet
        assert!(bed
            .engine
            .db()
            .unwrap()
            .get_chat_member(chat_id, visitor.id)
            .unwrap()
            .is_none());

        let members = bed
            .engine
            .respond_to_join_request(group.id, admin.id, visitor.id, RequestDecision::Approve)
            .await
            .unwrap();
        assert!(approved(&members).contains(&visitor.id));

        let chat_member = bed
            .engine
            .db()
            .unwrap()
            .get_chat_member(chat_id, visitor.id)
            .unwrap()
            .expect("mirrored into chat");
        assert_eq!(chat_member.role, ChatRole::Member);

        let changed = bed
            .events()
            .iter()
            .filter(|e| matches!(e, RealtimeEvent::MembershipChanged { .. }))
            .count();
        assert_eq!(changed, 2);
    }

    #[tokio::test]
    async fn second_join_request_conflicts() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let visitor = bed.user("visitor").await;
        let group = bed.group(admin.id, true).await;

        bed.engine.request_to_join(group.id, visitor.id).await.unwrap();
        let err = bed.engine.request_to_join(group.id, visitor.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        // still exactly one entry
        let members = bed.engine.db().unwrap().list_group_members(group.id).unwrap();
        assert_eq!(members.iter().filter(|m| m.user_id == visitor.id).count(), 1);
    }

    #[tokio::test]
    async fn public_group_admits_directly() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let visitor = bed.user("visitor").await;
        let group = bed.group(admin.id, false).await;

        let members = bed.engine.request_to_join(group.id, visitor.id).await.unwrap();
        assert!(approved(&members).contains(&visitor.id));
        assert!(bed
            .engine
            .db()
            .unwrap()
            .get_chat_member(group.linked_chat_id.unwrap(), visitor.id)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn invitation_flow() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let invitee = bed.user("invitee").await;
        let decliner = bed.user("decliner").await;
        let group = bed.group(admin.id, true).await;

        // non-admin cannot invite
        let err = bed
            .engine
            .invite_user(group.id, invitee.id, decliner.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let members = bed.engine.invite_user(group.id, admin.id, invitee.id).await.unwrap();
        assert_eq!(
            members.iter().find(|m| m.user_id == invitee.id).unwrap().status,
            MembershipStatus::Pending
        );

        // duplicate invite conflicts
        let err = bed.engine.invite_user(group.id, admin.id, invitee.id).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        let members = bed
            .engine
            .respond_to_invitation(group.id, invitee.id, InviteResponse::Accept)
            .await
            .unwrap();
        assert!(approved(&members).contains(&invitee.id));

        bed.engine.invite_user(group.id, admin.id, decliner.id).await.unwrap();
        let members = bed
            .engine
            .respond_to_invitation(group.id, decliner.id, InviteResponse::Decline)
            .await
            .unwrap();
        assert!(!members.iter().any(|m| m.user_id == decliner.id));

        // declining again: the entry is gone
        let err = bed
            .engine
            .respond_to_invitation(group.id, decliner.id, InviteResponse::Decline)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn remove_member_rules() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let member = bed.user("member").await;
        let outsider = bed.user("outsider").await;
        let group = bed.group(admin.id, false).await;
        bed.engine.request_to_join(group.id, member.id).await.unwrap();

        let err = bed
            .engine
            .remove_member(group.id, member.id, admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let err = bed
            .engine
            .remove_member(group.id, admin.id, admin.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));

        let err = bed
            .engine
            .remove_member(group.id, admin.id, outsider.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let members = bed
            .engine
            .remove_member(group.id, admin.id, member.id)
            .await
            .unwrap();
        assert!(!members.iter().any(|m| m.user_id == member.id));
        assert!(bed
            .engine
            .db()
            .unwrap()
            .get_chat_member(group.linked_chat_id.unwrap(), member.id)
            .unwrap()
            .is_none());

        // removing again: NotFound, never a crash
        let err = bed
            .engine
            .remove_member(group.id, admin.id, member.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn admin_leave_hands_off_deterministically() {
        let bed = TestBed::new().await;
        let a = bed.user("a").await;
        let b = bed.user("b").await;
        let c = bed.user("c").await;
        let group = bed.group(a.id, false).await;
        bed.engine.request_to_join(group.id, b.id).await.unwrap();
        bed.engine.request_to_join(group.id, c.id).await.unwrap();

        let outcome = bed.engine.leave(group.id, a.id).await.unwrap();
        let LeaveOutcome::AdminTransferred { new_admin, members } = outcome else {
            panic!("expected admin transfer");
        };
        assert_eq!(new_admin, b.id);
        assert!(!members.iter().any(|m| m.user_id == a.id));

        let db = bed.engine.db().unwrap();
        assert_eq!(db.get_group(group.id).unwrap().admin_id, b.id);

        let chat = db.get_chat(group.linked_chat_id.unwrap()).unwrap();
        assert_eq!(chat.admin_id, Some(b.id));
        let admins: Vec<_> = db
            .list_chat_members(chat.id)
            .unwrap()
            .into_iter()
            .filter(|m| m.role == ChatRole::Admin)
            .collect();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].user_id, b.id);
    }

    #[tokio::test]
    async fn leave_requires_approved_membership() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let invitee = bed.user("invitee").await;
        let group = bed.group(admin.id, true).await;
        bed.engine.invite_user(group.id, admin.id, invitee.id).await.unwrap();

        // a merely invited user cannot "leave"
        let err = bed.engine.leave(group.id, invitee.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn mirror_is_a_noop_when_the_chat_vanished() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let visitor = bed.user("visitor").await;
        let group = bed.group(admin.id, false).await;
        let chat_id = group.linked_chat_id.unwrap();
        bed.engine.db().unwrap().delete_chat(chat_id).unwrap();

        // the group mutation still succeeds, and the mirror neither fails
        // nor recreates the chat; the stale link is left for the repair pass
        let members = bed.engine.request_to_join(group.id, visitor.id).await.unwrap();
        assert!(approved(&members).contains(&visitor.id));

        let db = bed.engine.db().unwrap();
        assert!(db.find_chat_by_linked_group(group.id).unwrap().is_none());
        assert_eq!(db.get_group(group.id).unwrap().linked_chat_id, Some(chat_id));
    }

    #[tokio::test]
    async fn last_member_leave_deletes_group_and_chat() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let group = bed.group(admin.id, true).await;
        let chat_id = group.linked_chat_id.unwrap();

        let outcome = bed.engine.leave(group.id, admin.id).await.unwrap();
        assert!(matches!(outcome, LeaveOutcome::GroupDeleted(_)));

        let db = bed.engine.db().unwrap();
        assert!(db.get_group(group.id).is_err());
        assert!(db.get_chat(chat_id).is_err());
        assert!(db.list_group_memberships_for_user(admin.id).unwrap().is_empty());
    }
}
