//! Reconciliation of the group↔chat cross-links.
//!
//! The group-creation handshake and the mirror are multi-write sequences
//! without a surrounding transaction; a crash can leave a one-sided link, a
//! group without its mirror chat, a chat whose group is gone, or a chat
//! member list that drifted from the approved set.  This pass walks every
//! group and every linked chat and restores the invariant, treating the
//! group as the authoritative side throughout.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use wander_media::MediaGateway;
use wander_store::{Chat, ChatRole, Group, GroupMember, MembershipStatus, StoreError};

use crate::error::Result;
use crate::Engine;

/// Counts of everything a repair pass fixed (or, on a dry run, would fix).
#[derive(Debug, Default, Serialize)]
pub struct RepairReport {
    pub groups_scanned: u64,
    /// One-sided links where only the group side was missing.
    pub links_relinked: u64,
    /// Mirror chats recreated from the group's approved member set.
    pub chats_rebuilt: u64,
    /// Chat member rows added or removed to match the approved set.
    pub members_synced: u64,
    /// Chats whose admin role or pointer disagreed with the group.
    pub admins_restored: u64,
    /// Mirror chats whose group no longer exists.
    pub orphan_chats_deleted: u64,
    /// Messages deleted together with orphaned mirror chats (not counted
    /// on dry runs).
    pub orphan_messages_deleted: u64,
}

impl<G: MediaGateway> Engine<G> {
    /// Walk every group and every linked chat and reconcile the cross-links.
    ///
    /// With `dry_run` set the pass only reports what it would change.
    pub async fn repair_links(&self, dry_run: bool) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        let groups = self.db()?.list_groups()?;
        for group in &groups {
            report.groups_scanned += 1;
            self.repair_group(group, dry_run, &mut report)?;
        }

        // mirror chats that outlived their group
        let linked = self.db()?.list_linked_chats()?;
        for chat in linked {
            let Some(group_id) = chat.linked_group_id else {
                continue;
            };
            // bind before matching so the store guard is released
            let found = self.db()?.get_group(group_id);
            match found {
                Ok(_) => {}
                Err(StoreError::NotFound) => {
                    warn!(chat = %chat.id, group = %group_id, "mirror chat outlived its group; deleting");
                    report.orphan_chats_deleted += 1;
                    if !dry_run {
                        let mut db = self.db()?;
                        report.orphan_messages_deleted += db.delete_messages_for_chat(chat.id)?;
                        db.delete_chat(chat.id)?;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(report)
    }

    /// Reconcile one group against its mirror chat.
    fn repair_group(&self, group: &Group, dry_run: bool, report: &mut RepairReport) -> Result<()> {
        let (members, chat) = {
            let db = self.db()?;
            (
                db.list_group_members(group.id)?,
                db.find_chat_by_linked_group(group.id)?,
            )
        };

        let Some(chat) = chat else {
            warn!(group = %group.id, "group has no mirror chat; rebuilding");
            report.chats_rebuilt += 1;
            if !dry_run {
                self.rebuild_chat(group, &members)?;
            }
            return Ok(());
        };

        if group.linked_chat_id != Some(chat.id) {
            warn!(group = %group.id, chat = %chat.id, "one-sided link; restoring the group side");
            report.links_relinked += 1;
            if !dry_run {
                self.db()?.set_group_linked_chat(group.id, Some(chat.id))?;
            }
        }

        // member drift: the approved set is authoritative
        let approved: BTreeSet<Uuid> = members
            .iter()
            .filter(|m| m.status == MembershipStatus::Approved)
            .map(|m| m.user_id)
            .collect();
        let chat_members = self.db()?.list_chat_members(chat.id)?;
        let mirrored: BTreeSet<Uuid> = chat_members.iter().map(|m| m.user_id).collect();

        for missing in approved.difference(&mirrored) {
            warn!(chat = %chat.id, user = %missing, "approved member missing from mirror chat");
            report.members_synced += 1;
            if !dry_run {
                self.db()?
                    .insert_chat_member_if_absent(chat.id, *missing, ChatRole::Member)?;
            }
        }
        for extra in mirrored.difference(&approved) {
            warn!(chat = %chat.id, user = %extra, "mirror chat member not in approved set");
            report.members_synced += 1;
            if !dry_run {
                self.db()?.remove_chat_member_if_present(chat.id, *extra)?;
            }
        }

        // admin drift: `chats.admin_id` and exactly one admin-role entry,
        // both naming the group's admin.  Stray admin entries outside the
        // approved set were already removed by the member sync above.
        let stray_admins: Vec<Uuid> = chat_members
            .iter()
            .filter(|m| {
                m.role == ChatRole::Admin
                    && m.user_id != group.admin_id
                    && approved.contains(&m.user_id)
            })
            .map(|m| m.user_id)
            .collect();
        let admin_entry_ok = chat_members
            .iter()
            .any(|m| m.user_id == group.admin_id && m.role == ChatRole::Admin);

        if chat.admin_id != Some(group.admin_id) || !admin_entry_ok || !stray_admins.is_empty() {
            warn!(group = %group.id, chat = %chat.id, admin = %group.admin_id, "chat admin drifted; restoring");
            report.admins_restored += 1;
            if !dry_run {
                let mut db = self.db()?;
                if stray_admins.is_empty() {
                    db.set_chat_admin(chat.id, None, group.admin_id)?;
                } else {
                    for stray in stray_admins {
                        db.set_chat_admin(chat.id, Some(stray), group.admin_id)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Recreate the mirror chat of `group` from its approved member set.
    fn rebuild_chat(&self, group: &Group, members: &[GroupMember]) -> Result<()> {
        let chat = Chat {
            id: Uuid::new_v4(),
            name: Some(group.name.clone()),
            is_group: true,
            admin_id: Some(group.admin_id),
            linked_group_id: Some(group.id),
            latest_message_id: None,
            revision: 0,
            created_at: Utc::now(),
        };

        let db = self.db()?;
        db.create_chat(&chat)?;
        for member in members
            .iter()
            .filter(|m| m.status == MembershipStatus::Approved)
        {
            let role = if member.user_id == group.admin_id {
                ChatRole::Admin
            } else {
                ChatRole::Member
            };
            db.insert_chat_member_if_absent(chat.id, member.user_id, role)?;
        }
        db.set_group_linked_chat(group.id, Some(chat.id))?;

        info!(group = %group.id, chat = %chat.id, "mirror chat rebuilt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestBed;

    #[tokio::test]
    async fn clean_state_needs_no_repair() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let member = bed.user("member").await;
        let group = bed.group(admin.id, false).await;
        bed.engine.request_to_join(group.id, member.id).await.unwrap();

        let report = bed.engine.repair_links(false).await.unwrap();
        assert_eq!(report.groups_scanned, 1);
        assert_eq!(report.links_relinked, 0);
        assert_eq!(report.chats_rebuilt, 0);
        assert_eq!(report.members_synced, 0);
        assert_eq!(report.admins_restored, 0);
        assert_eq!(report.orphan_chats_deleted, 0);
    }

    #[tokio::test]
    async fn completes_a_crashed_handshake() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let group = bed.group(admin.id, true).await;
        let chat_id = group.linked_chat_id.unwrap();

        // as if the handshake died before the final linked_chat_id write
        bed.engine
            .db()
            .unwrap()
            .set_group_linked_chat(group.id, None)
            .unwrap();

        let report = bed.engine.repair_links(false).await.unwrap();
        assert_eq!(report.links_relinked, 1);

        let db = bed.engine.db().unwrap();
        assert_eq!(db.get_group(group.id).unwrap().linked_chat_id, Some(chat_id));
    }

    #[tokio::test]
    async fn rebuilds_a_vanished_chat() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let member = bed.user("member").await;
        let invitee = bed.user("invitee").await;
        let group = bed.group(admin.id, false).await;
        bed.engine.request_to_join(group.id, member.id).await.unwrap();
        bed.engine.invite_user(group.id, admin.id, invitee.id).await.unwrap();

        let old_chat = group.linked_chat_id.unwrap();
        bed.engine.db().unwrap().delete_chat(old_chat).unwrap();

        let report = bed.engine.repair_links(false).await.unwrap();
        assert_eq!(report.chats_rebuilt, 1);

        let db = bed.engine.db().unwrap();
        let chat = db
            .find_chat_by_linked_group(group.id)
            .unwrap()
            .expect("mirror chat rebuilt");
        assert_ne!(chat.id, old_chat);
        assert_eq!(chat.admin_id, Some(admin.id));
        assert_eq!(db.get_group(group.id).unwrap().linked_chat_id, Some(chat.id));

        // only approved members are mirrored; the pending invitee is not
        let members = db.list_chat_members(chat.id).unwrap();
        assert_eq!(members.len(), 2);
        assert!(members
            .iter()
            .any(|m| m.user_id == admin.id && m.role == ChatRole::Admin));
        assert!(members
            .iter()
            .any(|m| m.user_id == member.id && m.role == ChatRole::Member));
    }

    #[tokio::test]
    async fn deletes_an_orphaned_mirror_chat() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let group = bed.group(admin.id, true).await;
        let chat_id = group.linked_chat_id.unwrap();
        bed.engine
            .send_message(chat_id, admin.id, "anyone here?".to_string())
            .await
            .unwrap();

        bed.engine.db().unwrap().delete_group(group.id).unwrap();

        let report = bed.engine.repair_links(false).await.unwrap();
        assert_eq!(report.orphan_chats_deleted, 1);
        assert_eq!(report.orphan_messages_deleted, 1);
        assert!(bed.engine.db().unwrap().get_chat(chat_id).is_err());
    }

    #[tokio::test]
    async fn resyncs_members_and_admin() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let member = bed.user("member").await;
        let stranger = bed.user("stranger").await;
        let group = bed.group(admin.id, false).await;
        bed.engine.request_to_join(group.id, member.id).await.unwrap();
        let chat_id = group.linked_chat_id.unwrap();

        // drift: member row dropped, a stranger added, admin role moved
        {
            let mut db = bed.engine.db().unwrap();
            db.remove_chat_member_if_present(chat_id, member.id).unwrap();
            db.insert_chat_member_if_absent(chat_id, stranger.id, ChatRole::Member)
                .unwrap();
            db.set_chat_admin(chat_id, Some(admin.id), stranger.id).unwrap();
        }

        let report = bed.engine.repair_links(false).await.unwrap();
        assert_eq!(report.members_synced, 2);
        assert_eq!(report.admins_restored, 1);

        let db = bed.engine.db().unwrap();
        assert_eq!(db.get_chat(chat_id).unwrap().admin_id, Some(admin.id));

        let members = db.list_chat_members(chat_id).unwrap();
        assert!(members.iter().any(|m| m.user_id == member.id));
        assert!(!members.iter().any(|m| m.user_id == stranger.id));
        let admins: Vec<_> = members.iter().filter(|m| m.role == ChatRole::Admin).collect();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].user_id, admin.id);
    }

    #[tokio::test]
    async fn dry_run_reports_without_writing() {
        let bed = TestBed::new().await;
        let admin = bed.user("admin").await;
        let group = bed.group(admin.id, true).await;
        bed.engine
            .db()
            .unwrap()
            .set_group_linked_chat(group.id, None)
            .unwrap();

        let report = bed.engine.repair_links(true).await.unwrap();
        assert_eq!(report.links_relinked, 1);
        assert_eq!(
            bed.engine.db().unwrap().get_group(group.id).unwrap().linked_chat_id,
            None
        );

        // a real run fixes it; a second real run finds nothing left
        let report = bed.engine.repair_links(false).await.unwrap();
        assert_eq!(report.links_relinked, 1);
        let report = bed.engine.repair_links(false).await.unwrap();
        assert_eq!(report.links_relinked, 0);
    }
}
