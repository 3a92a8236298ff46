//! Handle for emitting realtime events to the delivery layer.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use wander_shared::{EntityKind, MemberSummary, RealtimeEvent};

/// Fire-and-forget sender half of the realtime event channel.
///
/// The delivery transport (websockets, push, ...) consumes the receiver
/// half; the engine never waits for it.  A full or closed channel drops the
/// event with a debug log.
#[derive(Clone)]
pub struct Notifier {
    tx: Option<mpsc::Sender<RealtimeEvent>>,
}

impl Notifier {
    pub fn new(tx: mpsc::Sender<RealtimeEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A notifier that discards every event.  Useful for maintenance tools
    /// and tests that do not observe events.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub(crate) fn membership_changed(
        &self,
        entity: EntityKind,
        id: Uuid,
        members: Vec<MemberSummary>,
    ) {
        self.emit(RealtimeEvent::MembershipChanged {
            entity,
            id,
            members,
        });
    }

    pub(crate) fn entity_deleted(&self, entity: EntityKind, id: Uuid) {
        self.emit(RealtimeEvent::EntityDeleted { entity, id });
    }

    pub(crate) fn message_created(
        &self,
        message_id: Uuid,
        chat_id: Uuid,
        sender_id: Uuid,
        content: String,
        sent_at: DateTime<Utc>,
    ) {
        self.emit(RealtimeEvent::MessageCreated {
            message_id,
            chat_id,
            sender_id,
            content,
            sent_at,
        });
    }

    fn emit(&self, event: RealtimeEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                debug!(error = %e, "realtime event dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_notifier_swallows_events() {
        let notifier = Notifier::disabled();
        notifier.entity_deleted(EntityKind::Post, Uuid::new_v4());
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let notifier = Notifier::new(tx);

        notifier.entity_deleted(EntityKind::Post, Uuid::new_v4());
        notifier.entity_deleted(EntityKind::Post, Uuid::new_v4()); // dropped

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
