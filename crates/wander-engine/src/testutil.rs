//! Shared fixtures for the engine test modules.

use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

use wander_media::FsMediaGateway;
use wander_shared::RealtimeEvent;
use wander_store::{Database, Group, User};

use crate::membership::NewGroup;
use crate::notify::Notifier;
use crate::social::NewUser;
use crate::Engine;

pub(crate) struct TestBed {
    pub engine: Engine<FsMediaGateway>,
    rx: mpsc::Receiver<RealtimeEvent>,
    _dir: TempDir,
}

impl TestBed {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(&dir.path().join("wander.db")).unwrap();
        let media = FsMediaGateway::new(dir.path().join("media")).await.unwrap();
        let (tx, rx) = mpsc::channel(64);

        Self {
            engine: Engine::new(db, media, Notifier::new(tx)),
            rx,
            _dir: dir,
        }
    }

    /// Create a user with a unique e-mail derived from `tag`.
    pub async fn user(&self, tag: &str) -> User {
        let nonce = Uuid::new_v4();
        self.engine
            .create_user(NewUser {
                auth_uid: format!("auth-{nonce}"),
                full_name: Some(tag.to_string()),
                email: format!("{tag}-{nonce}@example.com"),
                birth_date: None,
                origin_country: None,
                gender: None,
                profile_image: None,
            })
            .await
            .unwrap()
    }

    /// Create a group (and its linked chat) administered by `admin`.
    pub async fn group(&self, admin: Uuid, is_private: bool) -> Group {
        self.engine
            .create_group(NewGroup {
                name: "Test Trekkers".to_string(),
                description: None,
                countries: vec!["NOR".to_string()],
                is_private,
                image: None,
                admin_id: admin,
            })
            .await
            .unwrap()
    }

    /// Discard everything emitted so far.
    pub fn drain_events(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Collect everything emitted so far.
    pub fn events(&mut self) -> Vec<RealtimeEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = self.rx.try_recv() {
            events.push(ev);
        }
        events
    }
}
