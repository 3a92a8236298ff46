//! # wander-repair
//!
//! Maintenance binary for the Wander backend: reconciles the group↔chat
//! cross-links after a crashed creation handshake or a half-applied mirror.
//!
//! The pass re-links one-sided references, rebuilds a missing mirror chat
//! from the group's approved member set, deletes mirror chats whose group
//! no longer exists, and re-syncs chat member lists and admin roles to the
//! group's authoritative state.  Run with `REPAIR_DRY_RUN=true` to report
//! without writing.

mod config;

use tracing::info;
use tracing_subscriber::EnvFilter;

use wander_engine::{Engine, Notifier};
use wander_media::FsMediaGateway;
use wander_store::Database;

use crate::config::RepairConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wander_repair=debug")),
        )
        .init();

    info!("Starting Wander link repair v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = RepairConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store and the media gateway
    // -----------------------------------------------------------------------
    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let media = FsMediaGateway::new(config.media_root.clone()).await?;

    // -----------------------------------------------------------------------
    // 4. Run the repair pass
    // -----------------------------------------------------------------------
    // Maintenance runs emit no realtime events; clients re-sync on demand.
    let engine = Engine::new(db, media, Notifier::disabled());
    let report = engine.repair_links(config.dry_run).await?;

    info!(
        dry_run = config.dry_run,
        groups_scanned = report.groups_scanned,
        links_relinked = report.links_relinked,
        chats_rebuilt = report.chats_rebuilt,
        members_synced = report.members_synced,
        admins_restored = report.admins_restored,
        orphan_chats_deleted = report.orphan_chats_deleted,
        orphan_messages_deleted = report.orphan_messages_deleted,
        "Repair pass finished"
    );

    Ok(())
}
