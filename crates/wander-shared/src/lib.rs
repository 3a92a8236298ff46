//! # wander-shared
//!
//! Types shared between the store, the media gateway, and the engine:
//! media blob descriptors and the realtime event payloads handed to the
//! delivery layer.

pub mod events;
pub mod types;

pub use events::{EntityKind, MemberSummary, RealtimeEvent};
pub use types::MediaRef;
