//! Tile Session: the opaque media session a tile drives.
//!
//! Decoding, rendering and audio live behind this trait. The supervisor only issues
//! commands and listens to the event channel; it never assumes exclusive ownership of
//! decode resources, so slow starts under contention look like ordinary silence.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::layout::Tile;

/// Capacity of a session's event channel. Events are liveness signals, so a full
/// channel may drop them without losing information.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Rendering surface a session draws into, identified by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Surface(pub String);

/// Signals emitted by a media session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Playback position advanced.
    Progress { position_ms: u64 },
    /// Buffering state changed.
    Buffering { percent: f32 },
    /// Player entered the playing state.
    Playing,
    Ended,
    /// Decode or connection error. Treated as silence by the supervisor.
    Error { message: String },
    /// Aspect ratio of the decoded frames, once known.
    MeasuredAspect { ratio: f32 },
}

impl SessionEvent {
    /// Whether the event proves the stream is alive.
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            SessionEvent::Progress { .. } | SessionEvent::Buffering { .. } | SessionEvent::Playing
        )
    }
}

/// Commands the supervisor issues to a session. Synchronous: disposal must complete
/// before the supervisor returns.
pub trait TileSession: Send + Sync {
    fn attach(&self, surface: &Surface);
    fn detach(&self);
    fn play(&self);
    fn stop(&self);
    /// Releases everything; no other method is called afterwards.
    fn dispose(&self);
    /// Constrain output to `aspect` (letterbox/pillarbox), or fill the surface on `None`.
    fn set_target_aspect(&self, aspect: Option<f32>);
}

/// A freshly opened session and the receiving end of its event channel.
pub struct SessionHandle {
    pub session: Box<dyn TileSession>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Opens sessions for tiles. Provided by whoever owns the decode pipeline.
pub trait SessionFactory: Send + Sync {
    fn open(&self, tile: &Tile) -> SessionHandle;
}
