//! Relay sessions: `TileSession` for players that live in the HTTP host.
//!
//! The service never decodes video itself. Commands from the supervisor are queued per
//! tile and drained by the host when it polls tile health; the host posts player events
//! back, which are fed into the session's event channel.
//!
//! Every opened session gets a fresh UUID. Events carrying an older id belong to a
//! disposed incarnation of the tile and are rejected.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::layout::Tile;
use crate::playback::session::{
    SessionEvent, SessionFactory, SessionHandle, Surface, TileSession, EVENT_CHANNEL_CAPACITY,
};

/// Oldest commands are dropped beyond this when the host stops polling.
pub const MAX_PENDING_COMMANDS: usize = 256;

/// Instruction for the host-side player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PlayerCommand {
    /// Load the stream; always the first command of a session. `audio = false` means
    /// the player must not decode audio.
    Open { locator: String, audio: bool },
    Attach { surface: String },
    Detach,
    Play,
    Stop,
    /// Last command of a session.
    Dispose,
    SetTargetAspect { aspect: Option<f32> },
}

#[derive(Debug, Error, PartialEq)]
pub enum RelayError {
    #[error("No session for tile '{0}'")]
    UnknownTile(String),

    #[error("Session {given} is stale; current session is {current}")]
    StaleSession { given: Uuid, current: Uuid },

    #[error("Session for tile '{0}' is closed")]
    Closed(String),
}

/// Commands drained in one poll.
#[derive(Debug, Clone, Serialize)]
pub struct CommandBatch {
    pub session_id: Uuid,
    pub commands: Vec<PlayerCommand>,
}

struct Pending {
    commands: VecDeque<PlayerCommand>,
    closed: bool,
}

struct RelayChannel {
    tile_id: String,
    session_id: Uuid,
    pending: Mutex<Pending>,
    events: mpsc::Sender<SessionEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RelayChannel {
    fn push(&self, command: PlayerCommand) {
        let mut pending = lock(&self.pending);
        if pending.closed {
            return;
        }
        if pending.commands.len() == MAX_PENDING_COMMANDS {
            pending.commands.pop_front();
            warn!(tile_id = %self.tile_id, "Player command queue full; dropping oldest");
        }
        if command == PlayerCommand::Dispose {
            pending.closed = true;
        }
        pending.commands.push_back(command);
    }
}

/// Registry of relay channels, one per tile. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct RelayHub {
    channels: Arc<Mutex<HashMap<String, Arc<RelayChannel>>>>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self, tile_id: &str) -> Option<Uuid> {
        lock(&self.channels).get(tile_id).map(|c| c.session_id)
    }

    /// Feeds a host-reported event into the tile's current session.
    pub fn deliver(&self, tile_id: &str, session_id: Uuid, event: SessionEvent) -> Result<(), RelayError> {
        let channel = lock(&self.channels)
            .get(tile_id)
            .cloned()
            .ok_or_else(|| RelayError::UnknownTile(tile_id.to_string()))?;

        if channel.session_id != session_id {
            return Err(RelayError::StaleSession {
                given: session_id,
                current: channel.session_id,
            });
        }
        if lock(&channel.pending).closed {
            return Err(RelayError::Closed(tile_id.to_string()));
        }

        match channel.events.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                debug!(tile_id = %tile_id, "Event channel full; dropping event");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(RelayError::Closed(tile_id.to_string())),
        }
    }

    /// Takes every queued command for the tile. A closed session is forgotten once its
    /// final commands have been drained.
    pub fn drain(&self, tile_id: &str) -> Option<CommandBatch> {
        let mut channels = lock(&self.channels);
        let channel = channels.get(tile_id)?.clone();
        let (commands, closed) = {
            let mut pending = lock(&channel.pending);
            (pending.commands.drain(..).collect::<Vec<_>>(), pending.closed)
        };
        if closed {
            channels.remove(tile_id);
        }
        Some(CommandBatch {
            session_id: channel.session_id,
            commands,
        })
    }
}

impl SessionFactory for RelayHub {
    fn open(&self, tile: &Tile) -> SessionHandle {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let channel = Arc::new(RelayChannel {
            tile_id: tile.id.clone(),
            session_id: Uuid::new_v4(),
            pending: Mutex::new(Pending {
                commands: VecDeque::new(),
                closed: false,
            }),
            events: tx,
        });
        channel.push(PlayerCommand::Open {
            locator: tile.stream_locator.clone(),
            audio: tile.audio,
        });
        debug!(tile_id = %tile.id, session_id = %channel.session_id, "Relay session opened");

        lock(&self.channels).insert(tile.id.clone(), channel.clone());
        SessionHandle {
            session: Box::new(RelaySession { channel }),
            events: rx,
        }
    }
}

struct RelaySession {
    channel: Arc<RelayChannel>,
}

impl TileSession for RelaySession {
    fn attach(&self, surface: &Surface) {
        self.channel.push(PlayerCommand::Attach {
            surface: surface.0.clone(),
        });
    }

    fn detach(&self) {
        self.channel.push(PlayerCommand::Detach);
    }

    fn play(&self) {
        self.channel.push(PlayerCommand::Play);
    }

    fn stop(&self) {
        self.channel.push(PlayerCommand::Stop);
    }

    fn dispose(&self) {
        self.channel.push(PlayerCommand::Dispose);
    }

    fn set_target_aspect(&self, aspect: Option<f32>) {
        self.channel.push(PlayerCommand::SetTargetAspect { aspect });
    }
}
