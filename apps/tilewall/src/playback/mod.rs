//! Playback: per-tile media sessions and the watchdog that keeps them alive.

pub mod handlers;
pub mod relay;
pub mod session;
pub mod supervisor;

pub use relay::{PlayerCommand, RelayError, RelayHub};
pub use session::{SessionEvent, Surface};
pub use supervisor::{PlaybackSupervisor, SupervisorConfig, TileHealth};
