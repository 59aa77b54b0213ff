use std::sync::Arc;

use crate::config::Config;
use crate::playback::RelayHub;
use crate::viewer::Viewer;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Camera list, selection, aspect model and playback supervisor.
    pub viewer: Arc<Viewer>,
    /// Command queues and event intake for host-side players.
    pub relay: RelayHub,
}
