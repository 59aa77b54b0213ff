//! Viewer: ties the camera list, selection, aspect model and playback together.
//!
//! The active tile set is the selection mapped onto fetched cameras, in selection
//! order. With more than one tile on the wall every tile pulls its sub-stream; a single
//! tile gets the main stream. Only the first tile plays audio. Every change to the active
//! set is pushed into the supervisor so sessions are opened, recreated or disposed to
//! match.
//!
//! The last requested layout is remembered and re-applied whenever a measured aspect
//! changes, so target aspects follow the streams without the host asking again.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cameras::selection::{
    apply_persisted, PersistedSelection, SelectionDiff, SelectionDraft, SelectionState, SelectionStore,
};
use crate::cameras::{Camera, CameraSource, SourceError};
use crate::errors::AppError;
use crate::layout::{compute_layout, AspectModel, LayoutResult, Strategy, Tile, Viewport};
use crate::playback::PlaybackSupervisor;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ViewerState {
    pub cameras: Vec<Camera>,
    pub selection: SelectionState,
    /// Message of the last failed refresh; cleared by a successful one.
    pub error: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// NVR base URL the cameras are fetched from.
    pub source_url: String,
}

pub struct Viewer {
    source: Arc<dyn CameraSource>,
    store: Arc<dyn SelectionStore>,
    aspects: AspectModel,
    supervisor: Arc<PlaybackSupervisor>,
    state: RwLock<ViewerState>,
    last_layout: Mutex<Option<(Viewport, Strategy)>>,
}

impl Viewer {
    pub fn new(
        source: Arc<dyn CameraSource>,
        store: Arc<dyn SelectionStore>,
        aspects: AspectModel,
        supervisor: Arc<PlaybackSupervisor>,
    ) -> Self {
        Self {
            source,
            store,
            aspects,
            supervisor,
            state: RwLock::new(ViewerState::default()),
            last_layout: Mutex::new(None),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ViewerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ViewerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn aspects(&self) -> &AspectModel {
        &self.aspects
    }

    pub fn supervisor(&self) -> &PlaybackSupervisor {
        &self.supervisor
    }

    pub fn state(&self) -> ViewerState {
        ViewerState {
            source_url: self.source.base_url(),
            ..self.read().clone()
        }
    }

    /// Re-fetches the camera list and re-applies the persisted selection.
    ///
    /// On failure the previous list stays in place and the message is kept for
    /// display.
    pub async fn refresh(&self) -> Result<usize, SourceError> {
        let cameras = match self.source.fetch_cameras().await {
            Ok(cameras) => cameras,
            Err(e) => {
                warn!("Camera refresh failed: {e}");
                self.write().error = Some(e.to_string());
                return Err(e);
            }
        };

        let persisted = match self.store.load().await {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("Could not load persisted selection: {e}");
                None
            }
        };

        let count = cameras.len();
        {
            let mut state = self.write();
            state.selection = apply_persisted(&cameras, persisted.as_ref(), &state.selection);
            state.cameras = cameras;
            state.error = None;
            state.fetched_at = Some(Utc::now());
            info!(
                "Loaded {} cameras; {} selected",
                count,
                state.selection.selected.len()
            );
        }

        self.sync_tiles();
        Ok(count)
    }

    /// Points the camera source at another NVR and re-fetches from it.
    ///
    /// Every stream locator moves with the host, so all sessions are recreated. The
    /// switch sticks even when the first fetch from the new host fails.
    pub async fn switch_source(&self, base_url: &str) -> Result<usize, SourceError> {
        self.source.set_base_url(base_url);
        self.sync_tiles();
        self.refresh().await
    }

    /// Selected cameras as tiles, in selection order. Audio goes to the first tile.
    pub fn active_tiles(&self) -> Vec<Tile> {
        let nvr_url = self.source.base_url();
        let state = self.read();
        let use_sub_stream = state.selection.selected.len() > 1;
        state
            .selection
            .selected
            .iter()
            .filter_map(|id| state.cameras.iter().find(|c| &c.id == id))
            .enumerate()
            .map(|(index, c)| c.to_tile(&nvr_url, use_sub_stream, index == 0))
            .collect()
    }

    fn sync_tiles(&self) {
        let tiles = self.active_tiles();
        self.aspects.retain_tiles(&tiles);
        self.supervisor.sync_tiles(&tiles);
    }

    async fn persist(&self) {
        let persisted = PersistedSelection::from_state(&self.read().selection);
        if let Err(e) = self.store.save(&persisted).await {
            warn!("Could not persist selection: {e}");
        }
    }

    /// Replaces the selection with `ids`, kept in camera-list order.
    pub async fn select(&self, ids: Vec<String>) -> Result<SelectionDiff, AppError> {
        let diff = {
            let mut state = self.write();
            let unknown: Vec<&str> = ids
                .iter()
                .filter(|id| !state.cameras.iter().any(|c| &c.id == *id))
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                return Err(AppError::Validation(format!(
                    "Unknown camera ids: {}",
                    unknown.join(", ")
                )));
            }

            let mut draft = SelectionDraft::new(&state.selection);
            draft.set(ids);
            let (selected, diff) = draft.commit(&state.cameras);
            state.selection.set_selected(selected);
            diff
        };

        if !diff.is_empty() {
            info!(added = ?diff.added, removed = ?diff.removed, "Selection changed");
        }
        self.persist().await;
        self.sync_tiles();
        Ok(diff)
    }

    /// Flips expansion of a selected camera.
    pub async fn toggle_expanded(&self, id: &str) -> Result<SelectionState, AppError> {
        let selection = {
            let mut state = self.write();
            if !state.selection.is_selected(id) {
                return Err(AppError::NotFound(format!("Camera '{id}' is not selected")));
            }
            state.selection.toggle_expanded(id);
            state.selection.clone()
        };
        self.persist().await;
        Ok(selection)
    }

    /// Lays out the active tiles and pushes the resulting target aspects into their
    /// sessions.
    pub fn layout(&self, viewport: Viewport, strategy: Strategy) -> LayoutResult {
        *self.last_layout.lock().unwrap_or_else(PoisonError::into_inner) = Some((viewport, strategy));
        self.apply_layout(viewport, strategy)
    }

    fn apply_layout(&self, viewport: Viewport, strategy: Strategy) -> LayoutResult {
        let tiles = self.active_tiles();
        let result = compute_layout(&tiles, &self.aspects.snapshot(), viewport, strategy);
        self.supervisor.apply_layout(&result);
        result
    }

    /// Re-applies the last requested layout each time the aspect generation moves.
    /// Spawned once at startup; runs for the life of the process. Subscribes before the
    /// returned future is first polled, so no change after this call is missed.
    pub fn follow_aspects(self: Arc<Self>) -> impl Future<Output = ()> + Send {
        let mut changes = self.aspects.subscribe();
        async move {
            while changes.changed().await.is_ok() {
                let generation = *changes.borrow_and_update();
                let last = *self.last_layout.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some((viewport, strategy)) = last {
                    let result = self.apply_layout(viewport, strategy);
                    debug!(generation, tiles = result.tiles.len(), "Layout re-applied after aspect change");
                }
            }
        }
    }
}
