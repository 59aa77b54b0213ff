//! Axum route handlers for tile playback.
//!
//! The host polls `GET /api/v1/tiles/:id` to drain player commands. A batch carrying a
//! new `session_id` means the tile's session was recreated: the host drops its player
//! and starts over from the batch's `open` command. A `layout_generation` newer than
//! the one its last layout came with means measured ratios changed and the host should
//! request the layout again.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::playback::{PlayerCommand, SessionEvent, Surface, TileHealth};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TilePollResponse {
    /// `None` once the tile has left the wall and only its final commands remain.
    pub health: Option<TileHealth>,
    pub session_id: Option<Uuid>,
    pub commands: Vec<PlayerCommand>,
    /// Current aspect generation; compare with `LayoutResponse::generation`.
    pub layout_generation: u64,
}

#[derive(Debug, Serialize)]
pub struct TileSummary {
    pub health: TileHealth,
    /// `None` once the host has drained a disposed session.
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AttachRequest {
    pub surface: String,
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub session_id: Uuid,
    pub event: SessionEvent,
}

fn health_or_404(state: &AppState, tile_id: &str) -> Result<TileHealth, AppError> {
    state
        .viewer
        .supervisor()
        .for_tile(tile_id)
        .ok_or_else(|| AppError::NotFound(format!("Tile '{tile_id}' is not on the wall")))
}

/// GET /api/v1/tiles/:id
pub async fn handle_poll_tile(
    State(state): State<AppState>,
    Path(tile_id): Path<String>,
) -> Result<Json<TilePollResponse>, AppError> {
    let health = state.viewer.supervisor().for_tile(&tile_id);
    let batch = state.relay.drain(&tile_id);
    if health.is_none() && batch.is_none() {
        return Err(AppError::NotFound(format!("Tile '{tile_id}' is not on the wall")));
    }

    let (session_id, commands) = match batch {
        Some(b) => (Some(b.session_id), b.commands),
        None => (None, Vec::new()),
    };
    Ok(Json(TilePollResponse {
        health,
        session_id,
        commands,
        layout_generation: state.viewer.aspects().generation(),
    }))
}

/// GET /api/v1/tiles
///
/// Health of every supervised tile, ordered by id. Does not drain commands.
pub async fn handle_list_tiles(State(state): State<AppState>) -> Json<Vec<TileSummary>> {
    let supervisor = state.viewer.supervisor();
    let tiles = supervisor
        .tile_ids()
        .into_iter()
        .filter_map(|id| {
            let health = supervisor.for_tile(&id)?;
            Some(TileSummary {
                session_id: state.relay.session_id(&id),
                health,
            })
        })
        .collect();
    Json(tiles)
}

/// POST /api/v1/tiles/:id/attach
pub async fn handle_attach(
    State(state): State<AppState>,
    Path(tile_id): Path<String>,
    Json(request): Json<AttachRequest>,
) -> Result<Json<TileHealth>, AppError> {
    if request.surface.trim().is_empty() {
        return Err(AppError::Validation("surface cannot be empty".to_string()));
    }
    state
        .viewer
        .supervisor()
        .attach(&tile_id, Surface(request.surface));
    Ok(Json(health_or_404(&state, &tile_id)?))
}

/// POST /api/v1/tiles/:id/detach
pub async fn handle_detach(
    State(state): State<AppState>,
    Path(tile_id): Path<String>,
) -> Result<Json<TileHealth>, AppError> {
    state.viewer.supervisor().detach(&tile_id);
    Ok(Json(health_or_404(&state, &tile_id)?))
}

/// POST /api/v1/tiles/:id/events
///
/// Player event reported by the host. Rejected with 409 when it belongs to a session
/// that has since been replaced.
pub async fn handle_event(
    State(state): State<AppState>,
    Path(tile_id): Path<String>,
    Json(request): Json<EventRequest>,
) -> Result<StatusCode, AppError> {
    state.relay.deliver(&tile_id, request.session_id, request.event)?;
    Ok(StatusCode::NO_CONTENT)
}
