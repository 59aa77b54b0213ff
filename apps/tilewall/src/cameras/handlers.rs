//! Axum route handlers for cameras and selection.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::cameras::is_valid_base_url;
use crate::cameras::selection::{SelectionDiff, SelectionState};
use crate::errors::AppError;
use crate::state::AppState;
use crate::viewer::ViewerState;

#[derive(Debug, Deserialize)]
pub struct SelectionRequest {
    pub selected: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SourceRequest {
    /// NVR base URL, e.g. `http://192.168.1.10:5000`.
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct SelectionResponse {
    pub selection: SelectionState,
    pub diff: SelectionDiff,
}

/// GET /api/v1/cameras
///
/// Current camera list, selection and the last refresh error, if any.
pub async fn handle_list_cameras(State(state): State<AppState>) -> Json<ViewerState> {
    Json(state.viewer.state())
}

/// POST /api/v1/cameras/refresh
pub async fn handle_refresh(State(state): State<AppState>) -> Result<Json<ViewerState>, AppError> {
    state.viewer.refresh().await?;
    Ok(Json(state.viewer.state()))
}

/// PUT /api/v1/source
///
/// Switches to another NVR and refreshes from it. A failed fetch is a 502, but the new
/// host stays in effect.
pub async fn handle_switch_source(
    State(state): State<AppState>,
    Json(request): Json<SourceRequest>,
) -> Result<Json<ViewerState>, AppError> {
    if !is_valid_base_url(&request.url) {
        return Err(AppError::Validation(
            "url must be an http(s) URL with a host".to_string(),
        ));
    }
    state.viewer.switch_source(request.url.trim()).await?;
    Ok(Json(state.viewer.state()))
}

/// PUT /api/v1/selection
///
/// Commits a whole selection. Tiles are ordered as in the camera list.
pub async fn handle_set_selection(
    State(state): State<AppState>,
    Json(request): Json<SelectionRequest>,
) -> Result<Json<SelectionResponse>, AppError> {
    let diff = state.viewer.select(request.selected).await?;
    Ok(Json(SelectionResponse {
        selection: state.viewer.state().selection,
        diff,
    }))
}

/// POST /api/v1/selection/expanded/:id
pub async fn handle_toggle_expanded(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<Json<SelectionState>, AppError> {
    let selection = state.viewer.toggle_expanded(&camera_id).await?;
    Ok(Json(selection))
}
