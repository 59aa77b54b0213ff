//! Axum route handler for the layout API.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::layout::{LayoutResult, Strategy, Viewport};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Mosaic,
    Wall,
}

#[derive(Debug, Deserialize)]
pub struct LayoutRequest {
    pub width: u32,
    /// Omit for a scrolling container.
    pub height: Option<u32>,
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Wall only; defaults to `WALL_CROP_CAP`.
    pub crop_cap: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct LayoutResponse {
    /// Aspect generation the layout was computed from. A newer generation on a later
    /// poll means measured ratios changed and the layout should be requested again.
    pub generation: u64,
    pub layout: LayoutResult,
}

/// POST /api/v1/layout
///
/// Lays out the selected cameras in the given viewport and pushes target aspects into
/// their sessions.
pub async fn handle_layout(
    State(state): State<AppState>,
    Json(request): Json<LayoutRequest>,
) -> Result<Json<LayoutResponse>, AppError> {
    let strategy = match request.strategy {
        StrategyKind::Mosaic => Strategy::Mosaic,
        StrategyKind::Wall => {
            let crop_cap = request.crop_cap.unwrap_or(state.config.wall_crop_cap);
            if !(crop_cap > 0.0 && crop_cap < 1.0) {
                return Err(AppError::Validation(
                    "crop_cap must be strictly between 0 and 1".to_string(),
                ));
            }
            Strategy::Wall { crop_cap }
        }
    };

    let generation = state.viewer.aspects().generation();
    let viewport = match request.height {
        Some(height) => Viewport::bounded(request.width, height),
        None => Viewport::unbounded(request.width),
    };
    let layout = state.viewer.layout(viewport, strategy);

    Ok(Json(LayoutResponse { generation, layout }))
}
