// Adaptive tiling layout engine.
// Two packing strategies behind one entry point: justified rows (mosaic) and a
// near-uniform grid (wall). Layout is a pure function of tiles, ratios, viewport and
// strategy; callers recompute it on every relevant change.

pub mod aspect;
pub mod grid;
pub mod handlers;
pub mod mosaic;

use serde::{Deserialize, Serialize};

pub use aspect::{AspectModel, AspectSnapshot, Tile};
pub use grid::DEFAULT_CROP_CAP;

// ────────────────────────────────────────────────────────────────────────────
// Shared geometry
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Space available to the tiles. `height = None` asks for the natural content height
/// (scrolling container).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: Option<u32>,
}

impl Viewport {
    pub fn bounded(width: u32, height: u32) -> Self {
        Self {
            width,
            height: Some(height),
        }
    }

    pub fn unbounded(width: u32) -> Self {
        Self {
            width,
            height: None,
        }
    }
}

/// Packing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Justified rows; no cropping, every tile keeps its ratio.
    #[default]
    Mosaic,
    /// Uniform cells filling the screen; tiles crop up to `crop_cap`, letterbox beyond.
    Wall { crop_cap: f32 },
}

#[cfg(test)]
impl Strategy {
    pub fn wall() -> Self {
        Strategy::Wall {
            crop_cap: DEFAULT_CROP_CAP,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Result
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedTile {
    pub tile_id: String,
    pub rect: Rect,
    /// Aspect the player should constrain its output to (letterbox/pillarbox).
    /// `None` means fill the rectangle.
    pub target_aspect: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutResult {
    pub width: u32,
    /// Viewport height when bounded, natural content height otherwise.
    pub height: u32,
    pub strategy: Strategy,
    /// `(rows, cols)` when the wall packer placed the tiles.
    pub grid: Option<(u32, u32)>,
    pub tiles: Vec<PlacedTile>,
}

/// Lays out `tiles` in `viewport` using ratios from `aspects`.
///
/// Never fails: degenerate inputs yield a degenerate (possibly empty) result. The wall
/// strategy needs a bounded height with at least one pixel per tile; otherwise it falls
/// back to mosaic rows.
pub fn compute_layout(
    tiles: &[Tile],
    aspects: &AspectSnapshot,
    viewport: Viewport,
    strategy: Strategy,
) -> LayoutResult {
    let ratios = aspects.ratios(tiles);

    if let (Strategy::Wall { crop_cap }, Some(height)) = (strategy, viewport.height) {
        let packed = grid::pack_grid(&ratios, viewport.width, height, crop_cap);
        // More tiles than pixels: no grid can give each one a cell.
        if packed.cells.len() == tiles.len() {
            return LayoutResult {
                width: viewport.width,
                height,
                strategy,
                grid: packed.chosen.map(|c| (c.rows, c.cols)),
                tiles: tiles
                    .iter()
                    .zip(packed.cells)
                    .map(|(tile, cell)| PlacedTile {
                        tile_id: tile.id.clone(),
                        rect: cell.rect,
                        target_aspect: cell.target_aspect,
                    })
                    .collect(),
            };
        }
    }

    let packed = mosaic::pack_rows(&ratios, viewport.width, viewport.height);
    LayoutResult {
        width: viewport.width,
        height: packed.height,
        strategy,
        grid: None,
        tiles: tiles
            .iter()
            .zip(packed.rects())
            .map(|(tile, rect)| PlacedTile {
                tile_id: tile.id.clone(),
                rect,
                target_aspect: None,
            })
            .collect(),
    }
}
