//! Near-uniform ("wall") packer.
//!
//! Every tile gets the same cell. The packer walks `rows = 1..=n` with
//! `cols = ceil(n / rows)` and scores each grid by the worst crop any tile would need to
//! fill its cell. Tiles that would lose more than the crop cap are letterboxed instead:
//! they carry a `target_aspect` and the player keeps their whole frame.

use serde::{Deserialize, Serialize};

use crate::layout::Rect;

/// Default fraction of a tile's frame that may be cut off to fill its cell.
pub const DEFAULT_CROP_CAP: f32 = 0.10;
/// Floor applied to tile ratios before scoring.
const MIN_ASPECT: f64 = 0.1;

// ────────────────────────────────────────────────────────────────────────────
// Types
// ────────────────────────────────────────────────────────────────────────────

/// One candidate `rows x cols` arrangement and its score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCandidate {
    pub rows: u32,
    pub cols: u32,
    /// `(W / cols) / (H / rows)`.
    pub cell_aspect: f64,
    /// Largest crop fraction across all tiles for this grid.
    pub worst_crop: f64,
}

impl GridCandidate {
    pub fn cells(&self) -> u64 {
        self.rows as u64 * self.cols as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    pub rect: Rect,
    /// Set only when filling the cell would crop more than the cap.
    pub target_aspect: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridLayout {
    pub rows: u32,
    pub cols: u32,
    /// Score of the chosen grid; `None` for an empty layout.
    pub chosen: Option<GridCandidate>,
    /// One cell per input tile, in input order (row-major placement).
    pub cells: Vec<GridCell>,
}

// ────────────────────────────────────────────────────────────────────────────
// Scoring
// ────────────────────────────────────────────────────────────────────────────

/// Fraction of a `ratio` frame cut off when scaled to fill a cell of `cell_aspect`.
pub fn crop_fraction(ratio: f64, cell_aspect: f64) -> f64 {
    let ratio = ratio.max(MIN_ASPECT);
    let kept = (ratio / cell_aspect).min(cell_aspect / ratio);
    (1.0 - kept).max(0.0)
}

/// Every `rows x cols` grid with `rows` in `1..=n`, scored against `ratios`.
///
/// Grids with more rows than `height` or more columns than `width` pixels are skipped,
/// so every cell is at least 1x1. None remain when `n > width * height`.
pub fn candidates(ratios: &[f64], width: u32, height: u32) -> Vec<GridCandidate> {
    let n = ratios.len() as u32;
    (1..=n.min(height))
        .map(|rows| (rows, n.div_ceil(rows)))
        .filter(|&(_, cols)| cols <= width)
        .map(|(rows, cols)| {
            let cell_aspect = (width as f64 / cols as f64) / (height as f64 / rows as f64);
            let worst_crop = ratios
                .iter()
                .map(|&r| crop_fraction(r, cell_aspect))
                .fold(0.0, f64::max);
            GridCandidate {
                rows,
                cols,
                cell_aspect,
                worst_crop,
            }
        })
        .collect()
}

/// Picks the grid to use.
///
/// Candidates within the cap win over those outside it; within a pool the lowest worst
/// crop wins, then the fewest cells, then the earliest (fewest rows).
pub fn choose(candidates: &[GridCandidate], crop_cap: f64) -> Option<GridCandidate> {
    let within_cap = candidates.iter().any(|c| c.worst_crop <= crop_cap);
    candidates
        .iter()
        .filter(|c| !within_cap || c.worst_crop <= crop_cap)
        .fold(None, |best: Option<GridCandidate>, c| match best {
            Some(b)
                if b.worst_crop < c.worst_crop
                    || (b.worst_crop == c.worst_crop && b.cells() <= c.cells()) =>
            {
                Some(b)
            }
            _ => Some(*c),
        })
}

fn sanitize_cap(crop_cap: f32) -> f64 {
    if crop_cap.is_finite() && crop_cap > 0.0 && crop_cap < 1.0 {
        crop_cap as f64
    } else {
        DEFAULT_CROP_CAP as f64
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Packing
// ────────────────────────────────────────────────────────────────────────────

/// Packs `ratios` into a uniform grid filling `width x height` exactly.
///
/// Integer remainders of `W / cols` and `H / rows` are absorbed by the last column and
/// the last row. An out-of-range cap falls back to `DEFAULT_CROP_CAP`. The layout is
/// empty when there are more tiles than pixels.
pub fn pack_grid(ratios: &[f32], width: u32, height: u32, crop_cap: f32) -> GridLayout {
    let empty = GridLayout {
        rows: 0,
        cols: 0,
        chosen: None,
        cells: Vec::new(),
    };
    if ratios.is_empty() || width == 0 || height == 0 {
        return empty;
    }

    let cap = sanitize_cap(crop_cap);
    let ratios: Vec<f64> = ratios
        .iter()
        .map(|&r| if r.is_finite() { (r as f64).max(MIN_ASPECT) } else { MIN_ASPECT })
        .collect();

    let scored = candidates(&ratios, width, height);
    let Some(chosen) = choose(&scored, cap) else {
        return empty;
    };

    let cols = chosen.cols;
    let rows = chosen.rows;
    let col_widths = split_even(width, cols);
    let row_heights = split_even(height, rows);

    let mut cells = Vec::with_capacity(ratios.len());
    let mut y = 0u32;
    'rows: for &cell_h in &row_heights {
        let mut x = 0u32;
        for &cell_w in &col_widths {
            let Some(&ratio) = ratios.get(cells.len()) else {
                break 'rows;
            };
            let own_aspect = cell_w as f64 / cell_h as f64;
            let target_aspect =
                (crop_fraction(ratio, own_aspect) > cap).then_some(own_aspect as f32);
            cells.push(GridCell {
                rect: Rect {
                    x,
                    y,
                    width: cell_w,
                    height: cell_h,
                },
                target_aspect,
            });
            x += cell_w;
        }
        y += cell_h;
    }

    GridLayout {
        rows,
        cols,
        chosen: Some(chosen),
        cells,
    }
}

/// `parts` equal integer spans of `total`; the last span takes the remainder.
fn split_even(total: u32, parts: u32) -> Vec<u32> {
    let base = total / parts;
    let mut spans = vec![base; parts as usize];
    if let Some(last) = spans.last_mut() {
        *last = total - base * (parts - 1);
    }
    spans
}
