//! Justified-rows ("mosaic") packer.
//!
//! Items keep their aspect ratio; each row is scaled so it spans the full width, and the
//! trial row height is searched so that the stacked rows fill the viewport height.
//!
//! # Steps
//! 1. Greedy rows for a trial height `h`: a row closes once `Σ(ratio * h)` reaches `W`,
//!    or once it holds `W` items, so every item keeps at least one pixel of width.
//! 2. Bounded height: binary search on `h`, keeping the best partition *seen*, because
//!    integer rounding makes total height only roughly monotonic in `h`. If that still
//!    needs more rows than `H` has pixels, items are dealt evenly into `H` rows.
//! 3. Unbounded height: one pass at `NATURAL_ROW_HEIGHT`.
//! 4. Row heights `W / Σratio`; the last row absorbs the residual so rows sum to `H`.
//! 5. Widths by largest-remainder apportionment so each row sums to exactly `W`.

use std::cmp::Ordering;
use std::ops::Range;

use crate::layout::Rect;

/// Ratios below this are clamped so a single item can never produce a zero-width row.
pub const MIN_ASPECT: f64 = 0.1;
/// Binary search budget for the trial row height.
pub const SEARCH_ITERATIONS: u32 = 12;
/// Trial row height used when the viewport height is unbounded.
pub const NATURAL_ROW_HEIGHT: u32 = 200;

// ────────────────────────────────────────────────────────────────────────────
// Output types
// ────────────────────────────────────────────────────────────────────────────

/// A justified row: a contiguous run of items sharing one height.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Indices into the input ratio list.
    pub items: Range<usize>,
    pub height: u32,
    /// Integer widths for `items`, summing to the viewport width.
    pub widths: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MosaicLayout {
    pub rows: Vec<Row>,
    pub width: u32,
    /// Bounded: the viewport height. Unbounded: the natural content height.
    pub height: u32,
}

impl MosaicLayout {
    fn empty(width: u32, height: Option<u32>) -> Self {
        Self {
            rows: Vec::new(),
            width,
            height: height.unwrap_or(0),
        }
    }

    /// One rectangle per input item, in input order.
    pub fn rects(&self) -> Vec<Rect> {
        let mut rects = Vec::with_capacity(self.rows.iter().map(|r| r.items.len()).sum());
        let mut y = 0u32;
        for row in &self.rows {
            let mut x = 0u32;
            for &w in &row.widths {
                rects.push(Rect {
                    x,
                    y,
                    width: w,
                    height: row.height,
                });
                x += w;
            }
            y += row.height;
        }
        rects
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Packing
// ────────────────────────────────────────────────────────────────────────────

/// A row partition for one trial height and the total height it produces.
#[derive(Debug, Clone)]
struct Partition {
    rows: Vec<Range<usize>>,
    total_height: u64,
}

/// Packs `ratios` (width / height) into justified rows of width `width`.
///
/// `height = None` means unbounded: the result's height is the natural content height.
/// Pure: identical inputs always yield an identical layout.
pub fn pack_rows(ratios: &[f32], width: u32, height: Option<u32>) -> MosaicLayout {
    if ratios.is_empty() || width == 0 {
        return MosaicLayout::empty(width, height);
    }

    let ratios: Vec<f64> = ratios
        .iter()
        .map(|&r| if r.is_finite() { (r as f64).max(MIN_ASPECT) } else { MIN_ASPECT })
        .collect();

    let partition = match height {
        Some(target) => search_partition(&ratios, width, target),
        None => build_rows(&ratios, width, NATURAL_ROW_HEIGHT),
    };

    let sums: Vec<f64> = partition
        .rows
        .iter()
        .map(|range| ratios[range.clone()].iter().sum())
        .collect();
    let heights = row_heights(&sums, width, height);

    let rows: Vec<Row> = partition
        .rows
        .into_iter()
        .zip(heights)
        .map(|(items, row_height)| {
            let widths = apportion(width, &ratios[items.clone()]);
            Row {
                items,
                height: row_height,
                widths,
            }
        })
        .collect();

    let total = height.unwrap_or_else(|| rows.iter().map(|r| r.height).sum());
    MosaicLayout {
        rows,
        width,
        height: total,
    }
}

/// Greedy row partition for trial height `trial`. Every row holds at least one item.
fn build_rows(ratios: &[f64], width: u32, trial: u32) -> Partition {
    let w = width as f64;
    let h = trial as f64;
    let mut rows = Vec::new();
    let mut total_height = 0u64;
    let mut i = 0;

    let max_items = width as usize;
    while i < ratios.len() {
        let start = i;
        let mut acc = 0.0;
        // `width > 0` guarantees the first item of each row is always taken.
        while i < ratios.len() && acc < w && i - start < max_items {
            acc += ratios[i] * h;
            i += 1;
        }
        let sum: f64 = ratios[start..i].iter().sum();
        total_height += natural_row_height(width, sum) as u64;
        rows.push(start..i);
    }

    Partition { rows, total_height }
}

fn search_partition(ratios: &[f64], width: u32, target: u32) -> Partition {
    let target = target as i64;
    let mut low: i64 = 1;
    let mut high: i64 = (target * 2).max(2);
    let mut best: Option<(Partition, i64)> = None;

    for _ in 0..SEARCH_ITERATIONS {
        let mid = ((low + high) / 2).max(1);
        let candidate = build_rows(ratios, width, mid as u32);
        let total = candidate.total_height as i64;
        let diff = (target - total).abs();

        if best.as_ref().map_or(true, |(_, best_diff)| diff < *best_diff) {
            best = Some((candidate, diff));
        }

        if total < target {
            // Too short: taller trial rows hold fewer items, so more rows.
            low = mid + 1;
        } else {
            high = mid - 1;
        }
    }

    let partition = match best {
        Some((partition, _)) => partition,
        None => build_rows(ratios, width, target.max(1) as u32),
    };
    if partition.rows.len() as i64 > target {
        return even_rows(ratios, width, target as u32).unwrap_or(partition);
    }
    partition
}

/// `rows` rows of `ceil(n / rows)` items each, or `None` when a row would then hold
/// more items than `width` has pixels.
fn even_rows(ratios: &[f64], width: u32, rows: u32) -> Option<Partition> {
    let per_row = ratios.len().div_ceil(rows.max(1) as usize);
    if per_row > width as usize {
        return None;
    }
    let ranges: Vec<Range<usize>> = (0..ratios.len())
        .step_by(per_row)
        .map(|start| start..(start + per_row).min(ratios.len()))
        .collect();
    let total_height = ranges
        .iter()
        .map(|r| natural_row_height(width, ratios[r.clone()].iter().sum()) as u64)
        .sum();
    Some(Partition {
        rows: ranges,
        total_height,
    })
}

fn natural_row_height(width: u32, ratio_sum: f64) -> u32 {
    (width as f64 / ratio_sum.max(MIN_ASPECT)).floor().max(1.0) as u32
}

/// Final row heights. Bounded layouts sum to exactly `height`: normally the last row
/// absorbs the search error; if the preceding rows alone already reach the height, all
/// rows are rescaled proportionally instead.
fn row_heights(sums: &[f64], width: u32, height: Option<u32>) -> Vec<u32> {
    let natural: Vec<u32> = sums.iter().map(|&s| natural_row_height(width, s)).collect();
    let Some(target) = height else {
        return natural;
    };

    let previous = &natural[..natural.len().saturating_sub(1)];
    let used: u64 = previous.iter().map(|&h| h as u64).sum();

    if used < target as u64 {
        let mut heights = natural.clone();
        if let Some(last) = heights.last_mut() {
            *last = target - used as u32;
        }
        heights
    } else {
        let weights: Vec<f64> = natural.iter().map(|&h| h as f64).collect();
        apportion(target, &weights)
    }
}

/// Splits `total` pixels in proportion to `weights` (largest-remainder / Hamilton).
///
/// The result always sums to exactly `total`. No share is zero as long as
/// `total >= weights.len()`; below that, the trailing shares stay at zero. Ties in the
/// remainder go to the lower index.
pub fn apportion(total: u32, weights: &[f64]) -> Vec<u32> {
    if weights.is_empty() {
        return Vec::new();
    }
    let sum: f64 = weights.iter().sum();
    let ideal: Vec<f64> = if sum > 0.0 {
        weights.iter().map(|w| total as f64 * (w / sum)).collect()
    } else {
        vec![total as f64 / weights.len() as f64; weights.len()]
    };

    let mut shares: Vec<u32> = ideal.iter().map(|v| v.floor() as u32).collect();
    let allocated: u64 = shares.iter().map(|&s| s as u64).sum();
    let deficit = (total as u64).saturating_sub(allocated) as usize;

    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = ideal[a] - ideal[a].floor();
        let rb = ideal[b] - ideal[b].floor();
        rb.partial_cmp(&ra).unwrap_or(Ordering::Equal).then(a.cmp(&b))
    });
    for &idx in order.iter().cycle().take(deficit) {
        shares[idx] += 1;
    }

    // A very small weight can floor to zero; borrow a pixel from the widest share.
    for idx in 0..shares.len() {
        if shares[idx] > 0 {
            continue;
        }
        let donor = shares
            .iter()
            .enumerate()
            .filter(|(_, &s)| s > 1)
            .max_by(|(ia, a), (ib, b)| a.cmp(b).then(ib.cmp(ia)))
            .map(|(i, _)| i);
        // No donor means fewer pixels than shares.
        let Some(donor) = donor else { break };
        shares[donor] -= 1;
        shares[idx] = 1;
    }
    shares
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
