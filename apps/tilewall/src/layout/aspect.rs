//! Aspect Model: best-known width/height ratio per tile.
//!
//! Precedence: live (measured by the media session) > declared (camera config) > 16:9.
//!
//! Layout passes never read the live map directly. They take a `snapshot()` at the
//! start of the pass, so a session reporting a new ratio mid-pass cannot change the
//! inputs of a computation that is already running.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// Ratio used when neither a live nor a declared ratio is known.
pub const FALLBACK_ASPECT: f32 = 16.0 / 9.0;

// ────────────────────────────────────────────────────────────────────────────
// Tile
// ────────────────────────────────────────────────────────────────────────────

/// One video source positioned and sized within the viewport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub id: String,
    pub display_name: String,
    /// Where the media session pulls the stream from (RTSP URL).
    pub stream_locator: String,
    /// Ratio from the source configuration, if it declared one.
    pub declared_aspect: Option<f32>,
    pub enabled: bool,
    /// Whether this tile's player decodes audio. At most one tile on the wall does.
    #[serde(default)]
    pub audio: bool,
}

impl Tile {
    pub fn new(id: impl Into<String>, stream_locator: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            stream_locator: stream_locator.into(),
            declared_aspect: None,
            enabled: true,
            audio: false,
        }
    }

    #[cfg(test)]
    pub fn with_declared_aspect(mut self, aspect: f32) -> Self {
        self.declared_aspect = Some(aspect);
        self
    }
}

fn is_usable(ratio: f32) -> bool {
    ratio.is_finite() && ratio > 0.0
}

fn resolve(live: Option<&LiveAspect>, tile: &Tile) -> f32 {
    match live {
        Some(entry) if entry.locator == tile.stream_locator => entry.ratio,
        _ => match tile.declared_aspect {
            Some(ratio) if is_usable(ratio) => ratio,
            _ => FALLBACK_ASPECT,
        },
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Live aspect storage
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct LiveAspect {
    /// Locator the ratio was measured on. A different locator invalidates it.
    locator: String,
    ratio: f32,
}

/// Immutable view of the live ratios, read once per layout pass.
#[derive(Debug, Clone, Default)]
pub struct AspectSnapshot {
    live: HashMap<String, LiveAspect>,
}

impl AspectSnapshot {
    pub fn effective(&self, tile: &Tile) -> f32 {
        resolve(self.live.get(&tile.id), tile)
    }

    /// Effective ratios for `tiles`, in order.
    pub fn ratios(&self, tiles: &[Tile]) -> Vec<f32> {
        tiles.iter().map(|t| self.effective(t)).collect()
    }
}

/// Shared, cloneable handle to the per-tile aspect ratios.
///
/// Every accepted measurement bumps a generation counter; hosts subscribe to it to
/// know when the whole set must be re-packed.
#[derive(Debug, Clone)]
pub struct AspectModel {
    live: Arc<RwLock<HashMap<String, LiveAspect>>>,
    generation: Arc<watch::Sender<u64>>,
}

impl Default for AspectModel {
    fn default() -> Self {
        Self::new()
    }
}

impl AspectModel {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            live: Arc::new(RwLock::new(HashMap::new())),
            generation: Arc::new(tx),
        }
    }

    pub fn effective_aspect_ratio(&self, tile: &Tile) -> f32 {
        let live = self.live.read().unwrap_or_else(PoisonError::into_inner);
        resolve(live.get(&tile.id), tile)
    }

    /// Records the ratio a session measured on the decoded stream.
    ///
    /// Non-positive and non-finite ratios are ignored. Returns whether the stored
    /// value changed (and therefore whether a re-layout was signalled).
    pub fn report_measured(&self, tile_id: &str, locator: &str, ratio: f32) -> bool {
        if !is_usable(ratio) {
            debug!(tile_id = %tile_id, ratio, "Ignoring unusable measured aspect");
            return false;
        }

        let changed = {
            let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
            let previous = live.insert(
                tile_id.to_string(),
                LiveAspect {
                    locator: locator.to_string(),
                    ratio,
                },
            );
            !matches!(previous, Some(p) if p.locator == locator && p.ratio == ratio)
        };

        if changed {
            debug!(tile_id = %tile_id, ratio, "Measured aspect updated");
            self.generation.send_modify(|g| *g = g.wrapping_add(1));
        }
        changed
    }

    /// Drops live ratios for tiles no longer present, or whose locator changed.
    pub fn retain_tiles(&self, tiles: &[Tile]) {
        let locators: HashMap<&str, &str> = tiles
            .iter()
            .map(|t| (t.id.as_str(), t.stream_locator.as_str()))
            .collect();

        let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
        let before = live.len();
        live.retain(|id, entry| locators.get(id.as_str()) == Some(&entry.locator.as_str()));
        if live.len() != before {
            drop(live);
            self.generation.send_modify(|g| *g = g.wrapping_add(1));
        }
    }

    /// Copies the current live ratios for one layout pass.
    pub fn snapshot(&self) -> AspectSnapshot {
        let live = self.live.read().unwrap_or_else(PoisonError::into_inner);
        AspectSnapshot { live: live.clone() }
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Receiver that changes whenever any tile's effective ratio may have changed.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}
