//! Cameras: the NVR's camera list and the operator's selection of it.
//!
//! `CameraSource` is the seam for whatever serves the camera configuration. The Frigate
//! implementation is the only production backend; tests use in-memory sources.

pub mod frigate;
pub mod handlers;
pub mod selection;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::Tile;

/// go2rtc restream port on the NVR host.
pub const RTSP_PORT: u16 = 8554;

// ────────────────────────────────────────────────────────────────────────────
// Camera
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub id: String,
    pub name: String,
    /// Restream name of the full-quality stream.
    pub stream_name: String,
    /// Restream name of the low-resolution stream, when the NVR has one.
    pub sub_stream_name: Option<String>,
    /// From the detect resolution, when configured.
    pub aspect_ratio: Option<f32>,
    pub enabled: bool,
}

impl Camera {
    /// `rtsp://{host}:8554/{stream}`. The sub-stream is used only when requested and
    /// present.
    pub fn rtsp_url(&self, nvr_url: &str, use_sub_stream: bool) -> String {
        let stream = match (&self.sub_stream_name, use_sub_stream) {
            (Some(sub), true) => sub,
            _ => &self.stream_name,
        };
        format!("rtsp://{}:{}/{}", rtsp_host(nvr_url), RTSP_PORT, stream)
    }

    pub fn to_tile(&self, nvr_url: &str, use_sub_stream: bool, audio: bool) -> Tile {
        Tile {
            display_name: self.name.clone(),
            declared_aspect: self.aspect_ratio,
            enabled: self.enabled,
            audio,
            ..Tile::new(self.id.clone(), self.rtsp_url(nvr_url, use_sub_stream))
        }
    }
}

/// Host part of the NVR base URL: scheme, port and path stripped.
pub fn rtsp_host(nvr_url: &str) -> &str {
    let rest = nvr_url
        .strip_prefix("http://")
        .or_else(|| nvr_url.strip_prefix("https://"))
        .unwrap_or(nvr_url);
    rest.split(|c| c == ':' || c == '/').next().unwrap_or(rest)
}

// ────────────────────────────────────────────────────────────────────────────
// Source trait
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Empty response from server")]
    Empty,

    #[error("Invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Supplies the ordered list of enabled cameras.
#[async_trait]
pub trait CameraSource: Send + Sync {
    async fn fetch_cameras(&self) -> Result<Vec<Camera>, SourceError>;

    /// Base URL of the NVR; stream locators are derived from its host.
    fn base_url(&self) -> String;

    /// Points the source at another NVR. Takes effect on the next fetch.
    fn set_base_url(&self, base_url: &str);
}

/// Whether `url` can serve as an NVR base URL: http(s) with a non-empty host.
pub fn is_valid_base_url(url: &str) -> bool {
    let url = url.trim();
    (url.starts_with("http://") || url.starts_with("https://")) && !rtsp_host(url).is_empty()
}
