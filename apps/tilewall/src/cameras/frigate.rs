//! Frigate NVR camera source.
//!
//! Reads `GET {base}/api/config` and maps each camera entry:
//! - main stream: last path segment of the ffmpeg input with the `record` role, else
//!   `live.stream_name`, else the camera id;
//! - sub-stream: last path segment of the input with the `detect` role;
//! - aspect: detect width / height when both are positive;
//! - name: configured name, else the id with its first letter capitalized.
//!
//! Disabled cameras are dropped. Cameras keep the order of the configuration document.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cameras::{Camera, CameraSource, SourceError};

// ────────────────────────────────────────────────────────────────────────────
// Configuration document
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FrigateConfig {
    /// Camera entries in document order.
    #[serde(default, deserialize_with = "ordered_cameras")]
    pub cameras: Vec<(String, CameraConfig)>,
}

fn ordered_cameras<'de, D>(deserializer: D) -> Result<Vec<(String, CameraConfig)>, D::Error>
where
    D: Deserializer<'de>,
{
    // `preserve_order` keeps the map's keys in the order they were read.
    serde_json::Map::<String, Value>::deserialize(deserializer)?
        .into_iter()
        .map(|(id, raw)| {
            serde_json::from_value(raw)
                .map(|config| (id.clone(), config))
                .map_err(|e| D::Error::custom(format!("camera '{id}': {e}")))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct CameraConfig {
    pub name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub ffmpeg: Option<FfmpegConfig>,
    pub live: Option<LiveConfig>,
    pub detect: Option<DetectConfig>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct FfmpegConfig {
    #[serde(default)]
    pub inputs: Vec<InputConfig>,
}

#[derive(Debug, Deserialize)]
pub struct InputConfig {
    pub path: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LiveConfig {
    pub stream_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DetectConfig {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

// ────────────────────────────────────────────────────────────────────────────
// Mapping
// ────────────────────────────────────────────────────────────────────────────

fn stream_for_role(config: &CameraConfig, role: &str) -> Option<String> {
    config
        .ffmpeg
        .as_ref()?
        .inputs
        .iter()
        .find(|input| input.roles.iter().any(|r| r == role))?
        .path
        .as_deref()
        .and_then(|path| path.rsplit('/').next())
        .filter(|segment| !segment.is_empty())
        .map(String::from)
}

fn detect_aspect(config: &CameraConfig) -> Option<f32> {
    let detect = config.detect.as_ref()?;
    match (detect.width, detect.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some(w as f32 / h as f32),
        _ => None,
    }
}

fn capitalize(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Maps a parsed configuration document to the enabled cameras, in document order.
pub fn parse_cameras(config: FrigateConfig) -> Vec<Camera> {
    config
        .cameras
        .into_iter()
        .filter(|(_, cfg)| cfg.enabled)
        .map(|(id, cfg)| {
            let stream_name = stream_for_role(&cfg, "record")
                .or_else(|| cfg.live.as_ref().and_then(|l| l.stream_name.clone()))
                .unwrap_or_else(|| id.clone());
            Camera {
                name: cfg.name.clone().unwrap_or_else(|| capitalize(&id)),
                sub_stream_name: stream_for_role(&cfg, "detect"),
                aspect_ratio: detect_aspect(&cfg),
                enabled: cfg.enabled,
                stream_name,
                id,
            }
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// HTTP source
// ────────────────────────────────────────────────────────────────────────────

pub struct FrigateSource {
    client: Client,
    base_url: RwLock<String>,
}

fn normalize(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

impl FrigateSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: RwLock::new(normalize(&base_url.into())),
        })
    }
}

#[async_trait]
impl CameraSource for FrigateSource {
    async fn fetch_cameras(&self) -> Result<Vec<Camera>, SourceError> {
        let url = format!("{}/api/config", self.base_url());
        debug!(url = %url, "Fetching Frigate config");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = status.canonical_reason().unwrap_or("request failed").to_string();
            warn!("Frigate returned {}", status);
            return Err(SourceError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(SourceError::Empty);
        }
        let config: FrigateConfig = serde_json::from_str(&body)?;
        let cameras = parse_cameras(config);
        debug!("Frigate reported {} enabled cameras", cameras.len());
        Ok(cameras)
    }

    fn base_url(&self) -> String {
        self.base_url.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_base_url(&self, base_url: &str) {
        let base_url = normalize(base_url);
        info!("Frigate source switched to {base_url}");
        *self.base_url.write().unwrap_or_else(PoisonError::into_inner) = base_url;
    }
}
