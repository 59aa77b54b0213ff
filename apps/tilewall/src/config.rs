use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::layout::DEFAULT_CROP_CAP;
use crate::playback::SupervisorConfig;

/// Application configuration loaded from environment variables.
/// Every variable has a default; malformed values fail startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub frigate_url: String,
    /// Selection is kept in memory when unset.
    pub redis_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub watchdog_timeout: Duration,
    pub watchdog_poll: Duration,
    pub reconnect_indicator: Duration,
    pub wall_crop_cap: f32,
    pub source_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let config = Config {
            frigate_url: std::env::var("FRIGATE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:5000".to_string()),
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            port: parse_env("PORT", 8080u16)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            watchdog_timeout: Duration::from_millis(parse_env("WATCHDOG_TIMEOUT_MS", 60_000u64)?),
            watchdog_poll: Duration::from_millis(parse_env("WATCHDOG_POLL_MS", 10_000u64)?),
            reconnect_indicator: Duration::from_millis(parse_env("RECONNECT_INDICATOR_MS", 1_500u64)?),
            wall_crop_cap: parse_env("WALL_CROP_CAP", DEFAULT_CROP_CAP)?,
            source_timeout: Duration::from_secs(parse_env("SOURCE_TIMEOUT_SECS", 10u64)?),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.watchdog_poll.is_zero() {
            bail!("WATCHDOG_POLL_MS must be greater than zero");
        }
        if self.watchdog_timeout.is_zero() {
            bail!("WATCHDOG_TIMEOUT_MS must be greater than zero");
        }
        if !(self.wall_crop_cap > 0.0 && self.wall_crop_cap < 1.0) {
            bail!("WALL_CROP_CAP must be strictly between 0 and 1");
        }
        Ok(())
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            watchdog_timeout: self.watchdog_timeout,
            poll_interval: self.watchdog_poll,
            reconnect_indicator: self.reconnect_indicator,
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}
