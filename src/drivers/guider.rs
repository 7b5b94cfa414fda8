//! Autoguider contract.
//!
//! The guider is usually a separate guiding application reached over the network;
//! the contract only covers what the session engine drives: start guiding with a
//! settle criterion, dither between frames, and report settling/guiding state.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Driver;

/// Settle criterion passed with `guide` and `dither`.
///
/// Guiding is considered settled once the guide error stays below `pixels` for
/// `time`; the guider gives up after `timeout`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettleSettings {
    /// Maximum guide error in pixels
    pub pixels: f64,
    /// How long the error must stay below `pixels`
    #[serde(with = "humantime_serde")]
    pub time: Duration,
    /// Give up settling after this long
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl SettleSettings {
    /// Settle criterion from its three components.
    pub fn new(pixels: f64, time: Duration, timeout: Duration) -> Self {
        Self {
            pixels,
            time,
            timeout,
        }
    }

    /// Settle settings for 1-indexed retry `attempt`: `base + attempt * step`
    /// on every field, so each retry is looser than the last.
    pub fn escalated(&self, step: &SettleSettings, attempt: u32) -> Self {
        Self {
            pixels: self.pixels + f64::from(attempt) * step.pixels,
            time: self.time + step.time * attempt,
            timeout: self.timeout + step.timeout * attempt,
        }
    }
}

/// Guider features, read on connect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GuiderCapabilities {
    /// Whether the guider accepts dither requests
    pub can_dither: bool,
}

/// Guiding application.
#[async_trait]
pub trait Guider: Driver {
    /// Capability snapshot, only meaningful while connected.
    fn capabilities(&self) -> GuiderCapabilities;

    /// Ask the guiding application to connect its own camera and mount.
    async fn connect_equipment(&self) -> Result<()>;

    /// Start (or restart) guiding; settling progress is polled afterwards.
    async fn guide(&self, settle: SettleSettings) -> Result<()>;

    /// Shift the guide lock position by up to `pixels` and settle again.
    async fn dither(&self, pixels: f64, ra_only: bool, settle: SettleSettings) -> Result<()>;

    /// Whether the guider is still settling after `guide` or `dither`
    async fn is_settling(&self) -> Result<bool>;

    /// Whether the guider is actively guiding
    async fn is_guiding(&self) -> Result<bool>;

    /// Stop looping/guiding. Must be a no-op when nothing is running.
    async fn stop_capture(&self) -> Result<()>;
}
