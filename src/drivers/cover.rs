//! Dust cover / flat-field calibrator contract.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Driver;

/// Position of the cover as reported by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoverStatus {
    /// Device has no motorised cover
    NotPresent,
    /// Fully closed
    Closed,
    /// Opening or closing
    Moving,
    /// Fully open
    Open,
    /// Device cannot tell
    Unknown,
    /// Device reported a fault
    Error,
}

/// Calibrator features of a cover, read on connect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CoverCapabilities {
    /// Zero when the device has no calibrator light
    pub max_brightness: u32,
}

/// Dust cover, optionally with a flat-field light.
#[async_trait]
pub trait Cover: Driver {
    /// Capability snapshot, only meaningful while connected.
    fn capabilities(&self) -> CoverCapabilities;

    /// Start opening; completion is observed through [`Cover::cover_status`].
    async fn open(&self) -> Result<()>;

    /// Start closing; completion is observed through [`Cover::cover_status`].
    async fn close(&self) -> Result<()>;

    /// Current cover position
    async fn cover_status(&self) -> Result<CoverStatus>;

    /// Calibrator brightness, zero when the light is off
    async fn brightness(&self) -> Result<u32>;

    /// Set the calibrator brightness, zero switches it off.
    async fn set_brightness(&self, brightness: u32) -> Result<()>;
}
