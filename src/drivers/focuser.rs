//! Focuser contract.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use super::Driver;

/// Focuser travel, read on connect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FocuserCapabilities {
    /// Whether positions are absolute step counts
    pub absolute: bool,
    /// Highest reachable step
    pub max_step: u32,
}

/// Electronic focuser.
#[async_trait]
pub trait Focuser: Driver {
    /// Capability snapshot, only meaningful while connected.
    fn capabilities(&self) -> FocuserCapabilities;

    /// Current position in steps
    async fn position(&self) -> Result<u32>;

    /// Start moving to `position` and return immediately.
    async fn move_to(&self, position: u32) -> Result<()>;

    /// Whether a move is in progress
    async fn is_moving(&self) -> Result<bool>;

    /// Stop any move immediately.
    async fn halt(&self) -> Result<()>;

    /// Sensor temperature in °C, `None` without a sensor.
    async fn temperature(&self) -> Result<Option<f64>> {
        Ok(None)
    }
}
