//! Power/dew-heater switch box contract.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use super::Driver;

/// Size of a switch box, read on connect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SwitchCapabilities {
    /// Number of switches, ids run from `0` to `max_switch - 1`
    pub max_switch: u16,
}

/// Power or dew-heater switch box.
#[async_trait]
pub trait Switch: Driver {
    /// Capability snapshot, only meaningful while connected.
    fn capabilities(&self) -> SwitchCapabilities;

    /// Label of switch `id`
    async fn switch_name(&self, id: u16) -> Result<String>;

    /// Whether switch `id` is on
    async fn get_switch(&self, id: u16) -> Result<bool>;

    /// Turn switch `id` on or off.
    async fn set_switch(&self, id: u16, on: bool) -> Result<()>;

    /// Analogue value of switch `id`
    async fn get_switch_value(&self, id: u16) -> Result<f64>;

    /// Set the analogue value of switch `id`.
    async fn set_switch_value(&self, id: u16, value: f64) -> Result<()>;
}
