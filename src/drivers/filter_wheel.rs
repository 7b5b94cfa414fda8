//! Filter wheel contract.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use super::Driver;

/// Filters installed in the wheel, read on connect.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FilterWheelCapabilities {
    /// Filter names, indexed by slot
    pub names: Vec<String>,
}

/// Filter wheel.
#[async_trait]
pub trait FilterWheel: Driver {
    /// Capability snapshot, only meaningful while connected.
    fn capabilities(&self) -> FilterWheelCapabilities;

    /// Current slot, `None` while the wheel is moving.
    async fn position(&self) -> Result<Option<usize>>;

    /// Start moving to `slot`.
    async fn set_position(&self, slot: usize) -> Result<()>;
}
