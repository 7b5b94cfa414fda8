//! Mount (telescope) contract.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Driver;

/// Tracking rate for sky motion compensation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingSpeed {
    /// Stars
    #[default]
    Sidereal,
    /// The Moon
    Lunar,
    /// The Sun
    Solar,
    /// King rate, corrected for refraction
    King,
}

/// Capability fields populated by the backend on connect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MountCapabilities {
    /// Tracking can be switched on and off
    pub can_set_tracking: bool,
    /// The mount can park
    pub can_park: bool,
    /// Slews can run in the background
    pub can_slew_async: bool,
    /// Pulse-guide commands are accepted
    pub can_pulse_guide: bool,
}

/// Equatorial mount.
///
/// Coordinates are J-now right ascension in hours and declination in degrees.
#[async_trait]
pub trait Mount: Driver {
    /// Capability snapshot, only meaningful while connected.
    fn capabilities(&self) -> MountCapabilities;

    /// Whether the mount is tracking
    async fn tracking(&self) -> Result<bool>;

    /// Switch tracking on or off.
    async fn set_tracking(&self, enabled: bool) -> Result<()>;

    /// Current tracking rate
    async fn tracking_speed(&self) -> Result<TrackingSpeed>;

    /// Change the tracking rate.
    async fn set_tracking_speed(&self, speed: TrackingSpeed) -> Result<()>;

    /// Whether a slew is in progress
    async fn is_slewing(&self) -> Result<bool>;

    /// Start a slew and return immediately.
    ///
    /// `Ok(false)` means the mount refused the request (below horizon, parked,
    /// limits); the caller polls [`is_slewing`](Mount::is_slewing) otherwise.
    async fn slew_async(&self, ra_hours: f64, dec_degrees: f64) -> Result<bool>;

    /// Stop a running slew.
    async fn abort_slew(&self) -> Result<()> {
        anyhow::bail!("Abort slew not supported by this mount")
    }

    /// The mount's own UTC clock, used to timestamp frames.
    async fn utc_date(&self) -> Result<DateTime<Utc>>;
}
