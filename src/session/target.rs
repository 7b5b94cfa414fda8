//! Sky targets.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppResult, ImagingError};

/// A named position on the sky, J-now.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Object name, also used as the output folder
    pub name: String,
    /// Right ascension in hours, `[0, 24)`
    pub ra_hours: f64,
    /// Declination in degrees, `[-90, 90]`
    pub dec_degrees: f64,
}

impl Target {
    /// A validated target.
    pub fn new(name: impl Into<String>, ra_hours: f64, dec_degrees: f64) -> AppResult<Self> {
        let target = Self {
            name: name.into(),
            ra_hours,
            dec_degrees,
        };
        target.validate()?;
        Ok(target)
    }

    /// Reject empty names and coordinates off the sky.
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(ImagingError::InvalidTarget("target name is empty".into()));
        }
        if !(0.0..24.0).contains(&self.ra_hours) {
            return Err(ImagingError::InvalidTarget(format!(
                "{}: RA {} h outside [0, 24)",
                self.name, self.ra_hours
            )));
        }
        if !(-90.0..=90.0).contains(&self.dec_degrees) {
            return Err(ImagingError::InvalidTarget(format!(
                "{}: Dec {} deg outside [-90, 90]",
                self.name, self.dec_degrees
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (RA {:.4}h, Dec {:+.3}°)",
            self.name, self.ra_hours, self.dec_degrees
        )
    }
}
