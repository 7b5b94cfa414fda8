//! Sequencer configuration using Figment
//!
//! Configuration is loaded from:
//! 1. A TOML file (base configuration)
//! 2. Environment variables (prefixed with `ASTROSEQ_`, nested keys split on `__`)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! ASTROSEQ_APPLICATION__LOG_LEVEL=debug
//! ASTROSEQ_SESSION__EXPOSURE=300s
//! ASTROSEQ_SESSION__MAX_FAILSAFE=600
//! ```
//!
//! # Example
//!
//! ```toml
//! [application]
//! name = "backyard"
//! log_level = "info"
//! output_dir = "/data/frames"
//!
//! [session]
//! exposure = "180s"
//! frames_per_target = 3
//!
//! [setup]
//! mount = "device://mount/sim/eq6#EQ6-R"
//! guider = "device://guider/sim/phd2"
//!
//! [[setup.telescopes]]
//! name = "RedCat 51"
//! focal_length_mm = 250.0
//! camera = "device://camera/sim/asi2600"
//! cover = "device://cover/sim/flip-flat"
//!
//! [[targets]]
//! name = "M31"
//! ra_hours = 0.712
//! dec_degrees = 41.27
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::device::{DeviceId, DeviceKind};
use crate::drivers::SettleSettings;
use crate::session::{EngineOptions, Target};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "ASTROSEQ_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be read or deserialized
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// The configuration parsed but describes an unusable rig or session
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    /// The configuration could not be written back as TOML
    #[error("Configuration serialization error: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Application-wide settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Engine parameters
    #[serde(default)]
    pub session: SessionConfig,
    /// Mount, guider and telescopes to drive
    pub setup: SetupConfig,
    /// Objects to image, in order
    pub targets: Vec<Target>,
}

/// Process-level settings that are not part of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Name used in log output
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Root folder for frames; each target gets a sub-folder
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            output_dir: default_output_dir(),
        }
    }
}

/// Engine parameters. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sleep between status polls
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Failsafe counter for slew and settle waits (1000 polls at 1 s is about 16 min)
    pub max_failsafe: u32,
    /// How many times guiding is (re)started before the target is skipped
    pub guide_attempts: u32,
    /// Settle criterion before the first retry step is added
    pub settle: SettleSettings,
    /// Added to `settle` once per guide attempt
    pub settle_step: SettleSettings,
    /// Length of a single exposure
    #[serde(with = "humantime_serde")]
    pub exposure: Duration,
    /// Frames taken per target
    pub frames_per_target: u32,
    /// Dither the guider between consecutive frames
    pub dither_between_frames: bool,
    /// Dither amplitude in pixels
    pub dither_pixels: f64,
    /// Dither along right ascension only
    pub dither_ra_only: bool,
    /// Polls spent waiting for a downloaded image before the exposure times out
    pub image_ready_polls: u32,
    /// Sleep between image-ready polls
    #[serde(with = "humantime_serde")]
    pub image_ready_interval: Duration,
    /// Polls spent waiting for covers to finish opening or closing
    pub cover_wait_polls: u32,
    /// Close covers again once the target list is exhausted
    pub close_covers_on_finish: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let options = EngineOptions::default();
        Self {
            poll_interval: options.poll_interval,
            max_failsafe: options.max_failsafe,
            guide_attempts: options.guide_attempts,
            settle: options.settle,
            settle_step: options.settle_step,
            exposure: options.exposure,
            frames_per_target: options.frames_per_target,
            dither_between_frames: options.dither_between_frames,
            dither_pixels: options.dither_pixels,
            dither_ra_only: options.dither_ra_only,
            image_ready_polls: options.image_ready_polls,
            image_ready_interval: options.image_ready_interval,
            cover_wait_polls: options.cover_wait_polls,
            close_covers_on_finish: options.close_covers_on_finish,
        }
    }
}

/// Equipment, as canonical device identity strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    /// The mount shared by every telescope
    pub mount: DeviceId,
    /// The guiding application
    pub guider: DeviceId,
    /// Telescopes riding on the mount
    pub telescopes: Vec<TelescopeConfig>,
}

/// One telescope and the devices attached to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelescopeConfig {
    /// Unique name, also used as the output sub-folder
    pub name: String,
    /// Focal length in millimetres
    pub focal_length_mm: f64,
    /// Imaging camera
    pub camera: DeviceId,
    /// Optional dust cover or flat panel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<DeviceId>,
    /// Optional focuser
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focuser: Option<DeviceId>,
    /// Optional filter wheel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_wheel: Option<DeviceId>,
    /// Optional power switch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch: Option<DeviceId>,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "astro_sequencer".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("frames")
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl SequencerConfig {
    /// Load from a TOML file with `ASTROSEQ_` environment overrides, then validate.
    ///
    /// Environment variables take precedence over the file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Toml::file(path.as_ref())))
    }

    /// Load from TOML text with `ASTROSEQ_` environment overrides, then validate.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - At least one target, each on the sky
    /// - At least one telescope, with unique names
    /// - Every device identity carries the kind its slot expects
    /// - Poll counts, guide attempts and frames per target are non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.targets.is_empty() {
            return Err(invalid("At least one [[targets]] entry is required"));
        }
        for target in &self.targets {
            target
                .validate()
                .map_err(|err| ConfigError::ValidationError(err.to_string()))?;
        }

        self.validate_setup()?;
        self.validate_session()
    }

    fn validate_setup(&self) -> Result<(), ConfigError> {
        let setup = &self.setup;
        check_slot("setup.mount", &setup.mount, DeviceKind::Mount)?;
        check_slot("setup.guider", &setup.guider, DeviceKind::Guider)?;

        if setup.telescopes.is_empty() {
            return Err(invalid("At least one [[setup.telescopes]] entry is required"));
        }
        let mut names = HashSet::new();
        for telescope in &setup.telescopes {
            if !names.insert(telescope.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate telescope name: '{}'",
                    telescope.name
                )));
            }
            if telescope.focal_length_mm.is_nan() || telescope.focal_length_mm <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "Telescope '{}': focal_length_mm must be positive",
                    telescope.name
                )));
            }
            let slot = |field: &str| format!("telescope '{}' {}", telescope.name, field);
            check_slot(&slot("camera"), &telescope.camera, DeviceKind::Camera)?;
            let optional = [
                ("cover", &telescope.cover, DeviceKind::Cover),
                ("focuser", &telescope.focuser, DeviceKind::Focuser),
                ("filter_wheel", &telescope.filter_wheel, DeviceKind::FilterWheel),
                ("switch", &telescope.switch, DeviceKind::Switch),
            ];
            for (field, device, kind) in optional {
                if let Some(device) = device {
                    check_slot(&slot(field), device, kind)?;
                }
            }
        }
        Ok(())
    }

    fn validate_session(&self) -> Result<(), ConfigError> {
        let session = &self.session;
        let counts = [
            ("max_failsafe", session.max_failsafe),
            ("guide_attempts", session.guide_attempts),
            ("frames_per_target", session.frames_per_target),
            ("image_ready_polls", session.image_ready_polls),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "session.{name} must be greater than 0"
                )));
            }
        }
        if session.exposure.is_zero() {
            return Err(invalid("session.exposure must be greater than 0"));
        }
        if session.settle.pixels < 0.0 || session.settle_step.pixels < 0.0 {
            return Err(invalid("Settle pixel tolerances must not be negative"));
        }
        Ok(())
    }

    /// Engine options for this configuration.
    pub fn engine_options(&self) -> EngineOptions {
        let session = &self.session;
        EngineOptions {
            poll_interval: session.poll_interval,
            max_failsafe: session.max_failsafe,
            guide_attempts: session.guide_attempts,
            settle: session.settle,
            settle_step: session.settle_step,
            exposure: session.exposure,
            frames_per_target: session.frames_per_target,
            dither_between_frames: session.dither_between_frames,
            dither_pixels: session.dither_pixels,
            dither_ra_only: session.dither_ra_only,
            image_ready_polls: session.image_ready_polls,
            image_ready_interval: session.image_ready_interval,
            cover_wait_polls: session.cover_wait_polls,
            close_covers_on_finish: session.close_covers_on_finish,
            output_dir: self.application.output_dir.clone(),
        }
    }

    /// The effective configuration, defaults filled in, as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

fn check_slot(slot: &str, device: &DeviceId, kind: DeviceKind) -> Result<(), ConfigError> {
    device.expect_kind(kind).map(|_| ()).map_err(|err| {
        ConfigError::ValidationError(format!("{slot}: {err} ({})", device.encode()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [setup]
        mount = "device://mount/sim/eq6"
        guider = "device://guider/sim/phd2"

        [[setup.telescopes]]
        name = "main"
        focal_length_mm = 530.0
        camera = "device://camera/sim/asi2600"

        [[targets]]
        name = "M31"
        ra_hours = 0.712
        dec_degrees = 41.27
    "#;

    #[test]
    fn test_defaults_fill_session() {
        let config = SequencerConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.session, SessionConfig::default());
        assert_eq!(config.application.log_level, "info");

        let options = config.engine_options();
        assert_eq!(options.max_failsafe, 1000);
        assert_eq!(options.guide_attempts, 2);
        assert_eq!(options.output_dir, PathBuf::from("frames"));
    }

    #[test]
    fn test_wrong_kind_in_slot_is_rejected() {
        let toml = MINIMAL.replace("device://guider/sim/phd2", "device://camera/sim/phd2");
        let err = SequencerConfig::from_toml_str(&toml).unwrap_err();
        assert!(err
            .to_string()
            .contains("setup.guider: Expected a guider device, got camera"));
    }

    #[test]
    fn test_effective_config_round_trips_through_toml() {
        let config = SequencerConfig::from_toml_str(MINIMAL).unwrap();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("poll_interval = \"1s\""));

        let reloaded = SequencerConfig::from_toml_str(&text).unwrap();
        assert_eq!(reloaded.setup.mount, config.setup.mount);
        assert_eq!(reloaded.session, config.session);
    }
}
