//! Device abstraction and unattended imaging-session engine for astrophotography.
//!
//! The crate lets a sequencer drive a mount, an autoguider, one or more cameras and
//! their accessories through any number of hardware backends, and walks a target
//! list through slew, guide-settle, expose and persist with bounded waits.
//!
//! # Layers
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`device`] | Identities, backend factories, the `Controllable` ownership wrapper |
//! | [`drivers`] | One capability contract per equipment class |
//! | [`hardware`] | In-tree backends (the simulator) |
//! | [`setup`] | Mount + guider + telescopes aggregate |
//! | [`session`] | Target list, cursor, clock, bounded waits and the engine |
//! | [`storage`] | Frame writer collaborator |
//! | [`config`] | Figment-based configuration |
//! | [`error`] | `ImagingError` taxonomy |

pub mod config;
pub mod device;
pub mod drivers;
pub mod error;
pub mod hardware;
pub mod session;
pub mod setup;
pub mod storage;

pub use device::{Controllable, DeviceId, DeviceKind, DriverRegistry};
pub use error::{AppResult, ImagingError};
pub use session::{Session, SessionEngine, SessionReport, Target};
pub use setup::{Setup, Telescope};
