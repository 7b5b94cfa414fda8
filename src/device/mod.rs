//! Device identity, driver factories and the controllable-device wrapper.

pub mod controllable;
pub mod identity;
pub mod registry;

pub use controllable::Controllable;
pub use identity::{DeviceId, DeviceKind};
pub use registry::{DriverFactory, DriverRegistry};
