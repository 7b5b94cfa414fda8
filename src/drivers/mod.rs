//! Driver capability contracts.
//!
//! One trait per equipment class, each exposing only what that class supports plus
//! the common connect/disconnect lifecycle from [`Driver`]. Backend adapters (ASCOM,
//! Alpaca, vendor SDKs, serial protocols, the guiding application) implement these
//! traits; the rest of the crate never sees anything backend-specific.
//!
//! # Design
//!
//! Each contract:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Takes `&self`; backends keep state behind interior mutability
//!
//! # Connection lifecycle
//!
//! `set_connected(true)` must populate the capability snapshot *before* it returns,
//! and before the connection-changed notification fires. Capabilities read before
//! the first successful connect are `Default::default()`, never left over from an
//! earlier connection.
//!
//! [`AnyDriver`] is the tagged union a backend factory hands back; [`Contract`] lets
//! the generic [`Controllable`](crate::device::Controllable) wrapper pick the typed
//! handle back out of it.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use tokio::sync::watch;

use crate::device::DeviceKind;

pub mod camera;
pub mod cover;
pub mod filter_wheel;
pub mod focuser;
pub mod guider;
pub mod mount;
pub mod switch;

pub use camera::{Camera, CameraCapabilities, Frame, PixelBuffer};
pub use cover::{Cover, CoverCapabilities, CoverStatus};
pub use filter_wheel::{FilterWheel, FilterWheelCapabilities};
pub use focuser::{Focuser, FocuserCapabilities};
pub use guider::{Guider, GuiderCapabilities, SettleSettings};
pub use mount::{Mount, MountCapabilities, TrackingSpeed};
pub use switch::{Switch, SwitchCapabilities};

/// Lifecycle shared by every driver.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Whether the backend currently reports a live connection.
    fn is_connected(&self) -> bool;

    /// Connect or disconnect the hardware.
    ///
    /// On a successful connect the backend has already refreshed its capability
    /// fields when this returns.
    async fn set_connected(&self, connected: bool) -> Result<()>;

    /// Subscribe to connection-changed notifications.
    fn connection_events(&self) -> watch::Receiver<bool>;

    /// Release backend resources (COM objects, SDK handles, sockets).
    ///
    /// Called exactly once by the owning wrapper, after it has disconnected.
    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Connection flag plus change notification, for backends to embed.
#[derive(Debug)]
pub struct ConnectionState {
    tx: watch::Sender<bool>,
}

impl ConnectionState {
    /// A disconnected flag with no subscribers.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Current connection flag
    pub fn get(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the flag, notifying subscribers only on an actual change.
    pub fn set(&self, connected: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    /// Receiver notified on every change of the flag.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Live receivers from [`subscribe`](Self::subscribe).
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// A freshly instantiated driver of any kind.
pub enum AnyDriver {
    /// Mount driver
    Mount(Box<dyn Mount>),
    /// Camera driver
    Camera(Box<dyn Camera>),
    /// Guider driver
    Guider(Box<dyn Guider>),
    /// Focuser driver
    Focuser(Box<dyn Focuser>),
    /// Filter wheel driver
    FilterWheel(Box<dyn FilterWheel>),
    /// Cover driver
    Cover(Box<dyn Cover>),
    /// Switch driver
    Switch(Box<dyn Switch>),
}

impl AnyDriver {
    /// Kind of the wrapped driver
    pub fn kind(&self) -> DeviceKind {
        match self {
            AnyDriver::Mount(_) => DeviceKind::Mount,
            AnyDriver::Camera(_) => DeviceKind::Camera,
            AnyDriver::Guider(_) => DeviceKind::Guider,
            AnyDriver::Focuser(_) => DeviceKind::Focuser,
            AnyDriver::FilterWheel(_) => DeviceKind::FilterWheel,
            AnyDriver::Cover(_) => DeviceKind::Cover,
            AnyDriver::Switch(_) => DeviceKind::Switch,
        }
    }
}

impl fmt::Debug for AnyDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyDriver::{}", self.kind())
    }
}

/// Binds a contract trait object to its kind and capability snapshot type.
///
/// Implemented for `dyn Mount`, `dyn Camera`, ... so that
/// `Controllable<dyn Mount>` is the typed wrapper for a mount.
pub trait Contract: Driver {
    /// Kind a device must have to be wrapped as this contract
    const KIND: DeviceKind;

    /// Capability snapshot cached by the wrapper while connected
    type Capabilities: Clone + Default + fmt::Debug + Send + Sync;

    /// Read the capability fields the backend populated on connect.
    fn capability_snapshot(&self) -> Self::Capabilities;

    /// Extract the typed handle, handing the driver back on a kind mismatch.
    fn from_any(driver: AnyDriver) -> std::result::Result<Box<Self>, AnyDriver>;
}

macro_rules! contract {
    ($contract:ident, $variant:ident, $caps:ty) => {
        impl Contract for dyn $contract {
            const KIND: DeviceKind = DeviceKind::$variant;

            type Capabilities = $caps;

            fn capability_snapshot(&self) -> $caps {
                <Self as $contract>::capabilities(self)
            }

            fn from_any(driver: AnyDriver) -> std::result::Result<Box<Self>, AnyDriver> {
                match driver {
                    AnyDriver::$variant(driver) => Ok(driver),
                    other => Err(other),
                }
            }
        }
    };
}

contract!(Mount, Mount, MountCapabilities);
contract!(Camera, Camera, CameraCapabilities);
contract!(Guider, Guider, GuiderCapabilities);
contract!(Focuser, Focuser, FocuserCapabilities);
contract!(FilterWheel, FilterWheel, FilterWheelCapabilities);
contract!(Cover, Cover, CoverCapabilities);
contract!(Switch, Switch, SwitchCapabilities);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_state_notifies_only_on_change() {
        let state = ConnectionState::new();
        let mut rx = state.subscribe();
        assert!(!state.get());

        state.set(false);
        assert!(!rx.has_changed().unwrap());

        state.set(true);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        assert!(state.get());
    }
}
