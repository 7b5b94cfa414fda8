//! Ownership wrapper binding one identity to one driver.
//!
//! [`Controllable<D>`] owns its driver exclusively, caches the capability snapshot
//! taken on connect, and tears the driver down in a fixed order:
//!
//! ```text
//! disconnect (if connected) -> drop connection subscription -> release() -> drop
//! ```
//!
//! Detaching the subscription before `release()` means a backend firing a late
//! notification never reaches a half torn-down wrapper.

use tokio::sync::watch;

use crate::device::{DeviceId, DriverRegistry};
use crate::drivers::Contract;
use crate::error::{AppResult, ImagingError};

/// Typed wrapper around a driver that caches its capabilities while connected.
pub struct Controllable<D: ?Sized + Contract> {
    device: DeviceId,
    driver: Option<Box<D>>,
    connection_rx: Option<watch::Receiver<bool>>,
    capabilities: D::Capabilities,
    disposed: bool,
}

impl<D: ?Sized + Contract> Controllable<D> {
    /// Instantiate the driver for `device` through `registry`.
    ///
    /// Fails fast: there is no partially usable wrapper without a driver.
    pub fn new(device: DeviceId, registry: &DriverRegistry) -> AppResult<Self> {
        if device.kind() != D::KIND {
            return Err(ImagingError::DriverInstantiation {
                device: device.encode(),
                reason: format!("expected a {} device", D::KIND),
            });
        }
        let driver = D::from_any(registry.instantiate(&device)?).map_err(|other| {
            ImagingError::DriverInstantiation {
                device: device.encode(),
                reason: format!("backend returned a {} driver", other.kind()),
            }
        })?;
        Ok(Self::from_driver(device, driver))
    }

    /// Wrap an already instantiated driver.
    pub fn from_driver(device: DeviceId, driver: Box<D>) -> Self {
        let connection_rx = driver.connection_events();
        Self {
            device,
            driver: Some(driver),
            connection_rx: Some(connection_rx),
            capabilities: D::Capabilities::default(),
            disposed: false,
        }
    }

    /// Identity this wrapper was built for
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// The typed driver handle, until the wrapper is disposed.
    pub fn driver(&self) -> AppResult<&D> {
        self.driver
            .as_deref()
            .ok_or_else(|| ImagingError::Disposed(self.device.encode()))
    }

    /// Capability snapshot from the last successful connect.
    ///
    /// `Default` before the first connect and after a disconnect.
    pub fn capabilities(&self) -> &D::Capabilities {
        &self.capabilities
    }

    /// Connection state as of the last connect or refresh
    pub fn is_connected(&self) -> bool {
        self.driver.as_ref().is_some_and(|driver| driver.is_connected())
    }

    /// Whether the driver has been released
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Connect or disconnect through the driver.
    ///
    /// The capability snapshot is only refreshed when the driver call succeeds.
    pub async fn set_connected(&mut self, connected: bool) -> AppResult<()> {
        let snapshot = {
            let driver = self.driver()?;
            driver
                .set_connected(connected)
                .await
                .map_err(|err| ImagingError::Connection {
                    device: self.device.encode(),
                    reason: format!("{:#}", err),
                })?;
            if connected {
                driver.capability_snapshot()
            } else {
                D::Capabilities::default()
            }
        };
        self.capabilities = snapshot;
        if let Some(rx) = self.connection_rx.as_mut() {
            // Our own transition, already reflected in the snapshot.
            rx.borrow_and_update();
        }

        tracing::debug!(device = %self.device, connected, "Connection changed");
        Ok(())
    }

    /// Apply pending connection-changed notifications from the backend.
    ///
    /// A spontaneous disconnect clears the capability snapshot; a reconnect that
    /// happened behind our back takes a fresh one.
    pub fn refresh(&mut self) {
        let Some(rx) = self.connection_rx.as_mut() else {
            return;
        };
        if !rx.has_changed().unwrap_or(false) {
            return;
        }
        let connected = *rx.borrow_and_update();
        match (connected, self.driver.as_deref()) {
            (true, Some(driver)) => self.capabilities = driver.capability_snapshot(),
            _ => self.capabilities = D::Capabilities::default(),
        }
        tracing::info!(device = %self.device, connected, "Backend reported connection change");
    }

    /// Connect unless the driver already reports a live connection.
    pub async fn ensure_connected(&mut self) -> AppResult<()> {
        self.refresh();
        if self.is_connected() {
            return Ok(());
        }
        self.set_connected(true).await
    }

    /// Disconnect and release the driver. Idempotent.
    ///
    /// Every step runs even if an earlier one failed; the first failure is
    /// returned.
    pub async fn dispose(&mut self) -> AppResult<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        let Some(driver) = self.driver.take() else {
            return Ok(());
        };

        let mut first_error = None;
        if driver.is_connected() {
            if let Err(err) = driver.set_connected(false).await {
                tracing::warn!(device = %self.device, error = %err, "Disconnect during dispose failed");
                first_error.get_or_insert(ImagingError::Connection {
                    device: self.device.encode(),
                    reason: format!("{:#}", err),
                });
            }
        }

        self.connection_rx = None;
        self.capabilities = D::Capabilities::default();

        if let Err(err) = driver.release().await {
            tracing::warn!(device = %self.device, error = %err, "Driver release failed");
            first_error.get_or_insert(ImagingError::unhandled(err));
        }
        drop(driver);

        tracing::debug!(device = %self.device, "Disposed");
        first_error.map_or(Ok(()), Err)
    }
}

impl<D: ?Sized + Contract> Drop for Controllable<D> {
    fn drop(&mut self) {
        if self.driver.is_some() {
            tracing::debug!(device = %self.device, "Controllable dropped without dispose");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;
    use crate::drivers::{Camera, Mount};

    fn sim(kind: DeviceKind) -> DeviceId {
        DeviceId::new(kind, "0", "sim", "sim").unwrap()
    }

    #[tokio::test]
    async fn test_capabilities_zero_until_connected() {
        let registry = DriverRegistry::with_simulators();
        let mut mount: Controllable<dyn Mount> =
            Controllable::new(sim(DeviceKind::Mount), &registry).unwrap();

        assert!(!mount.capabilities().can_set_tracking);
        mount.set_connected(true).await.unwrap();
        assert!(mount.capabilities().can_set_tracking);

        mount.set_connected(false).await.unwrap();
        assert!(!mount.capabilities().can_set_tracking);
        mount.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_kind_mismatch_fails_construction() {
        let registry = DriverRegistry::with_simulators();
        let result: AppResult<Controllable<dyn Camera>> =
            Controllable::new(sim(DeviceKind::Mount), &registry);
        assert!(matches!(
            result,
            Err(ImagingError::DriverInstantiation { .. })
        ));
    }

    #[tokio::test]
    async fn test_dispose_disconnects_and_is_idempotent() {
        let registry = DriverRegistry::with_simulators();
        let mut camera: Controllable<dyn Camera> =
            Controllable::new(sim(DeviceKind::Camera), &registry).unwrap();
        camera.ensure_connected().await.unwrap();
        assert!(camera.is_connected());

        camera.dispose().await.unwrap();
        assert!(camera.is_disposed());
        assert!(!camera.is_connected());
        assert!(matches!(camera.driver(), Err(ImagingError::Disposed(_))));

        camera.dispose().await.unwrap();
    }
}
