//! Backend driver factories.
//!
//! Each backend registers one factory per device kind it supports. A factory turns a
//! [`DeviceId`] into a live driver or rejects it with a reason; the registry is the
//! only place where backend keys are resolved.

use std::collections::HashMap;

use crate::device::{DeviceId, DeviceKind};
use crate::drivers::AnyDriver;
use crate::error::{AppResult, ImagingError};

/// Builds a driver for an identity, or explains why the backend rejects it.
pub type DriverFactory = Box<dyn Fn(&DeviceId) -> anyhow::Result<AnyDriver> + Send + Sync>;

/// Maps `(kind, backend key)` to the factory that builds drivers for it.
pub struct DriverRegistry {
    factories: HashMap<(DeviceKind, String), DriverFactory>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with the simulator backend (`sim`) registered for every kind.
    pub fn with_simulators() -> Self {
        let mut registry = Self::new();
        crate::hardware::sim::register(&mut registry);
        registry
    }

    /// Register (or replace) the factory for `kind` on `backend_key`.
    pub fn register<F>(&mut self, kind: DeviceKind, backend_key: impl Into<String>, factory: F)
    where
        F: Fn(&DeviceId) -> anyhow::Result<AnyDriver> + Send + Sync + 'static,
    {
        self.factories
            .insert((kind, backend_key.into()), Box::new(factory));
    }

    /// Whether a factory is registered for `kind` on `backend_key`
    pub fn supports(&self, kind: DeviceKind, backend_key: &str) -> bool {
        self.factories
            .contains_key(&(kind, backend_key.to_string()))
    }

    /// Backend keys able to instantiate `kind`, sorted.
    pub fn backends_for(&self, kind: DeviceKind) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .factories
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, key)| key.as_str())
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Instantiate a driver for `device`, calling exactly one factory.
    pub fn instantiate(&self, device: &DeviceId) -> AppResult<AnyDriver> {
        let instantiation_error = |reason: String| ImagingError::DriverInstantiation {
            device: device.encode(),
            reason,
        };

        let factory = self
            .factories
            .get(&(device.kind(), device.backend_key().to_string()))
            .ok_or_else(|| {
                instantiation_error(format!(
                    "no '{}' factory registered for backend '{}'",
                    device.kind(),
                    device.backend_key()
                ))
            })?;

        let driver = factory(device).map_err(|err| instantiation_error(format!("{:#}", err)))?;
        if driver.kind() != device.kind() {
            return Err(instantiation_error(format!(
                "backend returned a {} driver",
                driver.kind()
            )));
        }

        tracing::debug!(device = %device, "Driver instantiated");
        Ok(driver)
    }
}
