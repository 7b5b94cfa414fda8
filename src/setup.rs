//! Equipment setup: one mount, one guider and one or more telescopes.
//!
//! A [`Setup`] owns every [`Controllable`] for the lifetime of a session and is the
//! only thing that disposes them. Disposal is best-effort: a failing device is
//! logged and collected, and the remaining devices are still torn down.

use crate::config::{SetupConfig, TelescopeConfig};
use crate::device::{Controllable, DeviceId, DriverRegistry};
use crate::drivers::{Camera, Contract, Cover, FilterWheel, Focuser, Guider, Mount, Switch};
use crate::error::{AppResult, ImagingError};

/// An optical train: camera plus its optional accessories.
pub struct Telescope {
    /// Unique name, also used as the output sub-folder
    pub name: String,
    /// Focal length in millimetres
    pub focal_length_mm: f64,
    /// Imaging camera
    pub camera: Controllable<dyn Camera>,
    /// Dust cover or flat panel
    pub cover: Option<Controllable<dyn Cover>>,
    /// Focuser
    pub focuser: Option<Controllable<dyn Focuser>>,
    /// Filter wheel
    pub filter_wheel: Option<Controllable<dyn FilterWheel>>,
    /// Power or dew-heater switch box
    pub switch: Option<Controllable<dyn Switch>>,
}

impl Telescope {
    /// A telescope with only a camera attached.
    pub fn new(
        name: impl Into<String>,
        focal_length_mm: f64,
        camera: Controllable<dyn Camera>,
    ) -> Self {
        Self {
            name: name.into(),
            focal_length_mm,
            camera,
            cover: None,
            focuser: None,
            filter_wheel: None,
            switch: None,
        }
    }

    /// Instantiate the configured devices through `registry`.
    pub fn from_config(config: &TelescopeConfig, registry: &DriverRegistry) -> AppResult<Self> {
        Ok(Self {
            name: config.name.clone(),
            focal_length_mm: config.focal_length_mm,
            camera: Controllable::new(config.camera.clone(), registry)?,
            cover: optional(config.cover.as_ref(), registry)?,
            focuser: optional(config.focuser.as_ref(), registry)?,
            filter_wheel: optional(config.filter_wheel.as_ref(), registry)?,
            switch: optional(config.switch.as_ref(), registry)?,
        })
    }

    /// Dispose camera, cover, focuser, filter wheel and switch in that order.
    ///
    /// Returns every failure; an empty vector means a clean teardown.
    pub async fn dispose(&mut self) -> Vec<ImagingError> {
        let mut errors = Vec::new();
        collect(&mut errors, self.camera.dispose().await);
        if let Some(cover) = self.cover.as_mut() {
            collect(&mut errors, cover.dispose().await);
        }
        if let Some(focuser) = self.focuser.as_mut() {
            collect(&mut errors, focuser.dispose().await);
        }
        if let Some(filter_wheel) = self.filter_wheel.as_mut() {
            collect(&mut errors, filter_wheel.dispose().await);
        }
        if let Some(switch) = self.switch.as_mut() {
            collect(&mut errors, switch.dispose().await);
        }
        for err in &errors {
            tracing::warn!(telescope = %self.name, error = %err, "Teardown failure");
        }
        errors
    }
}

fn optional<D: ?Sized + Contract>(
    device: Option<&DeviceId>,
    registry: &DriverRegistry,
) -> AppResult<Option<Controllable<D>>> {
    device
        .map(|device| Controllable::new(device.clone(), registry))
        .transpose()
}

fn collect(errors: &mut Vec<ImagingError>, result: AppResult<()>) {
    if let Err(err) = result {
        errors.push(err);
    }
}

/// Every device of a rig: one mount, one guider and at least one telescope.
pub struct Setup {
    mount: Controllable<dyn Mount>,
    guider: Controllable<dyn Guider>,
    telescopes: Vec<Telescope>,
}

impl Setup {
    /// Compose a setup. At least one telescope is required.
    pub fn new(
        mount: Controllable<dyn Mount>,
        guider: Controllable<dyn Guider>,
        telescopes: Vec<Telescope>,
    ) -> AppResult<Self> {
        if telescopes.is_empty() {
            return Err(ImagingError::InvalidSetup(
                "a setup needs at least one telescope".into(),
            ));
        }
        Ok(Self {
            mount,
            guider,
            telescopes,
        })
    }

    /// Instantiate every configured device, failing on the first driver that
    /// cannot be created.
    pub fn from_config(config: &SetupConfig, registry: &DriverRegistry) -> AppResult<Self> {
        let mount = Controllable::new(config.mount.clone(), registry)?;
        let guider = Controllable::new(config.guider.clone(), registry)?;
        let telescopes = config
            .telescopes
            .iter()
            .map(|telescope| Telescope::from_config(telescope, registry))
            .collect::<AppResult<Vec<_>>>()?;

        let setup = Self::new(mount, guider, telescopes)?;
        tracing::info!(
            mount = %setup.mount.device(),
            guider = %setup.guider.device(),
            telescopes = setup.telescopes.len(),
            "Setup assembled"
        );
        Ok(setup)
    }

    /// The mount
    pub fn mount(&self) -> &Controllable<dyn Mount> {
        &self.mount
    }

    /// Mutable access to the mount
    pub fn mount_mut(&mut self) -> &mut Controllable<dyn Mount> {
        &mut self.mount
    }

    /// The guider
    pub fn guider(&self) -> &Controllable<dyn Guider> {
        &self.guider
    }

    /// Mutable access to the guider
    pub fn guider_mut(&mut self) -> &mut Controllable<dyn Guider> {
        &mut self.guider
    }

    /// Telescopes on the mount, in configuration order
    pub fn telescopes(&self) -> &[Telescope] {
        &self.telescopes
    }

    /// Mutable access to the telescopes
    pub fn telescopes_mut(&mut self) -> &mut [Telescope] {
        &mut self.telescopes
    }

    /// Dispose every telescope, then the guider, then the mount.
    ///
    /// All devices are attempted; failures come back together as
    /// [`ImagingError::TeardownFailed`].
    pub async fn dispose(&mut self) -> AppResult<()> {
        let mut errors = Vec::new();
        for telescope in &mut self.telescopes {
            errors.extend(telescope.dispose().await);
        }
        if let Err(err) = self.guider.dispose().await {
            tracing::warn!(error = %err, "Guider teardown failure");
            errors.push(err);
        }
        if let Err(err) = self.mount.dispose().await {
            tracing::warn!(error = %err, "Mount teardown failure");
            errors.push(err);
        }

        if errors.is_empty() {
            tracing::info!("Setup disposed");
            Ok(())
        } else {
            Err(ImagingError::TeardownFailed(errors))
        }
    }
}
