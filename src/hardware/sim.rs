//! Simulator Backend
//!
//! Simulated equipment for running sessions without hardware (backend key `sim`).
//! Every device progresses per status poll rather than per wall-clock tick, so a
//! session driven by a virtual clock behaves exactly like one on real time.
//!
//! # Available Simulators
//!
//! - `SimMount` - slews complete after `slew_polls` calls to `is_slewing`
//! - `SimGuider` - settles after `settle_polls` calls to `is_settling`
//! - `SimCamera` - synthetic 16-bit gradient frames, cooler state
//! - `SimCover` - passes through `Moving` for `move_polls` status reads
//! - `SimFocuser`, `SimFilterWheel`, `SimSwitch` - instant moves
//!
//! Capability fields are zero until connected and cleared again on disconnect.

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;

use crate::device::{DeviceId, DeviceKind, DriverRegistry};
use crate::drivers::{
    AnyDriver, Camera, CameraCapabilities, ConnectionState, Cover, CoverCapabilities,
    CoverStatus, Driver, FilterWheel, FilterWheelCapabilities, Focuser, FocuserCapabilities,
    Frame, Guider, GuiderCapabilities, Mount, MountCapabilities, PixelBuffer, SettleSettings,
    Switch, SwitchCapabilities, TrackingSpeed,
};

/// Backend key under which the simulators register.
pub const BACKEND_KEY: &str = "sim";

/// Register a simulator factory for every device kind.
pub fn register(registry: &mut DriverRegistry) {
    for kind in DeviceKind::ALL {
        if kind != DeviceKind::None {
            registry.register(kind, BACKEND_KEY, create);
        }
    }
}

/// Instantiate the simulator matching `device.kind()`.
pub fn create(device: &DeviceId) -> Result<AnyDriver> {
    Ok(match device.kind() {
        DeviceKind::Mount => AnyDriver::Mount(Box::<SimMount>::default()),
        DeviceKind::Camera => AnyDriver::Camera(Box::<SimCamera>::default()),
        DeviceKind::Guider => AnyDriver::Guider(Box::<SimGuider>::default()),
        DeviceKind::Focuser => AnyDriver::Focuser(Box::<SimFocuser>::default()),
        DeviceKind::FilterWheel => AnyDriver::FilterWheel(Box::<SimFilterWheel>::default()),
        DeviceKind::Cover => AnyDriver::Cover(Box::<SimCover>::default()),
        DeviceKind::Switch => AnyDriver::Switch(Box::<SimSwitch>::default()),
        DeviceKind::None => bail!("the simulator has no device of kind 'none'"),
    })
}

fn ensure_connected(connection: &ConnectionState, what: &str) -> Result<()> {
    if connection.get() {
        Ok(())
    } else {
        bail!("{what}: not connected")
    }
}

/// Implements [`Driver`] for a simulator with a `connection` field.
macro_rules! sim_driver {
    ($ty:ty) => {
        #[async_trait]
        impl Driver for $ty {
            fn is_connected(&self) -> bool {
                self.connection.get()
            }

            async fn set_connected(&self, connected: bool) -> Result<()> {
                self.connection.set(connected);
                tracing::debug!(device = stringify!($ty), connected, "Simulator connection");
                Ok(())
            }

            fn connection_events(&self) -> watch::Receiver<bool> {
                self.connection.subscribe()
            }
        }
    };
}

// =============================================================================
// SimMount
// =============================================================================

#[derive(Debug, Default)]
struct MountState {
    tracking: bool,
    speed: TrackingSpeed,
    slew_polls_left: u32,
    ra_hours: f64,
    dec_degrees: f64,
}

/// Simulated equatorial mount.
pub struct SimMount {
    connection: ConnectionState,
    slew_polls: u32,
    state: Mutex<MountState>,
}

impl SimMount {
    /// Mount whose slews finish after `slew_polls` status polls.
    pub fn with_slew_polls(slew_polls: u32) -> Self {
        Self {
            connection: ConnectionState::new(),
            slew_polls,
            state: Mutex::new(MountState::default()),
        }
    }

    /// Last commanded coordinates.
    pub fn position(&self) -> (f64, f64) {
        let state = self.state.lock();
        (state.ra_hours, state.dec_degrees)
    }
}

impl Default for SimMount {
    fn default() -> Self {
        Self::with_slew_polls(3)
    }
}

sim_driver!(SimMount);

#[async_trait]
impl Mount for SimMount {
    fn capabilities(&self) -> MountCapabilities {
        if !self.connection.get() {
            return MountCapabilities::default();
        }
        MountCapabilities {
            can_set_tracking: true,
            can_park: true,
            can_slew_async: true,
            can_pulse_guide: true,
        }
    }

    async fn tracking(&self) -> Result<bool> {
        ensure_connected(&self.connection, "SimMount")?;
        Ok(self.state.lock().tracking)
    }

    async fn set_tracking(&self, enabled: bool) -> Result<()> {
        ensure_connected(&self.connection, "SimMount")?;
        self.state.lock().tracking = enabled;
        Ok(())
    }

    async fn tracking_speed(&self) -> Result<TrackingSpeed> {
        ensure_connected(&self.connection, "SimMount")?;
        Ok(self.state.lock().speed)
    }

    async fn set_tracking_speed(&self, speed: TrackingSpeed) -> Result<()> {
        ensure_connected(&self.connection, "SimMount")?;
        self.state.lock().speed = speed;
        Ok(())
    }

    async fn is_slewing(&self) -> Result<bool> {
        ensure_connected(&self.connection, "SimMount")?;
        let mut state = self.state.lock();
        if state.slew_polls_left == 0 {
            return Ok(false);
        }
        state.slew_polls_left -= 1;
        Ok(true)
    }

    async fn slew_async(&self, ra_hours: f64, dec_degrees: f64) -> Result<bool> {
        ensure_connected(&self.connection, "SimMount")?;
        if !(0.0..24.0).contains(&ra_hours) || !(-90.0..=90.0).contains(&dec_degrees) {
            tracing::warn!(ra_hours, dec_degrees, "SimMount: refusing slew outside sky range");
            return Ok(false);
        }
        let mut state = self.state.lock();
        state.ra_hours = ra_hours;
        state.dec_degrees = dec_degrees;
        state.slew_polls_left = self.slew_polls;
        tracing::debug!(ra_hours, dec_degrees, "SimMount: slewing");
        Ok(true)
    }

    async fn abort_slew(&self) -> Result<()> {
        self.state.lock().slew_polls_left = 0;
        Ok(())
    }

    async fn utc_date(&self) -> Result<DateTime<Utc>> {
        ensure_connected(&self.connection, "SimMount")?;
        Ok(Utc::now())
    }
}

// =============================================================================
// SimGuider
// =============================================================================

#[derive(Debug, Default)]
struct GuiderState {
    equipment_connected: bool,
    guiding: bool,
    settle_polls_left: u32,
    dithers: u32,
}

/// Simulated guiding application.
pub struct SimGuider {
    connection: ConnectionState,
    settle_polls: u32,
    state: Mutex<GuiderState>,
}

impl SimGuider {
    /// A guider that reports settling for `settle_polls` status reads after each request.
    pub fn with_settle_polls(settle_polls: u32) -> Self {
        Self {
            connection: ConnectionState::new(),
            settle_polls,
            state: Mutex::new(GuiderState::default()),
        }
    }

    /// Number of dithers issued so far.
    pub fn dither_count(&self) -> u32 {
        self.state.lock().dithers
    }
}

impl Default for SimGuider {
    fn default() -> Self {
        Self::with_settle_polls(2)
    }
}

sim_driver!(SimGuider);

#[async_trait]
impl Guider for SimGuider {
    fn capabilities(&self) -> GuiderCapabilities {
        GuiderCapabilities {
            can_dither: self.connection.get(),
        }
    }

    async fn connect_equipment(&self) -> Result<()> {
        ensure_connected(&self.connection, "SimGuider")?;
        self.state.lock().equipment_connected = true;
        Ok(())
    }

    async fn guide(&self, settle: SettleSettings) -> Result<()> {
        ensure_connected(&self.connection, "SimGuider")?;
        let mut state = self.state.lock();
        if !state.equipment_connected {
            bail!("SimGuider: equipment not connected");
        }
        state.guiding = true;
        state.settle_polls_left = self.settle_polls;
        tracing::debug!(pixels = settle.pixels, "SimGuider: guiding, settling");
        Ok(())
    }

    async fn dither(&self, pixels: f64, ra_only: bool, _settle: SettleSettings) -> Result<()> {
        ensure_connected(&self.connection, "SimGuider")?;
        let mut state = self.state.lock();
        if !state.guiding {
            bail!("SimGuider: cannot dither while not guiding");
        }
        state.dithers += 1;
        state.settle_polls_left = self.settle_polls;
        tracing::debug!(pixels, ra_only, "SimGuider: dither");
        Ok(())
    }

    async fn is_settling(&self) -> Result<bool> {
        ensure_connected(&self.connection, "SimGuider")?;
        let mut state = self.state.lock();
        if state.settle_polls_left == 0 {
            return Ok(false);
        }
        state.settle_polls_left -= 1;
        Ok(true)
    }

    async fn is_guiding(&self) -> Result<bool> {
        ensure_connected(&self.connection, "SimGuider")?;
        Ok(self.state.lock().guiding)
    }

    async fn stop_capture(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.guiding = false;
        state.settle_polls_left = 0;
        Ok(())
    }
}

// =============================================================================
// SimCamera
// =============================================================================

#[derive(Debug, Default)]
struct CameraState {
    exposure: Option<(Duration, bool)>,
    readout_polls_left: u32,
    last_frame: Option<Frame>,
    cooler_on: bool,
    frame_count: u32,
}

/// Simulated cooled CMOS camera.
pub struct SimCamera {
    connection: ConnectionState,
    resolution: (u32, u32),
    readout_polls: u32,
    state: Mutex<CameraState>,
}

impl SimCamera {
    /// Camera with the given sensor size; frames are ready on the first poll
    /// after `readout_polls` not-ready answers.
    pub fn new(width: u32, height: u32, readout_polls: u32) -> Self {
        Self {
            connection: ConnectionState::new(),
            resolution: (width, height),
            readout_polls,
            state: Mutex::new(CameraState::default()),
        }
    }

    /// Exposures started since creation
    pub fn frame_count(&self) -> u32 {
        self.state.lock().frame_count
    }

    fn synthesize(&self, exposure: Duration, light: bool, index: u32) -> Frame {
        let (width, height) = self.resolution;
        let pedestal: u32 = if light { 1000 } else { 100 };
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| {
                let value = pedestal + (x + y + index) % 256;
                u16::try_from(value).unwrap_or(u16::MAX)
            })
            .collect();
        Frame {
            width,
            height,
            pixels: PixelBuffer::U16(pixels),
            exposure,
            light,
        }
    }
}

impl Default for SimCamera {
    fn default() -> Self {
        Self::new(64, 48, 0)
    }
}

sim_driver!(SimCamera);

#[async_trait]
impl Camera for SimCamera {
    fn capabilities(&self) -> CameraCapabilities {
        if !self.connection.get() {
            return CameraCapabilities::default();
        }
        CameraCapabilities {
            sensor_width: self.resolution.0,
            sensor_height: self.resolution.1,
            pixel_size_um: 3.76,
            can_set_ccd_temperature: true,
            can_abort_exposure: true,
        }
    }

    async fn start_exposure(&self, duration: Duration, light: bool) -> Result<()> {
        ensure_connected(&self.connection, "SimCamera")?;
        let mut state = self.state.lock();
        if state.exposure.is_some() {
            bail!("SimCamera: exposure already in progress");
        }
        state.exposure = Some((duration, light));
        state.readout_polls_left = self.readout_polls;
        Ok(())
    }

    async fn image_ready(&self) -> Result<bool> {
        ensure_connected(&self.connection, "SimCamera")?;
        let mut state = self.state.lock();
        let Some((duration, light)) = state.exposure else {
            return Ok(state.last_frame.is_some());
        };
        if state.readout_polls_left > 0 {
            state.readout_polls_left -= 1;
            return Ok(false);
        }
        let index = state.frame_count;
        state.last_frame = Some(self.synthesize(duration, light, index));
        state.frame_count += 1;
        state.exposure = None;
        Ok(true)
    }

    async fn image(&self) -> Result<Option<Frame>> {
        ensure_connected(&self.connection, "SimCamera")?;
        Ok(self.state.lock().last_frame.take())
    }

    async fn abort_exposure(&self) -> Result<()> {
        self.state.lock().exposure = None;
        Ok(())
    }

    async fn cooler_on(&self) -> Result<bool> {
        ensure_connected(&self.connection, "SimCamera")?;
        Ok(self.state.lock().cooler_on)
    }

    async fn set_cooler_on(&self, enabled: bool) -> Result<()> {
        ensure_connected(&self.connection, "SimCamera")?;
        self.state.lock().cooler_on = enabled;
        Ok(())
    }
}

// =============================================================================
// SimCover
// =============================================================================

#[derive(Debug)]
struct CoverState {
    status: CoverStatus,
    target: CoverStatus,
    move_polls_left: u32,
    brightness: u32,
}

/// Simulated motorized dust cover with a flat panel.
pub struct SimCover {
    connection: ConnectionState,
    move_polls: u32,
    state: Mutex<CoverState>,
}

impl SimCover {
    /// A closed cover that reports `Moving` for `move_polls` status reads after each request.
    pub fn with_move_polls(move_polls: u32) -> Self {
        Self {
            connection: ConnectionState::new(),
            move_polls,
            state: Mutex::new(CoverState {
                status: CoverStatus::Closed,
                target: CoverStatus::Closed,
                move_polls_left: 0,
                brightness: 0,
            }),
        }
    }

    fn start_move(&self, target: CoverStatus) -> Result<()> {
        ensure_connected(&self.connection, "SimCover")?;
        let mut state = self.state.lock();
        state.target = target;
        if self.move_polls == 0 {
            state.status = target;
        } else {
            state.status = CoverStatus::Moving;
            state.move_polls_left = self.move_polls;
        }
        Ok(())
    }
}

impl Default for SimCover {
    fn default() -> Self {
        Self::with_move_polls(2)
    }
}

sim_driver!(SimCover);

#[async_trait]
impl Cover for SimCover {
    fn capabilities(&self) -> CoverCapabilities {
        CoverCapabilities {
            max_brightness: if self.connection.get() { 255 } else { 0 },
        }
    }

    async fn open(&self) -> Result<()> {
        self.start_move(CoverStatus::Open)
    }

    async fn close(&self) -> Result<()> {
        self.start_move(CoverStatus::Closed)
    }

    async fn cover_status(&self) -> Result<CoverStatus> {
        ensure_connected(&self.connection, "SimCover")?;
        let mut state = self.state.lock();
        if state.status == CoverStatus::Moving {
            state.move_polls_left = state.move_polls_left.saturating_sub(1);
            if state.move_polls_left == 0 {
                state.status = state.target;
            }
            return Ok(CoverStatus::Moving);
        }
        Ok(state.status)
    }

    async fn brightness(&self) -> Result<u32> {
        ensure_connected(&self.connection, "SimCover")?;
        Ok(self.state.lock().brightness)
    }

    async fn set_brightness(&self, brightness: u32) -> Result<()> {
        ensure_connected(&self.connection, "SimCover")?;
        if brightness > 255 {
            bail!("SimCover: brightness {brightness} above maximum 255");
        }
        self.state.lock().brightness = brightness;
        Ok(())
    }
}

// =============================================================================
// SimFocuser, SimFilterWheel, SimSwitch
// =============================================================================

/// Simulated absolute focuser.
#[derive(Default)]
pub struct SimFocuser {
    connection: ConnectionState,
    position: Mutex<u32>,
}

sim_driver!(SimFocuser);

#[async_trait]
impl Focuser for SimFocuser {
    fn capabilities(&self) -> FocuserCapabilities {
        if !self.connection.get() {
            return FocuserCapabilities::default();
        }
        FocuserCapabilities {
            absolute: true,
            max_step: 50_000,
        }
    }

    async fn position(&self) -> Result<u32> {
        ensure_connected(&self.connection, "SimFocuser")?;
        Ok(*self.position.lock())
    }

    async fn move_to(&self, position: u32) -> Result<()> {
        ensure_connected(&self.connection, "SimFocuser")?;
        if position > 50_000 {
            bail!("SimFocuser: position {position} beyond max step 50000");
        }
        *self.position.lock() = position;
        Ok(())
    }

    async fn is_moving(&self) -> Result<bool> {
        Ok(false)
    }

    async fn halt(&self) -> Result<()> {
        Ok(())
    }

    async fn temperature(&self) -> Result<Option<f64>> {
        Ok(Some(12.5))
    }
}

/// Simulated 7-slot LRGB + narrowband filter wheel.
#[derive(Default)]
pub struct SimFilterWheel {
    connection: ConnectionState,
    slot: Mutex<usize>,
}

const FILTERS: [&str; 7] = ["L", "R", "G", "B", "Ha", "OIII", "SII"];

sim_driver!(SimFilterWheel);

#[async_trait]
impl FilterWheel for SimFilterWheel {
    fn capabilities(&self) -> FilterWheelCapabilities {
        if !self.connection.get() {
            return FilterWheelCapabilities::default();
        }
        FilterWheelCapabilities {
            names: FILTERS.iter().map(|name| name.to_string()).collect(),
        }
    }

    async fn position(&self) -> Result<Option<usize>> {
        ensure_connected(&self.connection, "SimFilterWheel")?;
        Ok(Some(*self.slot.lock()))
    }

    async fn set_position(&self, slot: usize) -> Result<()> {
        ensure_connected(&self.connection, "SimFilterWheel")?;
        if slot >= FILTERS.len() {
            bail!("SimFilterWheel: no slot {slot}");
        }
        *self.slot.lock() = slot;
        Ok(())
    }
}

const SWITCHES: usize = 4;

/// Simulated four-port power box.
#[derive(Default)]
pub struct SimSwitch {
    connection: ConnectionState,
    values: Mutex<[f64; SWITCHES]>,
}

impl SimSwitch {
    fn slot(id: u16) -> Result<usize> {
        let index = usize::from(id);
        if index >= SWITCHES {
            bail!("SimSwitch: no switch {id}");
        }
        Ok(index)
    }
}

sim_driver!(SimSwitch);

#[async_trait]
impl Switch for SimSwitch {
    fn capabilities(&self) -> SwitchCapabilities {
        SwitchCapabilities {
            max_switch: if self.connection.get() { 4 } else { 0 },
        }
    }

    async fn switch_name(&self, id: u16) -> Result<String> {
        Ok(format!("Port {}", Self::slot(id)? + 1))
    }

    async fn get_switch(&self, id: u16) -> Result<bool> {
        ensure_connected(&self.connection, "SimSwitch")?;
        Ok(self.values.lock()[Self::slot(id)?] > 0.0)
    }

    async fn set_switch(&self, id: u16, on: bool) -> Result<()> {
        self.set_switch_value(id, if on { 1.0 } else { 0.0 }).await
    }

    async fn get_switch_value(&self, id: u16) -> Result<f64> {
        ensure_connected(&self.connection, "SimSwitch")?;
        Ok(self.values.lock()[Self::slot(id)?])
    }

    async fn set_switch_value(&self, id: u16, value: f64) -> Result<()> {
        ensure_connected(&self.connection, "SimSwitch")?;
        self.values.lock()[Self::slot(id)?] = value;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
