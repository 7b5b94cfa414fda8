//! Scripted fake drivers shared by the integration tests.
//!
//! Each fake keeps its counters in an `Arc`'d script so a test can inspect them after
//! the driver itself has been boxed into a `Controllable`.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use astro_sequencer::device::{Controllable, DeviceId, DeviceKind};
use astro_sequencer::drivers::{
    Camera, CameraCapabilities, ConnectionState, Cover, CoverCapabilities, CoverStatus, Driver,
    Frame, Guider, GuiderCapabilities, Mount, MountCapabilities, PixelBuffer, SettleSettings,
    TrackingSpeed,
};
use astro_sequencer::session::{CancelToken, EngineOptions, Target, VirtualClock};
use astro_sequencer::setup::{Setup, Telescope};
use astro_sequencer::storage::FrameWriter;

pub fn fake_id(kind: DeviceKind, id: &str) -> DeviceId {
    DeviceId::new(kind, id, format!("Fake {id}"), "fake").unwrap()
}

pub fn night_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 21, 0, 0).unwrap()
}

pub fn virtual_clock() -> Arc<VirtualClock> {
    Arc::new(VirtualClock::new(night_start()))
}

/// Options with small caps so timeouts are reached in a handful of polls.
pub fn fast_options(output_dir: &Path) -> EngineOptions {
    EngineOptions {
        max_failsafe: 16,
        exposure: Duration::from_secs(30),
        image_ready_polls: 4,
        cover_wait_polls: 5,
        output_dir: output_dir.to_path_buf(),
        ..EngineOptions::default()
    }
}

pub fn targets(names: &[&str]) -> Vec<Target> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| Target::new(*name, 1.0 + i as f64, 10.0 * i as f64).unwrap())
        .collect()
}

/// Ordered record of lifecycle calls, shared by every fake of one test.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }
}

// =============================================================================
// FakeMount
// =============================================================================

#[derive(Default)]
pub struct MountScript {
    pub connection: ConnectionState,
    /// 0-based slew calls the mount refuses
    pub reject_slews: Mutex<HashSet<u32>>,
    pub always_slewing: AtomicBool,
    /// `is_slewing` returns an error
    pub fail_slew_poll: AtomicBool,
    pub clock_unavailable: AtomicBool,
    pub fail_connect: AtomicBool,
    pub slew_calls: AtomicU32,
    pub slewing_polls: AtomicU32,
    /// Cancel this token on the given `is_slewing` poll
    pub cancel_on_poll: Mutex<Option<(u32, CancelToken)>>,
    pub tracking: AtomicBool,
}

pub struct FakeMount {
    pub script: Arc<MountScript>,
    pub log: Arc<EventLog>,
}

#[async_trait]
impl Driver for FakeMount {
    fn is_connected(&self) -> bool {
        self.script.connection.get()
    }

    async fn set_connected(&self, connected: bool) -> Result<()> {
        if connected && self.script.fail_connect.load(Ordering::SeqCst) {
            bail!("serial port busy");
        }
        self.log.push(format!("mount.connected={connected}"));
        self.script.connection.set(connected);
        Ok(())
    }

    fn connection_events(&self) -> watch::Receiver<bool> {
        self.script.connection.subscribe()
    }

    async fn release(&self) -> Result<()> {
        self.log.push("mount.release");
        Ok(())
    }
}

#[async_trait]
impl Mount for FakeMount {
    fn capabilities(&self) -> MountCapabilities {
        MountCapabilities {
            can_set_tracking: self.script.connection.get(),
            ..MountCapabilities::default()
        }
    }

    async fn tracking(&self) -> Result<bool> {
        Ok(self.script.tracking.load(Ordering::SeqCst))
    }

    async fn set_tracking(&self, enabled: bool) -> Result<()> {
        self.script.tracking.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    async fn tracking_speed(&self) -> Result<TrackingSpeed> {
        Ok(TrackingSpeed::Sidereal)
    }

    async fn set_tracking_speed(&self, _speed: TrackingSpeed) -> Result<()> {
        Ok(())
    }

    async fn is_slewing(&self) -> Result<bool> {
        let poll = self.script.slewing_polls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, token)) = self.script.cancel_on_poll.lock().as_ref() {
            if *at == poll {
                token.cancel();
            }
        }
        if self.script.fail_slew_poll.load(Ordering::SeqCst) {
            bail!("mount stopped answering");
        }
        Ok(self.script.always_slewing.load(Ordering::SeqCst))
    }

    async fn slew_async(&self, _ra_hours: f64, _dec_degrees: f64) -> Result<bool> {
        let call = self.script.slew_calls.fetch_add(1, Ordering::SeqCst);
        Ok(!self.script.reject_slews.lock().contains(&call))
    }

    async fn utc_date(&self) -> Result<DateTime<Utc>> {
        if self.script.clock_unavailable.load(Ordering::SeqCst) {
            bail!("UTCDate property not implemented");
        }
        Ok(night_start())
    }
}

// =============================================================================
// FakeGuider
// =============================================================================

#[derive(Default)]
pub struct GuiderScript {
    pub connection: ConnectionState,
    /// 1-based guide attempts that never reach a guiding state
    pub fail_attempts: Mutex<HashSet<u32>>,
    /// 1-based guide attempts where `guide` itself returns an error
    pub error_attempts: Mutex<HashSet<u32>>,
    /// `is_settling` never clears
    pub always_settling: AtomicBool,
    pub settling_polls: AtomicU32,
    pub guide_calls: Mutex<Vec<SettleSettings>>,
    pub dither_calls: AtomicU32,
    pub stop_calls: AtomicU32,
    pub guiding: AtomicBool,
}

pub struct FakeGuider {
    pub script: Arc<GuiderScript>,
}

#[async_trait]
impl Driver for FakeGuider {
    fn is_connected(&self) -> bool {
        self.script.connection.get()
    }

    async fn set_connected(&self, connected: bool) -> Result<()> {
        self.script.connection.set(connected);
        Ok(())
    }

    fn connection_events(&self) -> watch::Receiver<bool> {
        self.script.connection.subscribe()
    }
}

#[async_trait]
impl Guider for FakeGuider {
    fn capabilities(&self) -> GuiderCapabilities {
        GuiderCapabilities {
            can_dither: self.script.connection.get(),
        }
    }

    async fn connect_equipment(&self) -> Result<()> {
        Ok(())
    }

    async fn guide(&self, settle: SettleSettings) -> Result<()> {
        let attempt = {
            let mut calls = self.script.guide_calls.lock();
            calls.push(settle);
            calls.len() as u32
        };
        if self.script.error_attempts.lock().contains(&attempt) {
            self.script.guiding.store(false, Ordering::SeqCst);
            bail!("guiding application lost the guide star");
        }
        let fails = self.script.fail_attempts.lock().contains(&attempt);
        self.script.guiding.store(!fails, Ordering::SeqCst);
        Ok(())
    }

    async fn dither(&self, _pixels: f64, _ra_only: bool, _settle: SettleSettings) -> Result<()> {
        self.script.dither_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_settling(&self) -> Result<bool> {
        self.script.settling_polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.always_settling.load(Ordering::SeqCst))
    }

    async fn is_guiding(&self) -> Result<bool> {
        Ok(self.script.guiding.load(Ordering::SeqCst))
    }

    async fn stop_capture(&self) -> Result<()> {
        self.script.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.script.guiding.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// FakeCamera
// =============================================================================

#[derive(Default)]
pub struct CameraScript {
    pub connection: ConnectionState,
    pub fail_start_exposure: AtomicBool,
    pub never_ready: AtomicBool,
    pub fail_release: AtomicBool,
    pub exposures: AtomicU32,
    pub ready_polls: AtomicU32,
    pub aborts: AtomicU32,
    /// Every `set_cooler_on` argument, in order
    pub cooler_calls: Mutex<Vec<bool>>,
}

impl CameraScript {
    pub fn cooler_off_count(&self) -> usize {
        self.cooler_calls.lock().iter().filter(|on| !**on).count()
    }

    pub fn cooler_on_count(&self) -> usize {
        self.cooler_calls.lock().iter().filter(|on| **on).count()
    }
}

pub struct FakeCamera {
    pub script: Arc<CameraScript>,
    pub log: Arc<EventLog>,
}

#[async_trait]
impl Driver for FakeCamera {
    fn is_connected(&self) -> bool {
        self.script.connection.get()
    }

    async fn set_connected(&self, connected: bool) -> Result<()> {
        self.log.push(format!("camera.connected={connected}"));
        self.script.connection.set(connected);
        Ok(())
    }

    fn connection_events(&self) -> watch::Receiver<bool> {
        self.script.connection.subscribe()
    }

    async fn release(&self) -> Result<()> {
        self.log.push("camera.release");
        if self.script.fail_release.load(Ordering::SeqCst) {
            bail!("SDK handle already closed");
        }
        Ok(())
    }
}

#[async_trait]
impl Camera for FakeCamera {
    fn capabilities(&self) -> CameraCapabilities {
        if !self.script.connection.get() {
            return CameraCapabilities::default();
        }
        CameraCapabilities {
            sensor_width: 4,
            sensor_height: 2,
            pixel_size_um: 3.76,
            can_set_ccd_temperature: true,
            can_abort_exposure: true,
        }
    }

    async fn start_exposure(&self, _duration: Duration, _light: bool) -> Result<()> {
        if self.script.fail_start_exposure.load(Ordering::SeqCst) {
            bail!("camera disconnected mid-command");
        }
        self.script.exposures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn image_ready(&self) -> Result<bool> {
        self.script.ready_polls.fetch_add(1, Ordering::SeqCst);
        Ok(!self.script.never_ready.load(Ordering::SeqCst))
    }

    async fn abort_exposure(&self) -> Result<()> {
        self.script.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn image(&self) -> Result<Option<Frame>> {
        Ok(Some(Frame {
            width: 4,
            height: 2,
            pixels: PixelBuffer::U16(vec![100; 8]),
            exposure: Duration::from_secs(30),
            light: true,
        }))
    }

    async fn cooler_on(&self) -> Result<bool> {
        Ok(self.script.cooler_calls.lock().last().copied().unwrap_or(false))
    }

    async fn set_cooler_on(&self, enabled: bool) -> Result<()> {
        self.script.cooler_calls.lock().push(enabled);
        Ok(())
    }
}

// =============================================================================
// FakeCover
// =============================================================================

#[derive(Default)]
pub struct CoverScript {
    pub connection: ConnectionState,
    pub open_calls: AtomicU32,
    pub close_calls: AtomicU32,
    pub is_open: AtomicBool,
}

pub struct FakeCover {
    pub script: Arc<CoverScript>,
}

#[async_trait]
impl Driver for FakeCover {
    fn is_connected(&self) -> bool {
        self.script.connection.get()
    }

    async fn set_connected(&self, connected: bool) -> Result<()> {
        self.script.connection.set(connected);
        Ok(())
    }

    fn connection_events(&self) -> watch::Receiver<bool> {
        self.script.connection.subscribe()
    }
}

#[async_trait]
impl Cover for FakeCover {
    fn capabilities(&self) -> CoverCapabilities {
        CoverCapabilities { max_brightness: 0 }
    }

    async fn open(&self) -> Result<()> {
        self.script.open_calls.fetch_add(1, Ordering::SeqCst);
        self.script.is_open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.script.close_calls.fetch_add(1, Ordering::SeqCst);
        self.script.is_open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn cover_status(&self) -> Result<CoverStatus> {
        Ok(if self.script.is_open.load(Ordering::SeqCst) {
            CoverStatus::Open
        } else {
            CoverStatus::Closed
        })
    }

    async fn brightness(&self) -> Result<u32> {
        Ok(0)
    }

    async fn set_brightness(&self, _brightness: u32) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Recording frame writer
// =============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct WrittenFrame {
    pub target: String,
    pub folder: PathBuf,
    pub frame_index: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
pub struct RecordingWriter {
    pub frames: Mutex<Vec<WrittenFrame>>,
}

#[async_trait]
impl FrameWriter for RecordingWriter {
    async fn write_frame(
        &self,
        _frame: &Frame,
        target: &Target,
        timestamp: DateTime<Utc>,
        folder: &Path,
        frame_index: u32,
    ) -> Result<PathBuf> {
        self.frames.lock().push(WrittenFrame {
            target: target.name.clone(),
            folder: folder.to_path_buf(),
            frame_index,
            timestamp,
        });
        Ok(folder.join(format!("{frame_index}.raw")))
    }
}

// =============================================================================
// FakeRig: a full fake setup plus the scripts driving it
// =============================================================================

#[derive(Default, Clone)]
pub struct FakeRig {
    pub mount: Arc<MountScript>,
    pub guider: Arc<GuiderScript>,
    pub camera: Arc<CameraScript>,
    pub cover: Arc<CoverScript>,
    /// Camera of the second telescope in [`FakeRig::dual_setup`]
    pub second_camera: Arc<CameraScript>,
    pub log: Arc<EventLog>,
}

impl FakeRig {
    /// A one-telescope setup (camera + cover) wired to these scripts.
    pub fn setup(&self) -> Setup {
        Setup::new(self.mount(), self.guider(), vec![self.main_telescope()]).unwrap()
    }

    /// The one-telescope setup plus a cover-less "Guide Scope: 50mm" driven by
    /// `second_camera`.
    pub fn dual_setup(&self) -> Setup {
        let camera: Controllable<dyn Camera> = Controllable::from_driver(
            fake_id(DeviceKind::Camera, "camera-2"),
            Box::new(FakeCamera {
                script: self.second_camera.clone(),
                log: Arc::new(EventLog::default()),
            }),
        );
        let second = Telescope::new("Guide Scope: 50mm", 200.0, camera);
        Setup::new(self.mount(), self.guider(), vec![self.main_telescope(), second]).unwrap()
    }

    fn mount(&self) -> Controllable<dyn Mount> {
        Controllable::from_driver(
            fake_id(DeviceKind::Mount, "mount"),
            Box::new(FakeMount {
                script: self.mount.clone(),
                log: self.log.clone(),
            }),
        )
    }

    fn guider(&self) -> Controllable<dyn Guider> {
        Controllable::from_driver(
            fake_id(DeviceKind::Guider, "guider"),
            Box::new(FakeGuider {
                script: self.guider.clone(),
            }),
        )
    }

    fn main_telescope(&self) -> Telescope {
        let camera: Controllable<dyn Camera> = Controllable::from_driver(
            fake_id(DeviceKind::Camera, "camera"),
            Box::new(FakeCamera {
                script: self.camera.clone(),
                log: self.log.clone(),
            }),
        );
        let cover: Controllable<dyn Cover> = Controllable::from_driver(
            fake_id(DeviceKind::Cover, "cover"),
            Box::new(FakeCover {
                script: self.cover.clone(),
            }),
        );

        let mut telescope = Telescope::new("main", 530.0, camera);
        telescope.cover = Some(cover);
        telescope
    }
}
