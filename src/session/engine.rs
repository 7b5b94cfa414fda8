//! Session engine: the per-target state machine.
//!
//! ```text
//! NotStarted(-1)
//!   -> [entry: open covers, cooling on]            (once, on the first advance)
//!   -> per target:
//!        Slewing      -> Slewed       | SlewSkipped
//!        GuideStarting-> Guiding      | GuideSkipped   (escalating settle retries)
//!        Exposing     -> Captured     | ExposureAborted
//!        Persist      -> Advance
//!   -> Finished(len) | Aborted
//!   -> [exit: cooling off, close covers]           (once, if entry ran)
//! ```
//!
//! Every step returns a [`StepResult`]. Recoverable conditions become
//! `Skip`, per-target fatal conditions become `Fatal`; only unexpected driver
//! failures travel as `Err` and are caught once in [`SessionEngine::run`].

use futures::future::try_join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::clock::{CancelToken, Clock, SystemClock};
use super::report::SessionReport;
use super::target::Target;
use super::wait::{sleep_cancellable, wait_until, WaitOutcome, WaitPolicy};
use super::{Session, TargetCursor};
use crate::drivers::{Camera, CoverStatus, Guider, SettleSettings, TrackingSpeed};
use crate::error::{AppResult, ImagingError};
use crate::storage::{sanitize_path_component, FrameWriter};

/// Tunables for one run. Built from [`SessionConfig`](crate::config::SessionConfig).
#[derive(Clone, Debug, PartialEq)]
pub struct EngineOptions {
    /// Sleep between status polls
    pub poll_interval: Duration,
    /// Failsafe cap for slew and settle waits
    pub max_failsafe: u32,
    /// Guide starts tried before the target is skipped
    pub guide_attempts: u32,
    /// Settle criterion of the first guide attempt
    pub settle: SettleSettings,
    /// Added once per guide attempt
    pub settle_step: SettleSettings,
    /// Length of a single exposure
    pub exposure: Duration,
    /// Frames taken per target
    pub frames_per_target: u32,
    /// Dither between consecutive frames of a target
    pub dither_between_frames: bool,
    /// Dither amplitude in pixels
    pub dither_pixels: f64,
    /// Dither along right ascension only
    pub dither_ra_only: bool,
    /// Image-ready polls before an exposure times out
    pub image_ready_polls: u32,
    /// Sleep between image-ready polls
    pub image_ready_interval: Duration,
    /// Status polls allowed for a cover to open or close
    pub cover_wait_polls: u32,
    /// Close covers again after the last target
    pub close_covers_on_finish: bool,
    /// Root folder for frames
    pub output_dir: PathBuf,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_failsafe: 1000,
            guide_attempts: 2,
            settle: SettleSettings::new(1.5, Duration::from_secs(10), Duration::from_secs(60)),
            settle_step: SettleSettings::new(0.5, Duration::from_secs(5), Duration::from_secs(30)),
            exposure: Duration::from_secs(120),
            frames_per_target: 1,
            dither_between_frames: true,
            dither_pixels: 1.5,
            dither_ra_only: false,
            image_ready_polls: 10,
            image_ready_interval: Duration::from_millis(500),
            cover_wait_polls: 30,
            close_covers_on_finish: true,
            output_dir: PathBuf::from("frames"),
        }
    }
}

impl EngineOptions {
    /// Wait bound for slews and settling
    pub fn failsafe(&self) -> WaitPolicy {
        WaitPolicy::new(self.poll_interval, self.max_failsafe)
    }

    /// Wait bound for a camera to finish reading out
    pub fn image_ready(&self) -> WaitPolicy {
        WaitPolicy::new(self.image_ready_interval, self.image_ready_polls)
    }

    /// Wait bound for covers
    pub fn cover_wait(&self) -> WaitPolicy {
        WaitPolicy::new(self.poll_interval, self.cover_wait_polls)
    }
}

/// Outcome of one per-target step.
#[derive(Debug)]
pub enum StepResult {
    /// Step succeeded, go on with the next step
    Continue,
    /// Give up on this target, move to the next one
    Skip(ImagingError),
    /// Stop the target loop; teardown still runs
    Fatal(ImagingError),
}

impl StepResult {
    /// Whether the step succeeded
    pub fn is_continue(&self) -> bool {
        matches!(self, StepResult::Continue)
    }
}

/// Runs a [`Session`] end to end, from connecting the rig to teardown.
pub struct SessionEngine {
    session: Session,
    options: EngineOptions,
    clock: Arc<dyn Clock>,
    writer: Arc<dyn FrameWriter>,
    cancel: CancelToken,
    frame_index: u32,
    entered: bool,
    exited: bool,
}

impl SessionEngine {
    /// An engine on the system clock with a fresh cancel token.
    pub fn new(session: Session, options: EngineOptions, writer: Arc<dyn FrameWriter>) -> Self {
        Self {
            session,
            options,
            clock: Arc::new(SystemClock),
            writer,
            cancel: CancelToken::new(),
            frame_index: 0,
            entered: false,
            exited: false,
        }
    }

    /// Drive the engine from `clock` instead of wall-clock time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share `cancel` with whoever may stop the run.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that cancels this engine's run
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Live view of the target being processed
    pub fn cursor(&self) -> TargetCursor {
        self.session.cursor()
    }

    /// The session being run
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Tunables of this run
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Hand the session back, e.g. to dispose its setup.
    pub fn into_session(self) -> Session {
        self.session
    }

    /// Run the session to completion.
    ///
    /// Returns `Err` only when required equipment cannot connect; in that case no
    /// target was attempted. Every other outcome, including an aborted loop, is
    /// described by the returned [`SessionReport`].
    pub async fn run(&mut self) -> AppResult<SessionReport> {
        let mut report = SessionReport::new(self.session.targets().len(), self.clock.now());
        info!(
            session_id = %report.session_id,
            targets = report.target_count,
            "Session starting"
        );

        self.connect_equipment().await.inspect_err(|err| {
            error!(error = %err, "Required equipment failed to connect, session not started");
        })?;

        if let Err(err) = self.run_targets(&mut report).await {
            let index = usize::try_from(self.session.active_index()).unwrap_or(0);
            error!(index, error = %err, "Unhandled error, session ends");
            report.abort(index, &err);
        }

        self.exit(&mut report).await;
        report.frames_written = self.frame_index;
        report.finish(self.clock.now());
        info!(
            completed = report.completed.len(),
            skipped = report.skipped.len(),
            aborted_at = ?report.aborted_at,
            frames = report.frames_written,
            "Session finished"
        );
        Ok(report)
    }

    async fn run_targets(&mut self, report: &mut SessionReport) -> AppResult<()> {
        let cursor = self.session.cursor();
        while let Some(index) = cursor.move_next() {
            let target = self.session.targets()[index].clone();
            if self.cancel.is_cancelled() {
                info!(target_name = %target.name, index, "Cancelled before target");
                report.skip(index, &target.name, &ImagingError::Cancelled);
                break;
            }
            if !self.entered {
                self.enter().await;
            }

            match self.process_target(&target).await? {
                StepResult::Continue => {
                    info!(target_name = %target.name, index, "Target completed");
                    report.complete(index);
                }
                StepResult::Skip(ImagingError::Cancelled) => {
                    warn!(target_name = %target.name, index, "Target abandoned, session cancelled");
                    report.skip(index, &target.name, &ImagingError::Cancelled);
                    break;
                }
                StepResult::Skip(reason) => {
                    warn!(target_name = %target.name, index, reason = %reason, "Skipping target");
                    report.skip(index, &target.name, &reason);
                }
                StepResult::Fatal(reason) => {
                    error!(target_name = %target.name, index, reason = %reason, "Aborting target loop");
                    report.abort(index, &reason);
                    break;
                }
            }
        }
        Ok(())
    }

    async fn process_target(&mut self, target: &Target) -> AppResult<StepResult> {
        info!(
            target_name = %target.name,
            ra_hours = target.ra_hours,
            dec_degrees = target.dec_degrees,
            "Processing target"
        );

        let step = self.slew(target).await?;
        if !step.is_continue() {
            return Ok(step);
        }
        let step = self.start_guiding(target).await?;
        if !step.is_continue() {
            return Ok(step);
        }
        for frame in 0..self.options.frames_per_target {
            if frame > 0 && self.options.dither_between_frames {
                self.dither(target).await;
            }
            let step = self.capture_frame(target).await?;
            if !step.is_continue() {
                return Ok(step);
            }
        }
        Ok(StepResult::Continue)
    }

    // =========================================================================
    // Equipment connection and entry/exit brackets
    // =========================================================================

    async fn connect_equipment(&mut self) -> AppResult<()> {
        let setup = self.session.setup_mut();
        setup.mount_mut().ensure_connected().await?;

        let guider = setup.guider_mut();
        guider.ensure_connected().await?;
        guider
            .driver()?
            .connect_equipment()
            .await
            .map_err(|err| ImagingError::Connection {
                device: guider.device().encode(),
                reason: format!("guider equipment: {:#}", err),
            })?;

        for telescope in setup.telescopes_mut() {
            telescope.camera.ensure_connected().await?;

            // Auxiliaries are not needed to image.
            if let Some(focuser) = telescope.focuser.as_mut() {
                if let Err(err) = focuser.ensure_connected().await {
                    warn!(telescope = %telescope.name, error = %err, "Focuser unavailable");
                }
            }
            if let Some(filter_wheel) = telescope.filter_wheel.as_mut() {
                if let Err(err) = filter_wheel.ensure_connected().await {
                    warn!(telescope = %telescope.name, error = %err, "Filter wheel unavailable");
                }
            }
            if let Some(switch) = telescope.switch.as_mut() {
                if let Err(err) = switch.ensure_connected().await {
                    warn!(telescope = %telescope.name, error = %err, "Switch unavailable");
                }
            }
        }
        info!("Equipment connected");
        Ok(())
    }

    /// Open covers and start cooling. Failures are logged, imaging goes on.
    async fn enter(&mut self) {
        self.entered = true;
        let policy = self.options.cover_wait();
        let clock = self.clock.as_ref();
        let cancel = &self.cancel;

        for telescope in self.session.setup_mut().telescopes_mut() {
            if let Some(cover) = telescope.cover.as_mut() {
                if let Err(err) = cover.ensure_connected().await {
                    warn!(telescope = %telescope.name, error = %err, "Cover unavailable");
                } else if let Ok(driver) = cover.driver() {
                    let opened = async {
                        driver.set_brightness(0).await?;
                        driver.open().await?;
                        wait_until(&policy, clock, cancel, || async move {
                            let status = driver.cover_status().await?;
                            anyhow::ensure!(status != CoverStatus::Error, "cover reported an error");
                            Ok::<_, anyhow::Error>(status == CoverStatus::Open)
                        })
                        .await
                    };
                    match opened.await {
                        Ok(WaitOutcome::Completed { polls }) => {
                            info!(telescope = %telescope.name, polls, "Cover open");
                        }
                        Ok(outcome) => {
                            warn!(telescope = %telescope.name, polls = outcome.polls(), ?outcome, "Cover did not report open");
                        }
                        Err(err) => {
                            warn!(telescope = %telescope.name, error = %format!("{:#}", err), "Opening cover failed");
                        }
                    }
                }
            }

            if telescope.camera.capabilities().can_set_ccd_temperature {
                let cooling = match telescope.camera.driver() {
                    Ok(driver) => driver.set_cooler_on(true).await,
                    Err(err) => Err(err.into()),
                };
                match cooling {
                    Ok(()) => info!(telescope = %telescope.name, "Cooling on"),
                    Err(err) => {
                        warn!(telescope = %telescope.name, error = %format!("{:#}", err), "Enabling cooling failed");
                    }
                }
            }
        }
    }

    /// Cooling off and covers closed. Runs at most once, and only after `enter`.
    async fn exit(&mut self, report: &mut SessionReport) {
        if !self.entered || self.exited {
            return;
        }
        self.exited = true;
        let close_covers = self.options.close_covers_on_finish;
        let setup = self.session.setup_mut();

        if let Ok(guider) = setup.guider().driver() {
            if let Err(err) = guider.stop_capture().await {
                warn!(error = %format!("{:#}", err), "Stopping guiding failed");
            }
        }

        for telescope in setup.telescopes_mut() {
            if telescope.camera.capabilities().can_set_ccd_temperature {
                let result = match telescope.camera.driver() {
                    Ok(driver) => driver.set_cooler_on(false).await,
                    Err(err) => Err(err.into()),
                };
                match result {
                    Ok(()) => info!(telescope = %telescope.name, "Cooling off"),
                    Err(err) => {
                        let message = format!("{}: cooling off failed: {:#}", telescope.name, err);
                        warn!("{}", message);
                        report.teardown_errors.push(message);
                    }
                }
            }

            if !close_covers {
                continue;
            }
            let Some(cover) = telescope.cover.as_ref().filter(|cover| cover.is_connected()) else {
                continue;
            };
            let result = match cover.driver() {
                Ok(driver) => driver.close().await,
                Err(err) => Err(err.into()),
            };
            match result {
                Ok(()) => info!(telescope = %telescope.name, "Closing cover"),
                Err(err) => {
                    let message = format!("{}: closing cover failed: {:#}", telescope.name, err);
                    warn!("{}", message);
                    report.teardown_errors.push(message);
                }
            }
        }
    }

    // =========================================================================
    // Per-target steps
    // =========================================================================

    async fn slew(&mut self, target: &Target) -> AppResult<StepResult> {
        let policy = self.options.failsafe();
        let clock = self.clock.as_ref();
        let cancel = &self.cancel;
        let mount = self.session.setup_mut().mount_mut();

        if let Err(err) = mount.ensure_connected().await {
            return Ok(StepResult::Fatal(err));
        }
        let driver = mount.driver()?;

        if mount.capabilities().can_set_tracking {
            let tracking = async {
                driver.set_tracking_speed(TrackingSpeed::Sidereal).await?;
                driver.set_tracking(true).await
            };
            if let Err(err) = tracking.await {
                warn!(target_name = %target.name, error = %format!("{:#}", err), "Enabling sidereal tracking failed");
            }
        }

        let rejected = |reason: String| {
            StepResult::Skip(ImagingError::SlewRejected {
                target: target.name.clone(),
                reason,
            })
        };
        match driver.slew_async(target.ra_hours, target.dec_degrees).await {
            Ok(true) => debug!(target_name = %target.name, "Slew started"),
            Ok(false) => return Ok(rejected("mount refused the slew".into())),
            Err(err) => return Ok(rejected(format!("{:#}", err))),
        }

        let outcome = wait_until(&policy, clock, cancel, || async move {
            Ok::<_, anyhow::Error>(!driver.is_slewing().await?)
        })
        .await;
        match outcome {
            Ok(WaitOutcome::Completed { polls }) => {
                info!(target_name = %target.name, polls, "Slew complete");
                Ok(StepResult::Continue)
            }
            Ok(WaitOutcome::TimedOut { polls }) => {
                warn!(target_name = %target.name, polls, waited = ?policy.max_wait(), "Slew still running");
                if let Err(err) = driver.abort_slew().await {
                    debug!(error = %format!("{:#}", err), "Abort slew after timeout failed");
                }
                Ok(StepResult::Skip(ImagingError::SlewTimeout {
                    target: target.name.clone(),
                    polls,
                }))
            }
            Ok(WaitOutcome::Cancelled { .. }) => Ok(StepResult::Skip(ImagingError::Cancelled)),
            Err(err) => Ok(rejected(format!("slew status poll failed: {:#}", err))),
        }
    }

    async fn start_guiding(&mut self, target: &Target) -> AppResult<StepResult> {
        let policy = self.options.failsafe();
        let attempts = self.options.guide_attempts;
        let base = self.options.settle;
        let step = self.options.settle_step;
        let clock = self.clock.as_ref();
        let cancel = &self.cancel;
        let driver = self.session.setup().guider().driver()?;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Ok(StepResult::Skip(ImagingError::Cancelled));
            }
            let settle = base.escalated(&step, attempt);
            info!(
                target_name = %target.name,
                attempt,
                settle_pixels = settle.pixels,
                settle_time = ?settle.time,
                settle_timeout = ?settle.timeout,
                "Starting guiding"
            );
            match guide_attempt(driver, settle, &policy, clock, cancel).await {
                Ok(true) => {
                    info!(target_name = %target.name, attempt, "Guiding settled");
                    return Ok(StepResult::Continue);
                }
                Ok(false) => warn!(target_name = %target.name, attempt, "Guiding did not settle"),
                Err(err) => {
                    warn!(target_name = %target.name, attempt, error = %format!("{:#}", err), "Guide attempt failed");
                }
            }
        }
        if cancel.is_cancelled() {
            return Ok(StepResult::Skip(ImagingError::Cancelled));
        }
        Ok(StepResult::Skip(ImagingError::GuideStartFailure {
            target: target.name.clone(),
            attempts,
        }))
    }

    /// Dither and wait for the guider to settle again. Best-effort.
    async fn dither(&self, target: &Target) {
        let guider = self.session.setup().guider();
        if !guider.capabilities().can_dither {
            return;
        }
        let Ok(driver) = guider.driver() else {
            return;
        };
        let policy = self.options.failsafe();
        let clock = self.clock.as_ref();
        let cancel = &self.cancel;

        let dithered = async {
            driver
                .dither(self.options.dither_pixels, self.options.dither_ra_only, self.options.settle)
                .await?;
            wait_until(&policy, clock, cancel, || async move {
                Ok::<_, anyhow::Error>(!driver.is_settling().await?)
            })
            .await
        };
        match dithered.await {
            Ok(WaitOutcome::Completed { polls }) => debug!(target_name = %target.name, polls, "Dither settled"),
            Ok(outcome) => {
                warn!(target_name = %target.name, polls = outcome.polls(), ?outcome, "Dither did not settle");
            }
            Err(err) => {
                warn!(target_name = %target.name, error = %format!("{:#}", err), "Dither failed, continuing undithered");
            }
        }
    }

    /// Read the mount clock, expose on every camera, persist the frames.
    async fn capture_frame(&mut self, target: &Target) -> AppResult<StepResult> {
        let timestamp = match self.session.setup().mount().driver()?.utc_date().await {
            Ok(timestamp) => timestamp,
            Err(err) => {
                return Ok(StepResult::Fatal(ImagingError::ClockUnavailable(format!(
                    "{:#}",
                    err
                ))))
            }
        };

        let exposure = self.options.exposure;
        let ready_policy = self.options.image_ready();
        let clock = self.clock.as_ref();
        let cancel = &self.cancel;
        let telescopes = self.session.setup().telescopes();

        let cameras = telescopes
            .iter()
            .map(|telescope| telescope.camera.driver())
            .collect::<AppResult<Vec<&dyn Camera>>>()?;
        try_join_all(cameras.iter().map(|camera| camera.start_exposure(exposure, true)))
            .await
            .map_err(|err| ImagingError::unhandled(format!("start exposure: {:#}", err)))?;
        debug!(target_name = %target.name, exposure = ?exposure, "Exposing");

        if !sleep_cancellable(clock, cancel, exposure).await {
            abort_exposures(&cameras).await;
            return Ok(StepResult::Skip(ImagingError::Cancelled));
        }

        // Frames already downloaded are persisted even when a later camera fails.
        let mut frames = Vec::with_capacity(cameras.len());
        let mut failure = None;
        for (telescope, camera) in telescopes.iter().zip(&cameras) {
            let camera = *camera;
            let outcome = wait_until(&ready_policy, clock, cancel, || async move {
                camera.image_ready().await
            })
            .await?;
            match outcome {
                WaitOutcome::Completed { .. } => frames.push((telescope, camera.image().await?)),
                WaitOutcome::TimedOut { polls } => {
                    warn!(
                        target_name = %target.name,
                        telescope = %telescope.name,
                        polls,
                        waited = ?ready_policy.max_wait(),
                        "Image never became ready"
                    );
                    failure = Some(StepResult::Fatal(ImagingError::ExposureTimeout {
                        target: target.name.clone(),
                        polls,
                    }));
                    break;
                }
                WaitOutcome::Cancelled { .. } => {
                    failure = Some(StepResult::Skip(ImagingError::Cancelled));
                    break;
                }
            }
        }
        if failure.is_some() {
            abort_exposures(&cameras[frames.len()..]).await;
        }

        let multiple = telescopes.len() > 1;
        for (telescope, frame) in frames {
            let Some(frame) = frame else {
                warn!(target_name = %target.name, telescope = %telescope.name, "No image available");
                continue;
            };
            let mut folder = self.options.output_dir.join(sanitize_path_component(&target.name));
            if multiple {
                folder.push(sanitize_path_component(&telescope.name));
            }
            self.writer
                .write_frame(&frame, target, timestamp, &folder, self.frame_index)
                .await?;
            self.frame_index += 1;
        }
        Ok(failure.unwrap_or(StepResult::Continue))
    }
}

/// One guide attempt: stop, guide with `settle`, wait for settling, check guiding.
async fn guide_attempt(
    driver: &dyn Guider,
    settle: SettleSettings,
    policy: &WaitPolicy,
    clock: &dyn Clock,
    cancel: &CancelToken,
) -> anyhow::Result<bool> {
    driver.stop_capture().await?;
    driver.guide(settle).await?;
    let outcome = wait_until(policy, clock, cancel, || async move {
        Ok::<_, anyhow::Error>(!driver.is_settling().await?)
    })
    .await?;
    match outcome {
        WaitOutcome::Completed { .. } => driver.is_guiding().await,
        WaitOutcome::TimedOut { polls } => {
            warn!(polls, "Settle wait exhausted");
            Ok(false)
        }
        WaitOutcome::Cancelled { .. } => Ok(false),
    }
}

async fn abort_exposures(cameras: &[&dyn Camera]) {
    for camera in cameras {
        if camera.capabilities().can_abort_exposure {
            if let Err(err) = camera.abort_exposure().await {
                debug!(error = %format!("{:#}", err), "Abort exposure failed");
            }
        }
    }
}
