//! Outcome of a session run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ImagingError;

/// Why a target was skipped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// The mount refused the slew
    SlewRejected {
        /// Mount or driver message
        reason: String,
    },
    /// The slew outlasted the failsafe
    SlewTimeout {
        /// Status polls spent waiting
        polls: u32,
    },
    /// Guiding never settled
    GuideStartFailure {
        /// Guide attempts made
        attempts: u32,
    },
    /// The run was cancelled while on this target
    Cancelled,
    /// Any other per-target failure
    Other {
        /// Error text
        message: String,
    },
}

impl From<&ImagingError> for SkipReason {
    fn from(err: &ImagingError) -> Self {
        match err {
            ImagingError::SlewRejected { reason, .. } => SkipReason::SlewRejected {
                reason: reason.clone(),
            },
            ImagingError::SlewTimeout { polls, .. } => SkipReason::SlewTimeout { polls: *polls },
            ImagingError::GuideStartFailure { attempts, .. } => SkipReason::GuideStartFailure {
                attempts: *attempts,
            },
            ImagingError::Cancelled => SkipReason::Cancelled,
            other => SkipReason::Other {
                message: other.to_string(),
            },
        }
    }
}

/// Why the target loop stopped early.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// The mount could not report its UTC time
    ClockUnavailable {
        /// Driver message
        reason: String,
    },
    /// A camera never finished reading out
    ExposureTimeout {
        /// Image-ready polls spent waiting
        polls: u32,
    },
    /// A device dropped its connection
    Connection {
        /// Encoded identity of the device
        device: String,
        /// Driver message
        reason: String,
    },
    /// Any other driver failure
    Unhandled {
        /// Error text
        message: String,
    },
}

impl From<&ImagingError> for AbortReason {
    fn from(err: &ImagingError) -> Self {
        match err {
            ImagingError::ClockUnavailable(reason) => AbortReason::ClockUnavailable {
                reason: reason.clone(),
            },
            ImagingError::ExposureTimeout { polls, .. } => {
                AbortReason::ExposureTimeout { polls: *polls }
            }
            ImagingError::Connection { device, reason } => AbortReason::Connection {
                device: device.clone(),
                reason: reason.clone(),
            },
            ImagingError::Unhandled(message) => AbortReason::Unhandled {
                message: message.clone(),
            },
            other => AbortReason::Unhandled {
                message: other.to_string(),
            },
        }
    }
}

/// A target the engine gave up on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedTarget {
    /// Position in the target list
    pub index: usize,
    /// Target name
    pub name: String,
    /// What went wrong
    pub reason: SkipReason,
}

/// Which targets were completed, skipped, or never attempted.
#[derive(Clone, Debug, Serialize)]
pub struct SessionReport {
    /// Unique id of this run
    pub session_id: Uuid,
    /// Clock time when the run started
    pub started_at: DateTime<Utc>,
    /// Clock time when teardown finished
    pub finished_at: Option<DateTime<Utc>>,
    /// Number of targets in the session
    pub target_count: usize,
    /// Indices of targets imaged to the end
    pub completed: Vec<usize>,
    /// Targets given up on, in order
    pub skipped: Vec<SkippedTarget>,
    /// Index of the target the loop stopped on
    pub aborted_at: Option<usize>,
    /// Why the loop stopped on `aborted_at`
    pub abort_reason: Option<AbortReason>,
    /// The run was cancelled
    pub cancelled: bool,
    /// Indices of targets the loop never reached
    pub never_attempted: Vec<usize>,
    /// Frames handed to the writer
    pub frames_written: u32,
    /// Failures during cooling-off and cover closing
    pub teardown_errors: Vec<String>,
}

impl SessionReport {
    /// An empty report for a run over `target_count` targets.
    pub fn new(target_count: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at,
            finished_at: None,
            target_count,
            completed: Vec::new(),
            skipped: Vec::new(),
            aborted_at: None,
            abort_reason: None,
            cancelled: false,
            never_attempted: Vec::new(),
            frames_written: 0,
            teardown_errors: Vec::new(),
        }
    }

    pub(crate) fn complete(&mut self, index: usize) {
        self.completed.push(index);
    }

    pub(crate) fn skip(&mut self, index: usize, name: &str, err: &ImagingError) {
        let reason = SkipReason::from(err);
        if reason == SkipReason::Cancelled {
            self.cancelled = true;
        }
        self.skipped.push(SkippedTarget {
            index,
            name: name.to_string(),
            reason,
        });
    }

    pub(crate) fn abort(&mut self, index: usize, err: &ImagingError) {
        self.aborted_at = Some(index);
        self.abort_reason = Some(AbortReason::from(err));
    }

    /// Stamp the end time and list every target that was never reached.
    pub(crate) fn finish(&mut self, finished_at: DateTime<Utc>) {
        let attempted = |index: &usize| {
            self.completed.contains(index)
                || self.skipped.iter().any(|skip| skip.index == *index)
                || self.aborted_at == Some(*index)
        };
        self.never_attempted = (0..self.target_count).filter(|i| !attempted(i)).collect();
        self.finished_at = Some(finished_at);
    }

    /// Indices of skipped targets
    pub fn skipped_indices(&self) -> Vec<usize> {
        self.skipped.iter().map(|skip| skip.index).collect()
    }

    /// Every target completed and nothing went wrong during teardown.
    pub fn is_clean(&self) -> bool {
        self.completed.len() == self.target_count
            && self.aborted_at.is_none()
            && self.teardown_errors.is_empty()
    }
}
