//! Imaging session: an ordered target list walked against one [`Setup`].
//!
//! The [`Session`] holds the target list and a [`TargetCursor`]; the
//! [`SessionEngine`](engine::SessionEngine) drives the per-target state machine.

pub mod clock;
pub mod engine;
pub mod report;
pub mod target;
pub mod wait;

pub use clock::{CancelToken, Clock, SystemClock, VirtualClock};
pub use engine::{EngineOptions, SessionEngine, StepResult};
pub use report::{AbortReason, SessionReport, SkipReason, SkippedTarget};
pub use target::Target;
pub use wait::{wait_until, WaitOutcome, WaitPolicy};

use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;

use crate::error::{AppResult, ImagingError};
use crate::setup::Setup;

/// Shared, monotonically advancing index into a target list.
///
/// `-1` before the first [`move_next`](Self::move_next), `len` once finished.
/// Clones share the same position, so an external controller can skip ahead
/// while the engine runs; concurrent advances never double-step.
#[derive(Clone, Debug)]
pub struct TargetCursor {
    index: Arc<AtomicIsize>,
    len: isize,
}

impl TargetCursor {
    /// A cursor over `len` targets, positioned before the first.
    pub fn new(len: usize) -> Self {
        Self {
            index: Arc::new(AtomicIsize::new(-1)),
            len: isize::try_from(len).unwrap_or(isize::MAX),
        }
    }

    /// Advance by exactly one. Returns the new index while it is in range.
    pub fn move_next(&self) -> Option<usize> {
        let previous = self
            .index
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |index| {
                (index < self.len).then_some(index + 1)
            })
            .ok()?;
        let next = previous + 1;
        if next < self.len {
            usize::try_from(next).ok()
        } else {
            None
        }
    }

    /// Current raw index (`-1` = not started, `len` = finished).
    pub fn active_index(&self) -> isize {
        self.index.load(Ordering::SeqCst)
    }

    /// Whether every target has been passed
    pub fn is_finished(&self) -> bool {
        self.active_index() >= self.len
    }
}

/// A validated setup plus the ordered targets to image with it.
pub struct Session {
    setup: Setup,
    targets: Vec<Target>,
    cursor: TargetCursor,
}

impl Session {
    /// Validates that `targets` is non-empty and every target is on the sky.
    pub fn new(setup: Setup, targets: Vec<Target>) -> AppResult<Self> {
        if targets.is_empty() {
            return Err(ImagingError::InvalidTarget(
                "a session needs at least one target".into(),
            ));
        }
        for target in &targets {
            target.validate()?;
        }
        let cursor = TargetCursor::new(targets.len());
        Ok(Self {
            setup,
            targets,
            cursor,
        })
    }

    /// Equipment of this session
    pub fn setup(&self) -> &Setup {
        &self.setup
    }

    /// Mutable access to the equipment
    pub fn setup_mut(&mut self) -> &mut Setup {
        &mut self.setup
    }

    /// Targets in imaging order
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Cursor shared with the engine and external controllers
    pub fn cursor(&self) -> TargetCursor {
        self.cursor.clone()
    }

    /// Advance to the next target, see [`TargetCursor::move_next`].
    pub fn move_next(&self) -> Option<usize> {
        self.cursor.move_next()
    }

    /// Current raw cursor index
    pub fn active_index(&self) -> isize {
        self.cursor.active_index()
    }

    /// Give the setup back, e.g. to dispose it after the run.
    pub fn into_setup(self) -> Setup {
        self.setup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_stops_at_len() {
        let cursor = TargetCursor::new(2);
        assert_eq!(cursor.active_index(), -1);
        assert_eq!(cursor.move_next(), Some(0));
        assert_eq!(cursor.move_next(), Some(1));
        assert_eq!(cursor.move_next(), None);
        assert!(cursor.is_finished());
        assert_eq!(cursor.move_next(), None);
        assert_eq!(cursor.active_index(), 2);
    }

    #[test]
    fn test_cursor_clones_share_position() {
        let cursor = TargetCursor::new(5);
        let remote = cursor.clone();
        cursor.move_next();
        remote.move_next();
        assert_eq!(cursor.active_index(), 1);
    }
}
