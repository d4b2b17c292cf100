//! Scoped and wrapper forms of the start/stop contract.
//!
//! Both are thin adapters over [`EmissionsTracker`]: entering calls
//! `start()`, leaving calls `stop()` exactly once, whether the scope ends
//! normally, through `?`, or by panic.

use std::ops::{Deref, DerefMut};

use super::{EmissionsTracker, TrackerState};
use crate::Result;
use crate::output::EmissionsData;

/// A started tracker that stops itself when dropped.
///
/// Call [`TrackerGuard::finish`] to get the final record; dropping the guard
/// stops the tracker and only logs failures.
#[must_use = "dropping the guard stops the tracker immediately"]
pub struct TrackerGuard<'a> {
    tracker: &'a mut EmissionsTracker,
    finished: bool,
}

impl<'a> TrackerGuard<'a> {
    pub(crate) fn enter(tracker: &'a mut EmissionsTracker) -> Result<Self> {
        tracker.start()?;
        Ok(Self {
            tracker,
            finished: false,
        })
    }

    /// Stop the tracker (closing any open task) and return the final record.
    pub fn finish(mut self) -> Result<EmissionsData> {
        self.finished = true;
        self.tracker.close()
    }
}

impl Deref for TrackerGuard<'_> {
    type Target = EmissionsTracker;

    fn deref(&self) -> &EmissionsTracker {
        self.tracker
    }
}

impl DerefMut for TrackerGuard<'_> {
    fn deref_mut(&mut self) -> &mut EmissionsTracker {
        self.tracker
    }
}

impl Drop for TrackerGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if matches!(
            self.tracker.state(),
            TrackerState::Running | TrackerState::TaskRunning
        ) {
            if let Err(e) = self.tracker.close() {
                tracing::warn!(error = %e, "Failed to stop tracker on scope exit");
            }
        }
    }
}

/// Run `f` between `start()` and `stop()`.
///
/// Returns the closure's value with the final record. If `f` panics the
/// tracker is still stopped (and its sinks written) before unwinding
/// continues.
pub fn track<T, F>(tracker: &mut EmissionsTracker, f: F) -> Result<(T, EmissionsData)>
where
    F: FnOnce() -> T,
{
    let guard = TrackerGuard::enter(tracker)?;
    let value = f();
    let data = guard.finish()?;
    Ok((value, data))
}
