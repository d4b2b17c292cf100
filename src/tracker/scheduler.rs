//! Background sampling thread.
//!
//! While the tracker is running (and not inside a task) a single thread
//! samples the meter every `measure_power_secs`. Every `api_call_interval`
//! samples it also pushes a live record to sinks that accept live updates.
//!
//! Stopping sends a message on the control channel and joins the thread, so
//! once [`Scheduler::stop`] returns no further sample will be taken.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{SharedCore, lock};
use crate::Result;
use crate::output::{EmissionsData, write_live};

pub(crate) struct Scheduler {
    stop_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the sampling thread.
    pub(crate) fn spawn(
        core: SharedCore,
        interval: Duration,
        api_call_interval: u64,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("codecarbon-sampler".to_string())
            .spawn(move || {
                let mut ticks: u64 = 0;
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    ticks += 1;
                    let mut guard = lock(&core);
                    if let Err(e) = guard.meter.sample() {
                        tracing::warn!(error = %e, "Background power sample failed");
                        continue;
                    }
                    if ticks % api_call_interval.max(1) == 0 {
                        let data = EmissionsData::from_meter(&guard.info, &guard.meter);
                        write_live(&mut guard.sinks, &data);
                    }
                }
                tracing::debug!(ticks, "Sampler thread exiting");
            })?;

        tracing::debug!(interval_s = interval.as_secs_f64(), "Sampler started");
        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to exit.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop_tx.send(());
            if handle.join().is_err() {
                tracing::error!("Sampler thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
