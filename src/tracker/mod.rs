//! The emissions tracker: one measurement lifecycle.
//!
//! ## States
//!
//! ```text
//! Idle --start--> Running --stop--> Stopped
//!                  |   ^
//!       start_task |   | stop_task
//!                  v   |
//!               TaskRunning
//! ```
//!
//! While `Running`, a background [`scheduler`] samples power every
//! `measure_power_secs`. Entering a task suspends it; leaving the task
//! resumes it if it was active. Continuous and task sampling never overlap.
//!
//! `stop()` and `flush()` write the cumulative record to every sink.
//! Task results are returned to the caller and kept in memory only.

mod guard;
mod scheduler;
mod task;

pub use guard::{TrackerGuard, track};
pub use task::TaskEmissions;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigSources, Layer, Resolver, Settings};
use crate::output::{EmissionsData, EmissionsSink, RunInfo, sinks_from_settings, write_all};
use crate::power::{ConstantPower, EnergyMeter, PowerSource};
use crate::{Error, Result};
use scheduler::Scheduler;
use task::ActiveTask;

/// Lifecycle state of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Idle,
    Running,
    TaskRunning,
    Stopped,
}

impl TrackerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerState::Idle => "idle",
            TrackerState::Running => "running",
            TrackerState::TaskRunning => "running a task",
            TrackerState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for TrackerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State shared between the tracker and its sampling thread.
pub(crate) struct Core {
    pub(crate) meter: EnergyMeter,
    pub(crate) sinks: Vec<Box<dyn EmissionsSink>>,
    pub(crate) info: RunInfo,
}

pub(crate) type SharedCore = Arc<Mutex<Core>>;

/// Lock the core. A panic on the sampler thread leaves the meter usable, so
/// poisoning is ignored.
pub(crate) fn lock(core: &SharedCore) -> MutexGuard<'_, Core> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configures and builds an [`EmissionsTracker`].
pub struct TrackerBuilder {
    settings: Settings,
    power: Option<Box<dyn PowerSource>>,
    sinks: Option<Vec<Box<dyn EmissionsSink>>>,
    manual_sampling: bool,
    offline: bool,
    country_iso_code: Option<String>,
}

impl TrackerBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            power: None,
            sinks: None,
            manual_sampling: false,
            offline: false,
            country_iso_code: None,
        }
    }

    /// Use a custom power source instead of the constant-draw model.
    pub fn power_source(mut self, source: impl PowerSource + 'static) -> Self {
        self.power = Some(Box::new(source));
        self
    }

    /// Replace the sinks derived from settings.
    pub fn sinks(mut self, sinks: Vec<Box<dyn EmissionsSink>>) -> Self {
        self.sinks = Some(sinks);
        self
    }

    /// Add a sink on top of the ones derived from settings.
    pub fn sink(mut self, sink: impl EmissionsSink + 'static) -> Self {
        self.sinks
            .get_or_insert_with(|| sinks_from_settings(&self.settings))
            .push(Box::new(sink));
        self
    }

    /// Do not run a background sampler; samples are only taken at start,
    /// stop, flush and task boundaries.
    pub fn manual_sampling(mut self) -> Self {
        self.manual_sampling = true;
        self
    }

    /// Never contact the API. Requires a country code, either here or in
    /// settings.
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn country_iso_code(mut self, code: impl Into<String>) -> Self {
        self.country_iso_code = Some(code.into());
        self
    }

    pub fn build(self) -> Result<EmissionsTracker> {
        let mut settings = self.settings;

        if let Some(code) = self.country_iso_code {
            settings = settings.with_override("country_iso_code", code)?;
        }
        if self.offline {
            let has_country = settings
                .country_iso_code()
                .is_some_and(|c| !c.trim().is_empty());
            if !has_country {
                return Err(Error::InvalidInput(
                    "offline mode requires a country_iso_code".to_string(),
                ));
            }
            settings = settings.with_override("save_to_api", false)?;
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let power = self
            .power
            .unwrap_or_else(|| Box::new(ConstantPower::new(settings.default_cpu_power())));
        let sinks = match self.sinks {
            Some(sinks) if !self.offline => sinks,
            Some(sinks) => sinks.into_iter().filter(|s| s.name() != "api").collect(),
            None => sinks_from_settings(&settings),
        };

        let core = Core {
            meter: EnergyMeter::new(power),
            sinks,
            info: RunInfo::from_settings(&settings, &run_id),
        };

        Ok(EmissionsTracker {
            settings,
            run_id,
            state: TrackerState::Idle,
            core: Arc::new(Mutex::new(core)),
            scheduler: None,
            manual_sampling: self.manual_sampling,
            task: None,
            tasks: Vec::new(),
            started_at: None,
        })
    }
}

/// Measures the emissions of one run.
///
/// Owned by a single caller; every lifecycle operation takes `&mut self`.
pub struct EmissionsTracker {
    settings: Settings,
    run_id: String,
    state: TrackerState,
    core: SharedCore,
    scheduler: Option<Scheduler>,
    manual_sampling: bool,
    task: Option<ActiveTask>,
    tasks: Vec<TaskEmissions>,
    started_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for EmissionsTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmissionsTracker")
            .field("project_name", &self.settings.project_name())
            .field("run_id", &self.run_id)
            .field("state", &self.state)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl EmissionsTracker {
    pub fn builder(settings: Settings) -> TrackerBuilder {
        TrackerBuilder::new(settings)
    }

    /// Build a tracker with default power model and sinks.
    pub fn new(settings: Settings) -> Result<Self> {
        TrackerBuilder::new(settings).build()
    }

    /// Resolve settings from config files and the environment, with
    /// `explicit` on top, and build a tracker from them.
    pub fn from_process(explicit: Layer) -> Result<Self> {
        let sources = ConfigSources::from_process()?.with_explicit(explicit);
        Self::new(Resolver::new().resolve(&sources)?)
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn project_name(&self) -> &str {
        self.settings.project_name()
    }

    /// When `start()` was called, if it was.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Completed tasks, in completion order.
    pub fn tasks(&self) -> &[TaskEmissions] {
        &self.tasks
    }

    /// Whether the background sampler is currently running.
    pub fn is_sampling(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Start measuring. `Idle -> Running`.
    pub fn start(&mut self) -> Result<()> {
        self.expect_state("start", TrackerState::Idle)?;

        lock(&self.core).meter.reset();
        self.started_at = Some(Utc::now());
        self.resume_scheduler()?;
        self.state = TrackerState::Running;

        tracing::info!(
            project = %self.settings.project_name(),
            run_id = %self.run_id,
            interval_s = self.settings.measure_power_secs(),
            "Tracker started"
        );
        Ok(())
    }

    /// Stop measuring and write the final record to every sink.
    /// `Running -> Stopped`.
    ///
    /// The tracker is `Stopped` even when a sink fails; the error is
    /// returned after all sinks were attempted.
    pub fn stop(&mut self) -> Result<EmissionsData> {
        self.expect_state("stop", TrackerState::Running)?;

        self.suspend_scheduler();
        self.state = TrackerState::Stopped;

        let data = self.snapshot_and_write()?;
        tracing::info!(
            run_id = %self.run_id,
            emissions_kg = data.emissions,
            duration_s = data.duration,
            "Tracker stopped"
        );
        Ok(data)
    }

    /// Write the current cumulative record to every sink without stopping.
    /// Only valid while `Running`.
    pub fn flush(&mut self) -> Result<EmissionsData> {
        self.expect_state("flush", TrackerState::Running)?;
        let data = self.snapshot_and_write()?;
        tracing::debug!(emissions_kg = data.emissions, "Flushed emissions");
        Ok(data)
    }

    /// Begin a named task. `Running -> TaskRunning`.
    ///
    /// Suspends the background sampler for the duration of the task.
    /// Returns the task name (generated when `name` is `None`).
    pub fn start_task(&mut self, name: Option<&str>) -> Result<String> {
        self.expect_state("start a task", TrackerState::Running)?;

        let resume_scheduler = self.scheduler.is_some();
        self.suspend_scheduler();

        let opened = {
            let mut core = lock(&self.core);
            core.meter
                .sample()
                .map(|_| (core.meter.last_sample_at(), core.meter.total()))
        };
        let (started, start_energy) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                if resume_scheduler {
                    self.resume_scheduler()?;
                }
                return Err(e);
            }
        };
        let task = ActiveTask::new(name, started, start_energy, resume_scheduler);

        let task_name = task.name.clone();
        tracing::debug!(task = %task_name, "Task started");
        self.task = Some(task);
        self.state = TrackerState::TaskRunning;
        Ok(task_name)
    }

    /// End the current task and return its emissions.
    /// `TaskRunning -> Running`.
    ///
    /// The result is kept in [`EmissionsTracker::tasks`] and is never
    /// written to a sink.
    pub fn stop_task(&mut self) -> Result<TaskEmissions> {
        self.expect_state("stop a task", TrackerState::TaskRunning)?;
        let task = self.task.take().ok_or(Error::InvalidState {
            operation: "stop a task",
            state: self.state,
        })?;
        let resume = task.resume_scheduler;

        let mut core = lock(&self.core);
        if let Err(e) = core.meter.sample() {
            drop(core);
            self.task = Some(task);
            return Err(e);
        }
        let done = task.finish(
            core.meter.last_sample_at(),
            core.meter.total(),
            core.meter.last_power().watts(),
            core.info.carbon_intensity,
        );
        drop(core);

        tracing::debug!(
            task = %done.name,
            emissions_kg = done.emissions,
            "Task stopped"
        );
        self.tasks.push(done.clone());
        self.state = TrackerState::Running;
        if resume {
            self.resume_scheduler()?;
        }
        Ok(done)
    }

    /// Start the tracker and return a guard that stops it on drop.
    pub fn scoped(&mut self) -> Result<TrackerGuard<'_>> {
        TrackerGuard::enter(self)
    }

    /// Stop from either running state, closing an open task first.
    ///
    /// `stop()` always runs. If the task cannot be closed it is dropped
    /// unrecorded and its error is returned once the tracker has stopped.
    pub(crate) fn close(&mut self) -> Result<EmissionsData> {
        if self.state == TrackerState::TaskRunning {
            if let Err(task_err) = self.stop_task() {
                if let Some(task) = self.task.take() {
                    tracing::warn!(
                        task = %task.name,
                        error = %task_err,
                        "Dropping task that could not be closed"
                    );
                }
                self.state = TrackerState::Running;
                if let Err(e) = self.stop() {
                    tracing::warn!(error = %e, "Stop after failed task close also failed");
                }
                return Err(task_err);
            }
        }
        self.stop()
    }

    fn expect_state(&self, operation: &'static str, expected: TrackerState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn snapshot_and_write(&mut self) -> Result<EmissionsData> {
        let mut core = lock(&self.core);
        core.meter.sample()?;
        let data = EmissionsData::from_meter(&core.info, &core.meter);
        write_all(&mut core.sinks, &data)?;
        Ok(data)
    }

    fn suspend_scheduler(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
    }

    fn resume_scheduler(&mut self) -> Result<()> {
        if self.manual_sampling || self.scheduler.is_some() {
            return Ok(());
        }
        self.scheduler = Some(Scheduler::spawn(
            Arc::clone(&self.core),
            self.settings.measure_interval(),
            self.settings.api_call_interval(),
        )?);
        Ok(())
    }
}
