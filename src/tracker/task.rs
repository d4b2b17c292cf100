//! Named measurement windows nested inside a running tracker.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::power::Energy;

/// Emissions attributed to one completed task. Kept in memory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEmissions {
    pub name: String,
    pub started_at: DateTime<Utc>,
    /// Task duration in seconds
    pub duration: f64,
    /// Energy consumed during the task in kWh
    pub energy_consumed: f64,
    /// Emissions in kg CO2eq
    pub emissions: f64,
    /// Last sampled CPU power in watts
    pub cpu_power: f64,
}

/// The task currently being measured.
#[derive(Debug)]
pub(crate) struct ActiveTask {
    pub(crate) name: String,
    pub(crate) started_at: DateTime<Utc>,
    /// Meter clock at the opening sample
    pub(crate) started: Instant,
    /// Meter total at the opening sample
    pub(crate) start_energy: Energy,
    /// Whether the background scheduler ran before the task and must resume
    pub(crate) resume_scheduler: bool,
}

impl ActiveTask {
    pub(crate) fn new(
        name: Option<&str>,
        started: Instant,
        start_energy: Energy,
        resume_scheduler: bool,
    ) -> Self {
        let name = match name {
            Some(n) => n.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        Self {
            name,
            started_at: Utc::now(),
            started,
            start_energy,
            resume_scheduler,
        }
    }

    /// Close the window at the meter's latest sample.
    pub(crate) fn finish(
        self,
        ended: Instant,
        end_energy: Energy,
        cpu_power: f64,
        carbon_intensity: f64,
    ) -> TaskEmissions {
        let energy = end_energy - self.start_energy;
        TaskEmissions {
            name: self.name,
            started_at: self.started_at,
            duration: ended.saturating_duration_since(self.started).as_secs_f64(),
            energy_consumed: energy.kwh(),
            emissions: energy.emissions_kg(carbon_intensity),
            cpu_power,
        }
    }
}
