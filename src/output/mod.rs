//! Emissions records and the sinks that persist or transmit them.
//!
//! Sinks:
//! - [`FileSink`] - appends CSV rows to `output_dir/output_file`
//! - [`HttpSink`] - POSTs the record as JSON (emissions endpoint, API)
//! - [`LogSink`] - emits the record through `tracing`

mod file;
mod http;
mod logger;

pub use file::{CSV_COLUMNS, FileSink};
pub use http::HttpSink;
pub use logger::LogSink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Settings, TrackingMode};
use crate::power::EnergyMeter;
use crate::{Error, Result};

/// Static facts about a run, shared by every record it produces.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub project_name: String,
    pub run_id: String,
    pub experiment_id: Option<String>,
    pub country_iso_code: Option<String>,
    pub tracking_mode: TrackingMode,
    pub gpu_ids: Option<Vec<i64>>,
    /// Grid carbon intensity, g CO2eq / kWh.
    pub carbon_intensity: f64,
}

impl RunInfo {
    pub fn from_settings(settings: &Settings, run_id: &str) -> Self {
        Self {
            project_name: settings.project_name().to_string(),
            run_id: run_id.to_string(),
            experiment_id: settings.experiment_id().map(str::to_string),
            country_iso_code: settings.country_iso_code().map(str::to_string),
            tracking_mode: settings.tracking_mode(),
            gpu_ids: settings.gpu_ids().map(<[i64]>::to_vec),
            carbon_intensity: settings.carbon_intensity(),
        }
    }
}

/// One emissions measurement, as written to sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionsData {
    /// When the record was produced
    pub timestamp: DateTime<Utc>,
    pub project_name: String,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    /// Measured duration in seconds
    pub duration: f64,
    /// Emissions in kg CO2eq
    pub emissions: f64,
    /// Emissions rate in kg CO2eq per second
    pub emissions_rate: f64,
    /// Last sampled CPU power in watts
    pub cpu_power: f64,
    /// Energy consumed in kWh
    pub energy_consumed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_iso_code: Option<String>,
    pub tracking_mode: TrackingMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_ids: Option<Vec<i64>>,
    pub codecarbon_version: String,
}

impl EmissionsData {
    /// Build a cumulative record from the meter's current totals.
    pub fn from_meter(info: &RunInfo, meter: &EnergyMeter) -> Self {
        let energy = meter.total();
        let duration = meter.measured_duration().as_secs_f64();
        let emissions = energy.emissions_kg(info.carbon_intensity);
        let emissions_rate = if duration > 0.0 {
            emissions / duration
        } else {
            0.0
        };

        Self {
            timestamp: Utc::now(),
            project_name: info.project_name.clone(),
            run_id: info.run_id.clone(),
            experiment_id: info.experiment_id.clone(),
            duration,
            emissions,
            emissions_rate,
            cpu_power: meter.last_power().watts(),
            energy_consumed: energy.kwh(),
            country_iso_code: info.country_iso_code.clone(),
            tracking_mode: info.tracking_mode,
            gpu_ids: info.gpu_ids.clone(),
            codecarbon_version: crate::VERSION.to_string(),
        }
    }

    /// Human-readable one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{}: {:.6} kg CO2eq over {:.1}s ({:.6} kWh, {:.1} W)",
            self.project_name, self.emissions, self.duration, self.energy_consumed, self.cpu_power
        )
    }
}

/// A persistence or transmission target for emissions records.
pub trait EmissionsSink: Send {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Persist or transmit a record.
    fn write(&mut self, data: &EmissionsData) -> Result<()>;

    /// Whether this sink also receives periodic updates while running.
    fn live_updates(&self) -> bool {
        false
    }
}

/// Build the sinks enabled by `settings`.
pub fn sinks_from_settings(settings: &Settings) -> Vec<Box<dyn EmissionsSink>> {
    let mut sinks: Vec<Box<dyn EmissionsSink>> = Vec::new();

    if settings.save_to_file() {
        sinks.push(Box::new(FileSink::new(settings.output_path())));
    }
    if settings.save_to_api() {
        let url = format!("{}/emissions", settings.api_endpoint().trim_end_matches('/'));
        sinks.push(Box::new(
            HttpSink::new("api", url).with_api_key(settings.api_key()),
        ));
    }
    if let Some(endpoint) = settings.emissions_endpoint() {
        sinks.push(Box::new(HttpSink::new("http", endpoint)));
    }
    if settings.save_to_logger() {
        sinks.push(Box::new(LogSink));
    }

    sinks
}

/// Write `data` to every sink. All sinks are attempted; the first failure is
/// returned.
pub fn write_all(sinks: &mut [Box<dyn EmissionsSink>], data: &EmissionsData) -> Result<()> {
    let mut first_error = None;
    for sink in sinks.iter_mut() {
        if let Err(e) = sink.write(data) {
            tracing::error!(sink = sink.name(), error = %e, "Failed to write emissions");
            if first_error.is_none() {
                first_error = Some(sink_error(sink.name(), e));
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Send a live update to sinks that accept them. Failures are logged only.
pub fn write_live(sinks: &mut [Box<dyn EmissionsSink>], data: &EmissionsData) {
    for sink in sinks.iter_mut().filter(|s| s.live_updates()) {
        if let Err(e) = sink.write(data) {
            tracing::warn!(sink = sink.name(), error = %e, "Live emissions update failed");
        }
    }
}

fn sink_error(sink: &str, err: Error) -> Error {
    match err {
        Error::Sink { .. } => err,
        other => Error::Sink {
            sink: sink.to_string(),
            message: other.to_string(),
        },
    }
}
