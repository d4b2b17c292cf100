//! Log sink: reports records through `tracing` instead of persisting them.

use super::{EmissionsData, EmissionsSink};
use crate::Result;

/// Emits every record as an `info` event on the `codecarbon::emissions` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EmissionsSink for LogSink {
    fn name(&self) -> &str {
        "logger"
    }

    fn write(&mut self, data: &EmissionsData) -> Result<()> {
        tracing::info!(
            target: "codecarbon::emissions",
            project = %data.project_name,
            run_id = %data.run_id,
            duration_s = data.duration,
            emissions_kg = data.emissions,
            energy_kwh = data.energy_consumed,
            "{}",
            data.summary()
        );
        Ok(())
    }
}
