//! Power sources and energy accounting.
//!
//! A [`PowerSource`] reports instantaneous draw in watts. The [`EnergyMeter`]
//! integrates that draw over the time between samples and keeps a running
//! total. How power is obtained is up to the source; the built-in
//! [`ConstantPower`] model assumes a fixed draw.

use std::time::{Duration, Instant};

use crate::Result;

/// Instantaneous power draw in watts.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct Power(pub f64);

impl Power {
    pub fn watts(&self) -> f64 {
        self.0
    }
}

/// Energy in kilowatt-hours.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct Energy(pub f64);

impl Energy {
    /// Energy drawn by `power` over `elapsed`.
    pub fn from_power(power: Power, elapsed: Duration) -> Self {
        Energy(power.watts() * elapsed.as_secs_f64() / 3_600_000.0)
    }

    pub fn kwh(&self) -> f64 {
        self.0
    }

    /// Emissions in kg CO2eq for a grid intensity in g CO2eq / kWh.
    pub fn emissions_kg(&self, intensity_g_per_kwh: f64) -> f64 {
        self.0 * intensity_g_per_kwh / 1000.0
    }
}

impl std::ops::Add for Energy {
    type Output = Energy;

    fn add(self, rhs: Energy) -> Energy {
        Energy(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Energy {
    type Output = Energy;

    /// Saturates at zero.
    fn sub(self, rhs: Energy) -> Energy {
        Energy((self.0 - rhs.0).max(0.0))
    }
}

/// Anything that can report the current power draw.
pub trait PowerSource: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Current power draw.
    fn power(&mut self) -> Result<Power>;
}

/// A source that always reports the same draw.
#[derive(Debug, Clone)]
pub struct ConstantPower {
    power: Power,
}

impl ConstantPower {
    pub fn new(watts: f64) -> Self {
        Self {
            power: Power(watts.max(0.0)),
        }
    }
}

impl PowerSource for ConstantPower {
    fn name(&self) -> &str {
        "constant"
    }

    fn power(&mut self) -> Result<Power> {
        Ok(self.power)
    }
}

/// Integrates power samples into a running energy total.
pub struct EnergyMeter {
    source: Box<dyn PowerSource>,
    started: Instant,
    last_sample: Instant,
    total: Energy,
    last_power: Power,
    samples: u64,
}

impl std::fmt::Debug for EnergyMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnergyMeter")
            .field("source", &self.source.name())
            .field("total", &self.total)
            .field("last_power", &self.last_power)
            .field("samples", &self.samples)
            .finish()
    }
}

impl EnergyMeter {
    pub fn new(source: Box<dyn PowerSource>) -> Self {
        let now = Instant::now();
        Self {
            source,
            started: now,
            last_sample: now,
            total: Energy::default(),
            last_power: Power::default(),
            samples: 0,
        }
    }

    /// Zero the totals and restart the clock.
    pub fn reset(&mut self) {
        self.reset_at(Instant::now());
    }

    pub fn reset_at(&mut self, now: Instant) {
        self.started = now;
        self.last_sample = now;
        self.total = Energy::default();
        self.last_power = Power::default();
        self.samples = 0;
    }

    /// Take a sample now. Returns the energy added by this sample.
    pub fn sample(&mut self) -> Result<Energy> {
        self.sample_at(Instant::now())
    }

    /// Take a sample at `now`, attributing the current draw to the whole
    /// interval since the previous sample.
    pub fn sample_at(&mut self, now: Instant) -> Result<Energy> {
        let power = self.source.power()?;
        let elapsed = now.saturating_duration_since(self.last_sample);
        let delta = Energy::from_power(power, elapsed);

        self.total = self.total + delta;
        self.last_power = power;
        self.last_sample = self.last_sample.max(now);
        self.samples += 1;

        tracing::trace!(
            source = self.source.name(),
            watts = power.watts(),
            delta_kwh = delta.kwh(),
            "Power sample"
        );
        Ok(delta)
    }

    pub fn total(&self) -> Energy {
        self.total
    }

    pub fn last_power(&self) -> Power {
        self.last_power
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Instant of the most recent sample (or reset).
    pub fn last_sample_at(&self) -> Instant {
        self.last_sample
    }

    /// Time between the last reset and the last sample.
    pub fn measured_duration(&self) -> Duration {
        self.last_sample.saturating_duration_since(self.started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_from_power() {
        // 1 kW for one hour is 1 kWh.
        let e = Energy::from_power(Power(1000.0), Duration::from_secs(3600));
        assert!((e.kwh() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_emissions_from_energy() {
        let e = Energy(2.0);
        assert!((e.emissions_kg(500.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_energy_sub_saturates() {
        assert_eq!(Energy(1.0) - Energy(3.0), Energy(0.0));
    }

    #[test]
    fn test_meter_integrates_samples() {
        let mut meter = EnergyMeter::new(Box::new(ConstantPower::new(360.0)));
        let t0 = Instant::now();
        meter.reset_at(t0);

        meter.sample_at(t0 + Duration::from_secs(10)).unwrap();
        let delta = meter.sample_at(t0 + Duration::from_secs(20)).unwrap();

        // 360 W * 10 s = 3600 J = 0.001 kWh
        assert!((delta.kwh() - 0.001).abs() < 1e-12);
        assert!((meter.total().kwh() - 0.002).abs() < 1e-12);
        assert_eq!(meter.samples(), 2);
        assert_eq!(meter.last_power(), Power(360.0));
        assert_eq!(meter.measured_duration(), Duration::from_secs(20));
    }

    #[test]
    fn test_meter_reset_clears_totals() {
        let mut meter = EnergyMeter::new(Box::new(ConstantPower::new(100.0)));
        let t0 = Instant::now();
        meter.reset_at(t0);
        meter.sample_at(t0 + Duration::from_secs(5)).unwrap();

        meter.reset_at(t0 + Duration::from_secs(5));
        assert_eq!(meter.total(), Energy(0.0));
        assert_eq!(meter.samples(), 0);
    }

    #[test]
    fn test_sample_before_last_is_zero() {
        let mut meter = EnergyMeter::new(Box::new(ConstantPower::new(100.0)));
        let t0 = Instant::now();
        meter.reset_at(t0 + Duration::from_secs(5));
        let delta = meter.sample_at(t0).unwrap();
        assert_eq!(delta, Energy(0.0));
    }

    #[test]
    fn test_constant_power_clamps_negative() {
        let mut source = ConstantPower::new(-5.0);
        assert_eq!(source.power().unwrap(), Power(0.0));
    }
}
