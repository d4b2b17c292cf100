//! Command implementations for the codecarbon CLI.
//!
//! Each command returns a result type implementing [`Output`], so `main` can
//! print it as JSON (default) or human-readable text (`-H`).

use std::sync::mpsc::Receiver;

use serde::Serialize;

use crate::Result;
use crate::config::{Settings, Value};
use crate::output::EmissionsData;
use crate::tracker::EmissionsTracker;

/// Keys whose values are never printed.
const SECRET_KEYS: &[&str] = &["api_key", "co2_signal_api_token"];

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

// === config show ===

#[derive(Debug, Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: Value,
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct ConfigShow {
    pub settings: Vec<ConfigEntry>,
}

impl Output for ConfigShow {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let width = self.settings.iter().map(|e| e.key.len()).max().unwrap_or(0);
        let mut lines = Vec::with_capacity(self.settings.len());
        for entry in &self.settings {
            lines.push(format!(
                "{:width$}  {}  ({})",
                entry.key,
                entry.value,
                entry.source,
                width = width
            ));
        }
        lines.join("\n")
    }
}

/// Every effective setting with its source. Secrets are masked.
pub fn config_show(settings: &Settings) -> ConfigShow {
    let settings = settings
        .iter()
        .map(|(key, resolved)| {
            let value = if SECRET_KEYS.contains(&key.as_str()) {
                Value::Str("********".to_string())
            } else {
                resolved.value.clone()
            };
            ConfigEntry {
                key: key.clone(),
                value,
                source: resolved.source.to_string(),
            }
        })
        .collect();
    ConfigShow { settings }
}

// === monitor ===

#[derive(Debug, Serialize)]
pub struct MonitorResult {
    #[serde(flatten)]
    pub data: EmissionsData,
    pub offline: bool,
}

impl Output for MonitorResult {
    fn to_json(&self) -> String {
        serde_json::to_string(&self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut out = format!("Run {}\n{}", self.data.run_id, self.data.summary());
        if self.offline {
            out.push_str("\n(offline)");
        }
        out
    }
}

/// Track until `shutdown` fires (or its sender goes away), then stop and
/// return the final record.
///
/// With `no_api` the API sink is disabled; if a country code is configured the
/// tracker also runs in offline mode.
pub fn monitor(settings: Settings, no_api: bool, shutdown: &Receiver<()>) -> Result<MonitorResult> {
    let has_country = settings
        .country_iso_code()
        .is_some_and(|c| !c.trim().is_empty());
    let offline = no_api && has_country;

    let mut builder = EmissionsTracker::builder(settings);
    if offline {
        builder = builder.offline();
    }
    let mut tracker = builder.build()?;

    tracker.start()?;
    tracing::info!(
        run_id = tracker.run_id(),
        project = tracker.project_name(),
        "Monitoring; press Ctrl-C to stop"
    );

    // A disconnected sender means nobody can signal us any more.
    let _ = shutdown.recv();

    let data = tracker.stop()?;
    Ok(MonitorResult { data, offline })
}
