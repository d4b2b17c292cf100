//! CLI argument definitions for codecarbon.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Layer;

/// Version string with the commit and build time, shown by `--version`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CODECARBON_GIT_COMMIT"),
    ", built ",
    env!("CODECARBON_BUILD_TIMESTAMP"),
    ")"
);

/// codecarbon - Track the carbon emissions of a workload.
///
/// Start with `codecarbon config show` to see the effective settings, then
/// `codecarbon monitor` to measure until interrupted.
#[derive(Parser, Debug)]
#[command(name = "codecarbon")]
#[command(author, version = LONG_VERSION, about = "Track the carbon emissions of a workload", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Measure emissions until interrupted (Ctrl-C), then write the final record
    Monitor(MonitorArgs),

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Arguments for `codecarbon monitor`
#[derive(clap::Args, Debug, Default)]
pub struct MonitorArgs {
    /// Never contact the API (offline mode when a country code is configured)
    #[arg(long)]
    pub no_api: bool,

    /// Seconds between power samples
    #[arg(long, value_name = "SECS")]
    pub measure_power_secs: Option<f64>,

    /// Number of samples between live updates to HTTP sinks
    #[arg(long, value_name = "N")]
    pub api_call_interval: Option<i64>,

    /// Project name recorded with every measurement
    #[arg(long, value_name = "NAME")]
    pub project_name: Option<String>,

    /// Directory for the emissions CSV file
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// ISO 3166-1 alpha-3 country code of the machine's location
    #[arg(long, value_name = "CODE")]
    pub country_iso_code: Option<String>,
}

impl MonitorArgs {
    /// Flags given on the command line, as the explicit configuration layer.
    pub fn explicit_layer(&self) -> Layer {
        let mut layer = Layer::new();
        if let Some(secs) = self.measure_power_secs {
            layer.set("measure_power_secs", secs);
        }
        if let Some(n) = self.api_call_interval {
            layer.set("api_call_interval", n);
        }
        if let Some(name) = &self.project_name {
            layer.set("project_name", name.as_str());
        }
        if let Some(dir) = &self.output_dir {
            layer.set("output_dir", dir.to_string_lossy().into_owned());
        }
        if let Some(code) = &self.country_iso_code {
            layer.set("country_iso_code", code.as_str());
        }
        if self.no_api {
            layer.set("save_to_api", false);
        }
        layer
    }
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show every effective setting and where its value came from
    Show,
}
