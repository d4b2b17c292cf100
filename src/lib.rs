//! codecarbon - Track the carbon emissions of a workload.
//!
//! This library provides the core functionality for the `codecarbon` CLI tool:
//! layered configuration resolution, the emissions tracker lifecycle
//! (start/stop/flush and named tasks), and the sinks that persist results.
//!
//! ```no_run
//! use codecarbon::{ConfigSources, EmissionsTracker, Resolver};
//!
//! let sources = ConfigSources::from_process()?;
//! let settings = Resolver::new().resolve(&sources)?;
//! let mut tracker = EmissionsTracker::builder(settings).build()?;
//!
//! tracker.start()?;
//! // ... workload ...
//! let data = tracker.stop()?;
//! println!("{:.6} kg CO2eq", data.emissions);
//! # Ok::<(), codecarbon::Error>(())
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod output;
pub mod power;
pub mod tracker;

pub use config::{ConfigSources, Layer, Resolver, Settings, Value, ValueSource};
pub use output::EmissionsData;
pub use tracker::{
    EmissionsTracker, TaskEmissions, TrackerBuilder, TrackerGuard, TrackerState, track,
};


/// Crate version, reported in every emissions record.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library-level error type for codecarbon operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A configuration file is not well-formed.
    #[error("Malformed config file {path}:{line}: {message}")]
    ConfigFormat {
        path: String,
        line: usize,
        message: String,
    },

    /// A configured value cannot be coerced to the option's declared type.
    #[error("Invalid value for '{key}': {value:?} (expected {expected})")]
    ConfigType {
        key: String,
        value: String,
        expected: String,
    },

    #[error("Unknown configuration option: {0}")]
    UnknownOption(String),

    /// A lifecycle operation was invoked outside its legal source state.
    #[error("Cannot {operation} while tracker is {state}")]
    InvalidState {
        operation: &'static str,
        state: TrackerState,
    },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Sink '{sink}' failed: {message}")]
    Sink { sink: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for codecarbon operations.
pub type Result<T> = std::result::Result<T, Error>;
