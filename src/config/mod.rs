//! Configuration sources and resolution for codecarbon.
//!
//! Settings come from four layers:
//!
//! ## Global file
//!
//! Located at `~/.codecarbon.config`. INI format with a single `[codecarbon]`
//! section:
//!
//! ```ini
//! [codecarbon]
//! measure_power_secs = 10
//! save_to_api = true
//! gpu_ids = 0, 1
//! ```
//!
//! ## Local file
//!
//! `./.codecarbon.config` in the current working directory, same format.
//!
//! ## Environment
//!
//! `CODECARBON_<KEY>` variables, e.g. `CODECARBON_LOG_LEVEL=debug`.
//!
//! ## Explicit parameters
//!
//! Values passed when the tracker is built (or CLI flags).
//!
//! ## Precedence
//!
//! explicit > environment > local file > global file > built-in defaults
//!
//! Use the [`resolver`] module for unified precedence resolution.

pub mod env;
pub mod ini;
pub mod resolver;
pub mod schema;

pub use env::{ENV_PREFIX, env_layer};
pub use ini::{CONFIG_FILE_NAME, SECTION, parse_config};
pub use resolver::{ConfigSources, Resolved, Resolver, Settings, ValueSource};
pub use schema::{Layer, OptionKind, OptionSpec, TrackingMode, Value, lookup_option, options};
