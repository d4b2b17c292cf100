//! Environment variable layer.
//!
//! Any recognized option can be set as `CODECARBON_<KEY>`, e.g.
//! `CODECARBON_MEASURE_POWER_SECS=5`. Unrecognized names after the prefix are
//! kept as passthrough keys, like unknown keys in a config file.

use crate::config::schema::Layer;

/// Prefix marking a variable as a codecarbon option.
pub const ENV_PREFIX: &str = "CODECARBON_";

/// Build a layer from `(name, value)` pairs, keeping only prefixed names.
pub fn env_layer<I, K, V>(vars: I) -> Layer
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut layer = Layer::new();
    for (name, value) in vars {
        if let Some(key) = name.as_ref().strip_prefix(ENV_PREFIX) {
            if !key.is_empty() {
                layer.set(key, value.into());
            }
        }
    }
    layer
}
