//! Unified precedence resolution for codecarbon settings.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Explicit parameters (tracker builder, CLI flags)
//! 2. `CODECARBON_*` environment variables
//! 3. Local `./.codecarbon.config`
//! 4. Global `~/.codecarbon.config`
//! 5. Built-in defaults
//!
//! Resolution itself is pure: [`Resolver::resolve`] only looks at the layers
//! in [`ConfigSources`]. Reading files and the process environment happens in
//! [`ConfigSources::load`] and [`ConfigSources::from_process`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::env::{ENV_PREFIX, env_layer};
use crate::config::ini::{CONFIG_FILE_NAME, read_config};
use crate::config::schema::{Layer, TrackingMode, Value, lookup_option, options};
use crate::{Error, Result};

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value passed explicitly to the tracker or on the command line
    Explicit,
    /// Value from environment variable
    EnvVar(String),
    /// Value from the local config file
    LocalFile(String),
    /// Value from the global config file
    GlobalFile(String),
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::Explicit => write!(f, "explicit"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::LocalFile(path) => write!(f, "local:{}", path),
            ValueSource::GlobalFile(path) => write!(f, "global:{}", path),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// The four raw layers fed to the resolver.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub explicit: Layer,
    pub env: Layer,
    pub local: Layer,
    pub global: Layer,
    /// Path the local layer was read from, for source reporting.
    pub local_path: Option<PathBuf>,
    /// Path the global layer was read from, for source reporting.
    pub global_path: Option<PathBuf>,
}

impl ConfigSources {
    /// Create empty sources (everything resolves to defaults).
    pub fn new() -> Self {
        Self::default()
    }

    /// Read config files and environment from explicit locations.
    ///
    /// `home` is the directory holding the global file (skipped when `None`),
    /// `cwd` the directory holding the local file. Missing files are empty
    /// layers; malformed files are errors.
    pub fn load<I, K, V>(home: Option<&Path>, cwd: &Path, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let global_path = home.map(|h| h.join(CONFIG_FILE_NAME));
        let local_path = cwd.join(CONFIG_FILE_NAME);

        let global = match &global_path {
            Some(path) => read_config(path)?,
            None => Layer::new(),
        };
        let local = read_config(&local_path)?;

        tracing::debug!(
            global = global.len(),
            local = local.len(),
            "Loaded config files"
        );

        Ok(Self {
            explicit: Layer::new(),
            env: env_layer(vars),
            local,
            global,
            local_path: Some(local_path),
            global_path,
        })
    }

    /// Read config files from the user's home and the current directory, and
    /// variables from the process environment.
    pub fn from_process() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let home = dirs::home_dir();
        Self::load(home.as_deref(), &cwd, std::env::vars())
    }

    /// Replace the explicit layer.
    pub fn with_explicit(mut self, explicit: Layer) -> Self {
        self.explicit = explicit;
        self
    }

    /// Layers in precedence order, highest first, with their source tags.
    fn ranked(&self) -> [(&Layer, LayerKind); 4] {
        [
            (&self.explicit, LayerKind::Explicit),
            (&self.env, LayerKind::Env),
            (&self.local, LayerKind::Local),
            (&self.global, LayerKind::Global),
        ]
    }

    fn source_for(&self, kind: LayerKind, key: &str) -> ValueSource {
        let path_of = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| CONFIG_FILE_NAME.to_string())
        };
        match kind {
            LayerKind::Explicit => ValueSource::Explicit,
            LayerKind::Env => {
                ValueSource::EnvVar(format!("{}{}", ENV_PREFIX, key.to_uppercase()))
            }
            LayerKind::Local => ValueSource::LocalFile(path_of(&self.local_path)),
            LayerKind::Global => ValueSource::GlobalFile(path_of(&self.global_path)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LayerKind {
    Explicit,
    Env,
    Local,
    Global,
}

/// Merges [`ConfigSources`] into [`Settings`].
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    reject_unknown: bool,
}

impl Resolver {
    /// Create a resolver that passes unrecognized keys through.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`Error::UnknownOption`] on unrecognized keys instead of
    /// passing them through.
    pub fn reject_unknown(mut self, reject: bool) -> Self {
        self.reject_unknown = reject;
        self
    }

    /// Resolve settings with full precedence chain.
    pub fn resolve(&self, sources: &ConfigSources) -> Result<Settings> {
        let mut entries = BTreeMap::new();

        for spec in options() {
            let found = sources
                .ranked()
                .into_iter()
                .find_map(|(layer, kind)| layer.get(spec.key).map(|v| (v, kind)));

            let resolved = match found {
                Some((raw, kind)) => {
                    Resolved::new(spec.coerce(raw)?, sources.source_for(kind, spec.key))
                }
                None => match spec.default {
                    Some(default) => {
                        Resolved::new(spec.coerce(&Value::from(default))?, ValueSource::Default)
                    }
                    None => continue,
                },
            };
            entries.insert(spec.key.to_string(), resolved);
        }

        // Unrecognized keys: lowest layer first so higher layers overwrite.
        for (layer, kind) in sources.ranked().into_iter().rev() {
            for (key, raw) in layer.iter() {
                if lookup_option(key).is_some() {
                    continue;
                }
                if self.reject_unknown {
                    return Err(Error::UnknownOption(key.clone()));
                }
                entries.insert(
                    key.clone(),
                    Resolved::new(raw.clone(), sources.source_for(kind, key)),
                );
            }
        }

        Ok(Settings { entries })
    }

    /// Resolve four bare layers, with no file paths for source reporting.
    pub fn resolve_layers(
        &self,
        explicit: Layer,
        env: Layer,
        local: Layer,
        global: Layer,
    ) -> Result<Settings> {
        self.resolve(&ConfigSources {
            explicit,
            env,
            local,
            global,
            local_path: None,
            global_path: None,
        })
    }
}

/// Fully resolved, typed settings with source tracking.
///
/// Every recognized option with a default is always present, so the typed
/// accessors below never need to guess.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    entries: BTreeMap<String, Resolved<Value>>,
}

impl Default for Settings {
    fn default() -> Self {
        Resolver::new()
            .resolve(&ConfigSources::new())
            .unwrap_or(Self {
                entries: BTreeMap::new(),
            })
    }
}

impl Settings {
    /// Get a resolved value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).map(|r| &r.value)
    }

    /// Get the source of a resolved key.
    pub fn source(&self, key: &str) -> Option<&ValueSource> {
        self.entries.get(key).map(|r| &r.source)
    }

    /// Iterate over all resolved entries, sorted by key.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Resolved<Value>)> {
        self.entries.iter()
    }

    /// Return a copy with `key` set explicitly. The value is coerced like any
    /// other explicit parameter.
    pub fn with_override(mut self, key: &str, value: impl Into<Value>) -> Result<Self> {
        let value = value.into();
        let value = match lookup_option(key) {
            Some(spec) => spec.coerce(&value)?,
            None => value,
        };
        self.entries
            .insert(key.to_string(), Resolved::new(value, ValueSource::Explicit));
        Ok(self)
    }

    fn str_value(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    fn bool_value(&self, key: &str, fallback: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(fallback)
    }

    fn float_value(&self, key: &str, fallback: f64) -> f64 {
        self.get(key).and_then(Value::as_float).unwrap_or(fallback)
    }

    pub fn project_name(&self) -> &str {
        self.str_value("project_name").unwrap_or("codecarbon")
    }

    pub fn experiment_id(&self) -> Option<&str> {
        self.str_value("experiment_id")
    }

    pub fn measure_power_secs(&self) -> f64 {
        self.float_value("measure_power_secs", 15.0)
    }

    /// Sampling interval as a [`Duration`]. Resolution rejects values that
    /// do not fit, so the fallback is never hit for resolved settings.
    pub fn measure_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.measure_power_secs())
            .unwrap_or(Duration::from_secs(15))
    }

    /// Number of samples between two live API updates.
    pub fn api_call_interval(&self) -> u64 {
        self.get("api_call_interval")
            .and_then(Value::as_int)
            .map(|i| i.max(1) as u64)
            .unwrap_or(8)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(self.str_value("output_dir").unwrap_or("."))
    }

    pub fn output_file(&self) -> &str {
        self.str_value("output_file").unwrap_or("emissions.csv")
    }

    /// Full path of the CSV output file.
    pub fn output_path(&self) -> PathBuf {
        self.output_dir().join(self.output_file())
    }

    pub fn save_to_file(&self) -> bool {
        self.bool_value("save_to_file", true)
    }

    pub fn save_to_api(&self) -> bool {
        self.bool_value("save_to_api", false)
    }

    pub fn save_to_logger(&self) -> bool {
        self.bool_value("save_to_logger", false)
    }

    pub fn api_endpoint(&self) -> &str {
        self.str_value("api_endpoint")
            .unwrap_or("https://api.codecarbon.io")
    }

    pub fn api_key(&self) -> Option<&str> {
        self.str_value("api_key")
    }

    pub fn emissions_endpoint(&self) -> Option<&str> {
        self.str_value("emissions_endpoint")
    }

    pub fn co2_signal_api_token(&self) -> Option<&str> {
        self.str_value("co2_signal_api_token")
    }

    pub fn log_level(&self) -> &str {
        self.str_value("log_level").unwrap_or("info")
    }

    pub fn tracking_mode(&self) -> TrackingMode {
        self.str_value("tracking_mode")
            .and_then(TrackingMode::parse)
            .unwrap_or_default()
    }

    pub fn gpu_ids(&self) -> Option<&[i64]> {
        self.get("gpu_ids").and_then(Value::as_int_list)
    }

    pub fn country_iso_code(&self) -> Option<&str> {
        self.str_value("country_iso_code")
    }

    /// Constant CPU draw in watts used by the default power model.
    pub fn default_cpu_power(&self) -> f64 {
        self.float_value("default_cpu_power", 85.0)
    }

    /// Grid carbon intensity in grams CO2eq per kWh.
    pub fn carbon_intensity(&self) -> f64 {
        self.float_value("carbon_intensity", 475.0)
    }

    /// JSON object of `key -> { value, source }`.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|(key, resolved)| {
                (
                    key.clone(),
                    serde_json::json!({
                        "value": resolved.value,
                        "source": resolved.source.to_string(),
                    }),
                )
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layer(key: &str, value: &str) -> Layer {
        Layer::new().with(key, value)
    }

    // ==================== ValueSource Tests ====================

    #[test]
    fn test_value_source_display() {
        assert_eq!(ValueSource::Explicit.to_string(), "explicit");
        assert_eq!(
            ValueSource::EnvVar("CODECARBON_LOG_LEVEL".to_string()).to_string(),
            "env:CODECARBON_LOG_LEVEL"
        );
        assert_eq!(
            ValueSource::LocalFile("./.codecarbon.config".to_string()).to_string(),
            "local:./.codecarbon.config"
        );
        assert_eq!(
            ValueSource::GlobalFile("/home/u/.codecarbon.config".to_string()).to_string(),
            "global:/home/u/.codecarbon.config"
        );
        assert_eq!(ValueSource::Default.to_string(), "default");
    }

    // ==================== Precedence Tests ====================

    #[test]
    fn test_resolve_defaults() {
        let settings = Resolver::new().resolve(&ConfigSources::new()).unwrap();

        assert_eq!(settings.project_name(), "codecarbon");
        assert_eq!(settings.measure_power_secs(), 15.0);
        assert_eq!(settings.api_call_interval(), 8);
        assert!(settings.save_to_file());
        assert!(!settings.save_to_api());
        assert_eq!(settings.output_path(), PathBuf::from("./emissions.csv"));
        assert_eq!(settings.tracking_mode(), TrackingMode::Machine);
        assert_eq!(settings.source("project_name"), Some(&ValueSource::Default));
        assert!(settings.gpu_ids().is_none());
        assert!(settings.get("experiment_id").is_none());
    }

    #[test]
    fn test_each_layer_beats_the_ones_below() {
        let key = "project_name";
        let explicit = || layer(key, "explicit");
        let env = || layer(key, "env");
        let local = || layer(key, "local");
        let global = || layer(key, "global");
        let empty = Layer::new;
        let r = Resolver::new();

        let s = r
            .resolve_layers(explicit(), env(), local(), global())
            .unwrap();
        assert_eq!(s.project_name(), "explicit");
        assert_eq!(s.source(key), Some(&ValueSource::Explicit));

        let s = r.resolve_layers(empty(), env(), local(), global()).unwrap();
        assert_eq!(s.project_name(), "env");
        assert_eq!(
            s.source(key),
            Some(&ValueSource::EnvVar("CODECARBON_PROJECT_NAME".to_string()))
        );

        let s = r
            .resolve_layers(empty(), empty(), local(), global())
            .unwrap();
        assert_eq!(s.project_name(), "local");
        assert!(matches!(s.source(key), Some(ValueSource::LocalFile(_))));

        let s = r
            .resolve_layers(empty(), empty(), empty(), global())
            .unwrap();
        assert_eq!(s.project_name(), "global");
        assert!(matches!(s.source(key), Some(ValueSource::GlobalFile(_))));
    }

    #[test]
    fn test_precedence_is_per_key() {
        let global = Layer::new()
            .with("measure_power_secs", "30")
            .with("save_to_api", "true")
            .with("output_dir", "/global");
        let local = Layer::new().with("measure_power_secs", "20");
        let env = Layer::new().with("output_dir", "/env");

        let s = Resolver::new()
            .resolve_layers(Layer::new(), env, local, global)
            .unwrap();

        assert_eq!(s.measure_power_secs(), 20.0);
        assert!(s.save_to_api());
        assert_eq!(s.output_dir(), PathBuf::from("/env"));
    }

    #[test]
    fn test_explicit_typed_values() {
        let explicit = Layer::new()
            .with("measure_power_secs", 2i64)
            .with("save_to_file", false)
            .with("gpu_ids", vec![1i64, 3]);

        let s = Resolver::new()
            .resolve_layers(explicit, Layer::new(), Layer::new(), Layer::new())
            .unwrap();

        assert_eq!(s.measure_power_secs(), 2.0);
        assert!(!s.save_to_file());
        assert_eq!(s.gpu_ids(), Some(&[1i64, 3][..]));
    }

    #[test]
    fn test_bad_value_in_lower_layer_is_shadowed() {
        // The global value is never coerced because the local one wins.
        let s = Resolver::new()
            .resolve_layers(
                Layer::new(),
                Layer::new(),
                layer("save_to_api", "true"),
                layer("save_to_api", "maybe"),
            )
            .unwrap();
        assert!(s.save_to_api());
    }

    #[test]
    fn test_type_error_surfaces() {
        let err = Resolver::new()
            .resolve_layers(
                Layer::new(),
                layer("save_to_api", "yes"),
                Layer::new(),
                Layer::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::ConfigType { ref key, .. } if key == "save_to_api"));
    }

    #[test]
    fn test_oversized_interval_is_rejected_at_resolve_time() {
        let err = Resolver::new()
            .resolve_layers(
                layer("measure_power_secs", "1e20"),
                Layer::new(),
                Layer::new(),
                Layer::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::ConfigType { ref key, .. } if key == "measure_power_secs"));
    }

    // ==================== Unknown Keys ====================

    #[test]
    fn test_unknown_keys_pass_through() {
        let s = Resolver::new()
            .resolve_layers(
                Layer::new(),
                layer("team", "env-team"),
                Layer::new(),
                layer("team", "global-team"),
            )
            .unwrap();

        assert_eq!(s.get("team"), Some(&Value::from("env-team")));
        assert!(matches!(s.source("team"), Some(ValueSource::EnvVar(_))));
    }

    #[test]
    fn test_unknown_keys_rejected_when_configured() {
        let err = Resolver::new()
            .reject_unknown(true)
            .resolve_layers(
                Layer::new(),
                Layer::new(),
                layer("team", "x"),
                Layer::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnknownOption(ref k) if k == "team"));
    }

    // ==================== Loading ====================

    #[test]
    fn test_load_reads_both_files_and_env() {
        let home = TempDir::new().unwrap();
        let cwd = TempDir::new().unwrap();
        std::fs::write(
            home.path().join(CONFIG_FILE_NAME),
            "[codecarbon]\nproject_name = global\nlog_level = warning\ngpu_ids = 0, 1\n",
        )
        .unwrap();
        std::fs::write(
            cwd.path().join(CONFIG_FILE_NAME),
            "[codecarbon]\nproject_name = local\n",
        )
        .unwrap();

        let sources = ConfigSources::load(
            Some(home.path()),
            cwd.path(),
            [("CODECARBON_LOG_LEVEL", "debug"), ("PATH", "/usr/bin")],
        )
        .unwrap();
        let s = Resolver::new().resolve(&sources).unwrap();

        assert_eq!(s.project_name(), "local");
        assert_eq!(s.log_level(), "debug");
        assert_eq!(s.gpu_ids(), Some(&[0i64, 1][..]));
        assert_eq!(
            s.source("gpu_ids"),
            Some(&ValueSource::GlobalFile(
                home.path().join(CONFIG_FILE_NAME).display().to_string()
            ))
        );
    }

    #[test]
    fn test_load_malformed_file_does_not_fall_back() {
        let home = TempDir::new().unwrap();
        let cwd = TempDir::new().unwrap();
        std::fs::write(
            cwd.path().join(CONFIG_FILE_NAME),
            "project_name = local\n",
        )
        .unwrap();

        let err = ConfigSources::load(
            Some(home.path()),
            cwd.path(),
            std::iter::empty::<(String, String)>(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigFormat { .. }));
    }

    #[test]
    fn test_load_without_home() {
        let cwd = TempDir::new().unwrap();
        let sources =
            ConfigSources::load(None, cwd.path(), std::iter::empty::<(String, String)>())
                .unwrap();
        assert!(sources.global.is_empty());
        assert!(sources.global_path.is_none());
    }

    #[test]
    #[serial_test::serial]
    fn test_from_process_reads_environment() {
        // SAFETY: serialized test; no other thread reads this variable.
        unsafe { std::env::set_var("CODECARBON_EXPERIMENT_ID", "exp-from-process") };

        let sources = ConfigSources::from_process().unwrap();
        assert_eq!(
            sources.env.get("experiment_id"),
            Some(&Value::from("exp-from-process"))
        );

        unsafe { std::env::remove_var("CODECARBON_EXPERIMENT_ID") };
    }

    // ==================== Settings ====================

    #[test]
    fn test_with_override_coerces() {
        let s = Settings::default()
            .with_override("save_to_api", "TRUE")
            .unwrap();
        assert!(s.save_to_api());
        assert_eq!(s.source("save_to_api"), Some(&ValueSource::Explicit));

        assert!(Settings::default().with_override("save_to_api", "nope").is_err());
    }

    #[test]
    fn test_to_json_reports_sources() {
        let s = Resolver::new()
            .resolve_layers(
                layer("project_name", "demo"),
                Layer::new(),
                Layer::new(),
                Layer::new(),
            )
            .unwrap();
        let json = s.to_json();

        assert_eq!(json["project_name"]["value"], "demo");
        assert_eq!(json["project_name"]["source"], "explicit");
        assert_eq!(json["measure_power_secs"]["value"], 15.0);
        assert_eq!(json["measure_power_secs"]["source"], "default");
    }
}
