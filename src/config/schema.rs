//! Option schema for codecarbon settings.
//!
//! This module provides:
//! - The table of recognized options with their declared types and defaults
//! - The typed [`Value`] representation shared by every layer
//! - Coercion of raw (string) values into declared types
//! - Range validation for options that need it

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::{Error, Result};

/// Declared type of a configuration option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    Int,
    Float,
    Str,
    /// Comma-separated list of integers, e.g. `"0, 1"`.
    IntList,
}

impl OptionKind {
    /// Human-readable type name used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionKind::Bool => "boolean (true/false)",
            OptionKind::Int => "integer",
            OptionKind::Float => "number",
            OptionKind::Str => "string",
            OptionKind::IntList => "comma-separated integers",
        }
    }
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A configuration value, either raw (`Str` from a file or the environment)
/// or already typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    IntList(Vec<i64>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Floats and integers both read as `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int_list(&self) -> Option<&[i64]> {
        match self {
            Value::IntList(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::IntList(v) => {
                let parts: Vec<String> = v.iter().map(|i| i.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::IntList(v)
    }
}

/// One source's partial key → value mapping, before coercion.
///
/// Keys are normalized to lowercase on insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layer {
    values: BTreeMap<String, Value>,
}

impl Layer {
    /// Create an empty layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, builder style.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a value, replacing any previous one for the same key.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values
            .insert(key.trim().to_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// How the tracker attributes power: the whole machine or this process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    #[default]
    Machine,
    Process,
}

impl TrackingMode {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "machine" => Some(TrackingMode::Machine),
            "process" => Some(TrackingMode::Process),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingMode::Machine => "machine",
            TrackingMode::Process => "process",
        }
    }
}

impl std::fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recognized option: its key, declared type and built-in default.
///
/// Defaults are written as text and go through the same coercion as file
/// values.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub key: &'static str,
    pub kind: OptionKind,
    pub default: Option<&'static str>,
    check: Option<fn(&Value) -> std::result::Result<(), &'static str>>,
}

impl OptionSpec {
    const fn new(key: &'static str, kind: OptionKind, default: Option<&'static str>) -> Self {
        Self {
            key,
            kind,
            default,
            check: None,
        }
    }

    const fn checked(
        mut self,
        check: fn(&Value) -> std::result::Result<(), &'static str>,
    ) -> Self {
        self.check = Some(check);
        self
    }

    /// Coerce a raw or typed value into this option's declared type and
    /// validate its range.
    pub fn coerce(&self, value: &Value) -> Result<Value> {
        let typed = coerce(self.kind, value).ok_or_else(|| self.type_error(value, None))?;
        if let Some(check) = self.check {
            check(&typed).map_err(|reason| self.type_error(value, Some(reason)))?;
        }
        Ok(typed)
    }

    fn type_error(&self, value: &Value, reason: Option<&str>) -> Error {
        let expected = match reason {
            Some(reason) => format!("{}, {}", self.kind, reason),
            None => self.kind.to_string(),
        };
        Error::ConfigType {
            key: self.key.to_string(),
            value: value.to_string(),
            expected,
        }
    }
}

/// A sampling interval: above zero and small enough to be a [`Duration`].
fn interval_secs(value: &Value) -> std::result::Result<(), &'static str> {
    match value.as_float() {
        Some(v) if v <= 0.0 => Err("must be greater than 0"),
        Some(v) if Duration::try_from_secs_f64(v).is_ok() => Ok(()),
        _ => Err("too large for a time interval"),
    }
}

fn at_least_one(value: &Value) -> std::result::Result<(), &'static str> {
    match value.as_int() {
        Some(v) if v >= 1 => Ok(()),
        _ => Err("must be at least 1"),
    }
}

fn non_negative(value: &Value) -> std::result::Result<(), &'static str> {
    match value.as_float() {
        Some(v) if v >= 0.0 => Ok(()),
        _ => Err("must not be negative"),
    }
}

fn non_negative_ids(value: &Value) -> std::result::Result<(), &'static str> {
    match value.as_int_list() {
        Some(ids) if ids.iter().all(|id| *id >= 0) => Ok(()),
        _ => Err("ids must not be negative"),
    }
}

fn tracking_mode(value: &Value) -> std::result::Result<(), &'static str> {
    match value.as_str().and_then(TrackingMode::parse) {
        Some(_) => Ok(()),
        None => Err("must be 'machine' or 'process'"),
    }
}

const OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("project_name", OptionKind::Str, Some("codecarbon")),
    OptionSpec::new("experiment_id", OptionKind::Str, None),
    OptionSpec::new("measure_power_secs", OptionKind::Float, Some("15")).checked(interval_secs),
    OptionSpec::new("api_call_interval", OptionKind::Int, Some("8")).checked(at_least_one),
    OptionSpec::new("output_dir", OptionKind::Str, Some(".")),
    OptionSpec::new("output_file", OptionKind::Str, Some("emissions.csv")),
    OptionSpec::new("save_to_file", OptionKind::Bool, Some("true")),
    OptionSpec::new("save_to_api", OptionKind::Bool, Some("false")),
    OptionSpec::new("save_to_logger", OptionKind::Bool, Some("false")),
    OptionSpec::new(
        "api_endpoint",
        OptionKind::Str,
        Some("https://api.codecarbon.io"),
    ),
    OptionSpec::new("api_key", OptionKind::Str, None),
    OptionSpec::new("emissions_endpoint", OptionKind::Str, None),
    OptionSpec::new("co2_signal_api_token", OptionKind::Str, None),
    OptionSpec::new("log_level", OptionKind::Str, Some("info")),
    OptionSpec::new("tracking_mode", OptionKind::Str, Some("machine")).checked(tracking_mode),
    OptionSpec::new("gpu_ids", OptionKind::IntList, None).checked(non_negative_ids),
    OptionSpec::new("country_iso_code", OptionKind::Str, None),
    OptionSpec::new("default_cpu_power", OptionKind::Float, Some("85")).checked(non_negative),
    OptionSpec::new("carbon_intensity", OptionKind::Float, Some("475")).checked(non_negative),
];

/// All recognized options, in display order.
pub fn options() -> &'static [OptionSpec] {
    OPTIONS
}

/// Find the spec for a recognized option key.
pub fn lookup_option(key: &str) -> Option<&'static OptionSpec> {
    OPTIONS.iter().find(|spec| spec.key == key)
}

/// Coerce `value` into `kind`, or `None` if it cannot be represented.
fn coerce(kind: OptionKind, value: &Value) -> Option<Value> {
    match (kind, value) {
        (OptionKind::Bool, Value::Bool(b)) => Some(Value::Bool(*b)),
        (OptionKind::Bool, Value::Str(s)) => parse_bool(s).map(Value::Bool),

        (OptionKind::Int, Value::Int(i)) => Some(Value::Int(*i)),
        (OptionKind::Int, Value::Str(s)) => s.trim().parse().ok().map(Value::Int),

        (OptionKind::Float, Value::Float(f)) if f.is_finite() => Some(Value::Float(*f)),
        (OptionKind::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
        (OptionKind::Float, Value::Str(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::Float),

        (OptionKind::Str, Value::Str(s)) => Some(Value::Str(s.clone())),

        (OptionKind::IntList, Value::IntList(v)) => Some(Value::IntList(v.clone())),
        (OptionKind::IntList, Value::Int(i)) => Some(Value::IntList(vec![*i])),
        (OptionKind::IntList, Value::Str(s)) => parse_int_list(s).map(Value::IntList),

        _ => None,
    }
}

/// Parse `true`/`false`, case-insensitive. Nothing else is a boolean.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Parse `"0, 1"` into `[0, 1]`. An empty string is an empty list; an empty
/// element between commas is an error.
pub fn parse_int_list(s: &str) -> Option<Vec<i64>> {
    let s = s.trim();
    if s.is_empty() {
        return Some(Vec::new());
    }
    s.split(',').map(|part| part.trim().parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(key: &str) -> &'static OptionSpec {
        lookup_option(key).unwrap()
    }

    // ==================== Boolean Coercion ====================

    #[test]
    fn test_bool_variants() {
        for raw in ["true", "True", "TRUE", " true "] {
            assert_eq!(
                spec("save_to_api").coerce(&Value::from(raw)).unwrap(),
                Value::Bool(true)
            );
        }
        for raw in ["false", "False", "FALSE"] {
            assert_eq!(
                spec("save_to_api").coerce(&Value::from(raw)).unwrap(),
                Value::Bool(false)
            );
        }
    }

    #[test]
    fn test_bool_rejects_other_tokens() {
        for raw in ["yes", "1", "on", "", "truthy"] {
            let err = spec("save_to_file").coerce(&Value::from(raw)).unwrap_err();
            assert!(
                matches!(err, Error::ConfigType { ref key, .. } if key == "save_to_file"),
                "{raw:?} should not coerce: {err}"
            );
        }
    }

    // ==================== Integer Lists ====================

    #[test]
    fn test_gpu_ids_parsing() {
        assert_eq!(parse_int_list("0, 1"), Some(vec![0, 1]));
        assert_eq!(parse_int_list("2,3,4"), Some(vec![2, 3, 4]));
        assert_eq!(parse_int_list("  5 ,6  "), Some(vec![5, 6]));
        assert_eq!(parse_int_list(""), Some(vec![]));
        assert_eq!(parse_int_list("0,,1"), None);
        assert_eq!(parse_int_list("0, a"), None);
    }

    #[test]
    fn test_gpu_ids_keeps_order() {
        let value = spec("gpu_ids").coerce(&Value::from("3, 1, 2")).unwrap();
        assert_eq!(value, Value::IntList(vec![3, 1, 2]));
    }

    #[test]
    fn test_gpu_ids_single_int() {
        let value = spec("gpu_ids").coerce(&Value::Int(4)).unwrap();
        assert_eq!(value, Value::IntList(vec![4]));
    }

    #[test]
    fn test_gpu_ids_rejects_negative() {
        assert!(spec("gpu_ids").coerce(&Value::from("0, -1")).is_err());
    }

    // ==================== Numbers ====================

    #[test]
    fn test_float_from_string_and_int() {
        let s = spec("measure_power_secs");
        assert_eq!(s.coerce(&Value::from("2.5")).unwrap(), Value::Float(2.5));
        assert_eq!(s.coerce(&Value::Int(10)).unwrap(), Value::Float(10.0));
        assert!(s.coerce(&Value::from("fast")).is_err());
        assert!(s.coerce(&Value::from("NaN")).is_err());
    }

    #[test]
    fn test_measure_power_secs_must_be_positive() {
        let err = spec("measure_power_secs")
            .coerce(&Value::from("0"))
            .unwrap_err();
        assert!(err.to_string().contains("greater than 0"));
    }

    #[test]
    fn test_measure_power_secs_must_fit_a_duration() {
        let s = spec("measure_power_secs");

        let err = s.coerce(&Value::from("1e20")).unwrap_err();
        assert!(matches!(err, Error::ConfigType { ref key, .. } if key == "measure_power_secs"));
        assert!(err.to_string().contains("too large"));
        assert!(s.coerce(&Value::Float(f64::INFINITY)).is_err());
        assert_eq!(s.coerce(&Value::from("86400")).unwrap(), Value::Float(86400.0));
    }

    #[test]
    fn test_int_rejects_decimal() {
        let s = spec("api_call_interval");
        assert_eq!(s.coerce(&Value::from("4")).unwrap(), Value::Int(4));
        assert!(s.coerce(&Value::from("4.5")).is_err());
        assert!(s.coerce(&Value::from("0")).is_err());
    }

    #[test]
    fn test_string_rejects_typed_value() {
        assert!(spec("project_name").coerce(&Value::Bool(true)).is_err());
    }

    #[test]
    fn test_tracking_mode_validation() {
        let s = spec("tracking_mode");
        assert!(s.coerce(&Value::from("process")).is_ok());
        assert!(s.coerce(&Value::from("Machine")).is_ok());
        assert!(s.coerce(&Value::from("cluster")).is_err());
    }

    // ==================== Schema ====================

    #[test]
    fn test_defaults_coerce_cleanly() {
        for spec in options() {
            if let Some(default) = spec.default {
                spec.coerce(&Value::from(default))
                    .unwrap_or_else(|e| panic!("default for {} is invalid: {}", spec.key, e));
            }
        }
    }

    #[test]
    fn test_layer_normalizes_keys() {
        let layer = Layer::new().with(" Project_Name ", "demo");
        assert_eq!(layer.get("project_name"), Some(&Value::from("demo")));
        assert_eq!(layer.len(), 1);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::IntList(vec![0, 1]).to_string(), "0,1");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
    }
}
