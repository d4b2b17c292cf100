//! Parser for the INI-style `.codecarbon.config` file.
//!
//! ```ini
//! ; comments may appear on their own line
//! [codecarbon]
//! project_name = my-project
//! measure_power_secs: 10
//! ```
//!
//! The `[codecarbon]` header must be the first line that is neither blank
//! nor a comment, and it must be the only section. Each key may appear once;
//! keys are case-insensitive.

use std::path::Path;

use crate::config::schema::Layer;
use crate::{Error, Result};

/// File name used for both the global and the local config file.
pub const CONFIG_FILE_NAME: &str = ".codecarbon.config";

/// The only section a config file may contain.
pub const SECTION: &str = "codecarbon";

/// Parse config file text into a raw layer of string values.
///
/// `origin` is only used in error messages.
pub fn parse_config(text: &str, origin: &Path) -> Result<Layer> {
    let mut layer = Layer::new();
    let mut in_section = false;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(header) = section_header(line) {
            if in_section {
                return Err(format_error(
                    origin,
                    line_no,
                    format!("unexpected section [{}]; only [{}] is allowed", header, SECTION),
                ));
            }
            if header != SECTION {
                return Err(format_error(
                    origin,
                    line_no,
                    format!("expected [{}] section, found [{}]", SECTION, header),
                ));
            }
            in_section = true;
            continue;
        }

        if !in_section {
            return Err(format_error(
                origin,
                line_no,
                format!("file must start with a [{}] section header", SECTION),
            ));
        }

        let (key, value) = split_entry(line).ok_or_else(|| {
            format_error(origin, line_no, "expected 'key = value'".to_string())
        })?;
        if layer.get(&key.to_lowercase()).is_some() {
            return Err(format_error(
                origin,
                line_no,
                format!("duplicate key '{}'", key),
            ));
        }
        layer.set(key, value);
    }

    Ok(layer)
}

/// Read and parse a config file. A missing file is an empty layer.
pub fn read_config(path: &Path) -> Result<Layer> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_config(&text, path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Layer::new()),
        Err(e) => Err(Error::Io(e)),
    }
}

fn section_header(line: &str) -> Option<&str> {
    line.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
}

/// Split on the first `=` or `:`, whichever comes first.
fn split_entry(line: &str) -> Option<(&str, &str)> {
    let pos = line.find(['=', ':'])?;
    let key = line[..pos].trim();
    if key.is_empty() {
        return None;
    }
    Some((key, line[pos + 1..].trim()))
}

fn format_error(origin: &Path, line: usize, message: String) -> Error {
    Error::ConfigFormat {
        path: origin.display().to_string(),
        line,
        message,
    }
}
