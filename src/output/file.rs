//! CSV file sink.
//!
//! Each record is appended as one row. A header is written when the file is
//! new or empty. If an existing file carries a different header, it is moved
//! aside to `<file>.bak` and a fresh file is started.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::{EmissionsData, EmissionsSink};
use crate::Result;

/// Column order of the CSV file.
pub const CSV_COLUMNS: &[&str] = &[
    "timestamp",
    "project_name",
    "run_id",
    "experiment_id",
    "duration",
    "emissions",
    "emissions_rate",
    "cpu_power",
    "energy_consumed",
    "country_iso_code",
    "tracking_mode",
    "gpu_ids",
    "codecarbon_version",
];

/// Appends emissions records to a CSV file.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make sure the file exists with our header, backing up a file that
    /// has a different one.
    fn prepare(&self) -> Result<bool> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let header = CSV_COLUMNS.join(",");
        match fs::File::open(&self.path) {
            Ok(file) => {
                let mut first = String::new();
                BufReader::new(file).read_line(&mut first)?;
                let first = first.trim_end();
                if first.is_empty() {
                    return Ok(true);
                }
                if first != header {
                    let backup = backup_path(&self.path);
                    tracing::warn!(
                        path = %self.path.display(),
                        backup = %backup.display(),
                        "CSV header changed, backing up existing file"
                    );
                    fs::rename(&self.path, &backup)?;
                    return Ok(true);
                }
                Ok(false)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

impl EmissionsSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn write(&mut self, data: &EmissionsData) -> Result<()> {
        let needs_header = self.prepare()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if needs_header {
            writeln!(file, "{}", CSV_COLUMNS.join(","))?;
        }
        writeln!(file, "{}", csv_row(data))?;

        tracing::debug!(path = %self.path.display(), "Appended emissions row");
        Ok(())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

/// Format a record as one CSV line, in [`CSV_COLUMNS`] order.
pub(crate) fn csv_row(data: &EmissionsData) -> String {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    let gpu_ids = data
        .gpu_ids
        .as_ref()
        .map(|ids| {
            ids.iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();

    let fields = [
        data.timestamp.to_rfc3339(),
        data.project_name.clone(),
        data.run_id.clone(),
        opt(&data.experiment_id),
        data.duration.to_string(),
        data.emissions.to_string(),
        data.emissions_rate.to_string(),
        data.cpu_power.to_string(),
        data.energy_consumed.to_string(),
        opt(&data.country_iso_code),
        data.tracking_mode.to_string(),
        gpu_ids,
        data.codecarbon_version.clone(),
    ];

    fields
        .iter()
        .map(|f| escape(f))
        .collect::<Vec<_>>()
        .join(",")
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::output::RunInfo;
    use crate::power::{ConstantPower, EnergyMeter};
    use tempfile::TempDir;

    fn record() -> EmissionsData {
        let meter = EnergyMeter::new(Box::new(ConstantPower::new(10.0)));
        let mut info = RunInfo::from_settings(&Settings::default(), "run-42");
        info.gpu_ids = Some(vec![0, 1]);
        EmissionsData::from_meter(&info, &meter)
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("0,1"), "\"0,1\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_row_has_one_field_per_column() {
        let row = csv_row(&record());
        assert!(row.contains("\"0,1\""));
        assert!(row.contains("run-42"));
        // gpu_ids is quoted, so strip it before counting separators
        let unquoted = row.replace("\"0,1\"", "x");
        assert_eq!(unquoted.split(',').count(), CSV_COLUMNS.len());
    }

    #[test]
    fn test_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("emissions.csv");
        let mut sink = FileSink::new(&path);

        sink.write(&record()).unwrap();
        sink.write(&record()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_COLUMNS.join(","));
        assert!(lines[1].contains("run-42"));
    }

    #[test]
    fn test_empty_existing_file_gets_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("emissions.csv");
        fs::write(&path, "").unwrap();

        FileSink::new(&path).write(&record()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("timestamp,"));
    }

    #[test]
    fn test_foreign_header_is_backed_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("emissions.csv");
        fs::write(&path, "a,b,c\n1,2,3\n").unwrap();

        FileSink::new(&path).write(&record()).unwrap();

        let backup = dir.path().join("emissions.csv.bak");
        assert_eq!(fs::read_to_string(backup).unwrap(), "a,b,c\n1,2,3\n");
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
