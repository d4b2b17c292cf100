//! Common test utilities for codecarbon integration tests.
//!
//! Provides `TestEnv` for isolated test environments that never read the
//! user's `~/.codecarbon.config` or `CODECARBON_*` variables.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::Path;
pub use tempfile::TempDir;

/// A test environment with isolated config locations.
///
/// Each `TestEnv` creates two temporary directories:
/// - `home_dir`: Acts as `$HOME` (global config file)
/// - `work_dir`: The working directory (local config file, CSV output)
///
/// The `codecarbon()` method returns a `Command` with a cleared environment,
/// making tests parallel-safe.
pub struct TestEnv {
    pub home_dir: TempDir,
    pub work_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment with isolated directories.
    pub fn new() -> Self {
        Self {
            home_dir: TempDir::new().unwrap(),
            work_dir: TempDir::new().unwrap(),
        }
    }

    /// Get a Command for the codecarbon binary with isolated config.
    pub fn codecarbon(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_codecarbon"));
        cmd.env_clear();
        cmd.current_dir(self.work_dir.path());
        cmd.env("HOME", self.home_dir.path());
        cmd
    }

    /// Write `~/.codecarbon.config`.
    pub fn write_global_config(&self, body: &str) {
        write_config(self.home_dir.path(), body);
    }

    /// Write `./.codecarbon.config`.
    pub fn write_local_config(&self, body: &str) {
        write_config(self.work_dir.path(), body);
    }

    pub fn work_path(&self) -> &Path {
        self.work_dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

fn write_config(dir: &Path, body: &str) {
    fs::write(dir.join(".codecarbon.config"), body).expect("Failed to write config file");
}

/// Parse a command's stdout as JSON.
pub fn parse_json(stdout: &[u8]) -> serde_json::Value {
    serde_json::from_slice(stdout).expect("stdout is not valid JSON")
}
