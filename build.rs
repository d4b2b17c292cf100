//! Stamps the binary with where and when it was built, for `--version`.
//!
//! Exported at compile time:
//! - `CODECARBON_BUILD_TIMESTAMP`: UTC build time. `SOURCE_DATE_EPOCH` pins it
//!   for reproducible builds.
//! - `CODECARBON_GIT_COMMIT`: short commit hash, `+dirty` when the work tree
//!   has local changes. `CODECARBON_COMMIT_OVERRIDE` wins (source tarballs
//!   have no `.git`); `unknown` otherwise.

use std::process::Command;

use chrono::{DateTime, Utc};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-env-changed=CODECARBON_COMMIT_OVERRIDE");

    println!(
        "cargo:rustc-env=CODECARBON_BUILD_TIMESTAMP={}",
        build_time().format(TIMESTAMP_FORMAT)
    );
    println!("cargo:rustc-env=CODECARBON_GIT_COMMIT={}", commit_label());
}

fn build_time() -> DateTime<Utc> {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|secs| secs.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now)
}

fn commit_label() -> String {
    if let Ok(commit) = std::env::var("CODECARBON_COMMIT_OVERRIDE") {
        if !commit.trim().is_empty() {
            return commit.trim().to_string();
        }
    }
    match git(&["rev-parse", "--short", "HEAD"]) {
        Some(hash) if is_dirty() => format!("{}+dirty", hash),
        Some(hash) => hash,
        None => "unknown".to_string(),
    }
}

fn is_dirty() -> bool {
    git(&["status", "--porcelain", "--untracked-files=no"]).is_some_and(|out| !out.is_empty())
}

/// Trimmed stdout of a successful git invocation.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}
