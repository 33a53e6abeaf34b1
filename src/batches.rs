//! Batch versioning and rotation hand-off.
//!
//! Committed batches are represented by marker files in a single directory,
//! one per batch, named `batch_<n>` with an optional extension (the archive
//! tool writes `batch_003.dvc`). The controller only ever reads those markers;
//! sealing staging into a batch is the external rotation workflow's job. Its
//! sole input from us is the flag file written by `signal_rotation`.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::debug;
use walkdir::WalkDir;

pub const MARKER_PREFIX: &str = "batch_";

/// Integer identity of a committed batch. Displays as `batch_###`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchVersion(pub u64);

impl BatchVersion {
    pub const FIRST: BatchVersion = BatchVersion(1);

    pub fn name(self) -> String {
        self.to_string()
    }

    /// The version after this one, or `None` once the counter is exhausted.
    pub fn next(self) -> Option<BatchVersion> {
        self.0.checked_add(1).map(BatchVersion)
    }

    /// Parses a marker file name (`batch_003`, `batch_3.dvc`). Returns
    /// `Ok(None)` for anything that does not carry an integer after the
    /// prefix, and an error for an integer too large to represent.
    pub fn from_marker(file_name: &str) -> Result<Option<BatchVersion>> {
        let stem = file_name.split_once('.').map_or(file_name, |(stem, _)| stem);
        let Some(digits) = stem.strip_prefix(MARKER_PREFIX) else {
            return Ok(None);
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(None);
        }
        let number = digits
            .parse::<u64>()
            .with_context(|| format!("batch marker {file_name} is out of range"))?;
        Ok(Some(BatchVersion(number)))
    }
}

/// Version following `latest`, starting at `FIRST` when nothing is committed.
pub fn version_after(latest: Option<BatchVersion>) -> Result<BatchVersion> {
    match latest {
        None => Ok(BatchVersion::FIRST),
        Some(version) => version
            .next()
            .ok_or_else(|| anyhow!("batch counter exhausted after {version}")),
    }
}

impl fmt::Display for BatchVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{MARKER_PREFIX}{:03}", self.0)
    }
}

/// Highest committed version in `dir`, if any marker parses.
pub fn latest_batch(dir: &Path) -> Result<Option<BatchVersion>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut latest = None;
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        match BatchVersion::from_marker(&name)
            .with_context(|| format!("scanning {}", dir.display()))?
        {
            Some(version) => latest = latest.max(Some(version)),
            None => debug!(marker = %name, "ignoring unparseable batch marker"),
        }
    }
    Ok(latest)
}

/// Creates `dir` if needed and returns `max(existing) + 1`, or `1` when no
/// marker parses.
pub fn next_batch_number(dir: &Path) -> Result<BatchVersion> {
    fs::create_dir_all(dir).with_context(|| format!("creating batches directory {}", dir.display()))?;
    version_after(latest_batch(dir)?)
}

/// Data rows in the staging metadata file: line count minus the header.
/// A missing file counts as zero. Lines are not validated as CSV.
pub fn count_staged_samples(metadata_path: &Path) -> Result<u64> {
    if !metadata_path.exists() {
        return Ok(0);
    }
    let file = File::open(metadata_path)
        .with_context(|| format!("opening {}", metadata_path.display()))?;

    let mut lines: u64 = 0;
    for line in BufReader::new(file).split(b'\n') {
        line.with_context(|| format!("reading {}", metadata_path.display()))?;
        lines += 1;
    }
    Ok(lines.saturating_sub(1))
}

/// Writes `batch_name` as the entire content of the flag file.
pub fn signal_rotation(flag_path: &Path, batch_name: &str) -> Result<()> {
    if let Some(parent) = flag_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(flag_path, batch_name)
        .with_context(|| format!("writing rotation flag {}", flag_path.display()))?;
    Ok(())
}

/// Content of a pending rotation flag, if one is present.
pub fn pending_rotation(flag_path: &Path) -> Result<Option<String>> {
    if !flag_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(flag_path)
        .with_context(|| format!("reading rotation flag {}", flag_path.display()))?;
    Ok(Some(content.trim().to_owned()))
}
