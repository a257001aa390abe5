// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/storage/src/discovery.rs
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Find the rotated slices of one source under `dir` and return them in
/// rotation order (ascending `slice_<n>` suffix).
///
/// `pattern` is a glob relative to `dir`, e.g. `hwts.data.*.slice_*`.
pub fn discover_slices<P: AsRef<Path>>(dir: P, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = dir.as_ref().join(pattern);
    let full = full
        .to_str()
        .with_context(|| format!("Non UTF-8 slice pattern under {:?}", dir.as_ref()))?;

    let mut found = Vec::new();
    for entry in glob::glob(full).with_context(|| format!("Invalid slice pattern '{}'", pattern))? {
        match entry {
            Ok(path) if path.is_file() => found.push(path),
            Ok(_) => {}
            Err(e) => warn!("Unreadable entry while scanning {}: {}", full, e),
        }
    }

    found.sort_by(|a, b| slice_key(a).cmp(&slice_key(b)));
    debug!("Discovered {} slices for pattern {}", found.len(), pattern);
    Ok(found)
}

/// Parse the numeric `slice_<n>` suffix of a rotated file name.
pub fn slice_index(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let (_, suffix) = name.rsplit_once("slice_")?;
    suffix.parse().ok()
}

fn slice_key(path: &Path) -> (String, Option<u64>) {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let stem = match name.rsplit_once("slice_") {
        Some((stem, _)) => stem.to_string(),
        None => name.to_string(),
    };
    (stem, slice_index(path))
}
