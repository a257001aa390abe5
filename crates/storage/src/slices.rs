// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/storage/src/slices.rs
use anyhow::{bail, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// One rotated file and the size observed when the set was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceFile {
    pub path: PathBuf,
    pub len: u64,
}

/// Ordered rotated files holding records of one fixed size.
///
/// File sizes are sampled once in [`RecordFileSet::new`]; readers never look
/// past those sizes even if a writer is still appending.
#[derive(Debug, Clone)]
pub struct RecordFileSet {
    files: Vec<SliceFile>,
    record_size: usize,
}

impl RecordFileSet {
    /// Stat every path in rotation order. Files that are gone (aged out) or
    /// unreadable are kept with length 0 so they contribute no records.
    pub fn new<P: AsRef<Path>>(paths: &[P], record_size: usize) -> Result<Self> {
        if record_size == 0 {
            bail!("record size must be greater than zero");
        }

        let files = paths
            .iter()
            .map(|p| {
                let path = p.as_ref().to_path_buf();
                let len = match fs::metadata(&path) {
                    Ok(meta) if meta.is_file() => meta.len(),
                    Ok(_) => {
                        warn!("{:?} is not a regular file, treating it as empty", path);
                        0
                    }
                    Err(e) => {
                        warn!("Skipping rotated file {:?}: {}", path, e);
                        0
                    }
                };
                SliceFile { path, len }
            })
            .collect::<Vec<_>>();

        debug!(
            "Record file set: {} files, {} bytes, record size {}",
            files.len(),
            files.iter().map(|f| f.len).sum::<u64>(),
            record_size
        );
        Ok(Self { files, record_size })
    }

    pub fn files(&self) -> &[SliceFile] {
        &self.files
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.len).sum()
    }

    /// Whole records available across the virtual concatenation.
    pub fn total_records(&self) -> u64 {
        self.total_bytes() / self.record_size as u64
    }

    pub fn is_empty(&self) -> bool {
        self.total_records() == 0
    }
}
