// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/storage/src/ledger.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::window::RecordWindow;

/// Bookkeeping left behind by a prior run over one source.
///
/// Windows are tail relative: re-running against the same files reproduces
/// the same window, and after leading slices age out the offset moves back
/// by the number of records that disappeared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedWindow {
    pub prior_offset: u64,
    pub persisted_count: u64,
    #[serde(default)]
    pub count: Option<u64>,
}

/// Lookup of already-persisted record counts, keyed by source name.
pub trait PersistedCounts {
    fn persisted(&self, source: &str) -> Option<PersistedWindow>;
}

/// Nothing persisted yet.
impl PersistedCounts for () {
    fn persisted(&self, _source: &str) -> Option<PersistedWindow> {
        None
    }
}

impl PersistedCounts for BTreeMap<String, PersistedWindow> {
    fn persisted(&self, source: &str) -> Option<PersistedWindow> {
        self.get(source).copied()
    }
}

/// JSON file backed ledger.
#[derive(Debug, Clone)]
pub struct JsonLedger {
    path: PathBuf,
    entries: BTreeMap<String, PersistedWindow>,
}

impl JsonLedger {
    /// Load the ledger at `path`; a missing file is an empty ledger.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read ledger {:?}", path))?;
            serde_json::from_str(&text).with_context(|| format!("Corrupt ledger {:?}", path))?
        } else {
            debug!("No ledger at {:?}, starting empty", path);
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    /// Remember the window just processed for `source`, together with the
    /// total observed on disk at that time.
    pub fn record(&mut self, source: &str, window: RecordWindow, total_available: u64) {
        self.entries.insert(
            source.to_string(),
            PersistedWindow {
                prior_offset: window.offset,
                persisted_count: total_available,
                count: Some(window.count),
            },
        );
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, text).with_context(|| format!("Failed to write ledger {:?}", self.path))?;
        info!("Ledger saved with {} sources to {:?}", self.entries.len(), self.path);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PersistedCounts for JsonLedger {
    fn persisted(&self, source: &str) -> Option<PersistedWindow> {
        self.entries.get(source).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slices::RecordFileSet;
    use crate::window::{compute_window, WindowRequest};
    use tempfile::tempdir;

    #[test]
    fn ledger_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state/ledger.json");

        let mut ledger = JsonLedger::open(&path).unwrap();
        assert!(ledger.is_empty());
        ledger.record("hwts", RecordWindow::new(3, 3), 6);
        ledger.save().unwrap();

        let reopened = JsonLedger::open(&path).unwrap();
        assert_eq!(
            reopened.persisted("hwts"),
            Some(PersistedWindow { prior_offset: 3, persisted_count: 6, count: Some(3) })
        );
        assert_eq!(reopened.persisted("stars"), None);
    }

    #[test]
    fn recorded_window_is_reproduced_and_follows_aging() {
        let dir = tempdir().unwrap();
        let slices: Vec<_> = (0..3)
            .map(|i| {
                let p = dir.path().join(format!("stars.data.0.slice_{}", i));
                fs::write(&p, vec![0u8; 4 * 16]).unwrap();
                p
            })
            .collect();
        let set = RecordFileSet::new(&slices, 16).unwrap();

        let mut ledger = JsonLedger::open(dir.path().join("ledger.json")).unwrap();
        ledger.record("stars", RecordWindow::new(6, 4), set.total_records());

        let req = WindowRequest::from_persisted(&ledger.persisted("stars").unwrap());
        assert_eq!(compute_window(&set, Some(&req)), RecordWindow::new(6, 4));

        // Oldest slice ages out: same records now start 4 earlier.
        fs::remove_file(&slices[0]).unwrap();
        let aged = RecordFileSet::new(&slices, 16).unwrap();
        assert_eq!(compute_window(&aged, Some(&req)), RecordWindow::new(2, 4));
    }
}
