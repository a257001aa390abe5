// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/storage/src/window.rs
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ledger::PersistedWindow;
use crate::slices::RecordFileSet;

/// Contiguous run of records, counted in records (not bytes), over the
/// virtual concatenation of a [`RecordFileSet`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordWindow {
    pub offset: u64,
    pub count: u64,
}

impl RecordWindow {
    pub fn new(offset: u64, count: u64) -> Self {
        Self { offset, count }
    }

    /// Whole available range.
    pub fn full(total_available: u64) -> Self {
        Self { offset: 0, count: total_available }
    }

    /// Exclusive end, in records.
    pub fn end(&self) -> u64 {
        self.offset + self.count
    }

    /// Clamp a logically requested window onto what is physically present.
    ///
    /// A negative offset means the leading records aged out: the offset is
    /// clamped to 0 and the count shrinks by the deficit. `count = None`
    /// requests everything from the offset to the tail.
    pub fn clamp(total_available: u64, raw_offset: i64, count: Option<u64>) -> Self {
        let (offset, deficit) = if raw_offset < 0 {
            (0, raw_offset.unsigned_abs())
        } else {
            ((raw_offset as u64).min(total_available), 0)
        };

        let wanted = count.unwrap_or(total_available - offset + deficit);
        let wanted = wanted.saturating_sub(deficit);
        let count = wanted.min(total_available - offset);

        if deficit > 0 {
            warn!(
                "Requested window starts {} records before the oldest available record; clamped to ({}, {})",
                deficit, offset, count
            );
        }
        Self { offset, count }
    }
}

/// What the caller asks for: the persisted bookkeeping of a prior run plus
/// an optional record count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowRequest {
    pub persisted_count: u64,
    pub prior_offset: u64,
    pub count: Option<u64>,
}

impl WindowRequest {
    pub fn from_persisted(persisted: &PersistedWindow) -> Self {
        Self {
            persisted_count: persisted.persisted_count,
            prior_offset: persisted.prior_offset,
            count: persisted.count,
        }
    }
}

/// Reconcile a request against the files actually on disk.
///
/// `offset = total_available - persisted_count + prior_offset`, clamped by
/// [`RecordWindow::clamp`]. With no request the whole set is selected.
pub fn compute_window(files: &RecordFileSet, request: Option<&WindowRequest>) -> RecordWindow {
    let total = files.total_records();
    let window = match request {
        None => RecordWindow::full(total),
        Some(req) => {
            let raw = total as i64 - req.persisted_count as i64 + req.prior_offset as i64;
            RecordWindow::clamp(total, raw, req.count)
        }
    };
    debug!("Record window over {} available records: {:?}", total, window);
    window
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn file_set(sizes: &[usize], record_size: usize) -> (tempfile::TempDir, RecordFileSet) {
        let dir = tempdir().unwrap();
        let paths: Vec<_> = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| {
                let p = dir.path().join(format!("task_track.data.0.slice_{}", i));
                fs::write(&p, vec![0u8; *size]).unwrap();
                p
            })
            .collect();
        let set = RecordFileSet::new(&paths, record_size).unwrap();
        (dir, set)
    }

    #[test]
    fn reconciles_against_prior_run() {
        let (_dir, set) = file_set(&[100, 200], 50);
        let req = WindowRequest { persisted_count: 4, prior_offset: 1, count: None };
        let window = compute_window(&set, Some(&req));
        assert_eq!(set.total_records(), 6);
        assert_eq!(window, RecordWindow::new(3, 3));

        let req = WindowRequest { count: Some(2), ..req };
        assert_eq!(compute_window(&set, Some(&req)), RecordWindow::new(3, 2));
    }

    #[test]
    fn negative_offset_is_clamped_and_count_reduced() {
        // 6 available, 10 persisted with prior offset 1: raw offset -3.
        let (_dir, set) = file_set(&[100, 200], 50);
        let req = WindowRequest { persisted_count: 10, prior_offset: 1, count: Some(5) };
        assert_eq!(compute_window(&set, Some(&req)), RecordWindow::new(0, 2));
    }

    #[test]
    fn deficit_larger_than_count_yields_empty_window() {
        let window = RecordWindow::clamp(6, -8, Some(5));
        assert_eq!(window, RecordWindow::new(0, 0));
    }

    #[test]
    fn window_never_exceeds_available() {
        for total in [0u64, 1, 6, 17] {
            for raw in -20i64..20 {
                for count in [None, Some(0), Some(3), Some(100)] {
                    let w = RecordWindow::clamp(total, raw, count);
                    assert!(w.end() <= total, "{:?} over {}", w, total);
                }
            }
        }
    }

    #[test]
    fn repeated_computation_is_stable() {
        let (_dir, set) = file_set(&[64, 64, 64], 16);
        let req = WindowRequest { persisted_count: 7, prior_offset: 2, count: Some(4) };
        assert_eq!(compute_window(&set, Some(&req)), compute_window(&set, Some(&req)));
    }

    #[test]
    fn no_request_selects_everything() {
        let (_dir, set) = file_set(&[64, 32], 16);
        assert_eq!(compute_window(&set, None), RecordWindow::full(6));
    }
}
