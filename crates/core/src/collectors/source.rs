// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/collectors/source.rs
//
// One rotated file set per (source, device), windowed and decoded.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use tasktrace_formats::{RecordDecoder, Side, SourceKind, TypedEvent};
use tasktrace_storage::{
    compute_window, discover_slices, FileCalculator, FileReverseCalculator, PersistedCounts,
    RecordFileSet, RecordWindow, WindowRequest,
};

use crate::context::TailAnchor;

/// Decoded content of one source for one device.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    pub source: SourceKind,
    pub device_id: u32,
    pub files: usize,
    pub total_available: u64,
    pub window: RecordWindow,
    pub tail_discarded: u64,
    pub rejected: u64,
    pub events: Vec<TypedEvent>,
}

impl SourceSnapshot {
    fn empty(source: SourceKind, device_id: u32) -> Self {
        Self {
            source,
            device_id,
            files: 0,
            total_available: 0,
            window: RecordWindow::default(),
            tail_discarded: 0,
            rejected: 0,
            events: Vec::new(),
        }
    }

    /// Ledger key of this source on this device.
    pub fn ledger_key(&self) -> String {
        ledger_key(self.source, self.device_id)
    }
}

/// Host sources are shared by every device; device sources are per device.
pub fn ledger_key(source: SourceKind, device_id: u32) -> String {
    match source.side() {
        Side::Host => format!("host/{}", source.name()),
        Side::Device => format!("device_{}/{}", device_id, source.name()),
    }
}

/// Directory holding the raw slices of `side` for `device_id` under a
/// profiling root: `<root>/host/data` or `<root>/device_<id>/data`.
pub fn data_dir(root: &Path, side: Side, device_id: u32) -> PathBuf {
    match side {
        Side::Host => root.join("host").join("data"),
        Side::Device => root.join(format!("device_{}", device_id)).join("data"),
    }
}

type SnapshotKey = (u32, Option<TailAnchor>);

/// A RecordWindower-bounded file set plus its decoder.
///
/// Snapshots are decoded once per (device, tail anchor) and shared by every
/// iteration that asks for them.
pub struct RecordSource {
    root: PathBuf,
    pattern: String,
    decoder: Arc<dyn RecordDecoder>,
    persisted: Arc<dyn PersistedCounts + Send + Sync>,
    cache: Mutex<HashMap<SnapshotKey, Arc<SourceSnapshot>>>,
}

impl std::fmt::Debug for RecordSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSource")
            .field("source", &self.decoder.source())
            .field("root", &self.root)
            .field("pattern", &self.pattern)
            .finish()
    }
}

impl RecordSource {
    pub fn new<P: AsRef<Path>>(
        root: P,
        pattern: impl Into<String>,
        decoder: Arc<dyn RecordDecoder>,
        persisted: Arc<dyn PersistedCounts + Send + Sync>,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            pattern: pattern.into(),
            decoder,
            persisted,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.decoder.source()
    }

    pub fn data_dir(&self, device_id: u32) -> PathBuf {
        data_dir(&self.root, self.kind().side(), device_id)
    }

    /// Window, tail-align, read and decode the slices for `device_id`.
    ///
    /// Host sources ignore both the device id and the tail anchor: there is
    /// one host file set and it is decoded once.
    pub fn snapshot(&self, device_id: u32, tail_anchor: Option<TailAnchor>) -> Result<Arc<SourceSnapshot>> {
        let key = match self.kind().side() {
            Side::Host => (0, None),
            Side::Device => (device_id, tail_anchor),
        };
        if let Some(hit) = self.lock_cache().get(&key) {
            return Ok(Arc::clone(hit));
        }
        let snapshot = Arc::new(self.load(key.0, key.1)?);
        self.lock_cache().insert(key, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Every snapshot decoded so far, in device order.
    pub fn snapshots(&self) -> Vec<Arc<SourceSnapshot>> {
        let mut all: Vec<_> = self.lock_cache().values().cloned().collect();
        all.sort_by_key(|s| s.device_id);
        all
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<SnapshotKey, Arc<SourceSnapshot>>> {
        // A panic while holding the lock leaves the map itself intact.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(&self, device_id: u32, tail_anchor: Option<TailAnchor>) -> Result<SourceSnapshot> {
        let kind = self.kind();
        let dir = self.data_dir(device_id);
        let slices = discover_slices(&dir, &self.pattern)
            .with_context(|| format!("Failed to list {} slices in {:?}", kind, dir))?;
        if slices.is_empty() {
            debug!("No {} data for device {} in {:?}", kind, device_id, dir);
            return Ok(SourceSnapshot::empty(kind, device_id));
        }

        let files = RecordFileSet::new(&slices, self.decoder.record_size())?;
        let request = self
            .persisted
            .persisted(&ledger_key(kind, device_id))
            .map(|p| WindowRequest::from_persisted(&p));
        let mut window = compute_window(&files, request.as_ref());

        let mut tail_discarded = 0;
        if let Some(anchor) = tail_anchor {
            let decoder = &self.decoder;
            let scan = FileReverseCalculator::new(&files).scan_window(window, |raw| {
                decoder
                    .decode(raw)
                    .is_some_and(|ev| ev.stream_task() == (anchor.stream_id, anchor.task_id))
            })?;
            if scan.is_found {
                tail_discarded = scan.discard_count;
                window.count -= scan.discard_count;
            } else {
                warn!(
                    "{} device {}: tail anchor stream {} task {} not found, some records may belong to the next collection",
                    kind, device_id, anchor.stream_id, anchor.task_id
                );
            }
        }

        let batch = FileCalculator::new(&files).read(window)?;
        let mut events = Vec::with_capacity(batch.len());
        let mut rejected = 0u64;
        for raw in batch.records() {
            match self.decoder.decode(raw) {
                Some(ev) => events.push(ev),
                None => rejected += 1,
            }
        }
        if rejected > 0 {
            warn!("{} device {}: {} records failed sanity checks", kind, device_id, rejected);
        }

        info!(
            "📦 {} device {}: {} events from {} slices (window {:?} of {})",
            kind,
            device_id,
            events.len(),
            slices.len(),
            window,
            files.total_records()
        );
        Ok(SourceSnapshot {
            source: kind,
            device_id,
            files: slices.len(),
            total_available: files.total_records(),
            window,
            tail_discarded,
            rejected,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use tasktrace_formats::{
        DevicePhaseLog, DeviceTaskType, HwtsDecoder, LogPhase, NO_CONTEXT_ID,
    };
    use tasktrace_storage::PersistedWindow;
    use tempfile::tempdir;

    fn hwts(task_id: u32, phase: LogPhase, sys_cnt: u64) -> Vec<u8> {
        HwtsDecoder.encode(&DevicePhaseLog {
            source: SourceKind::Hwts,
            phase,
            stream_id: 1,
            task_id,
            context_id: NO_CONTEXT_ID,
            task_type: DeviceTaskType::AiCore,
            sys_cnt,
        })
    }

    fn write_hwts(root: &Path, slices: &[Vec<Vec<u8>>]) {
        let dir = data_dir(root, Side::Device, 0);
        fs::create_dir_all(&dir).unwrap();
        for (i, records) in slices.iter().enumerate() {
            fs::write(dir.join(format!("hwts.data.0.slice_{}", i)), records.concat()).unwrap();
        }
    }

    fn source(root: &Path, persisted: Arc<dyn PersistedCounts + Send + Sync>) -> RecordSource {
        RecordSource::new(root, "hwts.data.*.slice_*", Arc::new(HwtsDecoder), persisted)
    }

    #[test]
    fn missing_source_is_empty_not_an_error() {
        let dir = tempdir().unwrap();
        let snap = source(dir.path(), Arc::new(())).snapshot(0, None).unwrap();
        assert!(snap.events.is_empty());
        assert_eq!(snap.files, 0);
    }

    #[test]
    fn decodes_all_slices_and_counts_rejects() {
        let dir = tempdir().unwrap();
        write_hwts(
            dir.path(),
            &[
                vec![hwts(1, LogPhase::Start, 10), hwts(1, LogPhase::End, 20)],
                vec![vec![0xFFu8; 64], hwts(2, LogPhase::Start, 30)],
            ],
        );
        let snap = source(dir.path(), Arc::new(())).snapshot(0, None).unwrap();
        assert_eq!(snap.total_available, 4);
        assert_eq!(snap.events.len(), 3);
        assert_eq!(snap.rejected, 1);
    }

    #[test]
    fn ledger_window_limits_records() {
        let dir = tempdir().unwrap();
        write_hwts(
            dir.path(),
            &[vec![
                hwts(1, LogPhase::Start, 10),
                hwts(1, LogPhase::End, 20),
                hwts(2, LogPhase::Start, 30),
                hwts(2, LogPhase::End, 40),
            ]],
        );
        let mut ledger = BTreeMap::new();
        ledger.insert(
            ledger_key(SourceKind::Hwts, 0),
            PersistedWindow { prior_offset: 2, persisted_count: 4, count: None },
        );
        let snap = source(dir.path(), Arc::new(ledger)).snapshot(0, None).unwrap();
        assert_eq!(snap.window, RecordWindow::new(2, 2));
        assert_eq!(snap.events.len(), 2);
        assert_eq!(snap.events[0].stream_task(), (1, 2));
    }

    #[test]
    fn tail_anchor_discards_trailing_records() {
        let dir = tempdir().unwrap();
        write_hwts(
            dir.path(),
            &[vec![
                hwts(1, LogPhase::Start, 10),
                hwts(1, LogPhase::End, 20),
                hwts(2, LogPhase::Start, 30),
                hwts(2, LogPhase::End, 40),
                hwts(3, LogPhase::Start, 50),
            ]],
        );
        let src = source(dir.path(), Arc::new(()));
        let anchor = TailAnchor { stream_id: 1, task_id: 2 };
        let snap = src.snapshot(0, Some(anchor)).unwrap();
        assert_eq!(snap.tail_discarded, 1);
        assert_eq!(snap.events.len(), 4);

        // Anchor that never appears keeps everything.
        let missing = TailAnchor { stream_id: 9, task_id: 9 };
        assert_eq!(src.snapshot(0, Some(missing)).unwrap().events.len(), 5);
        assert_eq!(src.snapshots().len(), 2);
    }
}
