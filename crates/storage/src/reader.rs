// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/storage/src/reader.rs
//
// Forward and reverse record readers over a RecordFileSet.

use anyhow::Result;
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use tracing::{debug, warn};

use crate::slices::RecordFileSet;
use crate::window::RecordWindow;

/// Raw bytes of a run of fixed-size records.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    data: Vec<u8>,
    record_size: usize,
}

impl RecordBatch {
    pub fn len(&self) -> usize {
        if self.record_size == 0 {
            return 0;
        }
        self.data.len() / self.record_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn records(&self) -> std::slice::ChunksExact<'_, u8> {
        self.data.chunks_exact(self.record_size.max(1))
    }
}

/// Reads a window of records in slice order, crossing file boundaries.
pub struct FileCalculator<'a> {
    files: &'a RecordFileSet,
}

impl<'a> FileCalculator<'a> {
    pub fn new(files: &'a RecordFileSet) -> Self {
        Self { files }
    }

    /// Read exactly `window.count` records starting at `window.offset`.
    ///
    /// A file that can no longer be read ends the batch early; the records
    /// read so far are returned and the shortfall is logged.
    pub fn read(&self, window: RecordWindow) -> Result<RecordBatch> {
        let record_size = self.files.record_size();
        let want_start = window.offset * record_size as u64;
        let want_end = window.end() * record_size as u64;
        let mut data = Vec::with_capacity((want_end - want_start) as usize);

        let mut file_start = 0u64;
        for slice in self.files.files() {
            let file_end = file_start + slice.len;
            let lo = want_start.max(file_start);
            let hi = want_end.min(file_end);
            if lo < hi {
                if let Err(e) = read_range(&slice.path, lo - file_start, hi - lo, &mut data) {
                    warn!("Stopped reading at {:?}: {}", slice.path, e);
                    break;
                }
            }
            file_start = file_end;
            if file_start >= want_end {
                break;
            }
        }

        // Drop a trailing partial record if a read stopped mid-record.
        data.truncate(data.len() - data.len() % record_size);
        let batch = RecordBatch { data, record_size };
        if (batch.len() as u64) < window.count {
            warn!(
                "Record window {:?} truncated: read {} of {} records",
                window,
                batch.len(),
                window.count
            );
        } else {
            debug!("Read {} records from window {:?}", batch.len(), window);
        }
        Ok(batch)
    }
}

fn read_range(path: &std::path::Path, offset: u64, len: u64, out: &mut Vec<u8>) -> std::io::Result<()> {
    let mut reader = BufReader::new(File::open(path)?);
    reader.seek(SeekFrom::Start(offset))?;
    let before = out.len();
    reader.take(len).read_to_end(out)?;
    if ((out.len() - before) as u64) < len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("file shrank: wanted {} bytes at offset {}", len, offset),
        ));
    }
    Ok(())
}

/// Outcome of a backward scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReverseScan {
    pub is_found: bool,
    /// Records after the matching one, up to the end of the scanned range.
    pub discard_count: u64,
    pub scanned: u64,
}

/// Scans records from the tail backwards until a predicate matches.
pub struct FileReverseCalculator<'a> {
    files: &'a RecordFileSet,
}

impl<'a> FileReverseCalculator<'a> {
    pub fn new(files: &'a RecordFileSet) -> Self {
        Self { files }
    }

    /// Scan the whole set from its last record.
    pub fn scan<F>(&self, matches: F) -> Result<ReverseScan>
    where
        F: FnMut(&[u8]) -> bool,
    {
        self.scan_window(RecordWindow::full(self.files.total_records()), matches)
    }

    /// Scan backwards from the last record of `window`.
    ///
    /// Record indices follow the sampled layout of the file set, so a match
    /// lines up with what [`FileCalculator`] reads. Records in a slice that
    /// can no longer be mapped never match.
    pub fn scan_window<F>(&self, window: RecordWindow, mut matches: F) -> Result<ReverseScan>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let maps = MappedSlices::open(self.files);
        let record_size = self.files.record_size();
        let end = window.end().min(maps.total_bytes / record_size as u64);
        let mut buf = vec![0u8; record_size];
        let mut outcome = ReverseScan::default();

        for index in (window.offset..end).rev() {
            outcome.scanned += 1;
            if maps.copy_record(index, &mut buf) && matches(&buf) {
                outcome.is_found = true;
                outcome.discard_count = end - 1 - index;
                debug!("Reverse scan matched record {} ({} trailing)", index, outcome.discard_count);
                return Ok(outcome);
            }
        }

        warn!(
            "Reverse scan found no matching record in {} records; trailing records are kept",
            outcome.scanned
        );
        Ok(outcome)
    }
}

/// One sampled slice; `map` is `None` when it could not be mapped whole.
struct MappedSlice {
    start: u64,
    len: u64,
    map: Option<Mmap>,
}

/// Memory maps of every slice, laid out at their sampled offsets.
struct MappedSlices {
    slices: Vec<MappedSlice>,
    total_bytes: u64,
    record_size: usize,
}

impl MappedSlices {
    fn open(files: &RecordFileSet) -> Self {
        let mut slices = Vec::with_capacity(files.files().len());
        let mut total_bytes = 0u64;
        for slice in files.files() {
            let map = if slice.len == 0 {
                None
            } else {
                let mapped = File::open(&slice.path).and_then(|f| {
                    // The writer only appends; we never read past the sampled length.
                    unsafe { Mmap::map(&f) }
                });
                match mapped {
                    Ok(map) if map.len() as u64 >= slice.len => Some(map),
                    Ok(_) => {
                        warn!("{:?} shrank since it was sampled, its records are skipped", slice.path);
                        None
                    }
                    Err(e) => {
                        warn!("Cannot map {:?}: {}", slice.path, e);
                        None
                    }
                }
            };
            slices.push(MappedSlice { start: total_bytes, len: slice.len, map });
            total_bytes += slice.len;
        }
        Self { slices, total_bytes, record_size: files.record_size() }
    }

    /// Copy record `index` into `buf`, stitching across slice boundaries.
    /// Returns false when any byte of the record lies in an unmapped slice.
    fn copy_record(&self, index: u64, buf: &mut [u8]) -> bool {
        let mut pos = index * self.record_size as u64;
        let mut written = 0usize;
        for slice in &self.slices {
            let end = slice.start + slice.len;
            if pos >= end || written == buf.len() {
                continue;
            }
            let Some(map) = &slice.map else {
                return false;
            };
            let local = (pos - slice.start) as usize;
            let take = (buf.len() - written).min((end - pos) as usize);
            buf[written..written + take].copy_from_slice(&map[local..local + take]);
            written += take;
            pos += take as u64;
        }
        written == buf.len()
    }
}
