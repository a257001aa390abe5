// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Record windowing over size-rotated binary log files.
//!
//! A source writes fixed-size records into `<name>.slice_0`, `<name>.slice_1`, ...
//! Older slices age out (get deleted) while newer ones are appended. Everything
//! here treats the ordered slices as one virtual concatenation of records.

pub mod discovery;
pub mod ledger;
pub mod reader;
pub mod slices;
pub mod window;

pub use discovery::discover_slices;
pub use ledger::{JsonLedger, PersistedCounts, PersistedWindow};
pub use reader::{FileCalculator, FileReverseCalculator, RecordBatch, ReverseScan};
pub use slices::{RecordFileSet, SliceFile};
pub use window::{compute_window, RecordWindow, WindowRequest};
