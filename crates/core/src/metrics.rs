// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/metrics.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::collectors::SourceSnapshot;
use crate::matcher::MatchStats;

/// Counters and stage timings of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_time_ms: Option<f64>,
    /// Accumulated wall time per stage, in milliseconds.
    pub stage_times_ms: BTreeMap<String, f64>,
    pub slices_read: u64,
    pub records_decoded: u64,
    pub records_rejected: u64,
    pub tail_records_discarded: u64,
    pub host_tasks: u64,
    pub device_tasks: u64,
    pub matched_tasks: u64,
    pub mismatched_tasks: u64,
    pub batch_gaps: u64,
    pub units_analyzed: u64,
    pub units_failed: u64,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_total_time(&mut self, duration: Duration) {
        self.total_time_ms = Some(duration.as_secs_f64() * 1000.0);
    }

    pub fn record_stage(&mut self, stage: &str, duration: Duration) {
        *self.stage_times_ms.entry(stage.to_string()).or_default() += duration.as_secs_f64() * 1000.0;
    }

    pub fn record_snapshot(&mut self, snapshot: &SourceSnapshot) {
        self.slices_read += snapshot.files as u64;
        self.records_decoded += snapshot.events.len() as u64;
        self.records_rejected += snapshot.rejected;
        self.tail_records_discarded += snapshot.tail_discarded;
    }

    pub fn record_match(&mut self, stats: &MatchStats) {
        self.host_tasks += stats.host_tasks as u64;
        self.device_tasks += stats.device_tasks as u64;
        self.matched_tasks += stats.matched as u64;
        self.mismatched_tasks += stats.mismatched() as u64;
        self.batch_gaps += stats.batch_gaps as u64;
    }

    pub fn record_unit(&mut self, ok: bool) {
        if ok {
            self.units_analyzed += 1;
        } else {
            self.units_failed += 1;
        }
    }

    /// Share of device-side work that found its host submission.
    pub fn match_rate(&self) -> Option<f64> {
        let total = self.matched_tasks + self.mismatched_tasks;
        (total > 0).then(|| self.matched_tasks as f64 / total as f64)
    }

    pub fn print_summary(&self) {
        println!("\n=== Task Trace Results ===");

        if let Some(total) = self.total_time_ms {
            println!("Total Time: {:.2} ms", total);
        }
        for (stage, ms) in &self.stage_times_ms {
            println!("  {:<14} {:.2} ms", stage, ms);
        }

        println!("Slices Read: {}", self.slices_read);
        println!("Records Decoded: {} ({} rejected, {} tail discarded)",
            self.records_decoded, self.records_rejected, self.tail_records_discarded);
        println!("Host / Device Tasks: {} / {}", self.host_tasks, self.device_tasks);
        println!("Matched: {}  Mismatched: {}  Batch Gaps: {}",
            self.matched_tasks, self.mismatched_tasks, self.batch_gaps);

        if let Some(rate) = self.match_rate() {
            println!("Match Rate: {:.2}%", rate * 100.0);
        }

        println!("Units Analyzed: {}  Failed: {}", self.units_analyzed, self.units_failed);
        println!("==========================\n");
    }
}
