// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/communication/mod.rs
//
// Per-operator, per-rank time and bandwidth breakdown of collective
// communication, with a per-rank "total" rollup.

pub mod bandwidth;
pub mod time;
pub mod walk;

pub use bandwidth::{BandwidthByLink, BandwidthCalculator, BandwidthInfo, SizeBucket};
pub use time::CommTimeInfo;
pub use walk::{walk, CommStep, LinkClass};

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn, Span};

use crate::config::CommunicationSettings;
use crate::error::TraceError;
use crate::model::{CommunicationEvent, CriticalPathEvent, TraceEventKind};

/// Breakdown of one collective operator on one rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpRankReport {
    pub op_name: String,
    pub group_name: String,
    pub rank: u32,
    pub start: f64,
    pub end: f64,
    pub time: CommTimeInfo,
    pub bandwidth: BandwidthByLink,
}

impl OpRankReport {
    /// The operator as one event on its group's timeline.
    pub fn to_trace_event(&self) -> CriticalPathEvent {
        CriticalPathEvent::new(
            self.op_name.clone(),
            TraceEventKind::Communication,
            format!("comm:{}", self.group_name),
            self.start,
            self.end,
        )
    }
}

/// A unit of communication analysis that could not be completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommFailure {
    pub rank: u32,
    pub op_name: Option<String>,
    pub precondition: bool,
    pub reason: String,
}

impl CommFailure {
    fn new(rank: u32, op_name: Option<&str>, err: &anyhow::Error) -> Self {
        Self {
            rank,
            op_name: op_name.map(str::to_string),
            precondition: TraceError::is_precondition(err),
            reason: format!("{:#}", err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankReport {
    pub rank: u32,
    pub ops: Vec<OpRankReport>,
    pub total_time: CommTimeInfo,
    pub total_bandwidth: BandwidthByLink,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommunicationReport {
    pub ranks: BTreeMap<u32, RankReport>,
    pub failures: Vec<CommFailure>,
}

impl CommunicationReport {
    /// Operators of one rank as critical-path events.
    pub fn trace_events(&self, rank: u32) -> Vec<CriticalPathEvent> {
        self.ranks
            .get(&rank)
            .map(|r| r.ops.iter().map(OpRankReport::to_trace_event).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct CommunicationAnalyzer {
    main_plane_id: u32,
    bandwidth: BandwidthCalculator,
}

impl Default for CommunicationAnalyzer {
    fn default() -> Self {
        Self::new(&CommunicationSettings::default())
    }
}

impl CommunicationAnalyzer {
    pub fn new(settings: &CommunicationSettings) -> Self {
        Self {
            main_plane_id: settings.main_plane_id,
            bandwidth: BandwidthCalculator {
                standard_gbps: settings.standard_bandwidth_gbps,
                large_packet_mb: settings.large_packet_threshold_mb,
            },
        }
    }

    /// Breakdown of `op_name` from every event the rank recorded.
    pub fn analyze_op_rank(&self, op_name: &str, rank: u32, events: &[CommunicationEvent]) -> Result<OpRankReport> {
        if events.is_empty() {
            return Err(TraceError::RankWithoutEvents { rank }.into());
        }
        let mut op_events: Vec<CommunicationEvent> = events.iter().filter(|e| e.op_name == op_name).cloned().collect();
        op_events.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let main: Vec<CommunicationEvent> = op_events
            .iter()
            .filter(|e| e.plane_id == self.main_plane_id)
            .cloned()
            .collect();
        if main.is_empty() {
            return Err(TraceError::NoMainThreadEvents {
                op_name: op_name.to_string(),
                rank,
                plane_id: self.main_plane_id,
            }
            .into());
        }

        let start = main[0].first_timestamp;
        let end = op_events.iter().map(CommunicationEvent::end_time).fold(f64::MIN, f64::max);
        Ok(OpRankReport {
            op_name: op_name.to_string(),
            group_name: main[0].group_name.clone(),
            rank,
            start,
            end,
            time: CommTimeInfo::from_main_plane(&main),
            bandwidth: self.bandwidth.analyze(&op_events),
        })
    }

    /// Every operator of one rank, plus the rank total. Operators that fail
    /// are reported separately and left out of the total.
    pub fn analyze_rank(&self, rank: u32, events: &[CommunicationEvent]) -> Result<(RankReport, Vec<CommFailure>)> {
        if events.is_empty() {
            return Err(TraceError::RankWithoutEvents { rank }.into());
        }
        let mut op_names: Vec<(f64, &str)> = Vec::new();
        for e in events {
            if !op_names.iter().any(|(_, name)| *name == e.op_name) {
                op_names.push((e.first_timestamp, e.op_name.as_str()));
            }
        }
        op_names.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        let span = Span::current();
        let results: Vec<(&str, Result<OpRankReport>)> = op_names
            .par_iter()
            .map(|(_, name)| {
                let _entered = span.enter();
                (*name, self.analyze_op_rank(name, rank, events))
            })
            .collect();

        let mut ops = Vec::new();
        let mut failures = Vec::new();
        for (name, result) in results {
            match result {
                Ok(report) => ops.push(report),
                Err(e) => {
                    error!("rank {} op {}: {:#}", rank, name, e);
                    failures.push(CommFailure::new(rank, Some(name), &e));
                }
            }
        }

        let mut total_time = CommTimeInfo::default();
        for op in &ops {
            total_time += &op.time;
        }
        let total_bandwidth = self.bandwidth.rollup(ops.iter().map(|op| &op.bandwidth));
        Ok((RankReport { rank, ops, total_time, total_bandwidth }, failures))
    }

    /// All ranks. A failing rank or operator is recorded and skipped.
    pub fn analyze(&self, ranks: &BTreeMap<u32, Vec<CommunicationEvent>>) -> CommunicationReport {
        let span = Span::current();
        let results: Vec<(u32, Result<(RankReport, Vec<CommFailure>)>)> = ranks
            .par_iter()
            .map(|(rank, events)| {
                let _entered = span.enter();
                (*rank, self.analyze_rank(*rank, events))
            })
            .collect();

        let mut report = CommunicationReport::default();
        for (rank, result) in results {
            match result {
                Ok((rank_report, failures)) => {
                    report.failures.extend(failures);
                    report.ranks.insert(rank, rank_report);
                }
                Err(e) => {
                    error!("rank {}: {:#}", rank, e);
                    report.failures.push(CommFailure::new(rank, None, &e));
                }
            }
        }
        info!(
            "📡 Communication: {} ranks analyzed, {} failures",
            report.ranks.len(),
            report.failures.len()
        );
        report
    }
}

/// Load one rank's events from a JSON array.
pub fn load_rank_events<P: AsRef<Path>>(path: P) -> Result<Vec<CommunicationEvent>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read communication events {:?}", path))?;
    let events: Vec<CommunicationEvent> =
        serde_json::from_str(&text).with_context(|| format!("Failed to parse communication events {:?}", path))?;
    if events.is_empty() {
        warn!("{:?} holds no communication events", path);
    }
    Ok(events)
}

/// Load every configured rank; unreadable files become failures.
pub fn load_ranks(files: &BTreeMap<u32, PathBuf>) -> (BTreeMap<u32, Vec<CommunicationEvent>>, Vec<CommFailure>) {
    let mut ranks = BTreeMap::new();
    let mut failures = Vec::new();
    for (rank, path) in files {
        match load_rank_events(path) {
            Ok(events) => {
                ranks.insert(*rank, events);
            }
            Err(e) => {
                error!("rank {}: {:#}", rank, e);
                failures.push(CommFailure::new(*rank, None, &e));
            }
        }
    }
    (ranks, failures)
}

#[cfg(test)]
mod tests {
    use super::walk::fixtures::event;
    use super::*;
    use crate::model::{CommTaskType, TransportType};
    use tracing_test::traced_test;

    fn op(name: &str, first: f64) -> Vec<CommunicationEvent> {
        let mut events = vec![
            event(CommTaskType::NotifyWait, TransportType::Local, first, 2.0, 0),
            event(CommTaskType::Memcpy, TransportType::Hccs, first + 2.0, 1000.0, 1 << 20),
        ];
        for e in &mut events {
            e.op_name = name.to_string();
            e.first_timestamp = first;
        }
        events
    }

    #[test]
    fn op_report_becomes_a_group_event() {
        let events = op("allreduce_1", 100.0);
        let report = CommunicationAnalyzer::default().analyze_op_rank("allreduce_1", 0, &events).unwrap();
        assert_eq!(report.time.synchronization_time, 2.0);
        assert_eq!(report.bandwidth[&LinkClass::Hccs].bandwidth_gbps, Some(1.0));

        let ev = report.to_trace_event();
        assert_eq!(ev.thread_key, "comm:hccl_world_group");
        assert_eq!(ev.kind, TraceEventKind::Communication);
        assert_eq!((ev.start, ev.end), (100.0, 1102.0));
    }

    #[test]
    fn missing_main_plane_is_a_precondition_error() {
        let mut events = op("broadcast_2", 0.0);
        for e in &mut events {
            e.plane_id = 3;
        }
        let err = CommunicationAnalyzer::default()
            .analyze_op_rank("broadcast_2", 1, &events)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TraceError>(),
            Some(TraceError::NoMainThreadEvents { rank: 1, plane_id: 0, .. })
        ));

        let err = CommunicationAnalyzer::default().analyze_op_rank("broadcast_2", 4, &[]).unwrap_err();
        assert_eq!(err.downcast_ref::<TraceError>(), Some(&TraceError::RankWithoutEvents { rank: 4 }));
    }

    #[traced_test]
    #[test]
    fn batch_analysis_isolates_failures() {
        let mut rank0 = op("allreduce_1", 0.0);
        rank0.extend(op("allreduce_2", 5000.0));
        let mut orphan = op("allgather_3", 9000.0);
        for e in &mut orphan {
            e.plane_id = 7;
        }
        rank0.extend(orphan);

        let mut ranks = BTreeMap::new();
        ranks.insert(0, rank0);
        ranks.insert(1, Vec::new());

        let report = CommunicationAnalyzer::default().analyze(&ranks);
        let r0 = &report.ranks[&0];
        assert_eq!(r0.ops.len(), 2);
        assert_eq!(r0.ops[0].op_name, "allreduce_1");
        assert_eq!(r0.total_time.transit_time, 2000.0);
        assert_eq!(r0.total_bandwidth[&LinkClass::Sdma].transfers, 2);
        assert_eq!(report.trace_events(0).len(), 2);

        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().any(|f| f.op_name.as_deref() == Some("allgather_3")));
        assert!(report.failures.iter().any(|f| f.rank == 1 && f.op_name.is_none() && f.precondition));
        assert!(logs_contain("rank 1 has no communication events"));
    }

    #[test]
    fn loads_json_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("rank0.json");
        std::fs::write(
            &good,
            r#"[{"op_name":"allreduce","group_name":"g","task_type":"Memcpy","transport_type":"HCCS",
                 "src_rank":0,"dst_rank":1,"size":1024,"timestamp":1.0,"duration":2.0,
                 "plane_id":0,"first_timestamp":1.0}]"#,
        )
        .unwrap();
        let mut files = BTreeMap::new();
        files.insert(0, good);
        files.insert(1, dir.path().join("missing.json"));
        let (ranks, failures) = load_ranks(&files);
        assert_eq!(ranks[&0][0].task_type, CommTaskType::Memcpy);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].rank, 1);
        assert!(!failures[0].precondition);
    }
}
