// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/critical_path.rs
//
// Backward walk from the latest-ending event to the earliest one, stepping
// to a causal predecessor each time, plus serial/parallel time of the
// communication events found on the way.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::config::CriticalPathSettings;
use crate::error::TraceError;
use crate::model::{CriticalPathEvent, TraceEventKind};

/// Event on the critical path, with its overlap split for communication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEntry {
    pub event: CriticalPathEvent,
    pub serial_time: f64,
    pub parallel_time: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KindStats {
    pub count: usize,
    pub total_time: f64,
    pub avg_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalPathReport {
    /// Path events in ascending start order.
    pub path: Vec<PathEntry>,
    /// Communication events on the path with the most serial time.
    pub top_communication: Vec<PathEntry>,
    /// AI Core, AI CPU and communication totals along the path.
    pub stats: BTreeMap<TraceEventKind, KindStats>,
    pub span_start: f64,
    pub span_end: f64,
}

#[derive(Debug, Clone)]
pub struct CriticalPathAnalyzer {
    settings: CriticalPathSettings,
}

impl Default for CriticalPathAnalyzer {
    fn default() -> Self {
        Self::new(CriticalPathSettings::default())
    }
}

impl CriticalPathAnalyzer {
    pub fn new(settings: CriticalPathSettings) -> Self {
        Self { settings }
    }

    /// Indices of the critical path events, ascending by start.
    pub fn critical_path(&self, events: &[CriticalPathEvent]) -> Result<Vec<usize>, TraceError> {
        if events.is_empty() {
            return Err(TraceError::EmptyAnalysisInput("critical path analysis"));
        }
        let timeline = Timeline::new(events);
        let earliest = events.iter().map(|e| e.start).fold(f64::INFINITY, f64::min);

        let mut current = timeline.latest_end();
        let mut path = vec![current];
        while events[current].start > earliest {
            match timeline.predecessor(current, self.settings.gap_tolerance_us) {
                Some(prev) => {
                    path.push(prev);
                    current = prev;
                }
                None => break,
            }
        }
        path.reverse();
        debug!("Critical path: {} of {} events", path.len(), events.len());
        Ok(path)
    }

    pub fn analyze(&self, events: &[CriticalPathEvent]) -> Result<CriticalPathReport, TraceError> {
        let indices = self.critical_path(events)?;

        let path: Vec<PathEntry> = indices
            .iter()
            .map(|&i| {
                let event = events[i].clone();
                if event.kind == TraceEventKind::Communication {
                    let (serial_time, parallel_time) = decompose(events, i);
                    PathEntry { event, serial_time, parallel_time }
                } else {
                    let serial_time = event.duration;
                    PathEntry { event, serial_time, parallel_time: 0.0 }
                }
            })
            .collect();

        let mut top_communication: Vec<PathEntry> = path
            .iter()
            .filter(|p| p.event.kind == TraceEventKind::Communication)
            .cloned()
            .collect();
        top_communication.sort_by(|a, b| {
            b.serial_time
                .total_cmp(&a.serial_time)
                .then_with(|| a.event.start.total_cmp(&b.event.start))
        });
        top_communication.truncate(self.settings.top_k);

        let mut stats: BTreeMap<TraceEventKind, KindStats> = [
            TraceEventKind::AiCore,
            TraceEventKind::AiCpu,
            TraceEventKind::Communication,
        ]
        .into_iter()
        .map(|k| (k, KindStats::default()))
        .collect();
        for entry in &path {
            if let Some(s) = stats.get_mut(&entry.event.kind) {
                s.count += 1;
                s.total_time += entry.event.duration;
            }
        }
        for s in stats.values_mut() {
            if s.count > 0 {
                s.avg_time = s.total_time / s.count as f64;
            }
        }

        let span_start = path.first().map_or(0.0, |p| p.event.start);
        let span_end = path.last().map_or(0.0, |p| p.event.end);
        info!(
            "🧭 Critical path: {} events spanning {:.3} us, {} communication ops on path",
            path.len(),
            span_end - span_start,
            stats[&TraceEventKind::Communication].count
        );
        Ok(CriticalPathReport { path, top_communication, stats, span_start, span_end })
    }
}

/// Split `events[target]` into (serial, parallel) time: the parallel part is
/// covered by at least one other event, the serial part by none.
pub fn decompose(events: &[CriticalPathEvent], target: usize) -> (f64, f64) {
    let e = &events[target];
    let mut overlaps: Vec<(f64, f64)> = events
        .iter()
        .enumerate()
        .filter(|(i, o)| *i != target && o.start < e.end && o.end > e.start)
        .map(|(_, o)| (o.start.max(e.start), o.end.min(e.end)))
        .collect();
    overlaps.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut parallel = 0.0;
    let mut merged: Option<(f64, f64)> = None;
    for (start, end) in overlaps {
        merged = match merged {
            Some((ms, me)) if start <= me => Some((ms, me.max(end))),
            Some((ms, me)) => {
                parallel += me - ms;
                Some((start, end))
            }
            None => Some((start, end)),
        };
    }
    if let Some((ms, me)) = merged {
        parallel += me - ms;
    }
    let parallel = parallel.clamp(0.0, e.duration.max(0.0));
    ((e.duration - parallel).max(0.0), parallel)
}

/// End-ordered indices over all events and per thread.
struct Timeline<'a> {
    events: &'a [CriticalPathEvent],
    by_end: Vec<usize>,
    by_thread: HashMap<&'a str, Vec<usize>>,
}

impl<'a> Timeline<'a> {
    fn new(events: &'a [CriticalPathEvent]) -> Self {
        let mut by_end: Vec<usize> = (0..events.len()).collect();
        by_end.sort_by(|&a, &b| events[a].end.total_cmp(&events[b].end));
        let mut by_thread: HashMap<&str, Vec<usize>> = HashMap::new();
        for &i in &by_end {
            by_thread.entry(events[i].thread_key.as_str()).or_default().push(i);
        }
        Self { events, by_end, by_thread }
    }

    fn latest_end(&self) -> usize {
        let last_end = self.events[self.by_end[self.by_end.len() - 1]].end;
        let tied = self.by_end.iter().rev().take_while(|&&i| self.events[i].end == last_end);
        tied.copied().fold(self.by_end[self.by_end.len() - 1], |best, i| {
            if self.prefer(i, best) == Ordering::Less { i } else { best }
        })
    }

    /// Same-thread predecessor when it ends within `tolerance` of the
    /// current start, otherwise the latest event anywhere that ends by then,
    /// otherwise the latest-ending overlapping event that started earlier.
    fn predecessor(&self, current: usize, tolerance: f64) -> Option<usize> {
        let cur = &self.events[current];
        let limit = cur.start + tolerance;
        if let Some(order) = self.by_thread.get(cur.thread_key.as_str()) {
            if let Some(i) = self.latest_before(order, current, limit) {
                if cur.start - self.events[i].end <= tolerance {
                    return Some(i);
                }
            }
        }
        self.latest_before(&self.by_end, current, limit)
            .or_else(|| self.latest_before(&self.by_end, current, cur.end))
    }

    /// Latest-ending event with `end <= limit` that ends before and starts
    /// before `current`.
    fn latest_before(&self, order: &[usize], current: usize, limit: f64) -> Option<usize> {
        let cur = &self.events[current];
        let cut = order.partition_point(|&i| self.events[i].end <= limit);
        let mut best: Option<usize> = None;
        for &i in order[..cut].iter().rev() {
            let e = &self.events[i];
            if e.start >= cur.start || e.end >= cur.end {
                continue;
            }
            match best {
                None => best = Some(i),
                Some(b) if self.events[b].end == e.end => {
                    if self.prefer(i, b) == Ordering::Less {
                        best = Some(i);
                    }
                }
                Some(_) => break,
            }
        }
        best
    }

    /// Tie-break between equal end times: lowest thread key, then earliest start.
    fn prefer(&self, a: usize, b: usize) -> Ordering {
        let (ea, eb) = (&self.events[a], &self.events[b]);
        ea.thread_key
            .cmp(&eb.thread_key)
            .then_with(|| ea.start.total_cmp(&eb.start))
            .then_with(|| a.cmp(&b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(name: &str, kind: TraceEventKind, thread: &str, start: f64, end: f64) -> CriticalPathEvent {
        CriticalPathEvent::new(name, kind, thread, start, end)
    }

    fn names(events: &[CriticalPathEvent], path: &[usize]) -> Vec<String> {
        path.iter().map(|&i| events[i].name.clone()).collect()
    }

    #[test]
    fn follows_same_thread_then_jumps_threads() {
        let events = vec![
            ev("load", TraceEventKind::AiCpu, "stream:1", 0.0, 10.0),
            ev("matmul", TraceEventKind::AiCore, "stream:2", 10.5, 30.0),
            ev("relu", TraceEventKind::AiCore, "stream:2", 30.2, 40.0),
            ev("side", TraceEventKind::AiCore, "stream:3", 5.0, 20.0),
            ev("allreduce", TraceEventKind::Communication, "comm:hccl_world", 45.0, 60.0),
        ];
        let analyzer = CriticalPathAnalyzer::default();
        let path = analyzer.critical_path(&events).unwrap();
        assert_eq!(names(&events, &path), vec!["load", "matmul", "relu", "allreduce"]);
        for pair in path.windows(2) {
            assert!(events[pair[0]].start <= events[pair[1]].start);
        }
    }

    #[test]
    fn single_event_is_its_own_path() {
        let events = vec![ev("only", TraceEventKind::AiCore, "stream:0", 1.0, 2.0)];
        let report = CriticalPathAnalyzer::default().analyze(&events).unwrap();
        assert_eq!(report.path.len(), 1);
        assert_eq!(report.stats[&TraceEventKind::AiCore].count, 1);
        assert_eq!(report.span_end - report.span_start, 1.0);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(
            CriticalPathAnalyzer::default().critical_path(&[]),
            Err(TraceError::EmptyAnalysisInput("critical path analysis"))
        );
    }

    #[test]
    fn equal_end_times_prefer_lowest_thread_key() {
        let events = vec![
            ev("first", TraceEventKind::AiCore, "stream:0", 0.0, 1.0),
            ev("b", TraceEventKind::AiCore, "stream:b", 2.0, 5.0),
            ev("a", TraceEventKind::AiCore, "stream:a", 3.0, 5.0),
            ev("last", TraceEventKind::AiCore, "stream:z", 10.0, 12.0),
        ];
        let path = CriticalPathAnalyzer::default().critical_path(&events).unwrap();
        assert_eq!(names(&events, &path), vec!["first", "a", "last"]);
    }

    #[test]
    fn overlapping_events_are_parallel() {
        let d = 8.0;
        let events = vec![
            ev("allgather", TraceEventKind::Communication, "comm:g0", 0.0, d),
            ev("matmul", TraceEventKind::AiCore, "stream:1", 0.0, d),
        ];
        for target in 0..2 {
            let (serial, parallel) = decompose(&events, target);
            assert!(serial.abs() < 1e-9);
            assert!((parallel - d).abs() < 1e-9);
        }
    }

    #[test]
    fn partial_overlap_splits_duration() {
        let events = vec![
            ev("send", TraceEventKind::Communication, "comm:g0", 0.0, 10.0),
            ev("k1", TraceEventKind::AiCore, "stream:1", 2.0, 4.0),
            ev("k2", TraceEventKind::AiCore, "stream:1", 3.0, 5.0),
            ev("k3", TraceEventKind::AiCore, "stream:2", 8.0, 20.0),
        ];
        let (serial, parallel) = decompose(&events, 0);
        assert!((parallel - 5.0).abs() < 1e-9);
        assert!((serial - 5.0).abs() < 1e-9);
    }

    #[test]
    fn report_ranks_communication_by_serial_time() {
        let events = vec![
            ev("k0", TraceEventKind::AiCore, "stream:1", 0.0, 10.0),
            ev("c1", TraceEventKind::Communication, "comm:g", 10.0, 20.0),
            ev("bg", TraceEventKind::AiCore, "stream:9", 10.0, 18.0),
            ev("c2", TraceEventKind::Communication, "comm:g", 20.0, 40.0),
        ];
        let analyzer = CriticalPathAnalyzer::new(CriticalPathSettings { gap_tolerance_us: 1.0, top_k: 1 });
        let report = analyzer.analyze(&events).unwrap();
        assert_eq!(report.path.len(), 3);
        assert_eq!(report.top_communication.len(), 1);
        assert_eq!(report.top_communication[0].event.name, "c2");
        assert_eq!(report.stats[&TraceEventKind::Communication].count, 2);
        assert_eq!(report.stats[&TraceEventKind::Communication].avg_time, 15.0);
        assert_eq!(report.stats[&TraceEventKind::AiCpu].count, 0);
    }
}
