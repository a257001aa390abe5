// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/collectors/pairing.rs
//
// Start/end device logs arrive as separate records; join them into spans.

use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, warn};

use tasktrace_formats::{DeviceTaskType, LogPhase, SourceKind, TypedEvent};

use crate::boundaries::ClockRange;
use crate::model::{CorrelationKey, DeviceTask};

/// A device execution span still expressed in raw syscnt ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSpan {
    pub key: CorrelationKey,
    pub task_type: DeviceTaskType,
    pub start_cnt: u64,
    pub end_cnt: u64,
}

impl RawSpan {
    /// Spans belong to an iteration when they start inside its clock range.
    pub fn within(&self, range: &ClockRange) -> bool {
        range.contains(self.start_cnt)
    }

    pub fn to_device_task(&self, clock_freq_mhz: f64) -> DeviceTask {
        let start = self.start_cnt as f64 / clock_freq_mhz;
        let end = self.end_cnt as f64 / clock_freq_mhz;
        DeviceTask {
            stream_id: self.key.stream_id,
            task_id: self.key.task_id,
            context_id: self.key.context_id,
            start_time: start,
            duration: end - start,
            task_type: self.task_type,
        }
    }
}

/// Pair start and end logs per correlation key in arrival order.
///
/// Span records pass through untouched. Unpaired logs are dropped.
pub fn pair_device_logs(source: SourceKind, events: &[TypedEvent]) -> Vec<RawSpan> {
    let mut open: BTreeMap<CorrelationKey, VecDeque<(u64, DeviceTaskType)>> = BTreeMap::new();
    let mut spans = Vec::new();
    let mut orphan_ends = 0usize;

    for event in events {
        match event {
            TypedEvent::DevicePhase(log) => {
                let key = CorrelationKey::new(log.stream_id, log.task_id, log.context_id);
                match log.phase {
                    LogPhase::Start => open.entry(key).or_default().push_back((log.sys_cnt, log.task_type)),
                    LogPhase::End => match open.get_mut(&key).and_then(VecDeque::pop_front) {
                        Some((start_cnt, task_type)) if log.sys_cnt >= start_cnt => spans.push(RawSpan {
                            key,
                            task_type,
                            start_cnt,
                            end_cnt: log.sys_cnt,
                        }),
                        Some(_) | None => orphan_ends += 1,
                    },
                }
            }
            TypedEvent::DeviceSpan(log) => spans.push(RawSpan {
                key: CorrelationKey::new(log.stream_id, log.task_id, log.context_id),
                task_type: log.task_type,
                start_cnt: log.start_cnt,
                end_cnt: log.end_cnt,
            }),
            TypedEvent::HostTask(_) => debug!("{}: ignoring host record in device stream", source),
        }
    }

    let orphan_starts: usize = open.values().map(VecDeque::len).sum();
    if orphan_starts + orphan_ends > 0 {
        warn!(
            "{}: dropped {} start logs and {} end logs without a partner",
            source, orphan_starts, orphan_ends
        );
    }
    spans.sort_by_key(|s| (s.start_cnt, s.key));
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasktrace_formats::{DevicePhaseLog, DeviceSpanLog, NO_CONTEXT_ID};

    fn log(task_id: u32, phase: LogPhase, sys_cnt: u64) -> TypedEvent {
        TypedEvent::DevicePhase(DevicePhaseLog {
            source: SourceKind::Hwts,
            phase,
            stream_id: 1,
            task_id,
            context_id: NO_CONTEXT_ID,
            task_type: DeviceTaskType::AiCore,
            sys_cnt,
        })
    }

    #[test]
    fn pairs_repeated_keys_in_order() {
        let events = vec![
            log(7, LogPhase::Start, 100),
            log(7, LogPhase::End, 200),
            log(7, LogPhase::Start, 300),
            log(8, LogPhase::Start, 310),
            log(7, LogPhase::End, 400),
        ];
        let spans = pair_device_logs(SourceKind::Hwts, &events);
        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].start_cnt, spans[0].end_cnt), (100, 200));
        assert_eq!((spans[1].start_cnt, spans[1].end_cnt), (300, 400));
    }

    #[test]
    fn span_records_and_clock_conversion() {
        let events = vec![TypedEvent::DeviceSpan(DeviceSpanLog {
            source: SourceKind::AiCpu,
            stream_id: 2,
            task_id: 3,
            context_id: NO_CONTEXT_ID,
            task_type: DeviceTaskType::AiCpu,
            start_cnt: 1_000,
            end_cnt: 1_500,
        })];
        let spans = pair_device_logs(SourceKind::AiCpu, &events);
        let task = spans[0].to_device_task(100.0);
        assert_eq!(task.start_time, 10.0);
        assert_eq!(task.duration, 5.0);
        assert_eq!(task.task_type, DeviceTaskType::AiCpu);
        assert!(spans[0].within(&ClockRange { start: 1_000, end: 2_000 }));
        assert!(!spans[0].within(&ClockRange { start: 0, end: 1_000 }));
    }

    #[test]
    fn end_before_start_is_dropped() {
        let events = vec![log(1, LogPhase::Start, 500), log(1, LogPhase::End, 400)];
        assert!(pair_device_logs(SourceKind::Hwts, &events).is_empty());
    }
}
