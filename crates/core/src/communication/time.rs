// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/communication/time.rs
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

use super::walk::{walk, CommStep};
use crate::model::CommunicationEvent;

/// Time breakdown of one operator on one rank, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CommTimeInfo {
    pub elapse_time: f64,
    pub transit_time: f64,
    pub wait_time: f64,
    pub synchronization_time: f64,
    pub idle_time: f64,
    pub wait_ratio: Option<f64>,
    pub synchronization_ratio: Option<f64>,
}

fn ratio(part: f64, other: f64) -> Option<f64> {
    let total = part + other;
    (total > 0.0).then(|| part / total)
}

impl CommTimeInfo {
    /// Decompose the main-plane events of one operator, ordered by time.
    pub fn from_main_plane(events: &[CommunicationEvent]) -> Self {
        let mut info = CommTimeInfo::default();
        let mut moved_data = false;
        for step in walk(events) {
            match step {
                CommStep::Transit { duration, .. } => {
                    info.transit_time += duration;
                    moved_data = true;
                }
                CommStep::Wait { duration } => {
                    info.wait_time += duration;
                    if !moved_data {
                        info.synchronization_time += duration;
                    }
                }
                CommStep::Other => {}
            }
        }
        if let Some(first) = events.first() {
            let end = events.iter().map(CommunicationEvent::end_time).fold(f64::MIN, f64::max);
            info.elapse_time = (end - first.first_timestamp).max(0.0);
        }
        info.finish();
        info
    }

    /// Recompute idle time and ratios from the summed components.
    fn finish(&mut self) {
        self.idle_time = (self.elapse_time - self.transit_time - self.wait_time).max(0.0);
        self.wait_ratio = ratio(self.wait_time, self.transit_time);
        self.synchronization_ratio = ratio(self.synchronization_time, self.transit_time);
    }
}

impl AddAssign<&CommTimeInfo> for CommTimeInfo {
    fn add_assign(&mut self, other: &CommTimeInfo) {
        self.elapse_time += other.elapse_time;
        self.transit_time += other.transit_time;
        self.wait_time += other.wait_time;
        self.synchronization_time += other.synchronization_time;
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::super::walk::fixtures::event;
    use super::*;
    use crate::model::{CommTaskType, TransportType};

    #[test]
    fn wait_before_any_transit_is_synchronization() {
        let events = vec![
            event(CommTaskType::NotifyWait, TransportType::Local, 0.0, 4.0, 0),
            event(CommTaskType::Memcpy, TransportType::Hccs, 4.0, 6.0, 1 << 20),
            event(CommTaskType::NotifyWait, TransportType::Local, 10.0, 2.0, 0),
            event(CommTaskType::NotifyRecord, TransportType::Local, 12.0, 1.0, 0),
        ];
        let info = CommTimeInfo::from_main_plane(&events);
        assert_eq!(info.transit_time, 6.0);
        assert_eq!(info.wait_time, 6.0);
        assert_eq!(info.synchronization_time, 4.0);
        assert_eq!(info.elapse_time, 13.0);
        assert_eq!(info.idle_time, 1.0);
        assert_eq!(info.wait_ratio, Some(0.5));
        assert_eq!(info.synchronization_ratio, Some(0.4));
    }

    #[test]
    fn ratios_stay_unset_without_time() {
        let events = vec![event(CommTaskType::NotifyRecord, TransportType::Local, 0.0, 1.0, 0)];
        let info = CommTimeInfo::from_main_plane(&events);
        assert_eq!(info.wait_ratio, None);
        assert_eq!(info.synchronization_ratio, None);
    }

    #[test]
    fn rollup_recomputes_ratios() {
        let a = CommTimeInfo {
            elapse_time: 10.0,
            transit_time: 8.0,
            wait_time: 2.0,
            ..Default::default()
        };
        let b = CommTimeInfo {
            elapse_time: 10.0,
            transit_time: 0.0,
            wait_time: 10.0,
            synchronization_time: 10.0,
            ..Default::default()
        };
        let mut total = CommTimeInfo::default();
        total += &a;
        total += &b;
        assert_eq!(total.wait_time, 12.0);
        assert_eq!(total.wait_ratio, Some(0.6));
        assert_eq!(total.synchronization_ratio, Some(10.0 / 18.0));
        assert_eq!(total.idle_time, 0.0);
    }
}
