// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/communication/walk.rs
//
// Classify an ordered primitive list into data movement and waiting.

use serde::{Deserialize, Serialize};

use crate::model::{CommTaskType, CommunicationEvent, TransportType};

/// Bandwidth class of a transfer. SDMA is the union of HCCS and PCIe copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LinkClass {
    Hccs,
    Pcie,
    Rdma,
    Sdma,
}

impl LinkClass {
    pub const ALL: [LinkClass; 4] = [LinkClass::Hccs, LinkClass::Pcie, LinkClass::Rdma, LinkClass::Sdma];
}

/// One recognized unit of work on a plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommStep {
    /// Data moved over `link`: `size` bytes in `duration` microseconds.
    Transit { link: LinkClass, size: u64, duration: f64 },
    Wait { duration: f64 },
    Other,
}

fn is_sdma_copy(e: &CommunicationEvent) -> Option<LinkClass> {
    let copy = matches!(e.task_type, CommTaskType::Memcpy | CommTaskType::ReduceInline);
    let link = match e.transport_type {
        TransportType::Hccs => LinkClass::Hccs,
        TransportType::Pcie => LinkClass::Pcie,
        _ => return None,
    };
    (copy && e.src_rank != e.dst_rank).then_some(link)
}

/// Send, send, wait: payload write, completion write, and the wait on the
/// peer's notify that ends the transfer.
fn is_rdma_pattern(window: &[CommunicationEvent]) -> bool {
    matches!(
        window,
        [a, b, c, ..] if a.task_type == CommTaskType::RdmaSend
            && b.task_type == CommTaskType::RdmaSend
            && c.task_type == CommTaskType::NotifyWait
    )
}

/// Walk events in the given order. An RDMA pattern consumes all three
/// events; every other event is one step.
pub fn walk(events: &[CommunicationEvent]) -> Vec<CommStep> {
    let mut steps = Vec::with_capacity(events.len());
    let mut i = 0;
    while i < events.len() {
        let rest = &events[i..];
        if is_rdma_pattern(rest) {
            steps.push(CommStep::Transit {
                link: LinkClass::Rdma,
                size: rest[0].size,
                duration: rest[2].end_time() - rest[0].timestamp,
            });
            i += 3;
            continue;
        }
        let e = &rest[0];
        let step = if let Some(link) = is_sdma_copy(e) {
            CommStep::Transit { link, size: e.size, duration: e.duration }
        } else if e.task_type == CommTaskType::RdmaSend && e.transport_type == TransportType::Rdma {
            CommStep::Transit { link: LinkClass::Rdma, size: e.size, duration: e.duration }
        } else if e.task_type == CommTaskType::NotifyWait {
            CommStep::Wait { duration: e.duration }
        } else {
            CommStep::Other
        };
        steps.push(step);
        i += 1;
    }
    steps
}


#[cfg(test)]
mod tests {
    use super::fixtures::event;
    use super::*;

    #[test]
    fn recognizes_rdma_pattern_and_sdma_copies() {
        let mut local = event(CommTaskType::Memcpy, TransportType::Hccs, 0.0, 1.0, 64);
        local.dst_rank = local.src_rank;
        let events = vec![
            local,
            event(CommTaskType::RdmaSend, TransportType::Rdma, 10.0, 2.0, 4096),
            event(CommTaskType::RdmaSend, TransportType::Rdma, 12.0, 1.0, 4),
            event(CommTaskType::NotifyWait, TransportType::Local, 13.0, 7.0, 0),
            event(CommTaskType::ReduceInline, TransportType::Pcie, 20.0, 3.0, 128),
            event(CommTaskType::NotifyRecord, TransportType::Local, 23.0, 0.5, 0),
        ];
        let steps = walk(&events);
        assert_eq!(
            steps,
            vec![
                CommStep::Other,
                CommStep::Transit { link: LinkClass::Rdma, size: 4096, duration: 10.0 },
                CommStep::Transit { link: LinkClass::Pcie, size: 128, duration: 3.0 },
                CommStep::Other,
            ]
        );
    }
}
