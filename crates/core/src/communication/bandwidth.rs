// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/communication/bandwidth.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::walk::{walk, CommStep, LinkClass};
use crate::config::TransportTable;
use crate::model::CommunicationEvent;

const BYTES_PER_MB: f64 = (1u64 << 20) as f64;
const US_PER_MS: f64 = 1000.0;

/// Transfers of one exact size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeBucket {
    pub count: u64,
    pub total_duration: f64,
}

/// Traffic over one link class. Bandwidth is MB per ms, reported as GB/s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandwidthInfo {
    pub transfers: u64,
    pub transit_size_mb: f64,
    pub transit_time_ms: f64,
    pub bandwidth_gbps: Option<f64>,
    pub utilization: Option<f64>,
    pub large_packets: u64,
    pub large_packet_ratio: Option<f64>,
    /// Keyed by transfer size in bytes.
    pub size_distribution: BTreeMap<u64, SizeBucket>,
}

impl BandwidthInfo {
    fn add_transfer(&mut self, size: u64, duration_us: f64, large_threshold_mb: f64) {
        let size_mb = size as f64 / BYTES_PER_MB;
        self.transfers += 1;
        self.transit_size_mb += size_mb;
        self.transit_time_ms += duration_us / US_PER_MS;
        if size_mb > large_threshold_mb {
            self.large_packets += 1;
        }
        let bucket = self.size_distribution.entry(size).or_default();
        bucket.count += 1;
        bucket.total_duration += duration_us;
    }

    /// Fold `other` into `self` without touching derived fields.
    fn merge(&mut self, other: &BandwidthInfo) {
        self.transfers += other.transfers;
        self.transit_size_mb += other.transit_size_mb;
        self.transit_time_ms += other.transit_time_ms;
        self.large_packets += other.large_packets;
        for (size, b) in &other.size_distribution {
            let bucket = self.size_distribution.entry(*size).or_default();
            bucket.count += b.count;
            bucket.total_duration += b.total_duration;
        }
    }

    fn finish(&mut self, standard_gbps: f64) {
        self.bandwidth_gbps = (self.transit_time_ms > 0.0).then(|| self.transit_size_mb / self.transit_time_ms);
        self.utilization = self.bandwidth_gbps.map(|bw| bw / standard_gbps);
        self.large_packet_ratio = (self.transfers > 0).then(|| self.large_packets as f64 / self.transfers as f64);
    }
}

pub type BandwidthByLink = BTreeMap<LinkClass, BandwidthInfo>;

fn table_value(table: &TransportTable, link: LinkClass) -> f64 {
    match link {
        LinkClass::Hccs => table.hccs,
        LinkClass::Pcie => table.pcie,
        LinkClass::Rdma => table.rdma,
        LinkClass::Sdma => table.sdma,
    }
}

/// Computes per-link bandwidth with the configured nominal speeds and
/// large-packet thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthCalculator {
    pub standard_gbps: TransportTable,
    pub large_packet_mb: TransportTable,
}

impl Default for BandwidthCalculator {
    fn default() -> Self {
        Self {
            standard_gbps: TransportTable::standard_bandwidth(),
            large_packet_mb: TransportTable::large_packet_threshold(),
        }
    }
}

impl BandwidthCalculator {
    /// Walk every plane of one operator separately and sum the transfers.
    pub fn analyze(&self, events: &[CommunicationEvent]) -> BandwidthByLink {
        let mut planes: BTreeMap<u32, Vec<CommunicationEvent>> = BTreeMap::new();
        for e in events {
            planes.entry(e.plane_id).or_default().push(e.clone());
        }

        let mut by_link: BandwidthByLink = LinkClass::ALL.iter().map(|l| (*l, BandwidthInfo::default())).collect();
        for plane in planes.values_mut() {
            plane.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
            for step in walk(plane) {
                if let CommStep::Transit { link, size, duration } = step {
                    let mut targets = vec![link];
                    if matches!(link, LinkClass::Hccs | LinkClass::Pcie) {
                        targets.push(LinkClass::Sdma);
                    }
                    for target in targets {
                        let threshold = table_value(&self.large_packet_mb, target);
                        if let Some(info) = by_link.get_mut(&target) {
                            info.add_transfer(size, duration, threshold);
                        }
                    }
                }
            }
        }
        self.finish(&mut by_link);
        by_link
    }

    /// Sum several per-link tables and recompute the derived fields.
    pub fn rollup<'a, I>(&self, parts: I) -> BandwidthByLink
    where
        I: IntoIterator<Item = &'a BandwidthByLink>,
    {
        let mut total: BandwidthByLink = LinkClass::ALL.iter().map(|l| (*l, BandwidthInfo::default())).collect();
        for part in parts {
            for (link, info) in part {
                total.entry(*link).or_default().merge(info);
            }
        }
        self.finish(&mut total);
        total
    }

    fn finish(&self, by_link: &mut BandwidthByLink) {
        for (link, info) in by_link.iter_mut() {
            info.finish(table_value(&self.standard_gbps, *link));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::walk::fixtures::event;
    use super::*;
    use crate::model::{CommTaskType, TransportType};

    #[test]
    fn one_megabyte_per_millisecond_is_one_gbps() {
        let events = vec![event(CommTaskType::Memcpy, TransportType::Hccs, 0.0, 1000.0, 1_048_576)];
        let calc = BandwidthCalculator::default();
        let bw = calc.analyze(&events);
        let hccs = &bw[&LinkClass::Hccs];
        assert_eq!(hccs.bandwidth_gbps, Some(1.0));
        assert_eq!(hccs.utilization, Some(1.0 / calc.standard_gbps.hccs));
        assert_eq!(hccs.large_packet_ratio, Some(0.0));
        assert_eq!(bw[&LinkClass::Sdma].bandwidth_gbps, Some(1.0));
        assert_eq!(bw[&LinkClass::Pcie].bandwidth_gbps, None);
        assert_eq!(bw[&LinkClass::Rdma].transfers, 0);
    }

    #[test]
    fn planes_are_walked_independently() {
        let mut send = event(CommTaskType::RdmaSend, TransportType::Rdma, 0.0, 1.0, 2 << 20);
        send.plane_id = 1;
        let mut ack = event(CommTaskType::RdmaSend, TransportType::Rdma, 1.0, 1.0, 4);
        ack.plane_id = 1;
        let mut wait = event(CommTaskType::NotifyWait, TransportType::Local, 2.0, 998.0, 0);
        wait.plane_id = 1;
        // Interleaved with main-plane traffic, which must not break the pattern.
        let copy = event(CommTaskType::Memcpy, TransportType::Pcie, 0.5, 10.0, 1024);
        let bw = BandwidthCalculator::default().analyze(&[send, copy, ack, wait]);

        let rdma = &bw[&LinkClass::Rdma];
        assert_eq!(rdma.transfers, 1);
        assert_eq!(rdma.transit_time_ms, 1.0);
        assert_eq!(rdma.bandwidth_gbps, Some(2.0));
        assert_eq!(rdma.large_packet_ratio, Some(1.0));
        assert_eq!(bw[&LinkClass::Pcie].transfers, 1);
        assert_eq!(bw[&LinkClass::Sdma].size_distribution[&1024].count, 1);
    }

    #[test]
    fn rollup_merges_histograms() {
        let calc = BandwidthCalculator::default();
        let a = calc.analyze(&[event(CommTaskType::Memcpy, TransportType::Hccs, 0.0, 500.0, 1 << 20)]);
        let b = calc.analyze(&[event(CommTaskType::Memcpy, TransportType::Hccs, 0.0, 1500.0, 1 << 20)]);
        let total = calc.rollup([&a, &b]);
        let hccs = &total[&LinkClass::Hccs];
        assert_eq!(hccs.transfers, 2);
        assert_eq!(hccs.bandwidth_gbps, Some(1.0));
        assert_eq!(hccs.size_distribution[&(1 << 20)].count, 2);
        assert_eq!(hccs.size_distribution[&(1 << 20)].total_duration, 2000.0);
    }
}
