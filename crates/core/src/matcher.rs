// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/matcher.rs
//
// Host/device task matching. Tasks are grouped by correlation key and each
// group is matched independently with two cursors over immutable slices.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::AddAssign;
use tracing::{debug, error, info, Span};

use crate::context::IterationContext;
use crate::error::TraceError;
use crate::model::{CorrelationKey, DeviceTask, HostTask, HostTaskType, TopDownTask, INVALID_ID};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOptions {
    /// Host task types that may be logged without a balanced device side.
    pub trace_only_task_types: Vec<HostTaskType>,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self { trace_only_task_types: vec![HostTaskType::ProfilerTraceEx] }
    }
}

/// Counters describing how well the two sides lined up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStats {
    pub buckets: usize,
    pub host_tasks: usize,
    pub device_tasks: usize,
    pub matched: usize,
    pub static_fanout: usize,
    pub host_only: usize,
    pub device_only: usize,
    pub noise_dropped: usize,
    pub batch_gaps: usize,
}

impl MatchStats {
    pub fn mismatched(&self) -> usize {
        self.host_only + self.device_only
    }
}

impl AddAssign for MatchStats {
    fn add_assign(&mut self, other: Self) {
        self.buckets += other.buckets;
        self.host_tasks += other.host_tasks;
        self.device_tasks += other.device_tasks;
        self.matched += other.matched;
        self.static_fanout += other.static_fanout;
        self.host_only += other.host_only;
        self.device_only += other.device_only;
        self.noise_dropped += other.noise_dropped;
        self.batch_gaps += other.batch_gaps;
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    /// Tasks seen on both sides, ordered by start time.
    pub matched: Vec<TopDownTask>,
    /// Matched plus one-sided tasks, ordered by start time.
    pub all: Vec<TopDownTask>,
    pub stats: MatchStats,
}

struct Bucket<'a> {
    key: CorrelationKey,
    hosts: Vec<&'a HostTask>,
    devices: Vec<&'a DeviceTask>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskMatcher {
    options: MatchOptions,
}

impl TaskMatcher {
    pub fn new(options: MatchOptions) -> Self {
        Self { options }
    }

    /// Match one collection's host and device tasks.
    ///
    /// Fails only when host tasks from several devices are mixed and the
    /// context names no device to keep.
    pub fn match_tasks(
        &self,
        hosts: &[HostTask],
        devices: &[DeviceTask],
        ctx: &IterationContext,
    ) -> Result<MatchOutcome, TraceError> {
        let hosts = select_device(hosts, ctx)?;

        let mut groups: BTreeMap<CorrelationKey, Bucket> = BTreeMap::new();
        for host in hosts {
            groups
                .entry(host.key())
                .or_insert_with(|| Bucket { key: host.key(), hosts: Vec::new(), devices: Vec::new() })
                .hosts
                .push(host);
        }
        for device in devices {
            groups
                .entry(device.key())
                .or_insert_with(|| Bucket { key: device.key(), hosts: Vec::new(), devices: Vec::new() })
                .devices
                .push(device);
        }

        let buckets: Vec<Bucket> = groups.into_values().collect();
        let span = Span::current();
        let results: Vec<(Vec<TopDownTask>, MatchStats)> = buckets
            .par_iter()
            .map(|b| {
                let _entered = span.enter();
                self.match_bucket(b, ctx)
            })
            .collect();

        let mut outcome = MatchOutcome::default();
        for (tasks, stats) in results {
            outcome.stats += stats;
            outcome.all.extend(tasks);
        }
        outcome.all.sort_by(|a, b| {
            a.start_time
                .total_cmp(&b.start_time)
                .then_with(|| (a.key(), a.batch_id).cmp(&(b.key(), b.batch_id)))
        });
        outcome.matched = outcome.all.iter().filter(|t| !t.is_mismatched()).cloned().collect();

        let s = &outcome.stats;
        info!(
            "🔗 {}: {} matched ({} static fan-out), {} host-only, {} device-only across {} keys",
            ctx.label(),
            s.matched,
            s.static_fanout,
            s.host_only,
            s.device_only,
            s.buckets
        );
        Ok(outcome)
    }

    fn is_noise(&self, host: &HostTask) -> bool {
        self.options.trace_only_task_types.contains(&host.task_type)
    }

    fn match_bucket(&self, bucket: &Bucket, ctx: &IterationContext) -> (Vec<TopDownTask>, MatchStats) {
        let mut stats = MatchStats {
            buckets: 1,
            host_tasks: bucket.hosts.len(),
            device_tasks: bucket.devices.len(),
            ..Default::default()
        };

        let mut hosts = bucket.hosts.clone();
        hosts.sort_by_key(|h| h.batch_id);
        let mut devices = bucket.devices.clone();
        devices.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        // Static graph: one global submission replayed on every execution.
        if hosts.len() == 1 && hosts[0].index_id == ctx.static_graph_index_id && !devices.is_empty() {
            let tasks: Vec<TopDownTask> = devices.iter().map(|d| TopDownTask::matched(hosts[0], d)).collect();
            stats.matched = tasks.len();
            stats.static_fanout = tasks.len();
            return (tasks, stats);
        }

        // Batch ids of dropped trace-only tasks are not gaps.
        let mut noise_batches = BTreeSet::new();
        if !hosts.is_empty() && !devices.is_empty() && hosts.len() != devices.len() {
            let (noise, kept): (Vec<&HostTask>, Vec<&HostTask>) = hosts.iter().copied().partition(|h| self.is_noise(h));
            if kept.len() == devices.len() {
                debug!("{}: dropped {} trace-only host tasks", bucket.key, noise.len());
                stats.noise_dropped = noise.len();
                noise_batches.extend(noise.iter().map(|h| h.batch_id));
                hosts = kept;
            }
        }
        let known_mismatch = !hosts.is_empty() && !devices.is_empty() && hosts.len() != devices.len();

        let paired = hosts.len().min(devices.len());
        let mut tasks = Vec::with_capacity(hosts.len().max(devices.len()));
        let mut last_batch: Option<u32> = None;
        for (host, device) in hosts[..paired].iter().zip(&devices[..paired]) {
            if let Some(prev) = last_batch {
                let mut expected = prev.wrapping_add(1);
                while expected != host.batch_id && noise_batches.contains(&expected) {
                    expected = expected.wrapping_add(1);
                }
                if host.batch_id != expected {
                    error!(
                        "{}: batch id jumped from {} to {}, host tasks were lost",
                        bucket.key, prev, host.batch_id
                    );
                    stats.batch_gaps += 1;
                }
            }
            last_batch = Some(host.batch_id);
            tasks.push(TopDownTask::matched(host, device));
        }
        stats.matched = paired;

        let (model_id, iteration_id) = ctx.iteration().unwrap_or((INVALID_ID, INVALID_ID));
        let host_left = &hosts[paired..];
        let device_left = &devices[paired..];
        tasks.extend(host_left.iter().map(|h| TopDownTask::host_only(h)));
        tasks.extend(device_left.iter().map(|d| TopDownTask::device_only(d, model_id, iteration_id)));
        stats.host_only = host_left.len();
        stats.device_only = device_left.len();

        if !host_left.is_empty() || !device_left.is_empty() {
            if known_mismatch {
                error!(
                    "{}: {} host tasks vs {} device tasks, {} host-only and {} device-only left",
                    bucket.key,
                    hosts.len(),
                    devices.len(),
                    host_left.len(),
                    device_left.len()
                );
            } else {
                debug!(
                    "{}: {} host-only and {} device-only tasks",
                    bucket.key,
                    host_left.len(),
                    device_left.len()
                );
            }
        }
        (tasks, stats)
    }
}

/// Host tasks belonging to the context's device.
fn select_device<'a>(hosts: &'a [HostTask], ctx: &IterationContext) -> Result<Vec<&'a HostTask>, TraceError> {
    match ctx.device_id {
        Some(device_id) => Ok(hosts.iter().filter(|h| h.device_id == device_id).collect()),
        None => {
            let devices: BTreeSet<u32> = hosts.iter().map(|h| h.device_id).collect();
            if devices.len() > 1 {
                return Err(TraceError::MissingDeviceId { devices: devices.len() });
            }
            Ok(hosts.iter().collect())
        }
    }
}
