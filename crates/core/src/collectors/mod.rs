// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/collectors/mod.rs
//
// Event collectors: thin adapters that turn one source (a decoded file set or
// an in-memory table) into HostTask or DeviceTask lists, plus unions that
// compose them.

pub mod pairing;
pub mod source;

pub use pairing::{pair_device_logs, RawSpan};
pub use source::{data_dir, ledger_key, RecordSource, SourceSnapshot};

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use tasktrace_formats::{DecoderRegistry, Side, SourceKind, TypedEvent};
use tasktrace_storage::PersistedCounts;

use crate::boundaries::IterationBoundaries;
use crate::context::IterationContext;
use crate::error::TraceError;
use crate::model::{DeviceTask, HostTask};

/// Source of host-side task submissions.
pub trait HostTaskCollector: Send + Sync {
    fn name(&self) -> &str;

    /// Every host task, restricted to `ctx.device_id` when it is set.
    fn get(&self, ctx: &IterationContext) -> Result<Vec<HostTask>>;

    /// Host tasks of the context's iteration, plus the model's static-graph
    /// tasks. Without an iteration in `ctx` this is [`get`](Self::get).
    fn get_iteration(&self, ctx: &IterationContext) -> Result<Vec<HostTask>> {
        let tasks = self.get(ctx)?;
        Ok(match ctx.iteration() {
            Some(_) => tasks.into_iter().filter(|t| host_in_iteration(t, ctx)).collect(),
            None => tasks,
        })
    }
}

/// Source of device-side task executions.
pub trait DeviceTaskCollector: Send + Sync {
    fn name(&self) -> &str;

    /// Every device task recorded for `ctx.device_id`.
    fn get(&self, ctx: &IterationContext) -> Result<Vec<DeviceTask>>;

    /// Device tasks inside the iteration's clock range, or `None` when the
    /// boundary lookup has nothing for this source.
    fn get_iteration(
        &self,
        ctx: &IterationContext,
        boundaries: &dyn IterationBoundaries,
    ) -> Result<Option<Vec<DeviceTask>>>;
}

/// Iteration membership for host tasks: same model, and either the
/// iteration's index or the static-graph sentinel.
pub fn host_in_iteration(task: &HostTask, ctx: &IterationContext) -> bool {
    match ctx.iteration() {
        Some((model_id, iteration_id)) => {
            task.model_id == model_id
                && (task.index_id == iteration_id || task.index_id == ctx.static_graph_index_id)
        }
        None => true,
    }
}

/// Host tasks decoded from a rotated file set.
#[derive(Debug, Clone)]
pub struct HostRecordCollector {
    source: Arc<RecordSource>,
}

impl HostRecordCollector {
    pub fn new(source: Arc<RecordSource>) -> Self {
        Self { source }
    }
}

impl HostTaskCollector for HostRecordCollector {
    fn name(&self) -> &str {
        self.source.kind().name()
    }

    fn get(&self, ctx: &IterationContext) -> Result<Vec<HostTask>> {
        let snapshot = self.source.snapshot(ctx.device_id.unwrap_or(0), None)?;
        let tasks = snapshot
            .events
            .iter()
            .filter_map(|event| match event {
                TypedEvent::HostTask(r) => Some(r),
                _ => None,
            })
            .filter(|r| ctx.device_id.map_or(true, |d| r.device_id == d))
            .map(|r| HostTask {
                device_id: r.device_id,
                model_id: r.model_id,
                index_id: r.index_id,
                stream_id: r.stream_id,
                task_id: r.task_id,
                context_id: r.context_id,
                batch_id: r.batch_id,
                task_type: r.task_type,
                timestamp: ctx.syscnt_to_us(r.sys_cnt),
            })
            .collect();
        Ok(tasks)
    }
}

/// Device tasks decoded from a rotated file set, start/end logs paired.
#[derive(Debug, Clone)]
pub struct DeviceRecordCollector {
    source: Arc<RecordSource>,
}

impl DeviceRecordCollector {
    pub fn new(source: Arc<RecordSource>) -> Self {
        Self { source }
    }

    fn spans(&self, ctx: &IterationContext) -> Result<Vec<RawSpan>> {
        let device_id = ctx.require_device()?;
        let snapshot = self.source.snapshot(device_id, ctx.tail_anchor)?;
        Ok(pair_device_logs(self.source.kind(), &snapshot.events))
    }
}

impl DeviceTaskCollector for DeviceRecordCollector {
    fn name(&self) -> &str {
        self.source.kind().name()
    }

    fn get(&self, ctx: &IterationContext) -> Result<Vec<DeviceTask>> {
        Ok(self
            .spans(ctx)?
            .iter()
            .map(|s| s.to_device_task(ctx.clock_freq_mhz))
            .collect())
    }

    fn get_iteration(
        &self,
        ctx: &IterationContext,
        boundaries: &dyn IterationBoundaries,
    ) -> Result<Option<Vec<DeviceTask>>> {
        let Some((model_id, iteration_id)) = ctx.iteration() else {
            return self.get(ctx).map(Some);
        };
        let Some(range) = boundaries.clock_range(self.source.kind(), model_id, iteration_id) else {
            debug!("{}: no boundary for {}", self.name(), ctx.label());
            return Ok(None);
        };
        Ok(Some(
            self.spans(ctx)?
                .iter()
                .filter(|s| s.within(&range))
                .map(|s| s.to_device_task(ctx.clock_freq_mhz))
                .collect(),
        ))
    }
}

/// Host tasks already materialized elsewhere, e.g. loaded from a table.
#[derive(Debug, Clone, Default)]
pub struct HostTaskTable {
    name: String,
    tasks: Vec<HostTask>,
}

impl HostTaskTable {
    pub fn new(name: impl Into<String>, tasks: Vec<HostTask>) -> Self {
        Self { name: name.into(), tasks }
    }
}

impl HostTaskCollector for HostTaskTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, ctx: &IterationContext) -> Result<Vec<HostTask>> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| ctx.device_id.map_or(true, |d| t.device_id == d))
            .cloned()
            .collect())
    }
}

/// Device tasks already materialized elsewhere. Times are microseconds, so
/// boundary clocks are converted before filtering.
#[derive(Debug, Clone)]
pub struct DeviceTaskTable {
    source: SourceKind,
    tasks: Vec<DeviceTask>,
}

impl DeviceTaskTable {
    pub fn new(source: SourceKind, tasks: Vec<DeviceTask>) -> Self {
        Self { source, tasks }
    }
}

impl DeviceTaskCollector for DeviceTaskTable {
    fn name(&self) -> &str {
        self.source.name()
    }

    fn get(&self, _ctx: &IterationContext) -> Result<Vec<DeviceTask>> {
        Ok(self.tasks.clone())
    }

    fn get_iteration(
        &self,
        ctx: &IterationContext,
        boundaries: &dyn IterationBoundaries,
    ) -> Result<Option<Vec<DeviceTask>>> {
        let Some((model_id, iteration_id)) = ctx.iteration() else {
            return self.get(ctx).map(Some);
        };
        let Some(range) = boundaries.clock_range(self.source, model_id, iteration_id) else {
            return Ok(None);
        };
        let start = ctx.syscnt_to_us(range.start);
        let end = ctx.syscnt_to_us(range.end);
        Ok(Some(
            self.tasks
                .iter()
                .filter(|t| start <= t.start_time && t.start_time < end)
                .cloned()
                .collect(),
        ))
    }
}

/// Union of host collectors.
#[derive(Clone, Default)]
pub struct UnionHostCollector {
    parts: Vec<Arc<dyn HostTaskCollector>>,
}

impl UnionHostCollector {
    pub fn new(parts: Vec<Arc<dyn HostTaskCollector>>) -> Self {
        Self { parts }
    }

    pub fn push(&mut self, part: Arc<dyn HostTaskCollector>) {
        self.parts.push(part);
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn gather<F>(&self, fetch: F) -> Result<Vec<HostTask>>
    where
        F: Fn(&dyn HostTaskCollector) -> Result<Vec<HostTask>> + Sync,
    {
        let parts: Vec<Vec<HostTask>> = self
            .parts
            .par_iter()
            .map(|c| fetch(c.as_ref()).with_context(|| format!("host collector {}", c.name())))
            .collect::<Result<_>>()?;
        let mut all: Vec<HostTask> = parts.into_iter().flatten().collect();
        all.sort_by(|a, b| {
            a.timestamp
                .total_cmp(&b.timestamp)
                .then_with(|| (a.key(), a.batch_id).cmp(&(b.key(), b.batch_id)))
        });
        Ok(all)
    }
}

impl HostTaskCollector for UnionHostCollector {
    fn name(&self) -> &str {
        "host_union"
    }

    fn get(&self, ctx: &IterationContext) -> Result<Vec<HostTask>> {
        self.gather(|c| c.get(ctx))
    }

    fn get_iteration(&self, ctx: &IterationContext) -> Result<Vec<HostTask>> {
        self.gather(|c| c.get_iteration(ctx))
    }
}

/// Union of device collectors.
///
/// The unscoped query unions every part. The iteration query unions only the
/// parts whose boundary lookup succeeded, and fails when none did.
#[derive(Clone, Default)]
pub struct UnionDeviceCollector {
    parts: Vec<Arc<dyn DeviceTaskCollector>>,
}

impl UnionDeviceCollector {
    pub fn new(parts: Vec<Arc<dyn DeviceTaskCollector>>) -> Self {
        Self { parts }
    }

    pub fn push(&mut self, part: Arc<dyn DeviceTaskCollector>) {
        self.parts.push(part);
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

fn sort_device_tasks(tasks: &mut [DeviceTask]) {
    tasks.sort_by(|a, b| a.start_time.total_cmp(&b.start_time).then_with(|| a.key().cmp(&b.key())));
}

impl DeviceTaskCollector for UnionDeviceCollector {
    fn name(&self) -> &str {
        "device_union"
    }

    fn get(&self, ctx: &IterationContext) -> Result<Vec<DeviceTask>> {
        let parts: Vec<Vec<DeviceTask>> = self
            .parts
            .par_iter()
            .map(|c| c.get(ctx).with_context(|| format!("device collector {}", c.name())))
            .collect::<Result<_>>()?;
        let mut all: Vec<DeviceTask> = parts.into_iter().flatten().collect();
        sort_device_tasks(&mut all);
        Ok(all)
    }

    fn get_iteration(
        &self,
        ctx: &IterationContext,
        boundaries: &dyn IterationBoundaries,
    ) -> Result<Option<Vec<DeviceTask>>> {
        let Some((model_id, iteration_id)) = ctx.iteration() else {
            return self.get(ctx).map(Some);
        };
        let parts: Vec<Option<Vec<DeviceTask>>> = self
            .parts
            .par_iter()
            .map(|c| {
                c.get_iteration(ctx, boundaries)
                    .with_context(|| format!("device collector {}", c.name()))
            })
            .collect::<Result<_>>()?;

        let scoped: Vec<Vec<DeviceTask>> = parts.into_iter().flatten().collect();
        if scoped.is_empty() {
            return Err(TraceError::IterationBoundaryMissing { model_id, iteration_id }.into());
        }
        debug!("{}: {} of {} device sources scoped", ctx.label(), scoped.len(), self.parts.len());
        let mut all: Vec<DeviceTask> = scoped.into_iter().flatten().collect();
        sort_device_tasks(&mut all);
        Ok(Some(all))
    }
}

/// Host and device unions built over raw file sources, keeping the sources
/// so their windows can be written back to the ledger.
#[derive(Clone, Default)]
pub struct CollectorSet {
    pub host: UnionHostCollector,
    pub device: UnionDeviceCollector,
    pub sources: Vec<Arc<RecordSource>>,
}

impl CollectorSet {
    /// One collector per `(kind, pattern)` found in the registry.
    pub fn from_sources<P: AsRef<Path>>(
        root: P,
        sources: &[(SourceKind, String)],
        registry: &DecoderRegistry,
        persisted: Arc<dyn PersistedCounts + Send + Sync>,
    ) -> Result<Self> {
        let mut set = CollectorSet::default();
        for (kind, pattern) in sources {
            let decoder = registry
                .get(*kind)
                .ok_or_else(|| TraceError::InvalidConfig(format!("no decoder registered for {}", kind)))?;
            let source = Arc::new(RecordSource::new(root.as_ref(), pattern.clone(), decoder, Arc::clone(&persisted)));
            match kind.side() {
                Side::Host => set.host.push(Arc::new(HostRecordCollector::new(Arc::clone(&source)))),
                Side::Device => set.device.push(Arc::new(DeviceRecordCollector::new(Arc::clone(&source)))),
            }
            set.sources.push(source);
        }
        info!(
            "Configured {} host and {} device sources under {:?}",
            set.host.len(),
            set.device.len(),
            root.as_ref()
        );
        Ok(set)
    }

    /// Every snapshot decoded so far across all sources.
    pub fn snapshots(&self) -> Vec<Arc<SourceSnapshot>> {
        self.sources.iter().flat_map(|s| s.snapshots()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundaries::{StepBoundary, StepTraceTable};
    use tasktrace_formats::{DeviceTaskType, HostTaskType};

    fn host(device_id: u32, model_id: u32, index_id: u32, task_id: u32) -> HostTask {
        HostTask {
            device_id,
            model_id,
            index_id,
            stream_id: 1,
            task_id,
            context_id: u32::MAX,
            batch_id: 0,
            task_type: HostTaskType::KernelAicore,
            timestamp: task_id as f64,
        }
    }

    fn device(task_id: u32, start_time: f64) -> DeviceTask {
        DeviceTask {
            stream_id: 1,
            task_id,
            context_id: u32::MAX,
            start_time,
            duration: 1.0,
            task_type: DeviceTaskType::AiCore,
        }
    }

    fn steps(sources: Option<Vec<SourceKind>>) -> StepTraceTable {
        StepTraceTable::new(vec![StepBoundary {
            model_id: 1,
            index_id: 2,
            start_clock: 1_000,
            end_clock: 2_000,
            sources,
        }])
    }

    #[test]
    fn host_iteration_keeps_static_graph_tasks() {
        let table = HostTaskTable::new(
            "runtime",
            vec![host(0, 1, 2, 1), host(0, 1, 3, 2), host(0, 1, 0, 3), host(0, 9, 2, 4), host(1, 1, 2, 5)],
        );
        let ctx = IterationContext::for_iteration(0, 1, 2);
        let ids: Vec<u32> = table.get_iteration(&ctx).unwrap().iter().map(|t| t.task_id).collect();
        assert_eq!(ids, vec![1, 3]);

        let all = IterationContext { device_id: None, ..IterationContext::default() };
        assert_eq!(table.get(&all).unwrap().len(), 5);
    }

    #[test]
    fn device_union_skips_sources_without_boundaries() {
        // 100 MHz: the boundary [1000, 2000) ticks is [10, 20) us.
        let hwts = DeviceTaskTable::new(SourceKind::Hwts, vec![device(1, 5.0), device(2, 12.0)]);
        let ai_cpu = DeviceTaskTable::new(SourceKind::AiCpu, vec![device(3, 15.0)]);
        let union = UnionDeviceCollector::new(vec![Arc::new(hwts), Arc::new(ai_cpu)]);

        let ctx = IterationContext::for_iteration(0, 1, 2);
        let scoped = union
            .get_iteration(&ctx, &steps(Some(vec![SourceKind::Hwts])))
            .unwrap()
            .unwrap();
        assert_eq!(scoped.iter().map(|t| t.task_id).collect::<Vec<_>>(), vec![2]);

        let both = union.get_iteration(&ctx, &steps(None)).unwrap().unwrap();
        assert_eq!(both.iter().map(|t| t.task_id).collect::<Vec<_>>(), vec![2, 3]);

        assert_eq!(union.get(&ctx).unwrap().len(), 3);
    }

    #[test]
    fn device_union_without_any_boundary_is_a_precondition_error() {
        let union = UnionDeviceCollector::new(vec![Arc::new(DeviceTaskTable::new(
            SourceKind::Hwts,
            vec![device(1, 5.0)],
        ))]);
        let err = union
            .get_iteration(&IterationContext::for_iteration(0, 7, 7), &steps(None))
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<TraceError>(),
            Some(&TraceError::IterationBoundaryMissing { model_id: 7, iteration_id: 7 })
        );
    }

    #[test]
    fn collector_set_requires_registered_decoders() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![(SourceKind::Hwts, SourceKind::Hwts.default_pattern())];
        let err = CollectorSet::from_sources(dir.path(), &sources, &DecoderRegistry::empty(), Arc::new(()));
        assert!(err.is_err());

        let set = CollectorSet::from_sources(dir.path(), &sources, &DecoderRegistry::standard(), Arc::new(())).unwrap();
        assert_eq!(set.device.len(), 1);
        assert!(set.host.is_empty());
        let tasks = set.device.get(&IterationContext::operator_scene(0)).unwrap();
        assert!(tasks.is_empty());
    }
}
