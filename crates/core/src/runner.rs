// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/runner.rs
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use tasktrace_formats::DecoderRegistry;
use tasktrace_storage::{JsonLedger, PersistedCounts};

use crate::boundaries::{IterationBoundaries, StepTraceTable};
use crate::collectors::{CollectorSet, DeviceTaskCollector, HostTaskCollector};
use crate::communication::{load_ranks, CommunicationAnalyzer, CommunicationReport};
use crate::config::{IterationSpec, TraceConfig};
use crate::context::IterationContext;
use crate::critical_path::CriticalPathAnalyzer;
use crate::matcher::{MatchOptions, TaskMatcher};
use crate::model::CriticalPathEvent;
use crate::report::{FailureKind, IterationReport, PipelineReport, SourceWindow, UnitFailure};

/// End-to-end run: decode, collect, match, then analyze each iteration.
pub struct TracePipeline {
    config: Arc<TraceConfig>,
    registry: DecoderRegistry,
    boundaries: Arc<dyn IterationBoundaries>,
}

impl TracePipeline {
    pub fn new(config: TraceConfig) -> Result<Self> {
        config.validate()?;
        let boundaries: Arc<dyn IterationBoundaries> = match &config.step_trace {
            Some(path) => Arc::new(StepTraceTable::from_json_file(path)?),
            None => Arc::new(()),
        };
        Ok(Self { config: Arc::new(config), registry: DecoderRegistry::standard(), boundaries })
    }

    /// Replace the decoder set, e.g. to add a source.
    pub fn with_registry(mut self, registry: DecoderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Run inside a pool sized by `workers`.
    pub fn run(&self) -> Result<PipelineReport> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_count())
            .build()
            .context("Failed to build worker pool")?;
        pool.install(|| self.run_inner())
    }

    fn run_inner(&self) -> Result<PipelineReport> {
        let started = Instant::now();
        let profile = &self.config.profile;
        info!("Starting trace analysis of {:?}", profile.data_dir);
        let mut report = PipelineReport::new(&profile.data_dir);

        let mut ledger = profile.ledger.as_ref().map(JsonLedger::open).transpose()?;
        let persisted: Arc<dyn PersistedCounts + Send + Sync> = match &ledger {
            Some(l) => Arc::new(l.clone()),
            None => Arc::new(()),
        };
        let collectors = CollectorSet::from_sources(
            &profile.data_dir,
            &self.config.effective_sources(),
            &self.registry,
            persisted,
        )?;

        // Communication first: its operators join the critical path.
        let t = Instant::now();
        let communication = self.run_communication(&mut report);
        report.metrics.record_stage("communication", t.elapsed());

        let devices = match profile.device_id {
            Some(d) => vec![d],
            None => discover_devices(&profile.data_dir)?,
        };
        if devices.is_empty() {
            warn!("No device_* directories under {:?}", profile.data_dir);
        }

        let scopes: Vec<Option<&IterationSpec>> = if self.config.iterations.is_empty() {
            vec![None]
        } else {
            self.config.iterations.iter().map(Some).collect()
        };
        for device_id in devices {
            for scope in &scopes {
                let ctx = self.config.context_for(device_id, *scope);
                match self.run_unit(&ctx, &collectors, communication.as_ref(), &mut report) {
                    Ok(unit) => {
                        report.metrics.record_unit(true);
                        report.iterations.push(unit);
                    }
                    Err(e) => {
                        warn!("{} skipped: {:#}", ctx.label(), e);
                        report.metrics.record_unit(false);
                        report.failures.push(UnitFailure::from_error(ctx.label(), &e));
                    }
                }
            }
        }

        for snapshot in collectors.snapshots() {
            report.metrics.record_snapshot(&snapshot);
            if let Some(l) = ledger.as_mut() {
                l.record(&snapshot.ledger_key(), snapshot.window, snapshot.total_available);
            }
            report.windows.push(SourceWindow::from(snapshot.as_ref()));
        }
        if let Some(l) = &ledger {
            l.save()?;
        }
        report.communication = communication;
        report.metrics.record_total_time(started.elapsed());

        if let Some(output) = &self.config.output {
            report.save_json(&output.path)?;
        }
        info!(
            "✅ Trace analysis finished: {} units, {} failures",
            report.iterations.len(),
            report.failures.len()
        );
        Ok(report)
    }

    fn run_communication(&self, report: &mut PipelineReport) -> Option<CommunicationReport> {
        let settings = &self.config.communication;
        if settings.rank_event_files.is_empty() {
            return None;
        }
        let (ranks, load_failures) = load_ranks(&settings.rank_event_files);
        let mut comm = CommunicationAnalyzer::new(settings).analyze(&ranks);
        comm.failures.extend(load_failures);
        for f in &comm.failures {
            let scope = match &f.op_name {
                Some(op) => format!("rank {} op {}", f.rank, op),
                None => format!("rank {}", f.rank),
            };
            let kind = if f.precondition { FailureKind::Precondition } else { FailureKind::Other };
            report.failures.push(UnitFailure { scope, kind, reason: f.reason.clone() });
        }
        Some(comm)
    }

    fn run_unit(
        &self,
        ctx: &IterationContext,
        collectors: &CollectorSet,
        communication: Option<&CommunicationReport>,
        report: &mut PipelineReport,
    ) -> Result<IterationReport> {
        let t = Instant::now();
        let hosts = collectors.host.get_iteration(ctx)?;
        let devices = match ctx.iteration() {
            Some(_) => collectors
                .device
                .get_iteration(ctx, self.boundaries.as_ref())?
                .unwrap_or_default(),
            None => collectors.device.get(ctx)?,
        };
        report.metrics.record_stage("collect", t.elapsed());

        let t = Instant::now();
        let matcher = TaskMatcher::new(MatchOptions {
            trace_only_task_types: self.config.matching.trace_only_task_types.clone(),
        });
        let outcome = matcher.match_tasks(&hosts, &devices, ctx)?;
        report.metrics.record_match(&outcome.stats);
        report.metrics.record_stage("match", t.elapsed());

        let t = Instant::now();
        let mut events: Vec<CriticalPathEvent> = outcome.all.iter().filter_map(|task| task.to_trace_event()).collect();
        if let Some(comm) = communication {
            let rank = self.config.communication.local_rank.or(ctx.device_id).unwrap_or_default();
            events.extend(comm_events_in_window(comm.trace_events(rank), &events));
        }
        let critical_path = match CriticalPathAnalyzer::new(self.config.critical_path.clone()).analyze(&events) {
            Ok(cp) => Some(cp),
            Err(e) => {
                let e = anyhow::Error::from(e);
                warn!("{}: {:#}", ctx.label(), e);
                report.failures.push(UnitFailure::from_error(format!("{} critical path", ctx.label()), &e));
                None
            }
        };
        report.metrics.record_stage("critical_path", t.elapsed());

        let include_tasks = self.config.output.as_ref().is_some_and(|o| o.include_tasks);
        Ok(IterationReport {
            device_id: ctx.device_id.unwrap_or_default(),
            model_id: ctx.model_id,
            iteration_id: ctx.iteration_id,
            match_stats: outcome.stats,
            critical_path,
            tasks: include_tasks.then_some(outcome.all),
        })
    }
}

/// Communication operators overlapping the span of the task events. With no
/// task events every operator is kept.
fn comm_events_in_window(comm: Vec<CriticalPathEvent>, tasks: &[CriticalPathEvent]) -> Vec<CriticalPathEvent> {
    if tasks.is_empty() {
        return comm;
    }
    let start = tasks.iter().map(|e| e.start).fold(f64::INFINITY, f64::min);
    let end = tasks.iter().map(|e| e.end).fold(f64::NEG_INFINITY, f64::max);
    comm.into_iter().filter(|e| e.start < end && e.end > start).collect()
}

/// Device ids of the `device_<id>` directories under a profiling root.
pub fn discover_devices<P: AsRef<Path>>(root: P) -> Result<Vec<u32>> {
    let root = root.as_ref();
    let entries = std::fs::read_dir(root).with_context(|| format!("Failed to list profiling dir {:?}", root))?;
    let mut devices = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name();
        if let Some(id) = name
            .to_str()
            .and_then(|n| n.strip_prefix("device_"))
            .and_then(|id| id.parse::<u32>().ok())
        {
            devices.push(id);
        }
    }
    devices.sort_unstable();
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TraceEventKind;

    #[test]
    fn discovers_device_directories() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["device_3", "device_0", "host", "device_x"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("device_9"), b"").unwrap();
        assert_eq!(discover_devices(dir.path()).unwrap(), vec![0, 3]);
        assert!(discover_devices(dir.path().join("nope")).is_err());
    }

    #[test]
    fn comm_events_are_clipped_to_the_task_span() {
        let tasks = vec![CriticalPathEvent::new("k", TraceEventKind::AiCore, "stream:1", 10.0, 20.0)];
        let comm = vec![
            CriticalPathEvent::new("before", TraceEventKind::Communication, "comm:g", 0.0, 5.0),
            CriticalPathEvent::new("inside", TraceEventKind::Communication, "comm:g", 15.0, 25.0),
        ];
        let kept = comm_events_in_window(comm.clone(), &tasks);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "inside");
        assert_eq!(comm_events_in_window(comm, &[]).len(), 2);
    }
}
