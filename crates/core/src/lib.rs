// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Core library for tasktrace ─ host/device task matching and trace analytics.

pub mod boundaries;
pub mod collectors;
pub mod communication;
pub mod config;
pub mod context;
pub mod critical_path;
pub mod error;
pub mod matcher;
pub mod metrics;
pub mod model;
pub mod report;
pub mod runner;

pub use boundaries::{ClockRange, IterationBoundaries, StepBoundary, StepTraceTable};
pub use collectors::{
    CollectorSet, DeviceTaskCollector, DeviceTaskTable, HostTaskCollector, HostTaskTable, UnionDeviceCollector,
    UnionHostCollector,
};
pub use communication::{CommunicationAnalyzer, CommunicationReport, LinkClass, OpRankReport};
pub use config::{yaml_to_json, TraceConfig};
pub use context::{IterationContext, TailAnchor};
pub use critical_path::{CriticalPathAnalyzer, CriticalPathReport};
pub use error::TraceError;
pub use matcher::{MatchOptions, MatchOutcome, MatchStats, TaskMatcher};
pub use metrics::RunMetrics;
pub use model::{
    CommTaskType, CommunicationEvent, CorrelationKey, CriticalPathEvent, DeviceTask, DeviceTaskType, HostTask,
    HostTaskType, MatchStatus, TopDownTask, TraceEventKind, TransportType,
};
pub use report::PipelineReport;
pub use runner::TracePipeline;
