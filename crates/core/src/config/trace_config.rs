// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/config/trace_config.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tasktrace_formats::{HostTaskType, SourceKind};

use crate::context::{IterationContext, TailAnchor, DEFAULT_CLOCK_FREQ_MHZ, DEFAULT_STATIC_GRAPH_INDEX_ID};
use crate::error::TraceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TraceConfig {
    pub profile: Profile,                    // where the raw slices live
    #[serde(default)]
    pub sources: Vec<SourceSpec>,            // empty = every known source
    #[serde(default)]
    pub step_trace: Option<PathBuf>,         // iteration boundary table (JSON)
    #[serde(default)]
    pub iterations: Vec<IterationSpec>,      // empty = operator scene
    #[serde(default)]
    pub matching: Matching,
    #[serde(default)]
    pub critical_path: CriticalPathSettings,
    #[serde(default)]
    pub communication: CommunicationSettings,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub output: Option<Output>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(alias = "dir", alias = "profiling_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub device_id: Option<u32>,             // None = every device_* directory
    #[serde(default = "default_clock_freq_mhz")]
    pub clock_freq_mhz: f64,
    #[serde(default)]
    pub ledger: Option<PathBuf>,            // persisted windows across runs
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub kind: SourceKind,
    #[serde(default)]
    pub pattern: Option<String>,            // glob under the data dir
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationSpec {
    pub model_id: u32,
    #[serde(alias = "iteration_id")]
    pub index_id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matching {
    #[serde(default = "default_static_graph_index_id")]
    pub static_graph_index_id: u32,
    #[serde(default = "default_trace_only_task_types")]
    pub trace_only_task_types: Vec<HostTaskType>,
    #[serde(default)]
    pub tail_anchor: Option<TailAnchor>,    // last device task of the prior collection
}

impl Default for Matching {
    fn default() -> Self {
        Self {
            static_graph_index_id: default_static_graph_index_id(),
            trace_only_task_types: default_trace_only_task_types(),
            tail_anchor: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalPathSettings {
    #[serde(default = "default_gap_tolerance_us")]
    pub gap_tolerance_us: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for CriticalPathSettings {
    fn default() -> Self {
        Self { gap_tolerance_us: default_gap_tolerance_us(), top_k: default_top_k() }
    }
}

/// One value per transport class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct TransportTable {
    pub hccs: f64,
    pub pcie: f64,
    pub rdma: f64,
    pub sdma: f64,
}

impl TransportTable {
    /// Nominal link bandwidth in GB/s.
    pub fn standard_bandwidth() -> Self {
        Self { hccs: 18.0, pcie: 20.0, rdma: 12.5, sdma: 18.0 }
    }

    /// Transfer size in MB above which a packet counts as large.
    pub fn large_packet_threshold() -> Self {
        Self { hccs: 32.0, pcie: 32.0, rdma: 1.0, sdma: 32.0 }
    }

    fn values(&self) -> [f64; 4] {
        [self.hccs, self.pcie, self.rdma, self.sdma]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationSettings {
    #[serde(default)]
    pub rank_event_files: BTreeMap<u32, PathBuf>,
    #[serde(default)]
    pub main_plane_id: u32,
    #[serde(default)]
    pub local_rank: Option<u32>,            // rank whose ops join the critical path
    #[serde(default = "TransportTable::standard_bandwidth")]
    pub standard_bandwidth_gbps: TransportTable,
    #[serde(default = "TransportTable::large_packet_threshold")]
    pub large_packet_threshold_mb: TransportTable,
}

impl Default for CommunicationSettings {
    fn default() -> Self {
        Self {
            rank_event_files: BTreeMap::new(),
            main_plane_id: 0,
            local_rank: None,
            standard_bandwidth_gbps: TransportTable::standard_bandwidth(),
            large_packet_threshold_mb: TransportTable::large_packet_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub path: PathBuf,
    #[serde(default)]
    pub include_tasks: bool,                // embed every TopDownTask in the report
}

fn default_clock_freq_mhz() -> f64 {
    DEFAULT_CLOCK_FREQ_MHZ
}

fn default_static_graph_index_id() -> u32 {
    DEFAULT_STATIC_GRAPH_INDEX_ID
}

fn default_trace_only_task_types() -> Vec<HostTaskType> {
    vec![HostTaskType::ProfilerTraceEx]
}

fn default_gap_tolerance_us() -> f64 {
    1.0
}

fn default_top_k() -> usize {
    10
}

impl TraceConfig {
    /// Parse config from JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).context("Failed to parse trace JSON config")
    }

    /// Parse config from YAML string by converting to JSON first
    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        let yaml_value: serde_yaml::Value = serde_yaml::from_str(yaml_str).context("Failed to parse YAML")?;
        let json_str = serde_json::to_string(&yaml_value).context("Failed to convert YAML to JSON")?;
        Self::from_json(&json_str)
    }

    /// Load config from YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {:?}", path.as_ref()))?;
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<(), TraceError> {
        let invalid = |msg: String| Err(TraceError::InvalidConfig(msg));

        if !(self.profile.clock_freq_mhz.is_finite() && self.profile.clock_freq_mhz > 0.0) {
            return invalid(format!("clock_freq_mhz must be positive, got {}", self.profile.clock_freq_mhz));
        }
        let mut seen = BTreeSet::new();
        for source in &self.sources {
            if !seen.insert(source.kind) {
                return invalid(format!("source {} listed twice", source.kind));
            }
            if source.pattern.as_deref().is_some_and(|p| p.trim().is_empty()) {
                return invalid(format!("source {} has an empty pattern", source.kind));
            }
        }
        if !self.iterations.is_empty() && self.step_trace.is_none() {
            return invalid("iterations require a step_trace boundary table".to_string());
        }
        let cp = &self.critical_path;
        if !(cp.gap_tolerance_us.is_finite() && cp.gap_tolerance_us >= 0.0) {
            return invalid(format!("gap_tolerance_us must be >= 0, got {}", cp.gap_tolerance_us));
        }
        if cp.top_k == 0 {
            return invalid("top_k must be at least 1".to_string());
        }
        let comm = &self.communication;
        if comm.standard_bandwidth_gbps.values().iter().any(|v| !(v.is_finite() && *v > 0.0)) {
            return invalid("standard_bandwidth_gbps values must be positive".to_string());
        }
        if comm.large_packet_threshold_mb.values().iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return invalid("large_packet_threshold_mb values must be >= 0".to_string());
        }
        if self.workers == Some(0) {
            return invalid("workers must be at least 1".to_string());
        }
        Ok(())
    }

    /// Configured sources with patterns filled in, or every known source.
    pub fn effective_sources(&self) -> Vec<(SourceKind, String)> {
        if self.sources.is_empty() {
            return SourceKind::ALL.iter().map(|k| (*k, k.default_pattern())).collect();
        }
        self.sources
            .iter()
            .map(|s| (s.kind, s.pattern.clone().unwrap_or_else(|| s.kind.default_pattern())))
            .collect()
    }

    /// Worker pool size
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Context for one device, scoped to `iteration` when given.
    pub fn context_for(&self, device_id: u32, iteration: Option<&IterationSpec>) -> IterationContext {
        let ctx = match iteration {
            Some(it) => IterationContext::for_iteration(device_id, it.model_id, it.index_id),
            None => IterationContext::operator_scene(device_id),
        };
        ctx.with_clock(self.profile.clock_freq_mhz)
            .with_static_graph_index(self.matching.static_graph_index_id)
            .with_tail_anchor(self.matching.tail_anchor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
profile:
  data_dir: "/tmp/PROF_001"
  device_id: 2
  clock_freq_mhz: 50
sources:
  - kind: task_track
  - kind: hwts
    pattern: "hwts.data.*"
step_trace: "/tmp/PROF_001/step_trace.json"
iterations:
  - { model_id: 1, index_id: 3 }
matching:
  trace_only_task_types: ["PROFILER_TRACE_EX", "MODEL_EXECUTE"]
  tail_anchor: { stream_id: 5, task_id: 77 }
communication:
  rank_event_files:
    0: "/tmp/rank0.json"
  standard_bandwidth_gbps: { hccs: 30, pcie: 20, rdma: 12.5, sdma: 30 }
workers: 4
"#;
        let config = TraceConfig::from_yaml(yaml).expect("Should parse YAML");
        assert_eq!(config.profile.device_id, Some(2));
        assert_eq!(config.profile.clock_freq_mhz, 50.0);
        assert_eq!(config.iterations, vec![IterationSpec { model_id: 1, index_id: 3 }]);
        assert_eq!(
            config.matching.trace_only_task_types,
            vec![HostTaskType::ProfilerTraceEx, HostTaskType::ModelExecute]
        );
        assert_eq!(config.matching.static_graph_index_id, 0);
        assert_eq!(config.communication.standard_bandwidth_gbps.hccs, 30.0);
        assert_eq!(config.communication.large_packet_threshold_mb.rdma, 1.0);
        assert_eq!(config.worker_count(), 4);
        config.validate().unwrap();

        let sources = config.effective_sources();
        assert_eq!(sources[0], (SourceKind::TaskTrack, SourceKind::TaskTrack.default_pattern()));
        assert_eq!(sources[1], (SourceKind::Hwts, "hwts.data.*".to_string()));

        let ctx = config.context_for(2, config.iterations.first());
        assert_eq!(ctx.iteration(), Some((1, 3)));
        assert_eq!(ctx.tail_anchor, Some(TailAnchor { stream_id: 5, task_id: 77 }));
        assert_eq!(ctx.syscnt_to_us(100), 2.0);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = TraceConfig::from_yaml("profile: { data_dir: /data }").unwrap();
        assert_eq!(config.effective_sources().len(), SourceKind::ALL.len());
        assert_eq!(config.matching, Matching::default());
        assert_eq!(config.critical_path.top_k, 10);
        assert_eq!(config.critical_path.gap_tolerance_us, 1.0);
        assert!(config.worker_count() >= 1);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_trace_only_type_is_a_parse_error() {
        let yaml = "profile: { data_dir: /d }\nmatching: { trace_only_task_types: [PROFILER_TRACE] }";
        assert!(TraceConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let cases = [
            "profile: { data_dir: /d, clock_freq_mhz: 0 }",
            "profile: { data_dir: /d }\nsources: [ { kind: hwts }, { kind: hwts } ]",
            "profile: { data_dir: /d }\niterations: [ { model_id: 1, index_id: 1 } ]",
            "profile: { data_dir: /d }\ncritical_path: { top_k: 0 }",
            "profile: { data_dir: /d }\nworkers: 0",
        ];
        for yaml in cases {
            let config = TraceConfig::from_yaml(yaml).unwrap();
            assert!(
                matches!(config.validate(), Err(TraceError::InvalidConfig(_))),
                "accepted: {}",
                yaml
            );
        }
    }

    #[test]
    fn unknown_source_kind_fails_to_parse() {
        assert!(TraceConfig::from_yaml("profile: { data_dir: /d }\nsources: [ { kind: pmu } ]").is_err());
    }
}
