// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/report.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use tasktrace_formats::SourceKind;
use tasktrace_storage::RecordWindow;

use crate::collectors::SourceSnapshot;
use crate::communication::CommunicationReport;
use crate::critical_path::CriticalPathReport;
use crate::error::TraceError;
use crate::matcher::MatchStats;
use crate::metrics::RunMetrics;
use crate::model::TopDownTask;

/// Window that was decoded for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceWindow {
    pub key: String,
    pub source: SourceKind,
    pub files: usize,
    pub total_available: u64,
    pub window: RecordWindow,
    pub rejected: u64,
    pub tail_discarded: u64,
}

impl From<&SourceSnapshot> for SourceWindow {
    fn from(s: &SourceSnapshot) -> Self {
        Self {
            key: s.ledger_key(),
            source: s.source,
            files: s.files,
            total_available: s.total_available,
            window: s.window,
            rejected: s.rejected,
            tail_discarded: s.tail_discarded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationReport {
    pub device_id: u32,
    pub model_id: Option<u32>,
    pub iteration_id: Option<u32>,
    pub match_stats: MatchStats,
    pub critical_path: Option<CriticalPathReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<TopDownTask>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Missing lookup or empty required input.
    Precondition,
    Other,
}

/// A unit of work (iteration, op, rank) that produced no result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub scope: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl UnitFailure {
    pub fn from_error(scope: impl Into<String>, err: &anyhow::Error) -> Self {
        let kind = if TraceError::is_precondition(err) {
            FailureKind::Precondition
        } else {
            FailureKind::Other
        };
        Self { scope: scope.into(), kind, reason: format!("{:#}", err) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub data_dir: PathBuf,
    pub windows: Vec<SourceWindow>,
    pub iterations: Vec<IterationReport>,
    pub communication: Option<CommunicationReport>,
    pub metrics: RunMetrics,
    pub failures: Vec<UnitFailure>,
}

impl PipelineReport {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            data_dir: data_dir.into(),
            windows: Vec::new(),
            iterations: Vec::new(),
            communication: None,
            metrics: RunMetrics::new(),
            failures: Vec::new(),
        }
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let text = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, text).with_context(|| format!("Failed to write report {:?}", path))?;
        info!("📝 Report {} written to {:?}", self.run_id, path);
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read report {:?}", path.as_ref()))?;
        serde_json::from_str(&text).context("Failed to parse report")
    }
}
