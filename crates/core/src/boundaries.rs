// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/boundaries.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tasktrace_formats::SourceKind;

/// Half-open range of raw hardware clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockRange {
    pub start: u64,
    pub end: u64,
}

impl ClockRange {
    pub fn contains(&self, sys_cnt: u64) -> bool {
        self.start <= sys_cnt && sys_cnt < self.end
    }
}

/// Step boundary lookup: where an iteration starts and ends in one
/// source's clock. `None` means the source cannot be scoped to it.
pub trait IterationBoundaries: Send + Sync {
    fn clock_range(&self, source: SourceKind, model_id: u32, iteration_id: u32) -> Option<ClockRange>;
}

/// No boundaries known at all.
impl IterationBoundaries for () {
    fn clock_range(&self, _: SourceKind, _: u32, _: u32) -> Option<ClockRange> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepBoundary {
    pub model_id: u32,
    pub index_id: u32,
    pub start_clock: u64,
    pub end_clock: u64,
    /// Restrict the boundary to these sources; absent means all of them.
    #[serde(default)]
    pub sources: Option<Vec<SourceKind>>,
}

/// Step trace table loaded from JSON.
#[derive(Debug, Clone, Default)]
pub struct StepTraceTable {
    steps: Vec<StepBoundary>,
}

impl StepTraceTable {
    pub fn new(steps: Vec<StepBoundary>) -> Self {
        Self { steps }
    }

    pub fn from_json(json_str: &str) -> Result<Self> {
        let steps: Vec<StepBoundary> = serde_json::from_str(json_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse step trace JSON: {}", e))?;
        Ok(Self { steps })
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read step trace {:?}", path.as_ref()))?;
        Self::from_json(&text)
    }

    pub fn steps(&self) -> &[StepBoundary] {
        &self.steps
    }
}

impl IterationBoundaries for StepTraceTable {
    fn clock_range(&self, source: SourceKind, model_id: u32, iteration_id: u32) -> Option<ClockRange> {
        self.steps
            .iter()
            .filter(|s| s.model_id == model_id && s.index_id == iteration_id)
            .find(|s| s.sources.as_ref().map_or(true, |list| list.contains(&source)))
            .map(|s| ClockRange { start: s.start_clock, end: s.end_clock })
    }
}
