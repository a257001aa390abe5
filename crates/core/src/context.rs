// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/context.rs
use serde::{Deserialize, Serialize};

use crate::error::TraceError;

/// Hardware syscnt frequency used when nothing else is configured.
pub const DEFAULT_CLOCK_FREQ_MHZ: f64 = 100.0;
/// Host tasks recorded once for a static graph carry this index id.
pub const DEFAULT_STATIC_GRAPH_INDEX_ID: u32 = 0;

/// Stream and task id of the last device task known to belong to the
/// previous collection; records after it in the raw tail are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TailAnchor {
    pub stream_id: u32,
    pub task_id: u32,
}

/// Scope of one unit of work, built once per pipeline run and passed
/// explicitly to collectors and the matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationContext {
    pub model_id: Option<u32>,
    pub iteration_id: Option<u32>,
    pub device_id: Option<u32>,
    pub clock_freq_mhz: f64,
    pub static_graph_index_id: u32,
    pub tail_anchor: Option<TailAnchor>,
}

impl Default for IterationContext {
    fn default() -> Self {
        Self {
            model_id: None,
            iteration_id: None,
            device_id: None,
            clock_freq_mhz: DEFAULT_CLOCK_FREQ_MHZ,
            static_graph_index_id: DEFAULT_STATIC_GRAPH_INDEX_ID,
            tail_anchor: None,
        }
    }
}

impl IterationContext {
    /// Whole-trace scope with no iteration filter (single-operator runs).
    pub fn operator_scene(device_id: u32) -> Self {
        Self { device_id: Some(device_id), ..Default::default() }
    }

    pub fn for_iteration(device_id: u32, model_id: u32, iteration_id: u32) -> Self {
        Self {
            model_id: Some(model_id),
            iteration_id: Some(iteration_id),
            device_id: Some(device_id),
            ..Default::default()
        }
    }

    pub fn with_clock(mut self, clock_freq_mhz: f64) -> Self {
        self.clock_freq_mhz = clock_freq_mhz;
        self
    }

    pub fn with_static_graph_index(mut self, index_id: u32) -> Self {
        self.static_graph_index_id = index_id;
        self
    }

    pub fn with_tail_anchor(mut self, anchor: Option<TailAnchor>) -> Self {
        self.tail_anchor = anchor;
        self
    }

    /// Model and iteration when the scope is one iteration.
    pub fn iteration(&self) -> Option<(u32, u32)> {
        self.model_id.zip(self.iteration_id)
    }

    pub fn require_device(&self) -> Result<u32, TraceError> {
        self.device_id.ok_or(TraceError::MissingDeviceId { devices: 0 })
    }

    /// Raw hardware clock ticks to microseconds.
    pub fn syscnt_to_us(&self, sys_cnt: u64) -> f64 {
        sys_cnt as f64 / self.clock_freq_mhz
    }

    /// Short label for logs and reports.
    pub fn label(&self) -> String {
        let device = self
            .device_id
            .map(|d| d.to_string())
            .unwrap_or_else(|| "?".to_string());
        match self.iteration() {
            Some((model, iter)) => format!("device {} model {} iteration {}", device, model, iter),
            None => format!("device {} (all tasks)", device),
        }
    }
}
