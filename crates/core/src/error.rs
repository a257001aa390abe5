// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/error.rs
use thiserror::Error;

/// Precondition failures. These abort one unit of work (an iteration, an
/// operator, a rank) and are reported separately from I/O failures.
///
/// Data-quality anomalies (count mismatches, batch gaps, unmatched tasks)
/// are never errors; they show up in the results instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TraceError {
    #[error("device id is required to separate host tasks recorded for {devices} devices")]
    MissingDeviceId { devices: usize },

    #[error("no iteration boundary for model {model_id} iteration {iteration_id} in any source")]
    IterationBoundaryMissing { model_id: u32, iteration_id: u32 },

    #[error("{0} requires a non-empty input")]
    EmptyAnalysisInput(&'static str),

    #[error("communication op '{op_name}' has no events on main plane {plane_id} of rank {rank}")]
    NoMainThreadEvents {
        op_name: String,
        rank: u32,
        plane_id: u32,
    },

    #[error("rank {rank} has no communication events")]
    RankWithoutEvents { rank: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TraceError {
    /// Whether an error chain carries a precondition failure.
    pub fn is_precondition(err: &anyhow::Error) -> bool {
        err.downcast_ref::<TraceError>().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn precondition_survives_context_wrapping() {
        let err: anyhow::Result<()> = Err(TraceError::RankWithoutEvents { rank: 3 }.into());
        let err = err.context("analyzing allreduce").unwrap_err();
        assert!(TraceError::is_precondition(&err));

        let io = anyhow::anyhow!("disk on fire");
        assert!(!TraceError::is_precondition(&io));
    }
}
