// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/lib.rs
//
pub mod ai_cpu;
pub mod event;
pub mod ffts;
pub mod hwts;
pub mod stars;
pub mod task_track;

pub use ai_cpu::AiCpuDecoder;
pub use event::{
    DevicePhaseLog, DeviceSpanLog, DeviceTaskType, HostTaskRecord, HostTaskType, LogPhase, TypedEvent,
    NO_CONTEXT_ID,
};
pub use ffts::FftsSubTaskDecoder;
pub use hwts::HwtsDecoder;
pub use stars::StarsDecoder;
pub use task_track::TaskTrackDecoder;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Decodes one fixed-size raw record into a typed event.
///
/// `None` means the record failed a structural sanity check and should be
/// skipped; it is not an error.
pub trait RecordDecoder: Send + Sync {
    fn source(&self) -> SourceKind;
    fn record_size(&self) -> usize;
    fn decode(&self, raw: &[u8]) -> Option<TypedEvent>;
}

/// Which side of the host/device split a source reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Host,
    Device,
}

/// Every raw log family this crate can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    TaskTrack,
    Hwts,
    AiCpu,
    Stars,
    FftsSubTask,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::TaskTrack,
        SourceKind::Hwts,
        SourceKind::AiCpu,
        SourceKind::Stars,
        SourceKind::FftsSubTask,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::TaskTrack => "task_track",
            SourceKind::Hwts => "hwts",
            SourceKind::AiCpu => "ai_cpu",
            SourceKind::Stars => "stars",
            SourceKind::FftsSubTask => "ffts_sub_task",
        }
    }

    pub fn side(&self) -> Side {
        match self {
            SourceKind::TaskTrack => Side::Host,
            _ => Side::Device,
        }
    }

    /// Conventional slice file pattern, relative to the data directory.
    pub fn default_pattern(&self) -> String {
        format!("{}.data.*.slice_*", self.name())
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The set of known decoders, one per source.
#[derive(Clone)]
pub struct DecoderRegistry {
    decoders: Vec<Arc<dyn RecordDecoder>>,
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("sources", &self.sources())
            .finish()
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl DecoderRegistry {
    pub fn empty() -> Self {
        Self { decoders: Vec::new() }
    }

    /// All decoders shipped with this crate.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.push(Arc::new(TaskTrackDecoder));
        registry.push(Arc::new(HwtsDecoder));
        registry.push(Arc::new(AiCpuDecoder));
        registry.push(Arc::new(StarsDecoder));
        registry.push(Arc::new(FftsSubTaskDecoder));
        registry
    }

    /// Register a decoder, replacing any earlier one for the same source.
    pub fn push(&mut self, decoder: Arc<dyn RecordDecoder>) {
        self.decoders.retain(|d| d.source() != decoder.source());
        self.decoders.push(decoder);
    }

    pub fn get(&self, source: SourceKind) -> Option<Arc<dyn RecordDecoder>> {
        self.decoders.iter().find(|d| d.source() == source).cloned()
    }

    pub fn sources(&self) -> Vec<SourceKind> {
        self.decoders.iter().map(|d| d.source()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_every_source() {
        let registry = DecoderRegistry::standard();
        for kind in SourceKind::ALL {
            let decoder = registry.get(kind).expect("decoder registered");
            assert_eq!(decoder.source(), kind);
            assert!(decoder.record_size() > 0);
        }
    }

    #[test]
    fn push_replaces_existing_decoder() {
        let mut registry = DecoderRegistry::standard();
        registry.push(Arc::new(HwtsDecoder));
        assert_eq!(registry.sources().len(), SourceKind::ALL.len());
    }

    #[test]
    fn only_task_track_is_host_side() {
        let host: Vec<_> = SourceKind::ALL.iter().filter(|k| k.side() == Side::Host).collect();
        assert_eq!(host, vec![&SourceKind::TaskTrack]);
        assert_eq!(SourceKind::Stars.default_pattern(), "stars.data.*.slice_*");
    }
}
