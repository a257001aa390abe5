// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/event.rs
//
// Typed events produced by the decoders. Timestamps stay in raw hardware
// clock ticks (syscnt); conversion to wall time happens downstream.

use serde::{Deserialize, Serialize};

use crate::SourceKind;

/// Context id carried by tasks that have no FFTS+ sub-context.
pub const NO_CONTEXT_ID: u32 = 0xFFFF_FFFF;

/// Hardware execution class of a device task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceTaskType {
    AiCore,
    AiVectorCore,
    MixAic,
    MixAiv,
    AiCpu,
    Sdma,
    Notify,
    WriteValue,
    Unknown,
}

// Device task-type codes as they appear in hardware logs.
const DEVICE_TYPE_CODES: &[(u8, DeviceTaskType)] = &[
    (0, DeviceTaskType::AiCore),
    (1, DeviceTaskType::AiCpu),
    (2, DeviceTaskType::AiVectorCore),
    (3, DeviceTaskType::WriteValue),
    (4, DeviceTaskType::Sdma),
    (5, DeviceTaskType::Notify),
    (6, DeviceTaskType::MixAic),
    (7, DeviceTaskType::MixAiv),
];

impl DeviceTaskType {
    pub fn from_code(code: u8) -> Self {
        DEVICE_TYPE_CODES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, t)| *t)
            .unwrap_or(DeviceTaskType::Unknown)
    }

    pub fn code(&self) -> u8 {
        DEVICE_TYPE_CODES
            .iter()
            .find(|(_, t)| t == self)
            .map(|(c, _)| *c)
            .unwrap_or(u8::MAX)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceTaskType::AiCore => "AI_CORE",
            DeviceTaskType::AiVectorCore => "AI_VECTOR_CORE",
            DeviceTaskType::MixAic => "MIX_AIC",
            DeviceTaskType::MixAiv => "MIX_AIV",
            DeviceTaskType::AiCpu => "AI_CPU",
            DeviceTaskType::Sdma => "SDMA",
            DeviceTaskType::Notify => "NOTIFY",
            DeviceTaskType::WriteValue => "WRITE_VALUE",
            DeviceTaskType::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for DeviceTaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime class of a host task submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostTaskType {
    KernelAicore,
    KernelAicpu,
    KernelAivec,
    EventRecord,
    StreamWaitEvent,
    MemcpyAsync,
    NotifyRecord,
    NotifyWait,
    ProfilerTraceEx,
    FftsPlus,
    ModelExecute,
    KernelMixAic,
    KernelMixAiv,
    Unknown,
}

// Runtime task-type codes written by the host task track.
const HOST_TYPE_CODES: &[(u16, HostTaskType)] = &[
    (0, HostTaskType::KernelAicore),
    (1, HostTaskType::KernelAicpu),
    (2, HostTaskType::KernelAivec),
    (3, HostTaskType::EventRecord),
    (4, HostTaskType::StreamWaitEvent),
    (5, HostTaskType::MemcpyAsync),
    (6, HostTaskType::NotifyRecord),
    (7, HostTaskType::NotifyWait),
    (8, HostTaskType::ProfilerTraceEx),
    (9, HostTaskType::FftsPlus),
    (10, HostTaskType::ModelExecute),
    (11, HostTaskType::KernelMixAic),
    (12, HostTaskType::KernelMixAiv),
];

impl HostTaskType {
    pub fn from_code(code: u16) -> Self {
        HOST_TYPE_CODES
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, t)| *t)
            .unwrap_or(HostTaskType::Unknown)
    }

    pub fn code(&self) -> u16 {
        HOST_TYPE_CODES
            .iter()
            .find(|(_, t)| t == self)
            .map(|(c, _)| *c)
            .unwrap_or(u16::MAX)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostTaskType::KernelAicore => "KERNEL_AICORE",
            HostTaskType::KernelAicpu => "KERNEL_AICPU",
            HostTaskType::KernelAivec => "KERNEL_AIVEC",
            HostTaskType::EventRecord => "EVENT_RECORD",
            HostTaskType::StreamWaitEvent => "STREAM_WAIT_EVENT",
            HostTaskType::MemcpyAsync => "MEMCPY_ASYNC",
            HostTaskType::NotifyRecord => "NOTIFY_RECORD",
            HostTaskType::NotifyWait => "NOTIFY_WAIT",
            HostTaskType::ProfilerTraceEx => "PROFILER_TRACE_EX",
            HostTaskType::FftsPlus => "FFTS_PLUS",
            HostTaskType::ModelExecute => "MODEL_EXECUTE",
            HostTaskType::KernelMixAic => "KERNEL_MIX_AIC",
            HostTaskType::KernelMixAiv => "KERNEL_MIX_AIV",
            HostTaskType::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for HostTaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host-side task submission as written by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTaskRecord {
    pub device_id: u32,
    pub model_id: u32,
    pub index_id: u32,
    pub stream_id: u32,
    pub task_id: u32,
    pub context_id: u32,
    pub batch_id: u32,
    pub task_type: HostTaskType,
    pub sys_cnt: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPhase {
    Start,
    End,
}

/// Half of a device task: its start or its end log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePhaseLog {
    pub source: SourceKind,
    pub phase: LogPhase,
    pub stream_id: u32,
    pub task_id: u32,
    pub context_id: u32,
    pub task_type: DeviceTaskType,
    pub sys_cnt: u64,
}

/// A device task whose start and end arrive in one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpanLog {
    pub source: SourceKind,
    pub stream_id: u32,
    pub task_id: u32,
    pub context_id: u32,
    pub task_type: DeviceTaskType,
    pub start_cnt: u64,
    pub end_cnt: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedEvent {
    HostTask(HostTaskRecord),
    DevicePhase(DevicePhaseLog),
    DeviceSpan(DeviceSpanLog),
}

impl TypedEvent {
    /// Stream and task id, the part of the correlation key every event has.
    pub fn stream_task(&self) -> (u32, u32) {
        match self {
            TypedEvent::HostTask(r) => (r.stream_id, r.task_id),
            TypedEvent::DevicePhase(r) => (r.stream_id, r.task_id),
            TypedEvent::DeviceSpan(r) => (r.stream_id, r.task_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_codes_round_trip_and_unknown_falls_back() {
        assert_eq!(DeviceTaskType::from_code(6), DeviceTaskType::MixAic);
        assert_eq!(DeviceTaskType::MixAiv.code(), 7);
        assert_eq!(DeviceTaskType::from_code(200), DeviceTaskType::Unknown);
        assert_eq!(DeviceTaskType::AiVectorCore.to_string(), "AI_VECTOR_CORE");
    }

    #[test]
    fn host_type_table() {
        assert_eq!(HostTaskType::from_code(8), HostTaskType::ProfilerTraceEx);
        assert_eq!(HostTaskType::from_code(999), HostTaskType::Unknown);
        assert_eq!(HostTaskType::EventRecord.code(), 3);
        assert_eq!(HostTaskType::Unknown.code(), u16::MAX);
        assert_eq!(HostTaskType::KernelMixAiv.to_string(), "KERNEL_MIX_AIV");
    }

    #[test]
    fn host_type_names_match_serde() {
        for (_, t) in HOST_TYPE_CODES {
            let json = serde_json::to_string(t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        let parsed: HostTaskType = serde_json::from_str("\"PROFILER_TRACE_EX\"").unwrap();
        assert_eq!(parsed, HostTaskType::ProfilerTraceEx);
        assert!(serde_json::from_str::<HostTaskType>("\"NOPE\"").is_err());
    }
}
