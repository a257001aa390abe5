// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/model.rs
//
// Trace data model. All times are microseconds.

use serde::{Deserialize, Serialize};

pub use tasktrace_formats::{DeviceTaskType, HostTaskType, NO_CONTEXT_ID};

/// Placeholder for a missing side of a TopDownTask.
pub const INVALID_TIME: f64 = -1.0;
pub const INVALID_ID: u32 = u32::MAX;

/// Associates host submissions with device executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationKey {
    pub stream_id: u32,
    pub task_id: u32,
    pub context_id: u32,
}

impl CorrelationKey {
    pub fn new(stream_id: u32, task_id: u32, context_id: u32) -> Self {
        Self { stream_id, task_id, context_id }
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream {} task {} ctx {:#x}", self.stream_id, self.task_id, self.context_id)
    }
}

/// Task submission seen by the host runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostTask {
    pub device_id: u32,
    pub model_id: u32,
    pub index_id: u32,
    pub stream_id: u32,
    pub task_id: u32,
    pub context_id: u32,
    pub batch_id: u32,
    pub task_type: HostTaskType,
    pub timestamp: f64,
}

impl HostTask {
    pub fn key(&self) -> CorrelationKey {
        CorrelationKey::new(self.stream_id, self.task_id, self.context_id)
    }
}

/// Task execution seen by the hardware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTask {
    pub stream_id: u32,
    pub task_id: u32,
    pub context_id: u32,
    pub start_time: f64,
    pub duration: f64,
    pub task_type: DeviceTaskType,
}

impl DeviceTask {
    pub fn key(&self) -> CorrelationKey {
        CorrelationKey::new(self.stream_id, self.task_id, self.context_id)
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    HostOnly,
    DeviceOnly,
}

/// Host submission and device execution merged into one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopDownTask {
    pub model_id: u32,
    pub iteration_id: u32,
    pub stream_id: u32,
    pub task_id: u32,
    pub context_id: u32,
    pub batch_id: u32,
    pub start_time: f64,
    pub duration: f64,
    pub host_task_type: HostTaskType,
    pub device_task_type: DeviceTaskType,
    pub status: MatchStatus,
}

impl TopDownTask {
    pub fn matched(host: &HostTask, device: &DeviceTask) -> Self {
        Self {
            model_id: host.model_id,
            iteration_id: host.index_id,
            stream_id: device.stream_id,
            task_id: device.task_id,
            context_id: device.context_id,
            batch_id: host.batch_id,
            start_time: device.start_time,
            duration: device.duration,
            host_task_type: host.task_type,
            device_task_type: device.task_type,
            status: MatchStatus::Matched,
        }
    }

    pub fn host_only(host: &HostTask) -> Self {
        Self {
            model_id: host.model_id,
            iteration_id: host.index_id,
            stream_id: host.stream_id,
            task_id: host.task_id,
            context_id: host.context_id,
            batch_id: host.batch_id,
            start_time: INVALID_TIME,
            duration: INVALID_TIME,
            host_task_type: host.task_type,
            device_task_type: DeviceTaskType::Unknown,
            status: MatchStatus::HostOnly,
        }
    }

    /// Device execution with no host submission; the model and iteration
    /// come from the collection scope when there is one.
    pub fn device_only(device: &DeviceTask, model_id: u32, iteration_id: u32) -> Self {
        Self {
            model_id,
            iteration_id,
            stream_id: device.stream_id,
            task_id: device.task_id,
            context_id: device.context_id,
            batch_id: INVALID_ID,
            start_time: device.start_time,
            duration: device.duration,
            host_task_type: HostTaskType::Unknown,
            device_task_type: device.task_type,
            status: MatchStatus::DeviceOnly,
        }
    }

    pub fn key(&self) -> CorrelationKey {
        CorrelationKey::new(self.stream_id, self.task_id, self.context_id)
    }

    pub fn is_mismatched(&self) -> bool {
        self.status != MatchStatus::Matched
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Trace event for critical-path analysis; host-only tasks never ran
    /// on the device and have no place on the timeline.
    pub fn to_trace_event(&self) -> Option<CriticalPathEvent> {
        if self.status == MatchStatus::HostOnly {
            return None;
        }
        let name = match self.host_task_type {
            HostTaskType::Unknown => self.device_task_type.as_str(),
            host => host.as_str(),
        };
        Some(CriticalPathEvent::new(
            name,
            TraceEventKind::from_device_type(self.device_task_type),
            format!("stream:{}", self.stream_id),
            self.start_time,
            self.end_time(),
        ))
    }
}

/// Coarse class of a trace event for critical-path statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventKind {
    AiCore,
    AiCpu,
    Communication,
    Other,
}

impl TraceEventKind {
    pub fn from_device_type(task_type: DeviceTaskType) -> Self {
        match task_type {
            DeviceTaskType::AiCore
            | DeviceTaskType::AiVectorCore
            | DeviceTaskType::MixAic
            | DeviceTaskType::MixAiv => TraceEventKind::AiCore,
            DeviceTaskType::AiCpu => TraceEventKind::AiCpu,
            DeviceTaskType::Sdma
            | DeviceTaskType::Notify
            | DeviceTaskType::WriteValue
            | DeviceTaskType::Unknown => TraceEventKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalPathEvent {
    pub name: String,
    pub kind: TraceEventKind,
    pub thread_key: String,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

impl CriticalPathEvent {
    pub fn new(
        name: impl Into<String>,
        kind: TraceEventKind,
        thread_key: impl Into<String>,
        start: f64,
        end: f64,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            thread_key: thread_key.into(),
            start,
            end,
            duration: end - start,
        }
    }
}

/// Primitive step of a collective operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommTaskType {
    #[serde(rename = "Notify_Wait")]
    NotifyWait,
    #[serde(rename = "Notify_Record")]
    NotifyRecord,
    #[serde(rename = "Memcpy")]
    Memcpy,
    #[serde(rename = "Reduce_Inline")]
    ReduceInline,
    #[serde(rename = "RDMASend")]
    RdmaSend,
    #[serde(other)]
    Other,
}

/// Physical interconnect of a communication primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportType {
    Hccs,
    Pcie,
    Rdma,
    Local,
    #[serde(other)]
    Unknown,
}

/// One primitive step of a collective operator on one rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationEvent {
    pub op_name: String,
    pub group_name: String,
    pub task_type: CommTaskType,
    pub transport_type: TransportType,
    pub src_rank: u32,
    pub dst_rank: u32,
    #[serde(default)]
    pub size: u64,
    pub timestamp: f64,
    pub duration: f64,
    pub plane_id: u32,
    pub first_timestamp: f64,
}

impl CommunicationEvent {
    pub fn end_time(&self) -> f64 {
        self.timestamp + self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostTask {
        HostTask {
            device_id: 0,
            model_id: 1,
            index_id: 4,
            stream_id: 1,
            task_id: 2,
            context_id: NO_CONTEXT_ID,
            batch_id: 9,
            task_type: HostTaskType::KernelAicore,
            timestamp: 10.0,
        }
    }

    fn device() -> DeviceTask {
        DeviceTask {
            stream_id: 1,
            task_id: 2,
            context_id: NO_CONTEXT_ID,
            start_time: 100.0,
            duration: 5.0,
            task_type: DeviceTaskType::MixAiv,
        }
    }

    #[test]
    fn one_sided_tasks_carry_sentinels() {
        let h = TopDownTask::host_only(&host());
        assert_eq!(h.start_time, INVALID_TIME);
        assert_eq!(h.device_task_type, DeviceTaskType::Unknown);
        assert!(h.is_mismatched());
        assert!(h.to_trace_event().is_none());

        let d = TopDownTask::device_only(&device(), INVALID_ID, INVALID_ID);
        assert_eq!(d.host_task_type, HostTaskType::Unknown);
        assert_eq!(d.batch_id, INVALID_ID);
        assert_eq!(d.to_trace_event().unwrap().name, "MIX_AIV");
    }

    #[test]
    fn matched_task_takes_host_ids_and_device_times() {
        let t = TopDownTask::matched(&host(), &device());
        assert_eq!((t.model_id, t.iteration_id, t.batch_id), (1, 4, 9));
        assert_eq!(t.end_time(), 105.0);
        let ev = t.to_trace_event().unwrap();
        assert_eq!(ev.kind, TraceEventKind::AiCore);
        assert_eq!(ev.thread_key, "stream:1");
        assert_eq!(ev.duration, 5.0);
    }

    #[test]
    fn communication_event_parses_wire_names() {
        let json = r#"{
            "op_name": "hcom_allReduce__1", "group_name": "g0", "task_type": "RDMASend",
            "transport_type": "RDMA", "src_rank": 0, "dst_rank": 8, "size": 4096,
            "timestamp": 1.5, "duration": 2.0, "plane_id": 0, "first_timestamp": 1.0
        }"#;
        let ev: CommunicationEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.task_type, CommTaskType::RdmaSend);
        assert_eq!(ev.transport_type, TransportType::Rdma);
        assert_eq!(ev.end_time(), 3.5);

        let other: CommTaskType = serde_json::from_str("\"Write_Value\"").unwrap();
        assert_eq!(other, CommTaskType::Other);
    }
}
