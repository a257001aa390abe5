// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/ai_cpu.rs
//
// AI-CPU kernel records, 64 bytes each, start and end in one record.
//
//   0  u16 magic (0x6BD3)
//   2  u16 stream id           4  u16 task id
//   6  u16 reserved
//   8  u64 start syscnt       16  u64 end syscnt
//  24  reserved to 64

use bytes::{Buf, BufMut};

use crate::event::{DeviceSpanLog, DeviceTaskType, TypedEvent, NO_CONTEXT_ID};
use crate::{RecordDecoder, SourceKind};

pub const AI_CPU_MAGIC: u16 = 0x6BD3;
pub const AI_CPU_RECORD_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct AiCpuDecoder;

impl AiCpuDecoder {
    pub fn encode(&self, log: &DeviceSpanLog) -> Vec<u8> {
        let mut buf = Vec::with_capacity(AI_CPU_RECORD_SIZE);
        buf.put_u16_le(AI_CPU_MAGIC);
        buf.put_u16_le(log.stream_id as u16);
        buf.put_u16_le(log.task_id as u16);
        buf.put_u16_le(0);
        buf.put_u64_le(log.start_cnt);
        buf.put_u64_le(log.end_cnt);
        buf.put_bytes(0, AI_CPU_RECORD_SIZE - buf.len());
        buf
    }
}

impl RecordDecoder for AiCpuDecoder {
    fn source(&self) -> SourceKind {
        SourceKind::AiCpu
    }

    fn record_size(&self) -> usize {
        AI_CPU_RECORD_SIZE
    }

    fn decode(&self, raw: &[u8]) -> Option<TypedEvent> {
        if raw.len() != AI_CPU_RECORD_SIZE {
            return None;
        }
        let mut buf = raw;
        if buf.get_u16_le() != AI_CPU_MAGIC {
            return None;
        }
        let stream_id = buf.get_u16_le() as u32;
        let task_id = buf.get_u16_le() as u32;
        buf.advance(2);
        let start_cnt = buf.get_u64_le();
        let end_cnt = buf.get_u64_le();
        if end_cnt < start_cnt {
            return None;
        }

        Some(TypedEvent::DeviceSpan(DeviceSpanLog {
            source: SourceKind::AiCpu,
            stream_id,
            task_id,
            context_id: NO_CONTEXT_ID,
            task_type: DeviceTaskType::AiCpu,
            start_cnt,
            end_cnt,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start_cnt: u64, end_cnt: u64) -> DeviceSpanLog {
        DeviceSpanLog {
            source: SourceKind::AiCpu,
            stream_id: 5,
            task_id: 6,
            context_id: NO_CONTEXT_ID,
            task_type: DeviceTaskType::AiCpu,
            start_cnt,
            end_cnt,
        }
    }

    #[test]
    fn decodes_span() {
        let raw = AiCpuDecoder.encode(&span(100, 250));
        assert_eq!(AiCpuDecoder.decode(&raw), Some(TypedEvent::DeviceSpan(span(100, 250))));
    }

    #[test]
    fn end_before_start_fails_sanity_check() {
        let raw = AiCpuDecoder.encode(&span(300, 250));
        assert_eq!(AiCpuDecoder.decode(&raw), None);
    }
}
