// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/hwts.rs
//
// HWTS task logs, 64 bytes each. One log marks a task start, another its end.
//
//   0  u8  bits 0-2 log phase (0 start, 1 end), bits 3-7 sequence count
//   1  u8  task type code
//   2  u16 core id
//   4  u16 stream id           6  u16 task id
//   8  u64 syscnt
//  16  reserved (pmu counters) to 64

use bytes::{Buf, BufMut};

use crate::event::{DevicePhaseLog, DeviceTaskType, LogPhase, TypedEvent, NO_CONTEXT_ID};
use crate::{RecordDecoder, SourceKind};

pub const HWTS_RECORD_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct HwtsDecoder;

impl HwtsDecoder {
    pub fn encode(&self, log: &DevicePhaseLog) -> Vec<u8> {
        let phase = match log.phase {
            LogPhase::Start => 0u8,
            LogPhase::End => 1u8,
        };
        let mut buf = Vec::with_capacity(HWTS_RECORD_SIZE);
        buf.put_u8(phase);
        buf.put_u8(log.task_type.code());
        buf.put_u16_le(0);
        buf.put_u16_le(log.stream_id as u16);
        buf.put_u16_le(log.task_id as u16);
        buf.put_u64_le(log.sys_cnt);
        buf.put_bytes(0, HWTS_RECORD_SIZE - buf.len());
        buf
    }
}

impl RecordDecoder for HwtsDecoder {
    fn source(&self) -> SourceKind {
        SourceKind::Hwts
    }

    fn record_size(&self) -> usize {
        HWTS_RECORD_SIZE
    }

    fn decode(&self, raw: &[u8]) -> Option<TypedEvent> {
        if raw.len() != HWTS_RECORD_SIZE {
            return None;
        }
        let mut buf = raw;
        let phase = match buf.get_u8() & 0x07 {
            0 => LogPhase::Start,
            1 => LogPhase::End,
            _ => return None,
        };
        let task_type = DeviceTaskType::from_code(buf.get_u8());
        buf.advance(2);
        let stream_id = buf.get_u16_le() as u32;
        let task_id = buf.get_u16_le() as u32;
        let sys_cnt = buf.get_u64_le();

        Some(TypedEvent::DevicePhase(DevicePhaseLog {
            source: SourceKind::Hwts,
            phase,
            stream_id,
            task_id,
            context_id: NO_CONTEXT_ID,
            task_type,
            sys_cnt,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(phase: LogPhase) -> DevicePhaseLog {
        DevicePhaseLog {
            source: SourceKind::Hwts,
            phase,
            stream_id: 1,
            task_id: 2,
            context_id: NO_CONTEXT_ID,
            task_type: DeviceTaskType::AiCore,
            sys_cnt: 9_000,
        }
    }

    #[test]
    fn decodes_start_and_end_logs() {
        for phase in [LogPhase::Start, LogPhase::End] {
            let raw = HwtsDecoder.encode(&log(phase));
            assert_eq!(HwtsDecoder.decode(&raw), Some(TypedEvent::DevicePhase(log(phase))));
        }
    }

    #[test]
    fn unknown_phase_fails_sanity_check() {
        let mut raw = HwtsDecoder.encode(&log(LogPhase::Start));
        raw[0] = 0x05;
        assert_eq!(HwtsDecoder.decode(&raw), None);
    }

    #[test]
    fn sequence_count_bits_are_ignored() {
        let mut raw = HwtsDecoder.encode(&log(LogPhase::End));
        raw[0] |= 0xF8;
        assert!(matches!(
            HwtsDecoder.decode(&raw),
            Some(TypedEvent::DevicePhase(DevicePhaseLog { phase: LogPhase::End, .. }))
        ));
    }
}
