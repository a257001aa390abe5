// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/stars.rs
//
// STARS ACSQ task logs, 64 bytes each.
//
//   0  u16 bits 0-5 func type (0 start, 1 end), bits 6-15 sequence count
//   2  u16 task type code
//   4  u16 stream id           6  u16 task id
//   8  u64 syscnt
//  16  reserved to 64

use bytes::{Buf, BufMut};

use crate::event::{DevicePhaseLog, DeviceTaskType, LogPhase, TypedEvent, NO_CONTEXT_ID};
use crate::{RecordDecoder, SourceKind};

pub const STARS_RECORD_SIZE: usize = 64;

const FUNC_TYPE_START: u16 = 0;
const FUNC_TYPE_END: u16 = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct StarsDecoder;

impl StarsDecoder {
    pub fn encode(&self, log: &DevicePhaseLog) -> Vec<u8> {
        let func_type = match log.phase {
            LogPhase::Start => FUNC_TYPE_START,
            LogPhase::End => FUNC_TYPE_END,
        };
        let mut buf = Vec::with_capacity(STARS_RECORD_SIZE);
        buf.put_u16_le(func_type);
        buf.put_u16_le(log.task_type.code() as u16);
        buf.put_u16_le(log.stream_id as u16);
        buf.put_u16_le(log.task_id as u16);
        buf.put_u64_le(log.sys_cnt);
        buf.put_bytes(0, STARS_RECORD_SIZE - buf.len());
        buf
    }
}

impl RecordDecoder for StarsDecoder {
    fn source(&self) -> SourceKind {
        SourceKind::Stars
    }

    fn record_size(&self) -> usize {
        STARS_RECORD_SIZE
    }

    fn decode(&self, raw: &[u8]) -> Option<TypedEvent> {
        if raw.len() != STARS_RECORD_SIZE {
            return None;
        }
        let mut buf = raw;
        let phase = match buf.get_u16_le() & 0x3F {
            FUNC_TYPE_START => LogPhase::Start,
            FUNC_TYPE_END => LogPhase::End,
            _ => return None,
        };
        let code = buf.get_u16_le();
        let task_type = u8::try_from(code)
            .map(DeviceTaskType::from_code)
            .unwrap_or(DeviceTaskType::Unknown);
        let stream_id = buf.get_u16_le() as u32;
        let task_id = buf.get_u16_le() as u32;
        let sys_cnt = buf.get_u64_le();

        Some(TypedEvent::DevicePhase(DevicePhaseLog {
            source: SourceKind::Stars,
            phase,
            stream_id,
            task_id,
            context_id: NO_CONTEXT_ID,
            task_type,
            sys_cnt,
        }))
    }
}
