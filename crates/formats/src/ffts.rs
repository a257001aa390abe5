// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/ffts.rs
//
// FFTS+ sub-task logs, 64 bytes each. Sub-tasks carry a context id.
//
//   0  u16 bits 0-5 func type (0x22 start, 0x23 end)
//   2  u8  sub-task type (0 AIC, 1 AIV, 6 MIX_AIC, 7 MIX_AIV)
//   3  u8  reserved
//   4  u16 stream id           6  u16 task id
//   8  u32 context id         12  u32 reserved
//  16  u64 syscnt
//  24  reserved to 64

use bytes::{Buf, BufMut};

use crate::event::{DevicePhaseLog, DeviceTaskType, LogPhase, TypedEvent};
use crate::{RecordDecoder, SourceKind};

pub const FFTS_RECORD_SIZE: usize = 64;

const FUNC_TYPE_SUBTASK_START: u16 = 0x22;
const FUNC_TYPE_SUBTASK_END: u16 = 0x23;

fn sub_task_type(code: u8) -> DeviceTaskType {
    match code {
        0 => DeviceTaskType::AiCore,
        1 => DeviceTaskType::AiVectorCore,
        6 => DeviceTaskType::MixAic,
        7 => DeviceTaskType::MixAiv,
        _ => DeviceTaskType::Unknown,
    }
}

fn sub_task_code(task_type: DeviceTaskType) -> u8 {
    match task_type {
        DeviceTaskType::AiCore => 0,
        DeviceTaskType::AiVectorCore => 1,
        DeviceTaskType::MixAic => 6,
        DeviceTaskType::MixAiv => 7,
        _ => u8::MAX,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FftsSubTaskDecoder;

impl FftsSubTaskDecoder {
    pub fn encode(&self, log: &DevicePhaseLog) -> Vec<u8> {
        let func_type = match log.phase {
            LogPhase::Start => FUNC_TYPE_SUBTASK_START,
            LogPhase::End => FUNC_TYPE_SUBTASK_END,
        };
        let mut buf = Vec::with_capacity(FFTS_RECORD_SIZE);
        buf.put_u16_le(func_type);
        buf.put_u8(sub_task_code(log.task_type));
        buf.put_u8(0);
        buf.put_u16_le(log.stream_id as u16);
        buf.put_u16_le(log.task_id as u16);
        buf.put_u32_le(log.context_id);
        buf.put_u32_le(0);
        buf.put_u64_le(log.sys_cnt);
        buf.put_bytes(0, FFTS_RECORD_SIZE - buf.len());
        buf
    }
}

impl RecordDecoder for FftsSubTaskDecoder {
    fn source(&self) -> SourceKind {
        SourceKind::FftsSubTask
    }

    fn record_size(&self) -> usize {
        FFTS_RECORD_SIZE
    }

    fn decode(&self, raw: &[u8]) -> Option<TypedEvent> {
        if raw.len() != FFTS_RECORD_SIZE {
            return None;
        }
        let mut buf = raw;
        let phase = match buf.get_u16_le() & 0x3F {
            FUNC_TYPE_SUBTASK_START => LogPhase::Start,
            FUNC_TYPE_SUBTASK_END => LogPhase::End,
            _ => return None,
        };
        let task_type = sub_task_type(buf.get_u8());
        buf.advance(1);
        let stream_id = buf.get_u16_le() as u32;
        let task_id = buf.get_u16_le() as u32;
        let context_id = buf.get_u32_le();
        buf.advance(4);
        let sys_cnt = buf.get_u64_le();

        Some(TypedEvent::DevicePhase(DevicePhaseLog {
            source: SourceKind::FftsSubTask,
            phase,
            stream_id,
            task_id,
            context_id,
            task_type,
            sys_cnt,
        }))
    }
}
