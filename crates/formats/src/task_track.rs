// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/task_track.rs
//
// Host runtime task track, 64-byte little-endian records:
//
//   0  u16 magic (0x5A5A)       2  u16 task type code
//   4  u16 device id            6  u16 stream id
//   8  u16 task id             10  u16 reserved
//  12  u32 model id            16  u32 index id
//  20  u32 context id          24  u32 batch id
//  28  u32 reserved            32  u64 syscnt
//  40  reserved to 64

use bytes::{Buf, BufMut};

use crate::event::{HostTaskRecord, HostTaskType, TypedEvent};
use crate::{RecordDecoder, SourceKind};

pub const TASK_TRACK_MAGIC: u16 = 0x5A5A;
pub const TASK_TRACK_RECORD_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskTrackDecoder;

impl TaskTrackDecoder {
    /// Serialize a record in the on-disk layout.
    pub fn encode(&self, record: &HostTaskRecord) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TASK_TRACK_RECORD_SIZE);
        buf.put_u16_le(TASK_TRACK_MAGIC);
        buf.put_u16_le(record.task_type.code());
        buf.put_u16_le(record.device_id as u16);
        buf.put_u16_le(record.stream_id as u16);
        buf.put_u16_le(record.task_id as u16);
        buf.put_u16_le(0);
        buf.put_u32_le(record.model_id);
        buf.put_u32_le(record.index_id);
        buf.put_u32_le(record.context_id);
        buf.put_u32_le(record.batch_id);
        buf.put_u32_le(0);
        buf.put_u64_le(record.sys_cnt);
        buf.put_bytes(0, TASK_TRACK_RECORD_SIZE - buf.len());
        buf
    }
}

impl RecordDecoder for TaskTrackDecoder {
    fn source(&self) -> SourceKind {
        SourceKind::TaskTrack
    }

    fn record_size(&self) -> usize {
        TASK_TRACK_RECORD_SIZE
    }

    fn decode(&self, raw: &[u8]) -> Option<TypedEvent> {
        if raw.len() != TASK_TRACK_RECORD_SIZE {
            return None;
        }
        let mut buf = raw;
        if buf.get_u16_le() != TASK_TRACK_MAGIC {
            return None;
        }
        let task_type = HostTaskType::from_code(buf.get_u16_le());
        let device_id = buf.get_u16_le() as u32;
        let stream_id = buf.get_u16_le() as u32;
        let task_id = buf.get_u16_le() as u32;
        buf.advance(2);
        let model_id = buf.get_u32_le();
        let index_id = buf.get_u32_le();
        let context_id = buf.get_u32_le();
        let batch_id = buf.get_u32_le();
        buf.advance(4);
        let sys_cnt = buf.get_u64_le();

        Some(TypedEvent::HostTask(HostTaskRecord {
            device_id,
            model_id,
            index_id,
            stream_id,
            task_id,
            context_id,
            batch_id,
            task_type,
            sys_cnt,
        }))
    }
}
