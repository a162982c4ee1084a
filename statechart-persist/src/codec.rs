//! Context record codec.
//!
//! Each persisted context is one framed record:
//!
//! ```text
//! +----------+----------+----------+----------+----------+
//! | magic    | version  | flags    | length   | crc32c   |
//! | 4 bytes  | 2 bytes  | 2 bytes  | 4 bytes  | 4 bytes  |
//! +----------+----------+----------+----------+----------+
//! | payload (JSON StateMachineContext)                   |
//! | length bytes                                         |
//! +------------------------------------------------------+
//! ```
//!
//! All integers are big-endian and the checksum covers the payload only.
//! Version 1 records predate machine ids and region references; their
//! children are matched to regions by position on restore.

use crate::error::PersistError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use statechart_core::StateMachineContext;

/// Magic bytes for context records: "SMCX"
pub const CONTEXT_MAGIC: [u8; 4] = *b"SMCX";

/// Version written by [`ContextCodec::encode`].
pub const CODEC_VERSION: u16 = 2;

/// Maximum record payload size (4 MiB).
pub const MAX_RECORD_SIZE: usize = 4 * 1024 * 1024;

/// Size of the fixed record header.
pub const HEADER_SIZE: usize = 16;

/// Encodes and decodes [`StateMachineContext`] records.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextCodec;

impl ContextCodec {
    /// Encodes `context` as a current-version record.
    pub fn encode(context: &StateMachineContext) -> Result<Bytes, PersistError> {
        let payload = serde_json::to_vec(context)?;
        Ok(frame(CODEC_VERSION, &payload)?.freeze())
    }

    /// Decodes a record, accepting every version up to [`CODEC_VERSION`].
    pub fn decode(record: &[u8]) -> Result<StateMachineContext, PersistError> {
        if record.len() < HEADER_SIZE {
            return Err(PersistError::InvalidHeader(format!(
                "record is {} bytes, header needs {}",
                record.len(),
                HEADER_SIZE
            )));
        }

        let mut buf = record;
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != CONTEXT_MAGIC {
            return Err(PersistError::InvalidHeader(format!(
                "invalid magic: {:?}",
                magic
            )));
        }

        let version = buf.get_u16();
        if version == 0 || version > CODEC_VERSION {
            return Err(PersistError::UnsupportedVersion(version));
        }
        let flags = buf.get_u16();
        if flags != 0 {
            return Err(PersistError::InvalidHeader(format!(
                "unknown flags: {:#06x}",
                flags
            )));
        }

        let length = buf.get_u32() as usize;
        if length > MAX_RECORD_SIZE {
            return Err(PersistError::RecordTooLarge {
                size: length,
                max: MAX_RECORD_SIZE,
            });
        }
        let expected = buf.get_u32();
        if buf.len() != length {
            return Err(PersistError::Codec {
                reason: format!("payload is {} bytes, header says {}", buf.len(), length),
            });
        }

        let actual = crc32c::crc32c(buf);
        if actual != expected {
            return Err(PersistError::ChecksumMismatch { expected, actual });
        }

        let mut context: StateMachineContext = serde_json::from_slice(buf)?;
        if version == 1 {
            downgrade(&mut context);
        }
        Ok(context)
    }
}

/// Writes header and payload for `version`.
pub(crate) fn frame(version: u16, payload: &[u8]) -> Result<BytesMut, PersistError> {
    if payload.len() > MAX_RECORD_SIZE {
        return Err(PersistError::RecordTooLarge {
            size: payload.len(),
            max: MAX_RECORD_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&CONTEXT_MAGIC);
    buf.put_u16(version);
    buf.put_u16(0);
    buf.put_u32(payload.len() as u32);
    buf.put_u32(crc32c::crc32c(payload));
    buf.put_slice(payload);
    Ok(buf)
}

/// Version 1 carried neither ids nor region references.
fn downgrade(context: &mut StateMachineContext) {
    context.id = None;
    context.child_refs.clear();
    for child in &mut context.childs {
        downgrade(child);
    }
}
