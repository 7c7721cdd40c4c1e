//! Journal framing.
//!
//! Every committed transaction becomes one frame:
//!
//! ```text
//! magic (4) | payload length u32 LE | crc32(payload) u32 LE | payload
//! ```
//!
//! A frame cut short at the end of the journal is a torn write from a crash
//! and is dropped on replay. A checksum failure anywhere but the last frame
//! means the journal was damaged and replay refuses to continue.

use crate::error::{StorageError, StorageResult};

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"CSJ1";

/// Size of the fixed frame header.
pub const HEADER_SIZE: usize = 12;

/// Result of decoding a journal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedFrames {
    /// Payloads of every intact frame, in journal order.
    pub frames: Vec<Vec<u8>>,
    /// Number of journal bytes covered by intact frames.
    pub valid_len: u64,
    /// Whether a torn trailing frame was dropped.
    pub torn_tail: bool,
}

/// Wraps a payload in a frame.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&FRAME_MAGIC);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc32(payload).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Splits a journal into frame payloads.
///
/// # Errors
///
/// Returns [`StorageError::CorruptFrame`] when a frame other than the last one
/// has a bad magic or checksum.
pub fn decode_all(journal: &[u8]) -> StorageResult<DecodedFrames> {
    let mut decoded = DecodedFrames::default();
    let mut offset = 0usize;

    while offset < journal.len() {
        let rest = &journal[offset..];
        if rest.len() < HEADER_SIZE {
            decoded.torn_tail = true;
            break;
        }
        if rest[..4] != FRAME_MAGIC {
            return Err(StorageError::corrupt_frame(offset as u64, "bad magic"));
        }

        let len = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let expected_crc = u32::from_le_bytes([rest[8], rest[9], rest[10], rest[11]]);
        let end = HEADER_SIZE + len;
        if rest.len() < end {
            decoded.torn_tail = true;
            break;
        }

        let payload = &rest[HEADER_SIZE..end];
        if crc32(payload) != expected_crc {
            if offset + end == journal.len() {
                decoded.torn_tail = true;
                break;
            }
            return Err(StorageError::corrupt_frame(
                offset as u64,
                "checksum mismatch",
            ));
        }

        decoded.frames.push(payload.to_vec());
        offset += end;
        decoded.valid_len = offset as u64;
    }

    Ok(decoded)
}

/// Computes the IEEE CRC32 of `data`.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
