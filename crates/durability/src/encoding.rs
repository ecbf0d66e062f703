//! Metadata frame encoding/decoding with CRC32 checksums
//!
//! Frame format:
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────────────┐
//! │ len: u32 LE  │ crc32: u32 LE│ payload (bincode)   │
//! └──────────────┴──────────────┴─────────────────────┘
//! ```
//!
//! `len` counts payload bytes only; `crc32` covers the payload.
//!
//! A frame whose header or payload runs past the end of the buffer is a
//! torn tail (a write interrupted by a crash). A complete frame that fails
//! its checksum, or passes it but does not decode, is corrupt and can be
//! skipped because its length is known.

use crate::entry::MetaEntry;
use crate::error::MetaLogError;
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

/// Header bytes preceding each payload
pub const FRAME_HEADER_LEN: usize = 8;

/// Result of decoding one frame
#[derive(Debug)]
pub enum Frame {
    /// A valid entry spanning `len` bytes including the header
    Entry {
        /// Decoded entry
        entry: MetaEntry,
        /// Frame length including header
        len: usize,
    },
    /// A complete but invalid frame spanning `len` bytes
    Corrupt {
        /// Frame length including header
        len: usize,
        /// Why the frame was rejected
        error: MetaLogError,
    },
    /// Incomplete frame at the end of the buffer
    TornTail,
}

/// Encode an entry as a frame
pub fn encode_frame(entry: &MetaEntry) -> Result<Vec<u8>, MetaLogError> {
    let payload = bincode::serialize(entry).map_err(|e| MetaLogError::Encode(e.to_string()))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| MetaLogError::Encode(format!("entry of {} bytes too large", payload.len())))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.write_u32::<LittleEndian>(len)?;
    frame.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode the frame at the start of `buf`
///
/// `offset` is the file offset of `buf[0]`, used in error reports.
pub fn decode_frame(buf: &[u8], offset: u64) -> Frame {
    if buf.len() < FRAME_HEADER_LEN {
        return Frame::TornTail;
    }
    let payload_len = LittleEndian::read_u32(&buf[0..4]) as usize;
    let expected = LittleEndian::read_u32(&buf[4..8]);
    let end = FRAME_HEADER_LEN + payload_len;
    if buf.len() < end {
        return Frame::TornTail;
    }

    let payload = &buf[FRAME_HEADER_LEN..end];
    let actual = crc32fast::hash(payload);
    if actual != expected {
        return Frame::Corrupt {
            len: end,
            error: MetaLogError::ChecksumMismatch {
                offset,
                expected,
                actual,
            },
        };
    }

    match bincode::deserialize::<MetaEntry>(payload) {
        Ok(entry) => Frame::Entry { entry, len: end },
        Err(e) => Frame::Corrupt {
            len: end,
            error: MetaLogError::Decode {
                offset,
                reason: e.to_string(),
            },
        },
    }
}
