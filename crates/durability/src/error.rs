//! Metadata log errors

use thiserror::Error;

/// Metadata log errors
#[derive(Debug, Error)]
pub enum MetaLogError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry could not be serialized
    #[error("Encode error: {0}")]
    Encode(String),

    /// Frame passed its checksum but its payload did not decode
    #[error("Decode error at offset {offset}: {reason}")]
    Decode {
        /// Byte offset of the frame
        offset: u64,
        /// Decoder message
        reason: String,
    },

    /// Frame checksum mismatch
    #[error("Checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Byte offset of the frame
        offset: u64,
        /// Stored checksum
        expected: u32,
        /// Computed checksum
        actual: u32,
    },

    /// Too many corrupt entries
    #[error("Too many corrupt entries: {0} (max allowed: {1})")]
    TooManyCorruptEntries(u64, usize),
}

impl From<MetaLogError> for strata_core::Error {
    fn from(e: MetaLogError) -> Self {
        match e {
            MetaLogError::Io(io) => strata_core::Error::Io(io),
            MetaLogError::ChecksumMismatch { .. } | MetaLogError::TooManyCorruptEntries(..) => {
                strata_core::Error::Corruption(e.to_string())
            }
            other => strata_core::Error::Durability(other.to_string()),
        }
    }
}
