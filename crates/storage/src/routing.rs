//! Key-range routing
//!
//! Rows are placed by the hash of their primary key. Each shard owns a
//! half-open range of the hash space; a split cuts the range at its
//! midpoint, so children partition exactly what the parent owned.

use rustc_hash::FxHasher;
use std::hash::Hasher;
use strata_core::Value;

/// Half-open range `[start, end)` of the key-hash space
///
/// `end == None` means the range extends to the top of the space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    /// Inclusive lower bound
    pub start: u64,
    /// Exclusive upper bound, `None` for unbounded
    pub end: Option<u64>,
}

impl KeyRange {
    /// The whole hash space
    pub const FULL: KeyRange = KeyRange {
        start: 0,
        end: None,
    };

    /// Whether `hash` falls in this range
    pub fn contains(&self, hash: u64) -> bool {
        hash >= self.start && self.end.map_or(true, |end| hash < end)
    }

    /// Split at the midpoint into (lower, upper)
    pub fn split(&self) -> (KeyRange, KeyRange) {
        let end = self.end.map(u128::from).unwrap_or(1u128 << 64);
        let mid = ((u128::from(self.start) + end) / 2) as u64;
        (
            KeyRange {
                start: self.start,
                end: Some(mid),
            },
            KeyRange {
                start: mid,
                end: self.end,
            },
        )
    }
}

/// Stable hash of a primary key
pub fn key_hash(key: &Value) -> u64 {
    let mut hasher = FxHasher::default();
    match key {
        Value::Null => hasher.write_u8(0),
        Value::Bool(b) => {
            hasher.write_u8(1);
            hasher.write_u8(*b as u8);
        }
        Value::Int(i) => {
            hasher.write_u8(2);
            hasher.write_i64(*i);
        }
        Value::Float(f) => {
            hasher.write_u8(3);
            hasher.write_u64(f.to_bits());
        }
        Value::String(s) => {
            hasher.write_u8(4);
            hasher.write(s.as_bytes());
        }
        Value::Bytes(b) => {
            hasher.write_u8(5);
            hasher.write(b);
        }
    }
    // FxHash leaves low-entropy high bits for small integers; mix them.
    let h = hasher.finish();
    h ^ (h >> 33).wrapping_mul(0xff51_afd7_ed55_8ccd)
}
