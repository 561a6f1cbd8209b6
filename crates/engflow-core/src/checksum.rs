//! Deterministic content checksums shared by the backup engine and the
//! detailed validator.
//!
//! The hash is the classic 32-bit `h = h * 31 + c` rolling hash over UTF-16
//! code units with signed wraparound, rendered as the hex of its absolute
//! value. It is not collision resistant; it only has to be stable across runs
//! and sensitive to content changes, and it must stay byte-compatible with
//! checksums already stored in backup artifacts.

use serde::Serialize;

/// Rolling hash of a string, as lowercase hex of the absolute value.
pub fn rolling_hash(input: &str) -> String {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit));
    }
    format!("{:x}", i64::from(hash).abs())
}

/// Serializes `value` as compact JSON and hashes the result.
pub fn checksum_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let serialized = serde_json::to_string(value)?;
    Ok(rolling_hash(&serialized))
}
