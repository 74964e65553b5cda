//! LZ4 compression for stored payloads
//!
//! Payloads above a size threshold are kept compressed in memory and
//! decompressed transparently on read. LZ4 trades a little ratio for
//! very fast round trips, which matters on the replication path.

use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::types::Payload;

/// Minimum payload size in bytes before compression is attempted.
/// Smaller payloads are stored raw to avoid the framing overhead.
pub const COMPRESSION_THRESHOLD: usize = 100;

/// Encode a payload for storage, compressing when it pays off.
pub fn encode(data: Vec<u8>) -> Payload {
    if data.len() < COMPRESSION_THRESHOLD {
        return Payload::Raw(data);
    }

    let compressed = compress_prepend_size(&data);
    // some payloads (already compressed, random) do not shrink
    if compressed.len() < data.len() {
        Payload::Lz4(compressed)
    } else {
        Payload::Raw(data)
    }
}

/// Decode a stored payload back into its original bytes.
pub fn decode(payload: &Payload) -> Vec<u8> {
    match payload {
        Payload::Raw(data) => data.clone(),
        Payload::Lz4(compressed) => decompress_size_prepended(compressed).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_payload_stays_raw() {
        let payload = encode(b"hello".to_vec());
        assert!(matches!(payload, Payload::Raw(_)));
        assert_eq!(decode(&payload), b"hello");
    }

    #[test]
    fn test_large_payload_round_trips() {
        let data = "replica state ".repeat(50).into_bytes();
        let payload = encode(data.clone());
        assert!(matches!(payload, Payload::Lz4(_)));
        assert!(payload.stored_len() < data.len());
        assert_eq!(decode(&payload), data);
    }

    #[test]
    fn test_incompressible_payload_stays_raw() {
        let data: Vec<u8> = (0..400u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
        let payload = encode(data.clone());
        assert_eq!(decode(&payload), data);
    }
}
