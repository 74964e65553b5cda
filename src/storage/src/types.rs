use hlc::{wall_nanos, Hlc};

use crate::compression;

/// In-memory representation of a stored payload. Large payloads are
/// kept LZ4-compressed; callers always see the original bytes.
#[derive(Debug, Clone)]
pub enum Payload {
    Raw(Vec<u8>),
    Lz4(Vec<u8>),
}

impl Payload {
    /// Bytes actually resident in memory (compressed size for Lz4).
    pub fn stored_len(&self) -> usize {
        match self {
            Payload::Raw(data) => data.len(),
            Payload::Lz4(data) => data.len(),
        }
    }
}

/// A value together with the metadata needed for conflict resolution
/// and staleness checks. The store keeps exactly one of these per key.
#[derive(Debug, Clone)]
pub struct VersionedValue {
    payload: Payload,
    /// Version of this value, the physical component of its HLC
    pub version: i64,
    /// Same as `version`; kept for the wire contract
    pub timestamp: i64,
    /// Node the write originated on
    pub node_id: String,
    /// Hybrid logical clock timestamp of the write
    pub hlc: Hlc,
    /// Local wall-clock nanoseconds when this node stored the value
    pub received_at: i64,
    /// True when the write originated on the node that stamped it
    pub is_local: bool,
}

impl VersionedValue {
    pub fn new(value: Vec<u8>, node_id: impl Into<String>, hlc: Hlc) -> Self {
        let node_id = node_id.into();
        let is_local = node_id == hlc.node_id;
        VersionedValue {
            payload: compression::encode(value),
            version: hlc.physical,
            timestamp: hlc.physical,
            node_id,
            received_at: wall_nanos(),
            is_local,
            hlc,
        }
    }

    /// The original payload bytes, decompressed if necessary.
    pub fn value(&self) -> Vec<u8> {
        compression::decode(&self.payload)
    }

    pub fn stored_len(&self) -> usize {
        self.payload.stored_len()
    }
}
