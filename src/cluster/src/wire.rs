//! Cluster wire protocol
//!
//! Every message is a frame: opcode byte, u32 payload length, payload.
//! Payload fields are big-endian; strings and byte strings carry a u32
//! length prefix; an HLC is (physical i64, logical i64, node id string).

use std::io::Result;

use hlc::Hlc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::*;

/// Upper bound on a single frame, to keep a bad peer from forcing an
/// arbitrary allocation.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024; // 64 MB

pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, op: u8, payload: &[u8]) -> Result<()> {
    stream.write_u8(op).await?;
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<(u8, Vec<u8>)> {
    let op = stream.read_u8().await?;
    let len = stream.read_u32().await?;
    if len > MAX_FRAME_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes (max: {} bytes)", len, MAX_FRAME_SIZE),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok((op, payload))
}

fn put_i64(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn put_bool(buf: &mut Vec<u8>, value: bool) {
    buf.push(value as u8);
}

fn put_bytes(buf: &mut Vec<u8>, value: &[u8]) {
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value);
}

fn put_str(buf: &mut Vec<u8>, value: &str) {
    put_bytes(buf, value.as_bytes());
}

fn put_hlc(buf: &mut Vec<u8>, value: &Hlc) {
    put_i64(buf, value.physical);
    put_i64(buf, value.logical);
    put_str(buf, &value.node_id);
}

/// Offset cursor over a received payload; every take returns None on
/// truncated input so decoders degrade to a parse failure.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, offset: 0 }
    }

    fn take_i64(&mut self) -> Option<i64> {
        let slice = self.data.get(self.offset..self.offset + 8)?;
        self.offset += 8;
        Some(i64::from_be_bytes(slice.try_into().ok()?))
    }

    fn take_u32(&mut self) -> Option<u32> {
        let slice = self.data.get(self.offset..self.offset + 4)?;
        self.offset += 4;
        Some(u32::from_be_bytes(slice.try_into().ok()?))
    }

    fn take_bool(&mut self) -> Option<bool> {
        let byte = *self.data.get(self.offset)?;
        self.offset += 1;
        Some(byte != 0)
    }

    fn take_bytes(&mut self) -> Option<Vec<u8>> {
        let len = self.take_u32()? as usize;
        let slice = self.data.get(self.offset..self.offset + len)?;
        self.offset += len;
        Some(slice.to_vec())
    }

    fn take_str(&mut self) -> Option<String> {
        let bytes = self.take_bytes()?;
        Some(String::from_utf8_lossy(&bytes).to_string())
    }

    fn take_hlc(&mut self) -> Option<Hlc> {
        let physical = self.take_i64()?;
        let logical = self.take_i64()?;
        let node_id = self.take_str()?;
        Some(Hlc::new(physical, logical, node_id))
    }
}

#[derive(Debug, Clone)]
pub struct ReplicateRequest {
    pub key: String,
    pub value: Vec<u8>,
    pub version: i64,
    pub timestamp: i64,
    pub source_node_id: String,
    pub hlc: Hlc,
}

impl ReplicateRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_str(&mut buf, &self.key);
        put_bytes(&mut buf, &self.value);
        put_i64(&mut buf, self.version);
        put_i64(&mut buf, self.timestamp);
        put_str(&mut buf, &self.source_node_id);
        put_hlc(&mut buf, &self.hlc);
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = Reader::new(data);
        Some(ReplicateRequest {
            key: r.take_str()?,
            value: r.take_bytes()?,
            version: r.take_i64()?,
            timestamp: r.take_i64()?,
            source_node_id: r.take_str()?,
            hlc: r.take_hlc()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReplicateResponse {
    pub success: bool,
    pub node_id: String,
    pub error: String,
}

impl ReplicateResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_bool(&mut buf, self.success);
        put_str(&mut buf, &self.node_id);
        put_str(&mut buf, &self.error);
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = Reader::new(data);
        Some(ReplicateResponse {
            success: r.take_bool()?,
            node_id: r.take_str()?,
            error: r.take_str()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GetLocalRequest {
    pub key: String,
}

impl GetLocalRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_str(&mut buf, &self.key);
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = Reader::new(data);
        Some(GetLocalRequest { key: r.take_str()? })
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetLocalResponse {
    pub found: bool,
    pub value: Vec<u8>,
    pub version: i64,
    pub timestamp: i64,
    pub hlc: Hlc,
    pub is_stale: bool,
}

impl GetLocalResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_bool(&mut buf, self.found);
        put_bytes(&mut buf, &self.value);
        put_i64(&mut buf, self.version);
        put_i64(&mut buf, self.timestamp);
        put_hlc(&mut buf, &self.hlc);
        put_bool(&mut buf, self.is_stale);
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = Reader::new(data);
        Some(GetLocalResponse {
            found: r.take_bool()?,
            value: r.take_bytes()?,
            version: r.take_i64()?,
            timestamp: r.take_i64()?,
            hlc: r.take_hlc()?,
            is_stale: r.take_bool()?,
        })
    }

    pub fn into_replica_value(self, peer_addr: &str) -> ReplicaValue {
        ReplicaValue {
            peer_addr: peer_addr.to_string(),
            value: self.value,
            version: self.version,
            timestamp: self.timestamp,
            hlc: self.hlc,
            is_stale: self.is_stale,
            found: self.found,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthRequest {
    pub source_node_id: String,
    pub timestamp: i64,
    pub hlc: Hlc,
}

impl HealthRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_str(&mut buf, &self.source_node_id);
        put_i64(&mut buf, self.timestamp);
        put_hlc(&mut buf, &self.hlc);
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = Reader::new(data);
        Some(HealthRequest {
            source_node_id: r.take_str()?,
            timestamp: r.take_i64()?,
            hlc: r.take_hlc()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
    pub timestamp: i64,
    pub hlc: Hlc,
}

impl HealthResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_bool(&mut buf, self.healthy);
        put_str(&mut buf, &self.node_id);
        put_i64(&mut buf, self.timestamp);
        put_hlc(&mut buf, &self.hlc);
        buf
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut r = Reader::new(data);
        Some(HealthResponse {
            healthy: r.take_bool()?,
            node_id: r.take_str()?,
            timestamp: r.take_i64()?,
            hlc: r.take_hlc()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicate_request_round_trip() {
        let req = ReplicateRequest {
            key: "k".to_string(),
            value: b"some value".to_vec(),
            version: 12345,
            timestamp: 12345,
            source_node_id: "node-a".to_string(),
            hlc: Hlc::new(12345, 7, "node-a"),
        };

        let decoded = ReplicateRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded.key, "k");
        assert_eq!(decoded.value, b"some value");
        assert_eq!(decoded.version, 12345);
        assert_eq!(decoded.hlc.logical, 7);
        assert_eq!(decoded.hlc.node_id, "node-a");
    }

    #[test]
    fn test_get_local_response_not_found() {
        let resp = GetLocalResponse::default();
        let decoded = GetLocalResponse::decode(&resp.encode()).unwrap();
        assert!(!decoded.found);
        assert!(decoded.hlc.is_zero());
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let req = HealthRequest {
            source_node_id: "node-a".to_string(),
            timestamp: 99,
            hlc: Hlc::new(99, 0, "node-a"),
        };
        let encoded = req.encode();
        assert!(HealthRequest::decode(&encoded[..encoded.len() - 3]).is_none());
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_frame(&mut a, CLUSTER_OP_HEALTH, b"payload").await.unwrap();
        let (op, payload) = read_frame(&mut b).await.unwrap();
        assert_eq!(op, CLUSTER_OP_HEALTH);
        assert_eq!(payload, b"payload");
    }
}
