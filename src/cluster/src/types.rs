use std::time::Duration;

use hlc::Hlc;

/// Operation codes for the cluster wire protocol
pub const CLUSTER_OP_REPLICATE: u8 = 1;
pub const CLUSTER_OP_REPLICATE_ACK: u8 = 2;
pub const CLUSTER_OP_GET_LOCAL: u8 = 3;
pub const CLUSTER_OP_GET_LOCAL_RESP: u8 = 4;
pub const CLUSTER_OP_HEALTH: u8 = 5;
pub const CLUSTER_OP_HEALTH_ACK: u8 = 6;

/// A value reported by one replica during a quorum read.
#[derive(Debug, Clone)]
pub struct ReplicaValue {
    pub peer_addr: String,
    pub value: Vec<u8>,
    pub version: i64,
    pub timestamp: i64,
    pub hlc: Hlc,
    /// The replica's own view of whether the value exceeds its
    /// staleness bound
    pub is_stale: bool,
    pub found: bool,
}

/// Outcome of one replication attempt against one peer.
#[derive(Debug, Clone)]
pub struct ReplicateOutcome {
    pub peer_addr: String,
    pub success: bool,
    pub latency: Duration,
    pub error: Option<String>,
}
