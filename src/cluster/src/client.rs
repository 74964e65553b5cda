use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::types::*;
use crate::wire::{
    self, GetLocalRequest, GetLocalResponse, HealthRequest, HealthResponse, ReplicateRequest,
    ReplicateResponse,
};

/// One persistent connection to a peer.
///
/// Requests are serialised by the connection mutex, so writes from this
/// node reach the peer in sending order. The connection is established
/// lazily and dropped on any error or deadline, forcing a clean
/// reconnect on the next request.
pub struct PeerClient {
    addr: String,
    conn: Mutex<Option<TcpStream>>,
}

impl PeerClient {
    pub fn new(addr: impl Into<String>) -> Self {
        PeerClient {
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn replicate(
        &self,
        req: &ReplicateRequest,
        deadline: Duration,
    ) -> io::Result<ReplicateResponse> {
        let payload = self
            .request(CLUSTER_OP_REPLICATE, req.encode(), CLUSTER_OP_REPLICATE_ACK, deadline)
            .await?;
        ReplicateResponse::decode(&payload).ok_or_else(bad_payload)
    }

    pub async fn get_local(
        &self,
        req: &GetLocalRequest,
        deadline: Duration,
    ) -> io::Result<GetLocalResponse> {
        let payload = self
            .request(CLUSTER_OP_GET_LOCAL, req.encode(), CLUSTER_OP_GET_LOCAL_RESP, deadline)
            .await?;
        GetLocalResponse::decode(&payload).ok_or_else(bad_payload)
    }

    pub async fn health(
        &self,
        req: &HealthRequest,
        deadline: Duration,
    ) -> io::Result<HealthResponse> {
        let payload = self
            .request(CLUSTER_OP_HEALTH, req.encode(), CLUSTER_OP_HEALTH_ACK, deadline)
            .await?;
        HealthResponse::decode(&payload).ok_or_else(bad_payload)
    }

    /// Send one frame and wait for its response, all within `deadline`
    /// (connect included).
    async fn request(
        &self,
        op: u8,
        payload: Vec<u8>,
        expect_op: u8,
        deadline: Duration,
    ) -> io::Result<Vec<u8>> {
        let mut conn = self.conn.lock().await;

        let result =
            tokio::time::timeout(deadline, Self::exchange(&self.addr, &mut conn, op, &payload))
                .await;

        match result {
            Ok(Ok((resp_op, resp_payload))) if resp_op == expect_op => Ok(resp_payload),
            Ok(Ok((resp_op, _))) => {
                *conn = None;
                Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected opcode {} (wanted {})", resp_op, expect_op),
                ))
            }
            Ok(Err(e)) => {
                *conn = None;
                Err(e)
            }
            Err(_) => {
                *conn = None;
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("rpc to {} exceeded {:?}", self.addr, deadline),
                ))
            }
        }
    }

    async fn exchange(
        addr: &str,
        conn: &mut Option<TcpStream>,
        op: u8,
        payload: &[u8],
    ) -> io::Result<(u8, Vec<u8>)> {
        let stream = match conn.take() {
            Some(stream) => conn.insert(stream),
            None => conn.insert(TcpStream::connect(addr).await?),
        };

        wire::write_frame(stream, op, payload).await?;
        wire::read_frame(stream).await
    }
}

fn bad_payload() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "malformed response payload")
}
