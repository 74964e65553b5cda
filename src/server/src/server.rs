use std::sync::Arc;

use cluster::wire::{self, GetLocalRequest, HealthRequest, ReplicateRequest};
use cluster::{
    CLUSTER_OP_GET_LOCAL, CLUSTER_OP_GET_LOCAL_RESP, CLUSTER_OP_HEALTH, CLUSTER_OP_HEALTH_ACK,
    CLUSTER_OP_REPLICATE, CLUSTER_OP_REPLICATE_ACK,
};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::error::ServerError;
use crate::message::Message;
use crate::node::NodeHandler;
use crate::opcodes::*;

/// Listener front-end of a node: the client protocol on one port and
/// the cluster peer protocol on another, both multiplexed onto the
/// same handler core.
pub struct Server {
    client_addr: String,
    cluster_addr: String,
    handler: Arc<NodeHandler>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    pub fn new(
        client_addr: impl Into<String>,
        cluster_addr: impl Into<String>,
        handler: Arc<NodeHandler>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Server {
            client_addr: client_addr.into(),
            cluster_addr: cluster_addr.into(),
            handler,
            shutdown_tx,
        }
    }

    pub async fn run(&self) -> Result<(), ServerError> {
        let client_listener = TcpListener::bind(&self.client_addr).await?;
        let cluster_listener = TcpListener::bind(&self.cluster_addr).await?;

        info!(
            "node {} serving clients on {} and peers on {}",
            self.handler.node_id(),
            self.client_addr,
            self.cluster_addr
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = client_listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!("client connection from {}", peer_addr);
                            let handler = self.handler.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                if let Err(e) = handle_client_connection(stream, handler, shutdown_rx).await {
                                    debug!("client connection from {} closed: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => warn!("failed to accept client connection: {}", e),
                    }
                }
                result = cluster_listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!("cluster connection from {}", peer_addr);
                            let handler = self.handler.clone();
                            let shutdown_rx = self.shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                if let Err(e) = handle_cluster_connection(stream, handler, shutdown_rx).await {
                                    debug!("cluster connection from {} closed: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => warn!("failed to accept cluster connection: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, stopping listeners");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_client_connection<S>(
    mut stream: S,
    handler: Arc<NodeHandler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            result = Message::receive_async(&mut stream) => {
                match result {
                    Ok(request) => {
                        let response = process_client_message(&request, &handler).await;
                        response.send_async(&mut stream).await?;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                    Err(e) => return Err(e),
                }
            }
            _ = shutdown_rx.recv() => return Ok(()),
        }
    }
}

async fn process_client_message(request: &Message, handler: &NodeHandler) -> Message {
    match request.code {
        OP_PUT => {
            let result = handler.put(&request.key, request.value.clone()).await;
            let mut response = Message {
                code: OP_PUT,
                key: request.key.clone(),
                success: result.success,
                version: result.version,
                timestamp: result.timestamp,
                error: result.error.unwrap_or_default(),
                ..Message::default()
            };
            response.set_hlc(&result.hlc);
            response
        }
        OP_GET => {
            let result = handler.get(&request.key).await;
            let mut response = Message {
                code: OP_GET,
                key: request.key.clone(),
                found: result.found,
                success: result.error.is_none(),
                value: result.value,
                version: result.version,
                timestamp: result.timestamp,
                is_stale: result.is_stale,
                error: result.error.unwrap_or_default(),
                ..Message::default()
            };
            response.set_hlc(&result.hlc);
            response
        }
        OP_GET_LOCAL => {
            let result = handler.get_local(&request.key).await;
            let mut response = Message {
                code: OP_GET_LOCAL,
                key: request.key.clone(),
                found: result.found,
                success: true,
                value: result.value,
                version: result.version,
                timestamp: result.timestamp,
                is_stale: result.is_stale,
                ..Message::default()
            };
            response.set_hlc(&result.hlc);
            response
        }
        OP_STATS => Message {
            code: OP_STATS,
            success: true,
            value: handler.stats().await.into_bytes(),
            ..Message::default()
        },
        code => {
            warn!("unknown client operation: {}", code);
            Message {
                code,
                error: format!("unknown operation: {}", code),
                ..Message::default()
            }
        }
    }
}

async fn handle_cluster_connection<S>(
    mut stream: S,
    handler: Arc<NodeHandler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            result = wire::read_frame(&mut stream) => {
                let (op, payload) = match result {
                    Ok(frame) => frame,
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => return Ok(()),
                    Err(e) => return Err(e),
                };

                match op {
                    CLUSTER_OP_REPLICATE => {
                        let request = ReplicateRequest::decode(&payload)
                            .ok_or_else(malformed_request)?;
                        let response = handler.replicate(request).await;
                        wire::write_frame(&mut stream, CLUSTER_OP_REPLICATE_ACK, &response.encode())
                            .await?;
                    }
                    CLUSTER_OP_GET_LOCAL => {
                        let request = GetLocalRequest::decode(&payload)
                            .ok_or_else(malformed_request)?;
                        let response = handler.get_local(&request.key).await;
                        wire::write_frame(&mut stream, CLUSTER_OP_GET_LOCAL_RESP, &response.encode())
                            .await?;
                    }
                    CLUSTER_OP_HEALTH => {
                        let request = HealthRequest::decode(&payload)
                            .ok_or_else(malformed_request)?;
                        let response = handler.health_check(request).await;
                        wire::write_frame(&mut stream, CLUSTER_OP_HEALTH_ACK, &response.encode())
                            .await?;
                    }
                    op => warn!("unknown cluster operation: {}", op),
                }
            }
            _ = shutdown_rx.recv() => return Ok(()),
        }
    }
}

fn malformed_request() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed request payload")
}
