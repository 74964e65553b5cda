use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hlc::Hlc;
use log::{debug, info, warn};
use metrics::Metrics;
use tokio::sync::{broadcast, mpsc, RwLock};

use crate::client::PeerClient;
use crate::types::*;
use crate::wire::{GetLocalRequest, ReplicateRequest};

/// Read-only view of cluster membership for components that must not
/// hold a reference to the coordinator itself.
pub trait PeerDirectory: Send + Sync {
    /// The configured peer list, independent of reachability. This is
    /// the denominator for availability math.
    fn peer_addresses(&self) -> Vec<String>;
}

/// Aggregate failure of a quorum operation. Per-peer RPC failures stay
/// inside the coordinator and only surface through ack accounting.
#[derive(Debug)]
pub enum CoordinatorError {
    InsufficientAcks { acks: usize, required: usize },
    InsufficientReplicas { responses: usize, required: usize },
}

impl std::fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorError::InsufficientAcks { acks, required } => {
                write!(f, "insufficient acknowledgements: got {}, need {}", acks, required)
            }
            CoordinatorError::InsufficientReplicas { responses, required } => {
                write!(f, "insufficient replicas: got {}, need {}", responses, required)
            }
        }
    }
}

impl std::error::Error for CoordinatorError {}

/// Result of a successful replication fan-out.
#[derive(Debug)]
pub struct ReplicationReport {
    /// Acknowledgements received, self included
    pub acks: usize,
    pub results: Vec<ReplicateOutcome>,
}

/// Replication coordinator: owns the connected-peer map and fans
/// writes and quorum reads out to every connected peer in parallel.
pub struct Coordinator {
    node_id: String,
    configured_peers: Vec<String>,
    peers: Arc<RwLock<HashMap<String, Arc<PeerClient>>>>,
    metrics: Arc<Metrics>,
    timeout: Duration,
}

impl Coordinator {
    pub fn new(
        node_id: impl Into<String>,
        configured_peers: Vec<String>,
        metrics: Arc<Metrics>,
        timeout: Duration,
    ) -> Self {
        let mut peers = HashMap::new();
        for addr in &configured_peers {
            peers.insert(addr.clone(), Arc::new(PeerClient::new(addr.clone())));
        }

        Coordinator {
            node_id: node_id.into(),
            configured_peers,
            peers: Arc::new(RwLock::new(peers)),
            metrics,
            timeout,
        }
    }

    pub fn configured_peers(&self) -> &[String] {
        &self.configured_peers
    }

    pub async fn connected_peer_addresses(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    pub async fn add_peer(&self, addr: &str) {
        let mut peers = self.peers.write().await;
        if !peers.contains_key(addr) {
            peers.insert(addr.to_string(), Arc::new(PeerClient::new(addr)));
            info!("coordinator added peer {}", addr);
        }
    }

    pub async fn remove_peer(&self, addr: &str) {
        let mut peers = self.peers.write().await;
        if peers.remove(addr).is_some() {
            info!("coordinator removed peer {}", addr);
        }
    }

    /// Bring the connected map in line with a freshly discovered peer
    /// set. In-flight operations keep their snapshot of the old map and
    /// run to completion.
    pub async fn reconcile_peers(&self, discovered: Vec<String>) {
        let discovered_set: HashSet<&String> = discovered.iter().collect();

        let current: Vec<String> = self.connected_peer_addresses().await;
        for addr in &current {
            if !discovered_set.contains(addr) {
                self.remove_peer(addr).await;
            }
        }

        for addr in &discovered {
            self.add_peer(addr).await;
        }
    }

    /// Replicate one write to every connected peer in parallel and
    /// account acknowledgements against `required_acks` (self counts as
    /// one). Every task runs to completion so the latency histograms
    /// see the slow peers too.
    pub async fn replicate(
        &self,
        key: &str,
        value: Vec<u8>,
        version: i64,
        timestamp: i64,
        hlc: Hlc,
        required_acks: usize,
    ) -> Result<ReplicationReport, CoordinatorError> {
        let peer_list: Vec<Arc<PeerClient>> =
            self.peers.read().await.values().cloned().collect();

        let mut acks = 1; // self
        let mut results = Vec::with_capacity(peer_list.len());

        if !peer_list.is_empty() {
            let (tx, mut rx) = mpsc::channel(peer_list.len());

            for client in peer_list {
                let tx = tx.clone();
                let metrics = self.metrics.clone();
                let deadline = self.timeout;
                let req = ReplicateRequest {
                    key: key.to_string(),
                    value: value.clone(),
                    version,
                    timestamp,
                    source_node_id: self.node_id.clone(),
                    hlc: hlc.clone(),
                };

                tokio::spawn(async move {
                    let start = Instant::now();
                    let response = client.replicate(&req, deadline).await;
                    let latency = start.elapsed();

                    metrics
                        .replicate_latency
                        .with_label(client.addr())
                        .observe(latency.as_secs_f64());

                    let outcome = match response {
                        Ok(resp) if resp.success => {
                            metrics.replicate_acks.with_label("success").inc();
                            debug!("replication to {} succeeded in {:?}", client.addr(), latency);
                            ReplicateOutcome {
                                peer_addr: client.addr().to_string(),
                                success: true,
                                latency,
                                error: None,
                            }
                        }
                        Ok(resp) => {
                            metrics.replicate_acks.with_label("failure").inc();
                            warn!(
                                "replication of {} rejected by {}: {}",
                                req.key,
                                client.addr(),
                                resp.error
                            );
                            ReplicateOutcome {
                                peer_addr: client.addr().to_string(),
                                success: false,
                                latency,
                                error: Some(resp.error),
                            }
                        }
                        Err(e) => {
                            metrics.replicate_acks.with_label("failure").inc();
                            metrics.errors.with_label("rpc").inc();
                            warn!(
                                "replication of {} to {} failed after {:?}: {}",
                                req.key,
                                client.addr(),
                                latency,
                                e
                            );
                            ReplicateOutcome {
                                peer_addr: client.addr().to_string(),
                                success: false,
                                latency,
                                error: Some(e.to_string()),
                            }
                        }
                    };

                    let _ = tx.send(outcome).await;
                });
            }
            drop(tx);

            while let Some(outcome) = rx.recv().await {
                if outcome.success {
                    acks += 1;
                }
                results.push(outcome);
            }
        }

        info!(
            "replication of {} completed: {} acks of {} required across {} peers",
            key,
            acks,
            required_acks,
            results.len()
        );

        if acks < required_acks {
            return Err(CoordinatorError::InsufficientAcks {
                acks,
                required: required_acks,
            });
        }

        Ok(ReplicationReport { acks, results })
    }

    /// Query every connected peer for its local copy of `key`. Only
    /// peers that report the key found contribute a value; self counts
    /// implicitly toward the response requirement.
    pub async fn query_replicas(
        &self,
        key: &str,
        required_responses: usize,
    ) -> Result<Vec<ReplicaValue>, CoordinatorError> {
        let peer_list: Vec<Arc<PeerClient>> =
            self.peers.read().await.values().cloned().collect();

        let mut values = Vec::new();

        if !peer_list.is_empty() {
            let (tx, mut rx) = mpsc::channel(peer_list.len());

            for client in peer_list {
                let tx = tx.clone();
                let metrics = self.metrics.clone();
                let deadline = self.timeout;
                let req = GetLocalRequest {
                    key: key.to_string(),
                };

                tokio::spawn(async move {
                    match client.get_local(&req, deadline).await {
                        Ok(resp) if resp.found => {
                            let _ = tx.send(resp.into_replica_value(client.addr())).await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            metrics.errors.with_label("rpc").inc();
                            warn!("replica query of {} to {} failed: {}", req.key, client.addr(), e);
                        }
                    }
                });
            }
            drop(tx);

            while let Some(value) = rx.recv().await {
                values.push(value);
            }
        }

        let responses = values.len() + 1; // self
        if responses < required_responses {
            return Err(CoordinatorError::InsufficientReplicas {
                responses,
                required: required_responses,
            });
        }

        Ok(values)
    }

    /// Most recent replica by HLC; the first value wins exact ties so
    /// the scan is stable.
    pub fn most_recent(values: &[ReplicaValue]) -> Option<&ReplicaValue> {
        let mut best = values.first()?;
        for value in &values[1..] {
            if value.hlc.happens_after(&best.hlc) {
                best = value;
            }
        }
        Some(best)
    }

    /// Periodically resolve the discovery host and reconcile the
    /// connected-peer map against whatever it reports.
    pub async fn run_discovery(
        self: Arc<Self>,
        host: String,
        advertise_addr: String,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("peer discovery started against {} every {:?}", host, interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match discover_peers(&host).await {
                        Ok(mut peers) => {
                            peers.retain(|p| p != &advertise_addr);
                            debug!("discovered {} peers via {}", peers.len(), host);
                            self.reconcile_peers(peers).await;
                        }
                        Err(e) => warn!("peer discovery against {} failed: {}", host, e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("peer discovery stopped");
                    return;
                }
            }
        }
    }
}

impl PeerDirectory for Coordinator {
    fn peer_addresses(&self) -> Vec<String> {
        self.configured_peers.clone()
    }
}

/// Resolve a discovery name ("host:port") to the peer addresses behind
/// it.
pub async fn discover_peers(host: &str) -> io::Result<Vec<String>> {
    let addrs = tokio::net::lookup_host(host).await?;
    Ok(addrs.map(|addr| addr.to_string()).collect())
}
