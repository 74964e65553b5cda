use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hlc::{wall_nanos, Clock};
use log::{debug, info, warn};
use metrics::Metrics;
use tokio::sync::{broadcast, mpsc, RwLock};

use crate::client::PeerClient;
use crate::coordinator::discover_peers;
use crate::wire::HealthRequest;

const HEALTH_RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// Probe-side view of a peer's liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    /// Never successfully probed since this entry was created
    Unknown,
    Up,
    Down,
}

/// The transition rule: any success lands in Up, any failure in Down,
/// and only a Down-to-Up edge signals partition healing.
fn next_status(previous: PeerStatus, healthy: bool) -> (PeerStatus, bool) {
    if healthy {
        (PeerStatus::Up, previous == PeerStatus::Down)
    } else {
        (PeerStatus::Down, false)
    }
}

struct ProbePeer {
    status: PeerStatus,
    // dropping the sender cancels the probe task for this peer
    _cancel: mpsc::Sender<()>,
}

/// Periodic liveness and RTT probe, one task per peer.
///
/// Each probe piggybacks the local HLC on the health request and merges
/// the response timestamp back into the clock, so idle clusters keep
/// their clocks loosely coupled even without write traffic.
pub struct Probe {
    node_id: String,
    interval: Duration,
    clock: Arc<Clock>,
    metrics: Arc<Metrics>,
    healing_tx: Option<mpsc::Sender<String>>,
    peers: Arc<RwLock<HashMap<String, ProbePeer>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Probe {
    pub fn new(
        node_id: impl Into<String>,
        clock: Arc<Clock>,
        metrics: Arc<Metrics>,
        interval: Duration,
        healing_tx: Option<mpsc::Sender<String>>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Probe {
            node_id: node_id.into(),
            interval,
            clock,
            metrics,
            healing_tx,
            peers: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
        }
    }

    /// Spawn a probe task for every configured peer.
    pub async fn start(self: &Arc<Self>, peer_addrs: &[String]) {
        for addr in peer_addrs {
            self.add_peer(addr).await;
        }
        info!("health probe started for {} peers every {:?}", peer_addrs.len(), self.interval);
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub async fn peer_status(&self, addr: &str) -> Option<PeerStatus> {
        self.peers.read().await.get(addr).map(|p| p.status)
    }

    pub async fn add_peer(self: &Arc<Self>, addr: &str) {
        let mut peers = self.peers.write().await;
        if peers.contains_key(addr) {
            return;
        }

        let client = Arc::new(PeerClient::new(addr));
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        peers.insert(
            addr.to_string(),
            ProbePeer {
                status: PeerStatus::Unknown,
                _cancel: cancel_tx,
            },
        );
        drop(peers);

        let probe = self.clone();
        let addr = addr.to_string();
        tokio::spawn(async move {
            probe.probe_loop(addr, client, cancel_rx).await;
        });
    }

    pub async fn remove_peer(&self, addr: &str) {
        let mut peers = self.peers.write().await;
        if peers.remove(addr).is_some() {
            info!("health probe removed peer {}", addr);
        }
    }

    pub async fn reconcile_peers(self: &Arc<Self>, discovered: Vec<String>) {
        let discovered_set: HashSet<&String> = discovered.iter().collect();

        let current: Vec<String> = self.peers.read().await.keys().cloned().collect();
        for addr in &current {
            if !discovered_set.contains(addr) {
                self.remove_peer(addr).await;
            }
        }

        for addr in &discovered {
            self.add_peer(addr).await;
        }
    }

    pub async fn run_discovery(
        self: Arc<Self>,
        host: String,
        advertise_addr: String,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match discover_peers(&host).await {
                        Ok(mut peers) => {
                            peers.retain(|p| p != &advertise_addr);
                            self.reconcile_peers(peers).await;
                        }
                        Err(e) => warn!("health probe discovery against {} failed: {}", host, e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("health probe discovery stopped");
                    return;
                }
            }
        }
    }

    async fn probe_loop(
        self: Arc<Self>,
        addr: String,
        client: Arc<PeerClient>,
        mut cancel_rx: mpsc::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_peer(&addr, &client).await,
                _ = cancel_rx.recv() => {
                    debug!("probe task for {} cancelled", addr);
                    return;
                }
                _ = shutdown_rx.recv() => {
                    debug!("probe task for {} stopped", addr);
                    return;
                }
            }
        }
    }

    async fn check_peer(&self, addr: &str, client: &PeerClient) {
        let start = Instant::now();
        let req = HealthRequest {
            source_node_id: self.node_id.clone(),
            timestamp: wall_nanos(),
            hlc: self.clock.now(),
        };

        let response = client.health(&req, HEALTH_RPC_TIMEOUT).await;
        let rtt = start.elapsed();

        let healthy = match &response {
            Ok(resp) => resp.healthy,
            Err(_) => false,
        };

        let (healed, previous) = {
            let mut peers = self.peers.write().await;
            let peer = match peers.get_mut(addr) {
                Some(p) => p,
                None => return, // removed while the rpc was in flight
            };
            let previous = peer.status;
            let (status, healed) = next_status(previous, healthy);
            peer.status = status;
            (healed, previous)
        };

        match response {
            Ok(resp) if resp.healthy => {
                self.metrics
                    .health_rtt
                    .with_label(addr)
                    .set(rtt.as_secs_f64());

                let drift_ms =
                    ((resp.hlc.physical - wall_nanos()) as f64 / 1_000_000.0).max(0.0);
                self.metrics.hlc_drift.with_label(addr).set(drift_ms);

                if let Err(e) = self.clock.update(&resp.hlc) {
                    warn!("clock update from health check of {} failed: {}", addr, e);
                }

                debug!("health check of {} succeeded in {:?}", addr, rtt);

                if healed {
                    info!("partition healing detected for {}", addr);
                    if let Some(tx) = &self.healing_tx {
                        if tx.try_send(addr.to_string()).is_err() {
                            warn!("healing event queue full, dropping event for {}", addr);
                        }
                    }
                }
            }
            Ok(resp) => {
                warn!("peer {} ({}) reports unhealthy", addr, resp.node_id);
                self.metrics.errors.with_label("health").inc();
            }
            Err(e) => {
                if previous != PeerStatus::Down {
                    warn!("health check of {} failed after {:?}: {}", addr, rtt, e);
                }
                self.metrics.errors.with_label("health").inc();
            }
        }
    }
}
