use std::sync::Arc;
use std::time::Instant;

use adaptive::QuorumProvider;
use cluster::wire::{
    GetLocalResponse, HealthRequest, HealthResponse, ReplicateRequest, ReplicateResponse,
};
use cluster::{Coordinator, ReplicaValue};
use hlc::{wall_nanos, Clock, Hlc};
use log::{debug, info, warn};
use metrics::Metrics;
use reconcile::RecentWriteLog;
use storage::{Detector, Store};

/// Result of a client write.
#[derive(Debug)]
pub struct PutResult {
    pub success: bool,
    pub version: i64,
    pub timestamp: i64,
    pub hlc: Hlc,
    pub error: Option<String>,
}

/// Result of a client read.
#[derive(Debug, Default)]
pub struct GetResult {
    pub found: bool,
    pub value: Vec<u8>,
    pub version: i64,
    pub timestamp: i64,
    pub hlc: Hlc,
    pub is_stale: bool,
    pub error: Option<String>,
}

/// Request handling core of a node: glues the clock, store, quorum
/// provider, coordinator and staleness detector together behind the
/// five public operations.
pub struct NodeHandler {
    node_id: String,
    store: Store,
    coordinator: Arc<Coordinator>,
    quorum: Arc<dyn QuorumProvider>,
    clock: Arc<Clock>,
    staleness: Arc<Detector>,
    write_log: Option<Arc<RecentWriteLog>>,
    metrics: Arc<Metrics>,
}

impl NodeHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        store: Store,
        coordinator: Arc<Coordinator>,
        quorum: Arc<dyn QuorumProvider>,
        clock: Arc<Clock>,
        staleness: Arc<Detector>,
        write_log: Option<Arc<RecentWriteLog>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        NodeHandler {
            node_id: node_id.into(),
            store,
            coordinator,
            quorum,
            clock,
            staleness,
            write_log,
            metrics,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Client write: stamp, store locally, fan out, wait for W-1 peer
    /// acknowledgements.
    pub async fn put(&self, key: &str, value: Vec<u8>) -> PutResult {
        let start = Instant::now();
        debug!("PUT {} ({} bytes)", key, value.len());

        let timestamp = self.clock.now();
        let stored = self
            .store
            .put(key, value.clone(), &self.node_id, timestamp.clone())
            .await;

        if let Some(write_log) = &self.write_log {
            write_log.add(key, value.clone(), &self.node_id, timestamp.clone());
        }

        let required_w = self.quorum.w();
        let result = self
            .coordinator
            .replicate(
                key,
                value,
                stored.version,
                stored.timestamp,
                timestamp.clone(),
                required_w,
            )
            .await;

        let outcome = match result {
            Ok(report) => {
                info!(
                    "PUT {} succeeded: {} acks, version {}, {:?}",
                    key,
                    report.acks,
                    stored.version,
                    start.elapsed()
                );
                self.metrics.record_write_success();
                PutResult {
                    success: true,
                    version: stored.version,
                    timestamp: stored.timestamp,
                    hlc: timestamp,
                    error: None,
                }
            }
            Err(e) => {
                warn!("PUT {} failed: {}", key, e);
                self.metrics.record_write_failure();
                self.metrics.errors.with_label("insufficient_acks").inc();
                PutResult {
                    success: false,
                    version: 0,
                    timestamp: 0,
                    hlc: Hlc::default(),
                    error: Some(e.to_string()),
                }
            }
        };

        self.metrics.put_latency.observe(start.elapsed().as_secs_f64());
        outcome
    }

    /// Client read: serve locally at R=1, otherwise gather a quorum of
    /// replica values and return the most recent by HLC.
    pub async fn get(&self, key: &str) -> GetResult {
        let start = Instant::now();
        debug!("GET {}", key);

        let local = self.store.get(key).await;
        let required_r = self.quorum.r();

        let result = if required_r == 1 {
            self.get_local_only(key, local)
        } else {
            self.get_quorum(key, local, required_r).await
        };

        self.metrics.get_latency.observe(start.elapsed().as_secs_f64());
        result
    }

    fn get_local_only(&self, key: &str, local: Option<storage::VersionedValue>) -> GetResult {
        let local = match local {
            Some(v) => v,
            None => {
                debug!("GET {} not found (local)", key);
                self.metrics.record_read_success();
                return GetResult::default();
            }
        };

        if let Err(e) = self.staleness.check_strict(&local) {
            warn!("GET {} rejected: {}", key, e);
            self.metrics.record_read_failure();
            return GetResult {
                found: true,
                is_stale: true,
                error: Some(e.to_string()),
                ..GetResult::default()
            };
        }

        self.metrics.record_read_success();
        GetResult {
            found: true,
            value: local.value(),
            version: local.version,
            timestamp: local.timestamp,
            hlc: local.hlc,
            is_stale: false,
            error: None,
        }
    }

    async fn get_quorum(
        &self,
        key: &str,
        local: Option<storage::VersionedValue>,
        required_r: usize,
    ) -> GetResult {
        let mut values = match self.coordinator.query_replicas(key, required_r).await {
            Ok(values) => values,
            Err(e) => {
                warn!("GET {} failed: {}", key, e);
                self.metrics.record_read_failure();
                self.metrics.errors.with_label("insufficient_replicas").inc();
                return GetResult {
                    error: Some(e.to_string()),
                    ..GetResult::default()
                };
            }
        };

        let local_hlc = local.as_ref().map(|v| v.hlc.clone());
        if let Some(local) = local {
            values.push(ReplicaValue {
                peer_addr: "local".to_string(),
                value: local.value(),
                version: local.version,
                timestamp: local.timestamp,
                hlc: local.hlc,
                is_stale: false,
                found: true,
            });
        }

        let winner = match Coordinator::most_recent(&values) {
            Some(winner) => winner.clone(),
            None => {
                debug!("GET {} not found (quorum)", key);
                self.metrics.record_read_success();
                return GetResult::default();
            }
        };

        if let Err(e) = self.staleness.check_strict_timestamp(&winner.hlc) {
            warn!("GET {} rejected (winner from {}): {}", key, winner.peer_addr, e);
            self.metrics.record_read_failure();
            return GetResult {
                found: true,
                is_stale: true,
                error: Some(e.to_string()),
                ..GetResult::default()
            };
        }

        if winner.peer_addr != "local" {
            self.read_repair(key, &winner, local_hlc).await;
        }

        debug!(
            "GET {} succeeded (quorum, winner from {}, version {})",
            key, winner.peer_addr, winner.version
        );
        self.metrics.record_read_success();
        GetResult {
            found: true,
            value: winner.value,
            version: winner.version,
            timestamp: winner.timestamp,
            hlc: winner.hlc,
            is_stale: false,
            error: None,
        }
    }

    /// A quorum read that found a newer value on a peer pulls that
    /// value into the local store, so the next local read is already
    /// current.
    async fn read_repair(&self, key: &str, winner: &ReplicaValue, local_hlc: Option<Hlc>) {
        let newer_than_local = match &local_hlc {
            Some(local_hlc) => winner.hlc.happens_after(local_hlc),
            None => true,
        };
        if !newer_than_local {
            return;
        }

        let origin = winner.hlc.node_id.clone();
        self.store
            .put(key, winner.value.clone(), &origin, winner.hlc.clone())
            .await;
        if let Some(write_log) = &self.write_log {
            write_log.add(key, winner.value.clone(), &origin, winner.hlc.clone());
        }

        self.metrics.read_repair.inc();
        debug!("read repair of {} from {} (version {})", key, winner.peer_addr, winner.version);
    }

    /// Peer-facing read: local store only, never a quorum. Staleness is
    /// annotated, not rejected, so the caller can decide.
    pub async fn get_local(&self, key: &str) -> GetLocalResponse {
        let local = match self.store.get(key).await {
            Some(v) => v,
            None => return GetLocalResponse::default(),
        };

        let is_stale = self.staleness.is_stale(&local.hlc, wall_nanos());
        GetLocalResponse {
            found: true,
            value: local.value(),
            version: local.version,
            timestamp: local.timestamp,
            hlc: local.hlc,
            is_stale,
        }
    }

    /// Peer-facing write apply. Clock drift is logged and the write is
    /// stored regardless; same-source ordering comes from the transport.
    pub async fn replicate(&self, req: ReplicateRequest) -> ReplicateResponse {
        debug!(
            "REPLICATE {} from {} (version {})",
            req.key, req.source_node_id, req.version
        );

        if let Err(e) = self.clock.update(&req.hlc) {
            warn!("clock update from {} failed during replication: {}", req.source_node_id, e);
            self.metrics.errors.with_label("clock_drift").inc();
        }

        self.store
            .put(&req.key, req.value.clone(), &req.source_node_id, req.hlc.clone())
            .await;

        if let Some(write_log) = &self.write_log {
            write_log.add(&req.key, req.value, &req.source_node_id, req.hlc);
        }

        ReplicateResponse {
            success: true,
            node_id: self.node_id.clone(),
            error: String::new(),
        }
    }

    /// Liveness check; merges the caller's HLC when present.
    pub async fn health_check(&self, req: HealthRequest) -> HealthResponse {
        if !req.hlc.is_zero() {
            if let Err(e) = self.clock.update(&req.hlc) {
                debug!("clock update from {} failed during health check: {}", req.source_node_id, e);
            }
        }

        HealthResponse {
            healthy: true,
            node_id: self.node_id.clone(),
            timestamp: wall_nanos(),
            hlc: self.clock.now(),
        }
    }

    /// Small JSON status document for the stats command.
    pub async fn stats(&self) -> String {
        format!(
            r#"{{"node_id":"{}","keys":{},"n":{},"current_r":{},"current_w":{}}}"#,
            self.node_id,
            self.store.size().await,
            self.quorum.n(),
            self.quorum.r(),
            self.quorum.w(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptive::StaticQuorum;
    use cluster::wire::{self, GetLocalRequest};
    use cluster::{CLUSTER_OP_GET_LOCAL, CLUSTER_OP_GET_LOCAL_RESP, CLUSTER_OP_REPLICATE, CLUSTER_OP_REPLICATE_ACK};
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn handler_with(
        peers: Vec<String>,
        r: usize,
        w: usize,
        max_staleness: Duration,
    ) -> (NodeHandler, Store, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let store = Store::new();
        let coordinator = Arc::new(Coordinator::new(
            "node-a",
            peers,
            metrics.clone(),
            Duration::from_millis(500),
        ));
        let handler = NodeHandler::new(
            "node-a",
            store.clone(),
            coordinator,
            Arc::new(StaticQuorum::new(r, w, 3)),
            Arc::new(Clock::new("node-a", Duration::from_millis(500))),
            Arc::new(Detector::new(max_staleness, metrics.clone())),
            Some(Arc::new(RecentWriteLog::new(100, Duration::from_secs(300)))),
            metrics.clone(),
        );
        (handler, store, metrics)
    }

    /// Peer that acks replications and serves its stored value.
    async fn spawn_peer(stored: Option<GetLocalResponse>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let stored = stored.clone();
                tokio::spawn(async move {
                    while let Ok((op, payload)) = wire::read_frame(&mut stream).await {
                        let write = match op {
                            CLUSTER_OP_REPLICATE => {
                                let _ = ReplicateRequest::decode(&payload);
                                let resp = ReplicateResponse {
                                    success: true,
                                    node_id: "peer".to_string(),
                                    error: String::new(),
                                };
                                wire::write_frame(&mut stream, CLUSTER_OP_REPLICATE_ACK, &resp.encode())
                                    .await
                            }
                            CLUSTER_OP_GET_LOCAL => {
                                let _ = GetLocalRequest::decode(&payload);
                                let resp = stored.clone().unwrap_or_default();
                                wire::write_frame(&mut stream, CLUSTER_OP_GET_LOCAL_RESP, &resp.encode())
                                    .await
                            }
                            _ => break,
                        };
                        if write.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_put_then_get_single_node() {
        let (handler, _, metrics) = handler_with(vec![], 1, 1, Duration::from_secs(3));

        let put = handler.put("k", b"v1".to_vec()).await;
        assert!(put.success);
        assert!(put.version > 0);
        assert_eq!(put.hlc.node_id, "node-a");

        let get = handler.get("k").await;
        assert!(get.found);
        assert_eq!(get.value, b"v1");
        assert!(!get.is_stale);

        assert_eq!(metrics.write_success_total.get(), 1);
        assert_eq!(metrics.read_success_total.get(), 1);
    }

    #[tokio::test]
    async fn test_put_without_peers_fails_quorum() {
        let (handler, store, metrics) = handler_with(vec![], 1, 2, Duration::from_secs(3));

        let put = handler.put("k", b"v1".to_vec()).await;
        assert!(!put.success);
        assert!(put.error.unwrap().contains("insufficient acknowledgements"));
        assert_eq!(metrics.write_failure_total.get(), 1);

        // the local write happened before the fan-out and stays
        assert!(store.get("k").await.is_some());
    }

    #[tokio::test]
    async fn test_put_with_peer_meets_w2() {
        let peer = spawn_peer(None).await;
        let (handler, _, _) = handler_with(vec![peer], 1, 2, Duration::from_secs(3));

        let put = handler.put("k", b"v1".to_vec()).await;
        assert!(put.success);
    }

    #[tokio::test]
    async fn test_get_quorum_prefers_newer_replica_and_repairs_local() {
        let remote_hlc = Hlc::new(wall_nanos() + 50_000_000, 0, "peer");
        let peer = spawn_peer(Some(GetLocalResponse {
            found: true,
            value: b"remote".to_vec(),
            version: remote_hlc.physical,
            timestamp: remote_hlc.physical,
            hlc: remote_hlc.clone(),
            is_stale: false,
        }))
        .await;
        let (handler, store, metrics) = handler_with(vec![peer], 2, 1, Duration::from_secs(3));

        handler.put("k", b"local".to_vec()).await;

        let get = handler.get("k").await;
        assert!(get.found);
        assert_eq!(get.value, b"remote");

        // the winning replica was pulled into the local store
        let repaired = store.get("k").await.unwrap();
        assert_eq!(repaired.value(), b"remote");
        assert!(repaired.hlc.is_equal(&remote_hlc));
        assert_eq!(metrics.read_repair.get(), 1);
    }

    #[tokio::test]
    async fn test_get_quorum_repairs_locally_absent_key() {
        let remote_hlc = Hlc::new(wall_nanos(), 0, "peer");
        let peer = spawn_peer(Some(GetLocalResponse {
            found: true,
            value: b"remote".to_vec(),
            version: remote_hlc.physical,
            timestamp: remote_hlc.physical,
            hlc: remote_hlc,
            is_stale: false,
        }))
        .await;
        let (handler, store, metrics) = handler_with(vec![peer], 2, 1, Duration::from_secs(3));

        let get = handler.get("k").await;
        assert!(get.found);
        assert_eq!(get.value, b"remote");

        assert!(store.get("k").await.is_some());
        assert_eq!(metrics.read_repair.get(), 1);
    }

    #[tokio::test]
    async fn test_get_quorum_no_repair_when_local_is_newest() {
        let old_hlc = Hlc::new(wall_nanos() - 50_000_000, 0, "peer");
        let peer = spawn_peer(Some(GetLocalResponse {
            found: true,
            value: b"old-remote".to_vec(),
            version: old_hlc.physical,
            timestamp: old_hlc.physical,
            hlc: old_hlc,
            is_stale: false,
        }))
        .await;
        let (handler, store, metrics) = handler_with(vec![peer], 2, 1, Duration::from_secs(3));

        handler.put("k", b"local".to_vec()).await;

        let get = handler.get("k").await;
        assert!(get.found);
        assert_eq!(get.value, b"local");

        assert_eq!(store.get("k").await.unwrap().value(), b"local");
        assert_eq!(metrics.read_repair.get(), 0);
    }

    #[tokio::test]
    async fn test_get_quorum_without_peers_fails() {
        let (handler, _, metrics) = handler_with(vec![], 2, 2, Duration::from_secs(3));

        let get = handler.get("k").await;
        assert!(!get.found);
        assert!(get.error.unwrap().contains("insufficient replicas"));
        assert_eq!(metrics.read_failure_total.get(), 1);
    }

    #[tokio::test]
    async fn test_stale_read_rejected_with_flag() {
        let (handler, store, metrics) = handler_with(vec![], 1, 1, Duration::from_secs(3));

        let old = Hlc::new(wall_nanos() - 4_000_000_000, 0, "node-a");
        store.put("k", b"v".to_vec(), "node-a", old).await;

        let get = handler.get("k").await;
        assert!(get.found);
        assert!(get.is_stale);
        assert!(get.error.unwrap().starts_with("staleness bound exceeded"));
        assert_eq!(metrics.stale_reads_rejected.get(), 1);
    }

    #[tokio::test]
    async fn test_get_local_annotates_staleness_without_rejecting() {
        let (handler, store, _) = handler_with(vec![], 1, 1, Duration::from_secs(3));

        let old = Hlc::new(wall_nanos() - 4_000_000_000, 0, "node-a");
        store.put("k", b"v".to_vec(), "node-a", old).await;

        let resp = handler.get_local("k").await;
        assert!(resp.found);
        assert!(resp.is_stale);
        assert_eq!(resp.value, b"v");

        let missing = handler.get_local("missing").await;
        assert!(!missing.found);
    }

    #[tokio::test]
    async fn test_replicate_is_idempotent() {
        let (handler, store, _) = handler_with(vec![], 1, 1, Duration::from_secs(3));

        let req = ReplicateRequest {
            key: "k".to_string(),
            value: b"v".to_vec(),
            version: 100,
            timestamp: 100,
            source_node_id: "node-b".to_string(),
            hlc: Hlc::new(100, 0, "node-b"),
        };

        assert!(handler.replicate(req.clone()).await.success);
        let first = store.get("k").await.unwrap();

        assert!(handler.replicate(req).await.success);
        let second = store.get("k").await.unwrap();

        assert_eq!(first.value(), second.value());
        assert_eq!(first.version, second.version);
        assert!(first.hlc.is_equal(&second.hlc));
    }

    #[tokio::test]
    async fn test_replicate_stores_despite_clock_drift() {
        let (handler, store, metrics) = handler_with(vec![], 1, 1, Duration::from_secs(3));

        // remote stamp a full second in the future, far past the
        // 500ms drift cap
        let future = Hlc::new(wall_nanos() + 1_000_000_000, 0, "node-b");
        let resp = handler
            .replicate(ReplicateRequest {
                key: "k".to_string(),
                value: b"v".to_vec(),
                version: future.physical,
                timestamp: future.physical,
                source_node_id: "node-b".to_string(),
                hlc: future,
            })
            .await;

        assert!(resp.success);
        assert!(store.get("k").await.is_some());
        assert_eq!(metrics.errors.with_label("clock_drift").get(), 1);
    }

    #[tokio::test]
    async fn test_health_check_merges_clock() {
        let (handler, _, _) = handler_with(vec![], 1, 1, Duration::from_secs(3));

        let remote = Hlc::new(wall_nanos(), 5, "node-b");
        let resp = handler
            .health_check(HealthRequest {
                source_node_id: "node-b".to_string(),
                timestamp: wall_nanos(),
                hlc: remote.clone(),
            })
            .await;

        assert!(resp.healthy);
        assert_eq!(resp.node_id, "node-a");
        assert!(remote.happens_before(&resp.hlc));
    }

    #[tokio::test]
    async fn test_stats_document() {
        let (handler, _, _) = handler_with(vec![], 1, 1, Duration::from_secs(3));
        handler.put("k", b"v".to_vec()).await;

        let stats = handler.stats().await;
        assert!(stats.contains(r#""node_id":"node-a""#));
        assert!(stats.contains(r#""keys":1"#));
        assert!(stats.contains(r#""current_r":1"#));
    }
}
