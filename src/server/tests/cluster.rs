//! Multi-node integration tests over loopback TCP.
//!
//! Each test wires real components (store, clock, coordinator, probe,
//! optionally the reconciliation engine) behind real listeners and
//! drives them through the client library.

use std::sync::Arc;
use std::time::Duration;

use adaptive::StaticQuorum;
use client::FluxClient;
use cluster::{Coordinator, PeerStatus, Probe};
use hlc::Clock;
use metrics::Metrics;
use reconcile::{Engine, RecentWriteLog};
use server::{NodeHandler, Server};
use storage::{Detector, Store};
use tokio::sync::broadcast;

struct TestNode {
    client_addr: String,
    store: Store,
    metrics: Arc<Metrics>,
    probe: Arc<Probe>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TestNode {
    fn client(&self) -> FluxClient {
        FluxClient::with_timeout(&self.client_addr, Duration::from_secs(2))
    }

    fn stop(&self) {
        self.probe.stop();
        let _ = self.shutdown_tx.send(());
    }
}

/// Reserve a loopback address by binding an ephemeral port and
/// immediately releasing it.
fn free_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

async fn wait_until_listening(addr: &str) {
    for _ in 0..200 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never started listening", addr);
}

async fn spawn_node(
    node_id: &str,
    client_addr: &str,
    cluster_addr: &str,
    peers: Vec<String>,
    r: usize,
    w: usize,
    n: usize,
    reconciliation: bool,
) -> TestNode {
    let metrics = Arc::new(Metrics::new());
    let store = Store::new();
    let clock = Arc::new(Clock::new(node_id, Duration::from_millis(500)));
    let staleness = Arc::new(Detector::new(Duration::from_secs(3), metrics.clone()));
    let coordinator = Arc::new(Coordinator::new(
        node_id,
        peers.clone(),
        metrics.clone(),
        Duration::from_millis(500),
    ));
    let (shutdown_tx, _) = broadcast::channel(1);

    let mut write_log = None;
    let mut healing_tx = None;
    if reconciliation {
        let log = Arc::new(RecentWriteLog::new(1000, Duration::from_secs(300)));
        let (engine, events_tx) = Engine::new(
            store.clone(),
            log.clone(),
            metrics.clone(),
            Duration::from_secs(30),
        );
        tokio::spawn(engine.run(shutdown_tx.subscribe()));
        write_log = Some(log);
        healing_tx = Some(events_tx);
    }

    let probe = Arc::new(Probe::new(
        node_id,
        clock.clone(),
        metrics.clone(),
        Duration::from_millis(50),
        healing_tx,
    ));
    probe.start(&peers).await;

    let handler = Arc::new(NodeHandler::new(
        node_id,
        store.clone(),
        coordinator,
        Arc::new(StaticQuorum::new(r, w, n)),
        clock,
        staleness,
        write_log,
        metrics.clone(),
    ));
    let node = Server::new(client_addr, cluster_addr, handler, shutdown_tx.clone());
    tokio::spawn(async move {
        let _ = node.run().await;
    });

    wait_until_listening(client_addr).await;
    wait_until_listening(cluster_addr).await;

    TestNode {
        client_addr: client_addr.to_string(),
        store,
        metrics,
        probe,
        shutdown_tx,
    }
}

#[tokio::test]
async fn test_three_node_put_get() {
    let cluster_addrs: Vec<String> = (0..3).map(|_| free_addr()).collect();
    let client_addrs: Vec<String> = (0..3).map(|_| free_addr()).collect();

    let mut nodes = Vec::new();
    for i in 0..3 {
        let peers: Vec<String> = (0..3)
            .filter(|j| *j != i)
            .map(|j| cluster_addrs[j].clone())
            .collect();
        let node = spawn_node(
            &format!("node{}", i + 1),
            &client_addrs[i],
            &cluster_addrs[i],
            peers,
            2,
            2,
            3,
            false,
        )
        .await;
        nodes.push(node);
    }

    // write through node1 with W=2: self plus both peers acknowledge
    let put = nodes[0].client().put("k", b"v1".to_vec()).await.unwrap();
    assert!(put.success, "put failed: {}", put.error);
    assert!(put.version > 0);
    assert_eq!(put.node_id, "node1");
    assert_eq!(nodes[0].metrics.write_success_total.get(), 1);
    assert_eq!(
        nodes[0].metrics.replicate_acks.with_label("success").get(),
        2
    );

    // the write reached every replica
    for node in &nodes {
        let local = node.store.get("k").await.expect("replica missing the key");
        assert_eq!(local.value(), b"v1");
    }

    // quorum read through a different node
    let get = nodes[1].client().get("k").await.unwrap();
    assert!(get.found);
    assert_eq!(get.value, b"v1");
    assert!(!get.is_stale);
    assert_eq!(get.version, put.version);

    for node in &nodes {
        node.stop();
    }
}

#[tokio::test]
async fn test_put_fails_without_quorum() {
    // both peers are reserved addresses nobody listens on
    let node = spawn_node(
        "node1",
        &free_addr(),
        &free_addr(),
        vec![free_addr(), free_addr()],
        2,
        2,
        3,
        false,
    )
    .await;

    let put = node.client().put("k", b"v1".to_vec()).await.unwrap();
    assert!(!put.success);
    assert!(put.error.contains("insufficient acknowledgements"));
    assert_eq!(node.metrics.write_failure_total.get(), 1);

    // the local write preceded the fan-out and is still visible locally
    let local = node.client().get_local("k").await.unwrap();
    assert!(local.found);
    assert_eq!(local.value, b"v1");

    node.stop();
}

#[tokio::test]
async fn test_concurrent_puts_single_node() {
    let node = spawn_node("node1", &free_addr(), &free_addr(), vec![], 1, 1, 1, false).await;

    let mut handles = Vec::new();
    for c in 0..5 {
        let client = Arc::new(node.client());
        for i in 0..10 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                let key = format!("k{}-{}", c, i);
                let put = client.put(&key, vec![i as u8]).await.unwrap();
                assert!(put.success);
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(node.store.size().await, 50);
    assert_eq!(node.metrics.write_success_total.get(), 50);

    let get = node.client().get("k3-7").await.unwrap();
    assert!(get.found);
    assert_eq!(get.value, vec![7u8]);

    node.stop();
}

#[tokio::test]
async fn test_partition_healing_triggers_reconciliation() {
    let peer_cluster_addr = free_addr();
    let node1 = spawn_node(
        "node1",
        &free_addr(),
        &free_addr(),
        vec![peer_cluster_addr.clone()],
        1,
        1,
        3,
        true,
    )
    .await;

    // the peer is not up yet; the probe must see it down first
    for _ in 0..200 {
        if node1.probe.peer_status(&peer_cluster_addr).await == Some(PeerStatus::Down) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        node1.probe.peer_status(&peer_cluster_addr).await,
        Some(PeerStatus::Down)
    );

    // writes during the partition land in the write log
    let put = node1.client().put("k", b"v1".to_vec()).await.unwrap();
    assert!(put.success);

    // peer comes up on its reserved address
    let node2 = spawn_node(
        "node2",
        &free_addr(),
        &peer_cluster_addr,
        vec![],
        1,
        1,
        3,
        false,
    )
    .await;

    // healing fires a reconciliation run on node1
    for _ in 0..500 {
        if node1.metrics.reconciliation_runs.get() >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(node1.metrics.partition_healing.get() >= 1);
    assert!(node1.metrics.reconciliation_runs.get() >= 1);
    assert_eq!(
        node1.probe.peer_status(&peer_cluster_addr).await,
        Some(PeerStatus::Up)
    );

    node1.stop();
    node2.stop();
}

#[tokio::test]
async fn test_stats_reports_cluster_shape() {
    let node = spawn_node("node1", &free_addr(), &free_addr(), vec![], 1, 1, 1, false).await;

    node.client().put("k", b"v".to_vec()).await.unwrap();
    let stats = node.client().stats().await.unwrap();

    assert!(stats.contains(r#""node_id":"node1""#));
    assert!(stats.contains(r#""keys":1"#));
    assert!(stats.contains(r#""current_w":1"#));

    node.stop();
}
