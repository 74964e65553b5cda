use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use metrics::Metrics;
use storage::Store;
use tokio::sync::{broadcast, mpsc};

use crate::write_log::RecentWriteLog;

const HEALING_QUEUE_CAPACITY: usize = 100;

/// Anti-entropy reconciliation engine.
///
/// Consumes healing events (peer address transitioned down to up) from
/// a bounded channel and replays the recent write log against the local
/// store, applying last-writer-wins by HLC with a deterministic node-id
/// tiebreak. Runs are serial within one engine. Between healing events
/// a slow ticker compacts expired entries out of the write log.
pub struct Engine {
    store: Store,
    write_log: Arc<RecentWriteLog>,
    metrics: Arc<Metrics>,
    interval: Duration,
    events_rx: mpsc::Receiver<String>,
}

impl Engine {
    /// Returns the engine and the sender that health probes use to
    /// signal healing. Sends never block: overflow drops the event.
    pub fn new(
        store: Store,
        write_log: Arc<RecentWriteLog>,
        metrics: Arc<Metrics>,
        interval: Duration,
    ) -> (Self, mpsc::Sender<String>) {
        let (events_tx, events_rx) = mpsc::channel(HEALING_QUEUE_CAPACITY);

        let engine = Engine {
            store,
            write_log,
            metrics,
            interval,
            events_rx,
        };
        (engine, events_tx)
    }

    /// Run until shutdown, reconciling once per healing event.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("reconciliation engine started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.events_rx.recv() => {
                    match event {
                        Some(peer) => {
                            info!("partition healing detected, reconciling with {}", peer);
                            self.metrics.partition_healing.inc();
                            self.reconcile_with_peer(&peer).await;
                        }
                        None => {
                            info!("healing event channel closed, reconciliation engine stopping");
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.write_log.compact();
                    debug!("write log compacted, {} entries remain", self.write_log.len());
                }
                _ = shutdown_rx.recv() => {
                    info!("reconciliation engine stopped");
                    return;
                }
            }
        }
    }

    async fn reconcile_with_peer(&self, peer: &str) {
        let start = Instant::now();

        let writes = self.write_log.entries();
        let mut keys_changed = 0usize;

        for write in &writes {
            let local = match self.store.get(&write.key).await {
                Some(v) => v,
                // never had the key; the log alone is not authority
                // enough to introduce it
                None => continue,
            };

            if write.hlc.happens_after(&local.hlc) {
                self.store
                    .put(&write.key, write.value.clone(), &write.node_id, write.hlc.clone())
                    .await;
                keys_changed += 1;
                self.metrics.conflicts_resolved.inc();
                debug!("reconciliation: logged write newer for {}", write.key);
            } else if local.hlc.happens_after(&write.hlc) {
                debug!("reconciliation: local value newer for {}", write.key);
            } else if write.hlc.is_equal(&local.hlc) && write.node_id != local.node_id {
                // true concurrent write; larger node id wins
                self.metrics.conflicts_detected.inc();
                warn!(
                    "reconciliation: concurrent writes on {} (local {}, remote {})",
                    write.key, local.node_id, write.node_id
                );

                if write.node_id > local.node_id {
                    self.store
                        .put(&write.key, write.value.clone(), &write.node_id, write.hlc.clone())
                        .await;
                    keys_changed += 1;
                    self.metrics.conflicts_resolved.inc();
                }
            }
        }

        self.metrics.reconciliation_runs.inc();
        self.metrics.reconciliation_keys.observe(keys_changed as f64);
        self.metrics
            .reconciliation_latency
            .observe(start.elapsed().as_secs_f64());

        info!(
            "reconciliation with {} completed: {} of {} logged writes applied in {:?}",
            peer,
            keys_changed,
            writes.len(),
            start.elapsed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlc::Hlc;
    use std::time::Duration;

    struct Fixture {
        store: Store,
        write_log: Arc<RecentWriteLog>,
        metrics: Arc<Metrics>,
        engine: Engine,
    }

    fn fixture() -> Fixture {
        let store = Store::new();
        let write_log = Arc::new(RecentWriteLog::new(100, Duration::from_secs(300)));
        let metrics = Arc::new(Metrics::new());
        let (engine, _tx) = Engine::new(
            store.clone(),
            write_log.clone(),
            metrics.clone(),
            Duration::from_secs(30),
        );
        Fixture {
            store,
            write_log,
            metrics,
            engine,
        }
    }

    #[tokio::test]
    async fn test_logged_write_newer_wins() {
        let f = fixture();

        f.store
            .put("k", b"old".to_vec(), "node-a", Hlc::new(100, 0, "node-a"))
            .await;
        f.write_log
            .add("k", b"new".to_vec(), "node-b", Hlc::new(200, 0, "node-b"));

        f.engine.reconcile_with_peer("node-b:7400").await;

        let got = f.store.get("k").await.unwrap();
        assert_eq!(got.value(), b"new");
        assert_eq!(f.metrics.conflicts_resolved.get(), 1);
        assert_eq!(f.metrics.reconciliation_runs.get(), 1);
    }

    #[tokio::test]
    async fn test_local_value_newer_is_kept() {
        let f = fixture();

        f.store
            .put("k", b"local".to_vec(), "node-a", Hlc::new(300, 0, "node-a"))
            .await;
        f.write_log
            .add("k", b"stale".to_vec(), "node-b", Hlc::new(200, 0, "node-b"));

        f.engine.reconcile_with_peer("node-b:7400").await;

        assert_eq!(f.store.get("k").await.unwrap().value(), b"local");
        assert_eq!(f.metrics.conflicts_resolved.get(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_writes_larger_node_id_wins() {
        let f = fixture();

        f.store
            .put("k", b"a".to_vec(), "node-a", Hlc::new(100, 0, "node-a"))
            .await;
        f.write_log
            .add("k", b"b".to_vec(), "node-b", Hlc::new(100, 0, "node-b"));

        f.engine.reconcile_with_peer("node-b:7400").await;

        assert_eq!(f.store.get("k").await.unwrap().value(), b"b");
        assert_eq!(f.metrics.conflicts_detected.get(), 1);
        assert_eq!(f.metrics.conflicts_resolved.get(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_writes_smaller_node_id_loses() {
        let f = fixture();

        f.store
            .put("k", b"b".to_vec(), "node-b", Hlc::new(100, 0, "node-b"))
            .await;
        f.write_log
            .add("k", b"a".to_vec(), "node-a", Hlc::new(100, 0, "node-a"));

        f.engine.reconcile_with_peer("node-a:7400").await;

        assert_eq!(f.store.get("k").await.unwrap().value(), b"b");
        assert_eq!(f.metrics.conflicts_detected.get(), 1);
        assert_eq!(f.metrics.conflicts_resolved.get(), 0);
    }

    #[tokio::test]
    async fn test_own_write_in_log_is_not_a_conflict() {
        let f = fixture();

        let ts = Hlc::new(100, 0, "node-a");
        f.store.put("k", b"v".to_vec(), "node-a", ts.clone()).await;
        f.write_log.add("k", b"v".to_vec(), "node-a", ts);

        f.engine.reconcile_with_peer("node-b:7400").await;

        assert_eq!(f.metrics.conflicts_detected.get(), 0);
        assert_eq!(f.metrics.conflicts_resolved.get(), 0);
    }

    #[tokio::test]
    async fn test_locally_absent_keys_are_skipped() {
        let f = fixture();

        f.write_log
            .add("unknown", b"v".to_vec(), "node-b", Hlc::new(100, 0, "node-b"));

        f.engine.reconcile_with_peer("node-b:7400").await;

        assert!(f.store.get("unknown").await.is_none());
        assert_eq!(f.metrics.reconciliation_runs.get(), 1);
    }

    #[tokio::test]
    async fn test_healing_event_triggers_reconciliation() {
        let store = Store::new();
        let write_log = Arc::new(RecentWriteLog::new(100, Duration::from_secs(300)));
        let metrics = Arc::new(Metrics::new());
        let (engine, events_tx) = Engine::new(
            store.clone(),
            write_log.clone(),
            metrics.clone(),
            Duration::from_secs(30),
        );

        store
            .put("k", b"old".to_vec(), "node-a", Hlc::new(100, 0, "node-a"))
            .await;
        write_log.add("k", b"new".to_vec(), "node-b", Hlc::new(200, 0, "node-b"));

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(engine.run(shutdown_rx));

        events_tx.send("node-b:7400".to_string()).await.unwrap();

        // wait for the run to land
        for _ in 0..100 {
            if metrics.reconciliation_runs.get() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(metrics.partition_healing.get(), 1);
        assert_eq!(store.get("k").await.unwrap().value(), b"new");

        let _ = shutdown_tx.send(());
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_ticker_compacts_expired_entries() {
        let store = Store::new();
        // zero age cap: every entry expires as soon as it lands
        let write_log = Arc::new(RecentWriteLog::new(100, Duration::ZERO));
        let metrics = Arc::new(Metrics::new());
        let (engine, _events_tx) = Engine::new(
            store,
            write_log.clone(),
            metrics,
            Duration::from_millis(20),
        );

        write_log.add("k", b"v".to_vec(), "node-a", Hlc::new(100, 0, "node-a"));
        assert_eq!(write_log.len(), 1);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(engine.run(shutdown_rx));

        for _ in 0..100 {
            if write_log.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(write_log.is_empty());

        let _ = shutdown_tx.send(());
        let _ = handle.await;
    }
}
