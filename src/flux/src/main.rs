use std::sync::Arc;

use adaptive::{AdaptiveQuorum, Adjuster, CcsComputer, QuorumProvider, StaticQuorum};
use cluster::{Coordinator, NodeConfig, Probe};
use hlc::Clock;
use log::{error, info};
use logger::logger;
use metrics::{Metrics, MetricsReader};
use reconcile::{Engine, RecentWriteLog};
use server::http_metrics::HttpMetricsServer;
use server::{NodeHandler, Server};
use storage::{Detector, Store};
use tokio::sync::broadcast;

// Use jemalloc as the global allocator for better memory efficiency
// jemalloc reduces memory fragmentation significantly compared to the system allocator
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() {
    logger::setup_logging();

    let ascii_logo = r#"
   ________    __  ___  __
  / ____/ /   / / / / |/ /
 / /_  / /   / / / /|   /
/ __/ / /___/ /_/ //   |
/_/   /_____/\____//_/|_|
--------------------------------------------------
Distributed key-value store with adaptive quorums
--------------------------------------------------
    "#;
    println!("{}", ascii_logo);

    let cfg = match NodeConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "starting node {}: cluster {}, clients {}, N={}, R={}, W={}, peers {:?}",
        cfg.node_id, cfg.listen_addr, cfg.client_addr, cfg.n, cfg.r, cfg.w, cfg.peers
    );

    let metrics = Arc::new(Metrics::new());
    metrics.current_r.set(cfg.r as f64);
    metrics.current_w.set(cfg.w as f64);

    let store = Store::new();
    let clock = Arc::new(Clock::new(&cfg.node_id, cfg.hlc_max_drift));
    let staleness = Arc::new(Detector::new(cfg.max_staleness, metrics.clone()));
    let coordinator = Arc::new(Coordinator::new(
        &cfg.node_id,
        cfg.peers.clone(),
        metrics.clone(),
        cfg.replication_timeout,
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // reconciliation engine, fed healing events by the probe
    let mut write_log = None;
    let mut healing_tx = None;
    if cfg.reconciliation_enabled {
        let log = Arc::new(RecentWriteLog::new(
            cfg.write_log_capacity,
            cfg.write_log_max_age,
        ));
        let (engine, events_tx) = Engine::new(
            store.clone(),
            log.clone(),
            metrics.clone(),
            cfg.reconciliation_interval,
        );
        tokio::spawn(engine.run(shutdown_tx.subscribe()));

        write_log = Some(log);
        healing_tx = Some(events_tx);
        info!(
            "reconciliation enabled: write log capacity {}, max age {:?}",
            cfg.write_log_capacity, cfg.write_log_max_age
        );
    }

    let probe = Arc::new(Probe::new(
        &cfg.node_id,
        clock.clone(),
        metrics.clone(),
        cfg.probe_interval,
        healing_tx,
    ));
    probe.start(&cfg.peers).await;

    let quorum: Arc<dyn QuorumProvider> = if cfg.adaptive_enabled {
        info!(
            "adaptive quorum enabled: bounds R [{}, {}], W [{}, {}], interval {:?}, \
             relax < {}, tighten > {}",
            cfg.min_r,
            cfg.max_r,
            cfg.min_w,
            cfg.max_w,
            cfg.adaptive_interval,
            cfg.relax_threshold,
            cfg.tighten_threshold
        );

        let adaptive_quorum = Arc::new(AdaptiveQuorum::new(
            cfg.r,
            cfg.w,
            cfg.n,
            cfg.min_r,
            cfg.max_r,
            cfg.min_w,
            cfg.max_w,
            cfg.hysteresis_lockout,
            metrics.clone(),
        ));

        let adjuster = Adjuster::new(
            adaptive_quorum.clone(),
            MetricsReader::new(metrics.clone()),
            coordinator.clone(),
            CcsComputer::new(metrics.clone()),
            cfg.adaptive_interval,
            cfg.relax_threshold,
            cfg.tighten_threshold,
            metrics.clone(),
        );
        tokio::spawn(adjuster.run(shutdown_tx.subscribe()));

        adaptive_quorum
    } else {
        Arc::new(StaticQuorum::new(cfg.r, cfg.w, cfg.n))
    };

    if let Some(host) = cfg.discovery_host.clone() {
        info!("dynamic peer discovery enabled against {}", host);
        tokio::spawn(coordinator.clone().run_discovery(
            host.clone(),
            cfg.advertise_addr.clone(),
            cfg.discovery_interval,
            shutdown_tx.subscribe(),
        ));
        tokio::spawn(probe.clone().run_discovery(
            host,
            cfg.advertise_addr.clone(),
            cfg.discovery_interval,
            shutdown_tx.subscribe(),
        ));
    }

    let http = HttpMetricsServer::new(&cfg.node_id, metrics.clone(), &cfg.metrics_addr);
    tokio::spawn(async move {
        if let Err(e) = http.start().await {
            error!("metrics server failed: {}", e);
        }
    });

    let handler = Arc::new(NodeHandler::new(
        &cfg.node_id,
        store,
        coordinator,
        quorum,
        clock,
        staleness,
        write_log,
        metrics,
    ));
    let node = Server::new(&cfg.client_addr, &cfg.listen_addr, handler, shutdown_tx.clone());

    let shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            let _ = shutdown.send(());
        }
    });

    if let Err(e) = node.run().await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }

    probe.stop();
    info!("shutdown complete");
}
