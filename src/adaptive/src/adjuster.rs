use std::sync::Arc;
use std::time::Duration;

use cluster::PeerDirectory;
use log::{debug, info, warn};
use metrics::{Metrics, MetricsReader};
use tokio::sync::broadcast;

use crate::ccs::CcsComputer;
use crate::quorum::{AdaptiveQuorum, QuorumProvider};

/// What one control tick concluded from the smoothed CCS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Cluster degraded: trade consistency for availability (R+1, W-1)
    Relax,
    /// Cluster healthy: buy back consistency (R-1, W+1)
    Tighten,
    Hold,
}

pub fn decide(smoothed_ccs: f64, relax_threshold: f64, tighten_threshold: f64) -> Decision {
    if smoothed_ccs < relax_threshold {
        Decision::Relax
    } else if smoothed_ccs > tighten_threshold {
        Decision::Tighten
    } else {
        Decision::Hold
    }
}

/// Closed-loop feedback controller for the quorum parameters.
///
/// Every tick: sample the registry, fold the signals into the CCS,
/// compare the smoothed score against the thresholds, and commit a
/// symmetric one-step adjustment when it validates. The hysteresis
/// lockout, the smoothing window and the step of one together keep the
/// loop from oscillating.
pub struct Adjuster {
    quorum: Arc<AdaptiveQuorum>,
    reader: MetricsReader,
    directory: Arc<dyn PeerDirectory>,
    ccs: CcsComputer,
    interval: Duration,
    relax_threshold: f64,
    tighten_threshold: f64,
    metrics: Arc<Metrics>,
}

impl Adjuster {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        quorum: Arc<AdaptiveQuorum>,
        reader: MetricsReader,
        directory: Arc<dyn PeerDirectory>,
        ccs: CcsComputer,
        interval: Duration,
        relax_threshold: f64,
        tighten_threshold: f64,
        metrics: Arc<Metrics>,
    ) -> Self {
        Adjuster {
            quorum,
            reader,
            directory,
            ccs,
            interval,
            relax_threshold,
            tighten_threshold,
            metrics,
        }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "adaptive quorum adjuster started: interval {:?}, relax < {}, tighten > {}",
            self.interval, self.relax_threshold, self.tighten_threshold
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                _ = shutdown_rx.recv() => {
                    info!("adaptive quorum adjuster stopped");
                    return;
                }
            }
        }
    }

    /// One control cycle: sample, score, decide, validate, commit.
    fn tick(&self) {
        let peers = self.directory.peer_addresses();
        if peers.is_empty() {
            return;
        }

        let publish_hysteresis = |locked: bool| {
            self.metrics.hysteresis_active.set(if locked { 1.0 } else { 0.0 });
        };

        let success_rate = self.reader.write_success_rate();
        let stats = self.reader.all_peers_latency_stats(&peers);

        // before any replication traffic there is nothing to score;
        // hold the quorum rather than reacting to a silent cluster
        if stats.responsive_peers == 0 {
            publish_hysteresis(self.quorum.is_in_lockout());
            debug!("adjuster: no replication samples yet, holding quorum");
            return;
        }

        let peer_availability = stats.responsive_peers as f64 / peers.len() as f64;
        let combined_availability = success_rate * peer_availability;
        let error_rate = 1.0 - combined_availability;

        // p95-to-average spread as a cheap variance proxy
        let spread = stats.p95 - stats.avg;
        let variance = if stats.p95 > 0.0 { spread * spread } else { 0.0 };

        for peer in &peers {
            if let Some(peer_stats) = self.reader.peer_latency_stats(peer) {
                if peer_stats.samples > 0 && peer_stats.p95 > 0.0 {
                    let spread_ms = (peer_stats.p95 - peer_stats.avg) * 1000.0;
                    self.metrics
                        .rtt_variance
                        .with_label(peer)
                        .set(spread_ms * spread_ms);
                }
            }
        }

        let clock_drift = self.reader.clock_drift_seconds(&peers);

        self.ccs
            .record_metrics(stats.avg, combined_availability, variance, error_rate, clock_drift);
        let (raw_ccs, components) = self.ccs.compute();
        self.ccs.push_history(raw_ccs);
        let smoothed_ccs = self.ccs.smoothed();
        self.ccs.publish_gauges(raw_ccs, smoothed_ccs, &components);

        let current_r = self.quorum.r();
        let current_w = self.quorum.w();

        debug!(
            "ccs computed: raw {:.3}, smoothed {:.3}, avail {:.3}, error {:.3}, \
             avg latency {:.1}ms, p95 {:.1}ms, drift {:.1}ms, r={}, w={}, {}/{} peers responsive",
            raw_ccs,
            smoothed_ccs,
            components.availability,
            error_rate,
            stats.avg * 1000.0,
            stats.p95 * 1000.0,
            clock_drift * 1000.0,
            current_r,
            current_w,
            stats.responsive_peers,
            peers.len()
        );

        let locked = self.quorum.is_in_lockout();
        publish_hysteresis(locked);
        if locked {
            debug!("adjuster: in hysteresis lockout, skipping");
            return;
        }

        let (new_r, new_w, reason) =
            match decide(smoothed_ccs, self.relax_threshold, self.tighten_threshold) {
                Decision::Relax => {
                    info!(
                        "smoothed ccs {:.3} below relax threshold {}",
                        smoothed_ccs, self.relax_threshold
                    );
                    (current_r + 1, current_w.saturating_sub(1), "relax")
                }
                Decision::Tighten => {
                    info!(
                        "smoothed ccs {:.3} above tighten threshold {}",
                        smoothed_ccs, self.tighten_threshold
                    );
                    (current_r.saturating_sub(1), current_w + 1, "tighten")
                }
                Decision::Hold => {
                    debug!("ccs in stable region, no adjustment needed");
                    return;
                }
            };

        if let Err(e) = self.quorum.validate(new_r, new_w) {
            warn!(
                "quorum adjustment to r={}, w={} rejected ({}): {}",
                new_r, new_w, reason, e
            );
            return;
        }

        match self.quorum.set_quorum(new_r, new_w, reason) {
            Ok(()) => {
                self.metrics.quorum_adjustments.inc();
                self.metrics.quorum_adjustment_reason.with_label(reason).inc();
                info!(
                    "quorum adjustment applied: r {} -> {}, w {} -> {} ({}), smoothed ccs {:.3}",
                    current_r, new_r, current_w, new_w, reason, smoothed_ccs
                );
            }
            Err(e) => warn!("failed to apply quorum adjustment: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccs::CcsComputer;
    use crate::quorum::QuorumProvider;

    struct StaticPeers(Vec<String>);

    impl PeerDirectory for StaticPeers {
        fn peer_addresses(&self) -> Vec<String> {
            self.0.clone()
        }
    }

    struct Fixture {
        metrics: Arc<Metrics>,
        quorum: Arc<AdaptiveQuorum>,
        adjuster: Adjuster,
        peers: Vec<String>,
    }

    fn fixture(r: usize, w: usize, n: usize, lockout: Duration) -> Fixture {
        let metrics = Arc::new(Metrics::new());
        let peers: Vec<String> = (1..n).map(|i| format!("peer{}:7400", i)).collect();
        let quorum = Arc::new(AdaptiveQuorum::new(
            r,
            w,
            n,
            1,
            n,
            1,
            n,
            lockout,
            metrics.clone(),
        ));
        let adjuster = Adjuster::new(
            quorum.clone(),
            MetricsReader::new(metrics.clone()),
            Arc::new(StaticPeers(peers.clone())),
            CcsComputer::new(metrics.clone()),
            Duration::from_secs(2),
            0.45,
            0.75,
            metrics.clone(),
        );
        Fixture {
            metrics,
            quorum,
            adjuster,
            peers,
        }
    }

    fn record_latency(f: &Fixture, peer_idx: usize, seconds: f64, samples: usize) {
        for _ in 0..samples {
            f.metrics
                .replicate_latency
                .with_label(&f.peers[peer_idx])
                .observe(seconds);
        }
    }

    #[test]
    fn test_decide_thresholds() {
        assert_eq!(decide(0.44, 0.45, 0.75), Decision::Relax);
        assert_eq!(decide(0.45, 0.45, 0.75), Decision::Hold);
        assert_eq!(decide(0.60, 0.45, 0.75), Decision::Hold);
        assert_eq!(decide(0.75, 0.45, 0.75), Decision::Hold);
        assert_eq!(decide(0.76, 0.45, 0.75), Decision::Tighten);
    }

    #[test]
    fn test_no_samples_holds_quorum() {
        let f = fixture(2, 2, 3, Duration::ZERO);
        for _ in 0..5 {
            f.adjuster.tick();
        }
        assert_eq!((f.quorum.r(), f.quorum.w()), (2, 2));
        assert_eq!(f.metrics.quorum_adjustments.get(), 0);
    }

    #[test]
    fn test_healthy_cluster_tightens() {
        let f = fixture(2, 2, 3, Duration::ZERO);
        record_latency(&f, 0, 0.004, 10);
        record_latency(&f, 1, 0.004, 10);
        for _ in 0..20 {
            f.metrics.record_write_success();
        }

        f.adjuster.tick();

        assert_eq!((f.quorum.r(), f.quorum.w()), (1, 3));
        assert_eq!(f.metrics.quorum_adjustments.get(), 1);
        assert_eq!(
            f.metrics.quorum_adjustment_reason.with_label("tighten").get(),
            1
        );
        assert!(f.metrics.ccs_smoothed.get() > 0.75);
    }

    #[test]
    fn test_degraded_cluster_relaxes() {
        let f = fixture(2, 4, 5, Duration::ZERO);
        // one peer still answers, the other three are dark, and every
        // recent write has failed its quorum
        record_latency(&f, 0, 0.004, 10);
        for _ in 0..20 {
            f.metrics.record_write_failure();
        }

        f.adjuster.tick();

        assert_eq!((f.quorum.r(), f.quorum.w()), (3, 3));
        assert_eq!(
            f.metrics.quorum_adjustment_reason.with_label("relax").get(),
            1
        );
        assert!(f.metrics.ccs_smoothed.get() < 0.45);
    }

    #[test]
    fn test_lockout_blocks_immediate_reversal() {
        let f = fixture(2, 2, 3, Duration::from_secs(60));
        record_latency(&f, 0, 0.004, 10);
        record_latency(&f, 1, 0.004, 10);
        for _ in 0..20 {
            f.metrics.record_write_success();
        }

        f.adjuster.tick();
        assert_eq!((f.quorum.r(), f.quorum.w()), (1, 3));
        assert_eq!(f.metrics.quorum_adjustments.get(), 1);

        // cluster still healthy, but the lockout holds the line
        f.adjuster.tick();
        assert_eq!((f.quorum.r(), f.quorum.w()), (1, 3));
        assert_eq!(f.metrics.quorum_adjustments.get(), 1);
        assert_eq!(f.metrics.hysteresis_active.get(), 1.0);
    }

    #[test]
    fn test_invalid_proposal_is_discarded() {
        // already at the tightest valid point: tighten proposes r=0
        let f = fixture(1, 3, 3, Duration::ZERO);
        record_latency(&f, 0, 0.004, 10);
        record_latency(&f, 1, 0.004, 10);
        for _ in 0..20 {
            f.metrics.record_write_success();
        }

        f.adjuster.tick();

        assert_eq!((f.quorum.r(), f.quorum.w()), (1, 3));
        assert_eq!(f.metrics.quorum_adjustments.get(), 0);
    }

    #[test]
    fn test_per_peer_variance_gauges_exported() {
        let f = fixture(2, 2, 3, Duration::ZERO);
        record_latency(&f, 0, 0.004, 5);
        record_latency(&f, 0, 0.2, 5);
        record_latency(&f, 1, 0.004, 10);
        for _ in 0..20 {
            f.metrics.record_write_success();
        }

        f.adjuster.tick();

        let gauge = f.metrics.rtt_variance.get(&f.peers[0]).unwrap();
        assert!(gauge.get() > 0.0);
    }
}
