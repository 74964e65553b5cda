use std::sync::Arc;

use crate::registry::Metrics;

/// Aggregated latency statistics extracted from the per-peer
/// replication histograms.
#[derive(Debug, Default, Clone, Copy)]
pub struct LatencyStats {
    /// Peers that have at least one recorded sample
    pub responsive_peers: usize,
    /// Total number of samples across those peers
    pub samples: u64,
    pub sum: f64,
    pub avg: f64,
    /// Worst-case p95 across peers
    pub p95: f64,
}

/// Read-side access to the metrics registry for the control loop.
///
/// Reads go straight to the in-process atomics; there is no scrape or
/// network hop involved.
pub struct MetricsReader {
    metrics: Arc<Metrics>,
}

impl MetricsReader {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        MetricsReader { metrics }
    }

    /// Fraction of writes that succeeded; assumes healthy (1.0) before
    /// any write has been observed.
    pub fn write_success_rate(&self) -> f64 {
        let success = self.metrics.write_success_total.get() as f64;
        let failure = self.metrics.write_failure_total.get() as f64;
        let total = success + failure;
        if total == 0.0 {
            return 1.0;
        }
        success / total
    }

    /// Latency stats for one peer, or None when nothing has been
    /// recorded against it yet.
    pub fn peer_latency_stats(&self, peer: &str) -> Option<LatencyStats> {
        let histogram = self.metrics.replicate_latency.get(peer)?;
        let samples = histogram.count();
        Some(LatencyStats {
            responsive_peers: usize::from(samples > 0),
            samples,
            sum: histogram.sum(),
            avg: histogram.average(),
            p95: histogram.quantile(0.95),
        })
    }

    /// Aggregate latency stats across all given peers. Peers without
    /// samples count as unreachable.
    pub fn all_peers_latency_stats(&self, peers: &[String]) -> LatencyStats {
        let mut stats = LatencyStats::default();

        for peer in peers {
            let peer_stats = match self.peer_latency_stats(peer) {
                Some(s) if s.samples > 0 => s,
                _ => continue,
            };

            stats.responsive_peers += 1;
            stats.samples += peer_stats.samples;
            stats.sum += peer_stats.sum;
            if peer_stats.p95 > stats.p95 {
                stats.p95 = peer_stats.p95;
            }
        }

        if stats.samples > 0 {
            stats.avg = stats.sum / stats.samples as f64;
        }
        stats
    }

    /// Average health-probe RTT in seconds across peers with a
    /// positive reading.
    pub fn average_health_rtt(&self, peers: &[String]) -> f64 {
        let mut total = 0.0;
        let mut valid = 0usize;

        for peer in peers {
            if let Some(gauge) = self.metrics.health_rtt.get(peer) {
                let rtt = gauge.get();
                if rtt > 0.0 {
                    total += rtt;
                    valid += 1;
                }
            }
        }

        if valid == 0 {
            return 0.0;
        }
        total / valid as f64
    }

    /// Mean non-negative clock drift across peers, in seconds. The
    /// gauges store milliseconds; no readings means assume sync.
    pub fn clock_drift_seconds(&self, peers: &[String]) -> f64 {
        let mut total = 0.0;
        let mut valid = 0usize;

        for peer in peers {
            if let Some(gauge) = self.metrics.hlc_drift.get(peer) {
                let drift_ms = gauge.get();
                if drift_ms >= 0.0 {
                    total += drift_ms / 1000.0;
                    valid += 1;
                }
            }
        }

        if valid == 0 {
            return 0.0;
        }
        total / valid as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_with_metrics() -> (Arc<Metrics>, MetricsReader) {
        let metrics = Arc::new(Metrics::new());
        let reader = MetricsReader::new(metrics.clone());
        (metrics, reader)
    }

    #[test]
    fn test_write_success_rate_defaults_healthy() {
        let (_, reader) = reader_with_metrics();
        assert_eq!(reader.write_success_rate(), 1.0);
    }

    #[test]
    fn test_write_success_rate() {
        let (metrics, reader) = reader_with_metrics();
        metrics.record_write_success();
        metrics.record_write_success();
        metrics.record_write_success();
        metrics.record_write_failure();

        assert!((reader.write_success_rate() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_peer_latency_stats_absent() {
        let (_, reader) = reader_with_metrics();
        assert!(reader.peer_latency_stats("nope:7400").is_none());
    }

    #[test]
    fn test_all_peers_latency_stats_skips_silent_peers() {
        let (metrics, reader) = reader_with_metrics();
        let peers = vec![
            "a:7400".to_string(),
            "b:7400".to_string(),
            "c:7400".to_string(),
            "d:7400".to_string(),
        ];

        for _ in 0..10 {
            metrics.replicate_latency.with_label("a:7400").observe(0.02);
            metrics.replicate_latency.with_label("b:7400").observe(0.04);
            metrics.replicate_latency.with_label("c:7400").observe(0.04);
        }
        // d never responds; its histogram exists but stays empty
        let _ = metrics.replicate_latency.with_label("d:7400");

        let stats = reader.all_peers_latency_stats(&peers);
        assert_eq!(stats.responsive_peers, 3);
        assert_eq!(stats.samples, 30);
        assert!(stats.avg > 0.0);
        assert_eq!(stats.p95, 0.05); // bucket upper bound for 0.04
    }

    #[test]
    fn test_clock_drift_mean() {
        let (metrics, reader) = reader_with_metrics();
        let peers = vec!["a:7400".to_string(), "b:7400".to_string()];

        metrics.hlc_drift.with_label("a:7400").set(20.0);
        metrics.hlc_drift.with_label("b:7400").set(40.0);

        assert!((reader.clock_drift_seconds(&peers) - 0.03).abs() < 1e-9);
        assert_eq!(reader.clock_drift_seconds(&[]), 0.0);
    }

    #[test]
    fn test_average_health_rtt_ignores_zero() {
        let (metrics, reader) = reader_with_metrics();
        let peers = vec!["a:7400".to_string(), "b:7400".to_string()];

        metrics.health_rtt.with_label("a:7400").set(0.010);
        metrics.health_rtt.with_label("b:7400").set(0.0);

        assert!((reader.average_health_rtt(&peers) - 0.010).abs() < 1e-9);
    }
}
