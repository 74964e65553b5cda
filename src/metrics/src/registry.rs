use crate::primitives::{
    default_buckets, linear_buckets, Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramVec,
};

/// Every metric the node exports, created eagerly at startup so the
/// exposition output is stable from the first scrape.
pub struct Metrics {
    // latency histograms
    pub put_latency: Histogram,
    pub get_latency: Histogram,
    pub replicate_latency: HistogramVec, // labelled by peer

    // replication outcome counters
    pub replicate_acks: CounterVec, // labelled by result
    pub errors: CounterVec,         // labelled by type

    // success ratios
    pub write_success_total: Counter,
    pub write_failure_total: Counter,
    pub read_success_total: Counter,
    pub read_failure_total: Counter,
    pub write_ops_total: Counter,

    // quorum gauges
    pub current_r: Gauge,
    pub current_w: Gauge,

    // health
    pub health_rtt: GaugeVec,    // seconds, labelled by peer
    pub rtt_variance: GaugeVec,  // ms^2, labelled by peer
    pub hlc_drift: GaugeVec,     // milliseconds, labelled by peer

    // adaptive quorum
    pub ccs_raw: Gauge,
    pub ccs_smoothed: Gauge,
    pub ccs_component_rtt: Gauge,
    pub ccs_component_avail: Gauge,
    pub ccs_component_var: Gauge,
    pub ccs_component_error: Gauge,
    pub ccs_component_clock: Gauge,
    pub quorum_adjustments: Counter,
    pub quorum_adjustment_reason: CounterVec, // labelled by reason
    pub hysteresis_active: Gauge,

    // staleness
    pub staleness_violations: Counter,
    pub stale_reads_rejected: Counter,
    pub data_age: Histogram,

    // conflicts and reconciliation
    pub conflicts_detected: Counter,
    pub conflicts_resolved: Counter,
    pub reconciliation_runs: Counter,
    pub reconciliation_keys: Histogram,
    pub reconciliation_latency: Histogram,
    pub partition_healing: Counter,
    pub read_repair: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            put_latency: Histogram::new(default_buckets()),
            get_latency: Histogram::new(default_buckets()),
            replicate_latency: HistogramVec::new(default_buckets()),
            replicate_acks: CounterVec::new(),
            errors: CounterVec::new(),
            write_success_total: Counter::new(),
            write_failure_total: Counter::new(),
            read_success_total: Counter::new(),
            read_failure_total: Counter::new(),
            write_ops_total: Counter::new(),
            current_r: Gauge::new(),
            current_w: Gauge::new(),
            health_rtt: GaugeVec::new(),
            rtt_variance: GaugeVec::new(),
            hlc_drift: GaugeVec::new(),
            ccs_raw: Gauge::new(),
            ccs_smoothed: Gauge::new(),
            ccs_component_rtt: Gauge::new(),
            ccs_component_avail: Gauge::new(),
            ccs_component_var: Gauge::new(),
            ccs_component_error: Gauge::new(),
            ccs_component_clock: Gauge::new(),
            quorum_adjustments: Counter::new(),
            quorum_adjustment_reason: CounterVec::new(),
            hysteresis_active: Gauge::new(),
            staleness_violations: Counter::new(),
            stale_reads_rejected: Counter::new(),
            data_age: Histogram::new(vec![0.1, 0.5, 1.0, 2.0, 3.0, 5.0, 10.0]),
            conflicts_detected: Counter::new(),
            conflicts_resolved: Counter::new(),
            reconciliation_runs: Counter::new(),
            reconciliation_keys: Histogram::new(linear_buckets(0.0, 10.0, 10)),
            reconciliation_latency: Histogram::new(default_buckets()),
            partition_healing: Counter::new(),
            read_repair: Counter::new(),
        }
    }

    pub fn record_write_success(&self) {
        self.write_success_total.inc();
        self.write_ops_total.inc();
    }

    pub fn record_write_failure(&self) {
        self.write_failure_total.inc();
        self.write_ops_total.inc();
    }

    pub fn record_read_success(&self) {
        self.read_success_total.inc();
    }

    pub fn record_read_failure(&self) {
        self.read_failure_total.inc();
    }

    /// Render every metric in Prometheus text format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        write_histogram(&mut out, "flux_put_latency_seconds", "Latency of PUT operations", &self.put_latency);
        write_histogram(&mut out, "flux_get_latency_seconds", "Latency of GET operations", &self.get_latency);
        write_histogram_vec(
            &mut out,
            "flux_replicate_ack_latency_seconds",
            "Latency of replication acknowledgements per peer",
            "peer",
            &self.replicate_latency,
        );

        write_counter_vec(&mut out, "flux_replicate_acks_total", "Total replication acknowledgements", "result", &self.replicate_acks);
        write_counter_vec(&mut out, "flux_errors_total", "Total errors by type", "type", &self.errors);

        write_counter(&mut out, "flux_write_success_total", "Total successful write operations", &self.write_success_total);
        write_counter(&mut out, "flux_write_failure_total", "Total failed write operations", &self.write_failure_total);
        write_counter(&mut out, "flux_read_success_total", "Total successful read operations", &self.read_success_total);
        write_counter(&mut out, "flux_read_failure_total", "Total failed read operations", &self.read_failure_total);
        write_counter(&mut out, "flux_write_ops_total", "Total write operations", &self.write_ops_total);

        write_gauge(&mut out, "flux_current_r", "Current read quorum size", &self.current_r);
        write_gauge(&mut out, "flux_current_w", "Current write quorum size", &self.current_w);

        write_gauge_vec(&mut out, "flux_health_rtt_seconds", "Round trip time to peers", "peer", &self.health_rtt);
        write_gauge_vec(&mut out, "flux_rtt_variance_ms2", "RTT variance per peer in milliseconds squared", "peer", &self.rtt_variance);
        write_gauge_vec(&mut out, "flux_hlc_drift_milliseconds", "Clock drift per peer in milliseconds", "peer", &self.hlc_drift);

        write_gauge(&mut out, "flux_ccs_raw", "Raw consistency confidence score", &self.ccs_raw);
        write_gauge(&mut out, "flux_ccs_smoothed", "Smoothed consistency confidence score (10-sample moving average)", &self.ccs_smoothed);
        write_gauge(&mut out, "flux_ccs_component_rtt", "RTT health component of CCS", &self.ccs_component_rtt);
        write_gauge(&mut out, "flux_ccs_component_avail", "Availability health component of CCS", &self.ccs_component_avail);
        write_gauge(&mut out, "flux_ccs_component_var", "Variance health component of CCS", &self.ccs_component_var);
        write_gauge(&mut out, "flux_ccs_component_error", "Error health component of CCS", &self.ccs_component_error);
        write_gauge(&mut out, "flux_ccs_component_clock", "Clock health component of CCS", &self.ccs_component_clock);

        write_counter(&mut out, "flux_quorum_adjustments_total", "Total number of quorum adjustments", &self.quorum_adjustments);
        write_counter_vec(
            &mut out,
            "flux_quorum_adjustment_reason_total",
            "Total number of quorum adjustments by reason",
            "reason",
            &self.quorum_adjustment_reason,
        );
        write_gauge(&mut out, "flux_hysteresis_active", "Whether hysteresis lockout is currently active (1=active, 0=inactive)", &self.hysteresis_active);

        write_counter(&mut out, "flux_staleness_violations_total", "Total staleness bound violations detected", &self.staleness_violations);
        write_counter(&mut out, "flux_stale_reads_rejected_total", "Total read operations rejected due to staleness", &self.stale_reads_rejected);
        write_histogram(&mut out, "flux_data_age_seconds", "Distribution of data age on reads", &self.data_age);

        write_counter(&mut out, "flux_conflicts_detected_total", "Total conflicts detected during reads or reconciliation", &self.conflicts_detected);
        write_counter(&mut out, "flux_conflicts_resolved_total", "Total conflicts resolved using LWW", &self.conflicts_resolved);
        write_counter(&mut out, "flux_reconciliation_runs_total", "Total reconciliation runs executed", &self.reconciliation_runs);
        write_histogram(&mut out, "flux_reconciliation_keys", "Number of keys reconciled per run", &self.reconciliation_keys);
        write_histogram(&mut out, "flux_reconciliation_latency_seconds", "Duration of reconciliation operations", &self.reconciliation_latency);
        write_counter(&mut out, "flux_partition_healing_total", "Partition healing events detected (peer reconnections)", &self.partition_healing);
        write_counter(&mut out, "flux_read_repair_total", "Read repair operations performed", &self.read_repair);

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn write_counter(out: &mut String, name: &str, help: &str, counter: &Counter) {
    out.push_str(&format!("# HELP {} {}\n", name, help));
    out.push_str(&format!("# TYPE {} counter\n", name));
    out.push_str(&format!("{} {}\n", name, counter.get()));
}

fn write_gauge(out: &mut String, name: &str, help: &str, gauge: &Gauge) {
    out.push_str(&format!("# HELP {} {}\n", name, help));
    out.push_str(&format!("# TYPE {} gauge\n", name));
    out.push_str(&format!("{} {}\n", name, gauge.get()));
}

fn write_counter_vec(out: &mut String, name: &str, help: &str, label: &str, family: &CounterVec) {
    out.push_str(&format!("# HELP {} {}\n", name, help));
    out.push_str(&format!("# TYPE {} counter\n", name));
    for (value, count) in family.snapshot() {
        out.push_str(&format!("{}{{{}=\"{}\"}} {}\n", name, label, value, count));
    }
}

fn write_gauge_vec(out: &mut String, name: &str, help: &str, label: &str, family: &GaugeVec) {
    out.push_str(&format!("# HELP {} {}\n", name, help));
    out.push_str(&format!("# TYPE {} gauge\n", name));
    for (value, gauge) in family.snapshot() {
        out.push_str(&format!("{}{{{}=\"{}\"}} {}\n", name, label, value, gauge));
    }
}

fn write_histogram_lines(out: &mut String, name: &str, labels: &str, histogram: &Histogram) {
    let cumulative = histogram.cumulative_counts();
    for (bound, count) in histogram.bounds().iter().zip(cumulative.iter()) {
        if labels.is_empty() {
            out.push_str(&format!("{}_bucket{{le=\"{}\"}} {}\n", name, bound, count));
        } else {
            out.push_str(&format!("{}_bucket{{{},le=\"{}\"}} {}\n", name, labels, bound, count));
        }
    }
    let suffix = if labels.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", labels)
    };
    if labels.is_empty() {
        out.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, histogram.count()));
    } else {
        out.push_str(&format!("{}_bucket{{{},le=\"+Inf\"}} {}\n", name, labels, histogram.count()));
    }
    out.push_str(&format!("{}_sum{} {}\n", name, suffix, histogram.sum()));
    out.push_str(&format!("{}_count{} {}\n", name, suffix, histogram.count()));
}

fn write_histogram(out: &mut String, name: &str, help: &str, histogram: &Histogram) {
    out.push_str(&format!("# HELP {} {}\n", name, help));
    out.push_str(&format!("# TYPE {} histogram\n", name));
    write_histogram_lines(out, name, "", histogram);
}

fn write_histogram_vec(out: &mut String, name: &str, help: &str, label: &str, family: &HistogramVec) {
    out.push_str(&format!("# HELP {} {}\n", name, help));
    out.push_str(&format!("# TYPE {} histogram\n", name));
    for (value, histogram) in family.snapshot() {
        let labels = format!("{}=\"{}\"", label, value);
        write_histogram_lines(out, name, &labels, histogram.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_core_series() {
        let m = Metrics::new();
        m.record_write_success();
        m.record_read_failure();
        m.current_r.set(2.0);
        m.current_w.set(2.0);
        m.replicate_acks.with_label("success").inc();
        m.put_latency.observe(0.01);

        let text = m.render();
        assert!(text.contains("flux_write_success_total 1"));
        assert!(text.contains("flux_read_failure_total 1"));
        assert!(text.contains("flux_current_r 2"));
        assert!(text.contains("flux_replicate_acks_total{result=\"success\"} 1"));
        assert!(text.contains("flux_put_latency_seconds_bucket{le=\"0.01\"} 1"));
        assert!(text.contains("flux_put_latency_seconds_count 1"));
        assert!(text.contains("# TYPE flux_put_latency_seconds histogram"));
    }

    #[test]
    fn test_render_labelled_histogram() {
        let m = Metrics::new();
        m.replicate_latency.with_label("10.0.0.2:7400").observe(0.02);

        let text = m.render();
        assert!(text.contains(
            "flux_replicate_ack_latency_seconds_bucket{peer=\"10.0.0.2:7400\",le=\"+Inf\"} 1"
        ));
        assert!(text.contains("flux_replicate_ack_latency_seconds_count{peer=\"10.0.0.2:7400\"} 1"));
    }
}
