use std::sync::Arc;

use metrics::Metrics;

use crate::window::MetricsWindow;

const WINDOW_SIZE: usize = 10;

// component weights; must sum to 1.0, availability dominates
const WEIGHT_RTT: f64 = 0.20;
const WEIGHT_AVAIL: f64 = 0.40;
const WEIGHT_VARIANCE: f64 = 0.15;
const WEIGHT_ERROR: f64 = 0.15;
const WEIGHT_CLOCK: f64 = 0.10;

// a health component bottoms out at these signal levels
const RTT_BAD_THRESHOLD: f64 = 0.2; // 200ms
const VARIANCE_BAD_THRESHOLD: f64 = 0.0025; // (50ms)^2
const CLOCK_BAD_THRESHOLD: f64 = 0.1; // 100ms

/// Per-signal health breakdown of one CCS computation, each in [0, 1].
#[derive(Debug, Clone, Copy)]
pub struct CcsComponents {
    pub rtt: f64,
    pub availability: f64,
    pub variance: f64,
    pub error: f64,
    pub clock: f64,
}

/// Consistency Confidence Score computer.
///
/// Five sliding windows smooth the raw signals, a weighted sum turns
/// their averages into a score in [0, 1], and a sixth window smooths
/// the score itself for the adjuster's threshold comparison.
pub struct CcsComputer {
    rtt_window: MetricsWindow,
    success_window: MetricsWindow,
    variance_window: MetricsWindow,
    error_window: MetricsWindow,
    clock_window: MetricsWindow,
    ccs_history: MetricsWindow,
    metrics: Arc<Metrics>,
}

impl CcsComputer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        CcsComputer {
            rtt_window: MetricsWindow::new(WINDOW_SIZE),
            success_window: MetricsWindow::new(WINDOW_SIZE),
            variance_window: MetricsWindow::new(WINDOW_SIZE),
            error_window: MetricsWindow::new(WINDOW_SIZE),
            clock_window: MetricsWindow::new(WINDOW_SIZE),
            ccs_history: MetricsWindow::new(WINDOW_SIZE),
            metrics,
        }
    }

    /// Push one sample of each signal. RTT, variance and drift are in
    /// seconds (variance in seconds squared); rates are in [0, 1].
    pub fn record_metrics(
        &self,
        avg_rtt: f64,
        success_rate: f64,
        variance: f64,
        error_rate: f64,
        clock_drift: f64,
    ) {
        self.rtt_window.add(avg_rtt);
        self.success_window.add(success_rate);
        self.variance_window.add(variance);
        self.error_window.add(error_rate);
        self.clock_window.add(clock_drift);
    }

    /// Compute the raw CCS from the current window averages.
    pub fn compute(&self) -> (f64, CcsComponents) {
        let avg_rtt = self.rtt_window.average();
        let success_rate = self.success_window.average();
        let variance = self.variance_window.average();
        let error_rate = self.error_window.average();
        let clock_drift = self.clock_window.average();

        let components = CcsComponents {
            rtt: 1.0 - (avg_rtt / RTT_BAD_THRESHOLD).min(1.0),
            availability: success_rate,
            variance: 1.0 - (variance / VARIANCE_BAD_THRESHOLD).min(1.0),
            error: 1.0 - error_rate,
            clock: 1.0 - (clock_drift / CLOCK_BAD_THRESHOLD).min(1.0),
        };

        let ccs = WEIGHT_RTT * components.rtt
            + WEIGHT_AVAIL * components.availability
            + WEIGHT_VARIANCE * components.variance
            + WEIGHT_ERROR * components.error
            + WEIGHT_CLOCK * components.clock;

        (ccs, components)
    }

    pub fn push_history(&self, ccs: f64) {
        self.ccs_history.add(ccs);
    }

    /// Moving average of the last `WINDOW_SIZE` raw scores.
    pub fn smoothed(&self) -> f64 {
        self.ccs_history.average()
    }

    pub fn publish_gauges(&self, raw: f64, smoothed: f64, components: &CcsComponents) {
        self.metrics.ccs_raw.set(raw);
        self.metrics.ccs_smoothed.set(smoothed);
        self.metrics.ccs_component_rtt.set(components.rtt);
        self.metrics.ccs_component_avail.set(components.availability);
        self.metrics.ccs_component_var.set(components.variance);
        self.metrics.ccs_component_error.set(components.error);
        self.metrics.ccs_component_clock.set(components.clock);
    }
}
