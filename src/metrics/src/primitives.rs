use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Counter::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Float gauge stored as f64 bits in an atomic.
#[derive(Debug)]
pub struct Gauge {
    bits: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Gauge {
            bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Default latency buckets in seconds, matching the Prometheus defaults.
pub fn default_buckets() -> Vec<f64> {
    vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
}

/// `count` evenly spaced buckets starting at `start`.
pub fn linear_buckets(start: f64, width: f64, count: usize) -> Vec<f64> {
    (0..count).map(|i| start + width * i as f64).collect()
}

/// Fixed-bucket histogram.
///
/// `counts` has one slot per finite upper bound plus a trailing
/// overflow slot. The sum is an f64 accumulated through a CAS loop on
/// its bit pattern.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum_bits: AtomicU64,
    total: AtomicU64,
}

impl Histogram {
    pub fn new(bounds: Vec<f64>) -> Self {
        let counts = (0..bounds.len() + 1).map(|_| AtomicU64::new(0)).collect();
        Histogram {
            bounds,
            counts,
            sum_bits: AtomicU64::new(0f64.to_bits()),
            total: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.bounds.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);

        let mut old = self.sum_bits.load(Ordering::Relaxed);
        loop {
            let new = (f64::from_bits(old) + value).to_bits();
            match self
                .sum_bits
                .compare_exchange_weak(old, new, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(current) => old = current,
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }

    pub fn average(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.sum() / count as f64
    }

    /// Estimate a quantile from bucket counts: the upper bound of the
    /// first bucket whose cumulative count reaches the target. Values
    /// landing in the overflow bucket report the largest finite bound.
    pub fn quantile(&self, q: f64) -> f64 {
        let total = self.count();
        if total == 0 {
            return 0.0;
        }

        let target = (total as f64 * q).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, bound) in self.bounds.iter().enumerate() {
            cumulative += self.counts[i].load(Ordering::Relaxed);
            if cumulative >= target {
                return *bound;
            }
        }
        self.bounds.last().copied().unwrap_or(0.0)
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Cumulative counts per finite bound, for rendering.
    pub fn cumulative_counts(&self) -> Vec<u64> {
        let mut cumulative = 0u64;
        self.bounds
            .iter()
            .enumerate()
            .map(|(i, _)| {
                cumulative += self.counts[i].load(Ordering::Relaxed);
                cumulative
            })
            .collect()
    }
}

/// Counter family keyed by a single label value.
#[derive(Debug, Default)]
pub struct CounterVec {
    inner: RwLock<HashMap<String, Arc<Counter>>>,
}

impl CounterVec {
    pub fn new() -> Self {
        CounterVec::default()
    }

    pub fn with_label(&self, label: &str) -> Arc<Counter> {
        if let Some(c) = self.inner.read().expect("metric family lock").get(label) {
            return c.clone();
        }
        let mut map = self.inner.write().expect("metric family lock");
        map.entry(label.to_string())
            .or_insert_with(|| Arc::new(Counter::new()))
            .clone()
    }

    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let map = self.inner.read().expect("metric family lock");
        let mut out: Vec<(String, u64)> = map.iter().map(|(k, v)| (k.clone(), v.get())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// Gauge family keyed by a single label value.
#[derive(Debug, Default)]
pub struct GaugeVec {
    inner: RwLock<HashMap<String, Arc<Gauge>>>,
}

impl GaugeVec {
    pub fn new() -> Self {
        GaugeVec::default()
    }

    pub fn with_label(&self, label: &str) -> Arc<Gauge> {
        if let Some(g) = self.inner.read().expect("metric family lock").get(label) {
            return g.clone();
        }
        let mut map = self.inner.write().expect("metric family lock");
        map.entry(label.to_string())
            .or_insert_with(|| Arc::new(Gauge::new()))
            .clone()
    }

    pub fn get(&self, label: &str) -> Option<Arc<Gauge>> {
        self.inner
            .read()
            .expect("metric family lock")
            .get(label)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<(String, f64)> {
        let map = self.inner.read().expect("metric family lock");
        let mut out: Vec<(String, f64)> = map.iter().map(|(k, v)| (k.clone(), v.get())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// Histogram family keyed by a single label value; all members share
/// the family's bucket layout.
#[derive(Debug)]
pub struct HistogramVec {
    bounds: Vec<f64>,
    inner: RwLock<HashMap<String, Arc<Histogram>>>,
}

impl HistogramVec {
    pub fn new(bounds: Vec<f64>) -> Self {
        HistogramVec {
            bounds,
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_label(&self, label: &str) -> Arc<Histogram> {
        if let Some(h) = self.inner.read().expect("metric family lock").get(label) {
            return h.clone();
        }
        let mut map = self.inner.write().expect("metric family lock");
        map.entry(label.to_string())
            .or_insert_with(|| Arc::new(Histogram::new(self.bounds.clone())))
            .clone()
    }

    pub fn get(&self, label: &str) -> Option<Arc<Histogram>> {
        self.inner
            .read()
            .expect("metric family lock")
            .get(label)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<(String, Arc<Histogram>)> {
        let map = self.inner.read().expect("metric family lock");
        let mut out: Vec<(String, Arc<Histogram>)> =
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let c = Counter::new();
        c.inc();
        c.inc();
        c.add(3);
        assert_eq!(c.get(), 5);
    }

    #[test]
    fn test_gauge() {
        let g = Gauge::new();
        assert_eq!(g.get(), 0.0);
        g.set(1.5);
        assert_eq!(g.get(), 1.5);
        g.set(-2.25);
        assert_eq!(g.get(), -2.25);
    }

    #[test]
    fn test_histogram_observe_and_stats() {
        let h = Histogram::new(default_buckets());
        h.observe(0.003);
        h.observe(0.02);
        h.observe(0.02);
        h.observe(4.0);

        assert_eq!(h.count(), 4);
        assert!((h.sum() - 4.043).abs() < 1e-9);
        assert!((h.average() - 1.01075).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_quantile() {
        let h = Histogram::new(default_buckets());
        for _ in 0..95 {
            h.observe(0.04);
        }
        for _ in 0..5 {
            h.observe(2.0);
        }

        assert_eq!(h.quantile(0.5), 0.05);
        assert_eq!(h.quantile(0.95), 0.05);
        assert_eq!(h.quantile(0.99), 2.5);
    }

    #[test]
    fn test_histogram_overflow_bucket() {
        let h = Histogram::new(default_buckets());
        h.observe(100.0);
        assert_eq!(h.count(), 1);
        assert_eq!(h.quantile(0.95), 10.0);
    }

    #[test]
    fn test_empty_histogram() {
        let h = Histogram::new(default_buckets());
        assert_eq!(h.count(), 0);
        assert_eq!(h.average(), 0.0);
        assert_eq!(h.quantile(0.95), 0.0);
    }

    #[test]
    fn test_counter_vec_reuses_children() {
        let family = CounterVec::new();
        family.with_label("a").inc();
        family.with_label("a").inc();
        family.with_label("b").inc();

        assert_eq!(
            family.snapshot(),
            vec![("a".to_string(), 2), ("b".to_string(), 1)]
        );
    }

    #[test]
    fn test_histogram_vec_shares_bounds() {
        let family = HistogramVec::new(vec![1.0, 2.0]);
        family.with_label("x").observe(0.5);
        family.with_label("x").observe(1.5);

        let x = family.get("x").unwrap();
        assert_eq!(x.count(), 2);
        assert!(family.get("y").is_none());
    }

    #[test]
    fn test_linear_buckets() {
        assert_eq!(linear_buckets(0.0, 10.0, 3), vec![0.0, 10.0, 20.0]);
    }
}
