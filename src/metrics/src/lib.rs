pub mod primitives;
pub mod reader;
pub mod registry;

pub use primitives::{Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramVec};
pub use reader::{LatencyStats, MetricsReader};
pub use registry::Metrics;
