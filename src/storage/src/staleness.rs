use std::sync::Arc;
use std::time::Duration;

use hlc::{wall_nanos, Hlc};
use metrics::Metrics;

use crate::types::VersionedValue;

/// A value older than the configured staleness bound.
#[derive(Debug)]
pub struct StalenessError {
    pub age: Duration,
    pub max_age: Duration,
}

impl std::fmt::Display for StalenessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "staleness bound exceeded: data age {:?} > max {:?}",
            self.age, self.max_age
        )
    }
}

impl std::error::Error for StalenessError {}

/// Checks versioned values against the configured maximum data age.
/// Age is measured against the reader's wall clock at check time.
pub struct Detector {
    max_age: Duration,
    metrics: Arc<Metrics>,
}

impl Detector {
    pub fn new(max_age: Duration, metrics: Arc<Metrics>) -> Self {
        Detector { max_age, metrics }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn is_stale(&self, timestamp: &Hlc, now: i64) -> bool {
        timestamp.age(now) > self.max_age
    }

    pub fn age(&self, timestamp: &Hlc, now: i64) -> Duration {
        timestamp.age(now)
    }

    /// Strict check for the client-visible read path: stale values are
    /// rejected, counted, and surfaced as an error.
    pub fn check_strict(&self, value: &VersionedValue) -> Result<(), StalenessError> {
        self.check_strict_timestamp(&value.hlc)
    }

    /// Same strict check against a bare timestamp, for values assembled
    /// from replica responses.
    pub fn check_strict_timestamp(&self, timestamp: &Hlc) -> Result<(), StalenessError> {
        let age = timestamp.age(wall_nanos());
        self.metrics.data_age.observe(age.as_secs_f64());

        if age > self.max_age {
            self.metrics.stale_reads_rejected.inc();
            self.metrics.staleness_violations.inc();
            return Err(StalenessError {
                age,
                max_age: self.max_age,
            });
        }

        Ok(())
    }

    /// Partition values into (fresh, stale) without rejecting anything.
    pub fn check_multiple(
        &self,
        values: Vec<VersionedValue>,
    ) -> (Vec<VersionedValue>, Vec<VersionedValue>) {
        let now = wall_nanos();
        let mut fresh = Vec::new();
        let mut stale = Vec::new();

        for value in values {
            if self.is_stale(&value.hlc, now) {
                stale.push(value);
            } else {
                fresh.push(value);
            }
        }

        (fresh, stale)
    }
}
