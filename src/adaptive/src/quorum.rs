use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hlc::wall_nanos;
use log::info;
use metrics::Metrics;

/// Access to the quorum parameters in force. Handlers hold this by
/// capability, never by concrete type, so static and adaptive modes
/// are interchangeable.
pub trait QuorumProvider: Send + Sync {
    fn r(&self) -> usize;
    fn w(&self) -> usize;
    fn n(&self) -> usize;
}

/// Fixed quorum sizes straight from configuration.
pub struct StaticQuorum {
    r: usize,
    w: usize,
    n: usize,
}

impl StaticQuorum {
    pub fn new(r: usize, w: usize, n: usize) -> Self {
        StaticQuorum { r, w, n }
    }
}

impl QuorumProvider for StaticQuorum {
    fn r(&self) -> usize {
        self.r
    }

    fn w(&self) -> usize {
        self.w
    }

    fn n(&self) -> usize {
        self.n
    }
}

/// Why a proposed quorum transition was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum QuorumError {
    HysteresisLocked,
    IntersectionViolation { r: usize, w: usize, n: usize },
    BoundsViolation { param: &'static str, value: usize, min: usize, max: usize },
}

impl std::fmt::Display for QuorumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuorumError::HysteresisLocked => {
                write!(f, "adjustment rejected: in hysteresis lockout period")
            }
            QuorumError::IntersectionViolation { r, w, n } => {
                write!(f, "quorum intersection violated: r={} + w={} <= n={}", r, w, n)
            }
            QuorumError::BoundsViolation { param, value, min, max } => {
                write!(f, "{}={} outside bounds [{}, {}]", param, value, min, max)
            }
        }
    }
}

impl std::error::Error for QuorumError {}

/// Thread-safe holder of the current (R, W).
///
/// Reads are lock-free atomic loads on the hot path. Transitions
/// serialise through a mutex and must clear three gates: the hysteresis
/// lockout, the intersection invariant R+W>N, and the configured
/// bounds. There is no partially applied state: either every gate
/// passes and both values move, or nothing changes.
pub struct AdaptiveQuorum {
    current_r: AtomicUsize,
    current_w: AtomicUsize,
    n: usize,

    min_r: usize,
    max_r: usize,
    min_w: usize,
    max_w: usize,

    /// Wall-clock nanoseconds of the last committed transition; zero
    /// before the first one
    last_adjust: AtomicI64,
    lockout: Duration,

    transition: Mutex<()>,
    metrics: Arc<Metrics>,
}

impl AdaptiveQuorum {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        initial_r: usize,
        initial_w: usize,
        n: usize,
        min_r: usize,
        max_r: usize,
        min_w: usize,
        max_w: usize,
        lockout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        metrics.current_r.set(initial_r as f64);
        metrics.current_w.set(initial_w as f64);

        AdaptiveQuorum {
            current_r: AtomicUsize::new(initial_r),
            current_w: AtomicUsize::new(initial_w),
            n,
            min_r,
            max_r,
            min_w,
            max_w,
            last_adjust: AtomicI64::new(0),
            lockout,
            transition: Mutex::new(()),
            metrics,
        }
    }

    /// The validation predicate alone, without the lockout gate. The
    /// adjuster uses this to discard impossible proposals before
    /// attempting a commit.
    pub fn validate(&self, r: usize, w: usize) -> Result<(), QuorumError> {
        if r + w <= self.n {
            return Err(QuorumError::IntersectionViolation { r, w, n: self.n });
        }
        if r < self.min_r || r > self.max_r {
            return Err(QuorumError::BoundsViolation {
                param: "r",
                value: r,
                min: self.min_r,
                max: self.max_r,
            });
        }
        if w < self.min_w || w > self.max_w {
            return Err(QuorumError::BoundsViolation {
                param: "w",
                value: w,
                min: self.min_w,
                max: self.max_w,
            });
        }
        Ok(())
    }

    /// Atomically commit a new (R, W) after all gates pass.
    pub fn set_quorum(&self, new_r: usize, new_w: usize, reason: &str) -> Result<(), QuorumError> {
        let _guard = self.transition.lock().expect("quorum transition lock poisoned");

        if self.is_in_lockout() {
            return Err(QuorumError::HysteresisLocked);
        }
        self.validate(new_r, new_w)?;

        let old_r = self.current_r.swap(new_r, Ordering::SeqCst);
        let old_w = self.current_w.swap(new_w, Ordering::SeqCst);
        self.last_adjust.store(wall_nanos(), Ordering::SeqCst);

        self.metrics.current_r.set(new_r as f64);
        self.metrics.current_w.set(new_w as f64);

        info!(
            "quorum adjusted: R {} -> {}, W {} -> {} (reason: {})",
            old_r, new_r, old_w, new_w, reason
        );
        Ok(())
    }

    pub fn is_in_lockout(&self) -> bool {
        let last = self.last_adjust.load(Ordering::SeqCst);
        last != 0 && wall_nanos() - last < self.lockout.as_nanos() as i64
    }
}

impl QuorumProvider for AdaptiveQuorum {
    fn r(&self) -> usize {
        self.current_r.load(Ordering::SeqCst)
    }

    fn w(&self) -> usize {
        self.current_w.load(Ordering::SeqCst)
    }

    fn n(&self) -> usize {
        self.n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quorum_with_lockout(lockout: Duration) -> AdaptiveQuorum {
        AdaptiveQuorum::new(2, 2, 3, 1, 3, 1, 3, lockout, Arc::new(Metrics::new()))
    }

    #[test]
    fn test_static_provider_returns_config() {
        let q = StaticQuorum::new(2, 3, 4);
        assert_eq!((q.r(), q.w(), q.n()), (2, 3, 4));
    }

    #[test]
    fn test_set_quorum_commits_and_publishes() {
        let metrics = Arc::new(Metrics::new());
        let q = AdaptiveQuorum::new(2, 2, 3, 1, 3, 1, 3, Duration::from_secs(5), metrics.clone());

        q.set_quorum(1, 3, "tighten").unwrap();

        assert_eq!(q.r(), 1);
        assert_eq!(q.w(), 3);
        assert_eq!(metrics.current_r.get(), 1.0);
        assert_eq!(metrics.current_w.get(), 3.0);
    }

    #[test]
    fn test_intersection_violation_rejected() {
        let q = quorum_with_lockout(Duration::ZERO);
        let err = q.set_quorum(1, 2, "relax").unwrap_err();
        assert_eq!(err, QuorumError::IntersectionViolation { r: 1, w: 2, n: 3 });
        assert_eq!((q.r(), q.w()), (2, 2));
    }

    #[test]
    fn test_bounds_violation_rejected() {
        let q = quorum_with_lockout(Duration::ZERO);
        assert!(matches!(
            q.set_quorum(4, 1, "relax"),
            Err(QuorumError::BoundsViolation { param: "r", .. })
        ));
        assert!(matches!(
            q.validate(2, 4),
            Err(QuorumError::BoundsViolation { param: "w", .. })
        ));
    }

    #[test]
    fn test_hysteresis_lockout_blocks_second_transition() {
        let q = quorum_with_lockout(Duration::from_millis(80));

        q.set_quorum(1, 3, "tighten").unwrap();
        assert!(q.is_in_lockout());
        assert_eq!(q.set_quorum(2, 2, "relax").unwrap_err(), QuorumError::HysteresisLocked);
        assert_eq!((q.r(), q.w()), (1, 3));

        std::thread::sleep(Duration::from_millis(100));
        assert!(!q.is_in_lockout());
        q.set_quorum(2, 2, "relax").unwrap();
        assert_eq!((q.r(), q.w()), (2, 2));
    }

    #[test]
    fn test_validate_ignores_lockout() {
        let q = quorum_with_lockout(Duration::from_secs(60));
        q.set_quorum(1, 3, "tighten").unwrap();

        // validate still answers during lockout
        q.validate(2, 2).unwrap();
    }

    #[test]
    fn test_not_locked_before_first_transition() {
        let q = quorum_with_lockout(Duration::from_secs(60));
        assert!(!q.is_in_lockout());
    }
}
