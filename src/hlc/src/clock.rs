use std::cmp::Ordering;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Hybrid logical clock timestamp.
///
/// Ordered by (physical, logical); the node id only identifies the
/// stamping node and never participates in ordering or equality, so
/// `PartialEq` is deliberately not derived. Use `is_equal` /
/// `happens_before` / `compare` instead.
#[derive(Debug, Clone, Default)]
pub struct Hlc {
    /// Physical timestamp in nanoseconds since the Unix epoch
    pub physical: i64,
    /// Logical counter for events sharing the same physical time
    pub logical: i64,
    /// Node that generated this timestamp
    pub node_id: String,
}

impl Hlc {
    pub fn new(physical: i64, logical: i64, node_id: impl Into<String>) -> Self {
        Hlc {
            physical,
            logical,
            node_id: node_id.into(),
        }
    }

    /// True if this timestamp causally precedes `other`.
    pub fn happens_before(&self, other: &Hlc) -> bool {
        self.physical < other.physical
            || (self.physical == other.physical && self.logical < other.logical)
    }

    pub fn happens_after(&self, other: &Hlc) -> bool {
        other.happens_before(self)
    }

    /// Neither ordering holds; with an HLC this only happens when both
    /// physical and logical match (necessarily on different nodes).
    pub fn is_concurrent_with(&self, other: &Hlc) -> bool {
        !self.happens_before(other) && !self.happens_after(other)
    }

    /// Identical physical and logical components.
    pub fn is_equal(&self, other: &Hlc) -> bool {
        self.physical == other.physical && self.logical == other.logical
    }

    /// Less = before, Equal = concurrent, Greater = after.
    pub fn compare(&self, other: &Hlc) -> Ordering {
        if self.happens_before(other) {
            Ordering::Less
        } else if self.happens_after(other) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }

    /// Age of this timestamp relative to `now` (nanoseconds since the
    /// Unix epoch), clamped to zero for future timestamps.
    pub fn age(&self, now: i64) -> Duration {
        if now > self.physical {
            Duration::from_nanos((now - self.physical) as u64)
        } else {
            Duration::ZERO
        }
    }

    pub fn is_zero(&self) -> bool {
        self.physical == 0 && self.logical == 0
    }

    pub fn to_nanos(&self) -> i64 {
        self.physical
    }
}

impl std::fmt::Display for Hlc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Hlc{{physical={}, logical={}, node={}}}",
            self.physical, self.logical, self.node_id
        )
    }
}

/// Remote timestamp too far ahead of the local wall clock.
#[derive(Debug)]
pub struct ClockDriftError {
    pub remote_physical: i64,
    pub local_physical: i64,
    pub max_drift: Duration,
}

impl std::fmt::Display for ClockDriftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "clock drift too large: remote {} ahead of local {} (max: {:?})",
            self.remote_physical, self.local_physical, self.max_drift
        )
    }
}

impl std::error::Error for ClockDriftError {}

struct ClockState {
    physical: i64,
    logical: i64,
}

/// Thread-safe hybrid logical clock.
///
/// `now` is strictly monotone for a single clock; `update` merges a
/// remote timestamp while preserving happens-before. The state mutex is
/// never held across I/O.
pub struct Clock {
    state: Mutex<ClockState>,
    node_id: String,
    max_drift: Duration,
}

impl Clock {
    pub fn new(node_id: impl Into<String>, max_drift: Duration) -> Self {
        Clock {
            state: Mutex::new(ClockState {
                physical: wall_nanos(),
                logical: 0,
            }),
            node_id: node_id.into(),
            max_drift,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Generate the next timestamp.
    pub fn now(&self) -> Hlc {
        let mut state = self.state.lock().expect("hlc state lock poisoned");

        let physical_now = wall_nanos();
        if physical_now > state.physical {
            state.physical = physical_now;
            state.logical = 0;
        } else {
            // wall clock stalled or stepped backwards; the logical
            // counter keeps the clock monotone
            state.logical += 1;
        }

        Hlc {
            physical: state.physical,
            logical: state.logical,
            node_id: self.node_id.clone(),
        }
    }

    /// Merge a remote timestamp into the local clock.
    ///
    /// Fails without mutating when the remote physical component is
    /// more than `max_drift` ahead of the local wall clock; callers
    /// treat that as a warning and keep processing the message.
    pub fn update(&self, remote: &Hlc) -> Result<(), ClockDriftError> {
        let mut state = self.state.lock().expect("hlc state lock poisoned");

        let physical_now = wall_nanos();
        let drift = remote.physical - physical_now;
        if drift > self.max_drift.as_nanos() as i64 {
            return Err(ClockDriftError {
                remote_physical: remote.physical,
                local_physical: physical_now,
                max_drift: self.max_drift,
            });
        }

        if remote.physical > state.physical {
            state.physical = remote.physical;
            state.logical = remote.logical + 1;
        } else if remote.physical == state.physical {
            state.logical = state.logical.max(remote.logical) + 1;
        } else {
            state.logical += 1;
        }

        // advance when current time is ahead of both clocks
        if physical_now > state.physical {
            state.physical = physical_now;
            state.logical = 0;
        }

        Ok(())
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn wall_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
