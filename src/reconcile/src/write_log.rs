use std::sync::Mutex;
use std::time::Duration;

use hlc::{wall_nanos, Hlc};

/// A single write recorded for later reconciliation.
#[derive(Debug, Clone)]
pub struct WriteEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub node_id: String,
    pub hlc: Hlc,
    /// Local wall-clock nanoseconds when the write was recorded
    pub received_at: i64,
}

struct RingState {
    entries: Vec<WriteEntry>,
    index: usize,
}

/// Bounded circular buffer of recent writes.
///
/// Not a durable journal: entries fall out by capacity eviction or by
/// exceeding the age cap, whichever comes first. Queries filter by age;
/// `compact` physically drops expired entries.
pub struct RecentWriteLog {
    state: Mutex<RingState>,
    capacity: usize,
    max_age: Duration,
}

impl RecentWriteLog {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        RecentWriteLog {
            state: Mutex::new(RingState {
                entries: Vec::with_capacity(capacity),
                index: 0,
            }),
            capacity,
            max_age,
        }
    }

    pub fn add(&self, key: &str, value: Vec<u8>, node_id: &str, timestamp: Hlc) {
        let entry = WriteEntry {
            key: key.to_string(),
            value,
            node_id: node_id.to_string(),
            hlc: timestamp,
            received_at: wall_nanos(),
        };

        let mut state = self.state.lock().expect("write log lock poisoned");
        if state.entries.len() < self.capacity {
            state.entries.push(entry);
        } else {
            let index = state.index;
            state.entries[index] = entry;
        }
        state.index = (state.index + 1) % self.capacity;
    }

    /// All entries younger than the age cap, oldest first is not
    /// guaranteed; reconciliation orders by HLC anyway.
    pub fn entries(&self) -> Vec<WriteEntry> {
        let state = self.state.lock().expect("write log lock poisoned");
        let cutoff = wall_nanos() - self.max_age.as_nanos() as i64;

        state
            .entries
            .iter()
            .filter(|e| e.received_at >= cutoff)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("write log lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries in place.
    pub fn compact(&self) {
        let mut state = self.state.lock().expect("write log lock poisoned");
        let cutoff = wall_nanos() - self.max_age.as_nanos() as i64;

        state.entries.retain(|e| e.received_at >= cutoff);
        state.index = state.entries.len() % self.capacity;
    }
}
