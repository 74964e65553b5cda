use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use hlc::{wall_nanos, Hlc};
use tokio::sync::RwLock;

use crate::types::VersionedValue;

/// Number of independent shards. Power of two so the modulo is cheap.
const SHARD_COUNT: usize = 16;

/// Thread-safe in-memory key-value store, sharded by key hash so
/// writers on different keys rarely contend.
///
/// Writes replace unconditionally; last-writer-wins repair happens in
/// the reconciler, not on the hot path, because the transport delivers
/// same-source writes in order and every write carries an HLC stamp.
#[derive(Clone)]
pub struct Store {
    shards: Arc<Vec<RwLock<HashMap<String, VersionedValue>>>>,
}

impl Store {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect();
        Store {
            shards: Arc::new(shards),
        }
    }

    fn shard_for(&self, key: &str) -> &RwLock<HashMap<String, VersionedValue>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARD_COUNT]
    }

    /// Store a value stamped with the given HLC; returns the stored
    /// versioned value.
    pub async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        node_id: &str,
        timestamp: Hlc,
    ) -> VersionedValue {
        let vv = VersionedValue::new(value, node_id, timestamp);

        let mut shard = self.shard_for(key).write().await;
        shard.insert(key.to_string(), vv.clone());
        vv
    }

    pub async fn get(&self, key: &str) -> Option<VersionedValue> {
        let shard = self.shard_for(key).read().await;
        shard.get(key).cloned()
    }

    /// Retrieve a value along with whether its age exceeds `max_age`
    /// at the time of the call.
    pub async fn get_with_staleness(
        &self,
        key: &str,
        max_age: Duration,
    ) -> Option<(VersionedValue, bool)> {
        let shard = self.shard_for(key).read().await;
        let vv = shard.get(key)?;

        let is_stale = vv.hlc.age(wall_nanos()) > max_age;
        Some((vv.clone(), is_stale))
    }

    pub async fn size(&self) -> usize {
        let mut total = 0;
        for shard in self.shards.iter() {
            total += shard.read().await.len();
        }
        total
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
