//! Shared keyed store that decoded telemetry is written into.

use crate::decode::DecodedValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapoolMessage {
    pub key: String,
    pub value: DecodedValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
}

impl DatapoolMessage {
    pub fn new(key: impl Into<String>, value: DecodedValue) -> Self {
        Self {
            key: key.into(),
            value,
            ts: None,
        }
    }

    pub fn stamped(mut self, ts: Option<OffsetDateTime>) -> Self {
        self.ts = ts.and_then(|t| {
            t.format(&time::format_description::well_known::Rfc3339)
                .ok()
        });
        self
    }
}

pub trait Datapool: Send + Sync {
    fn accept(&self, msg: DatapoolMessage);
}

/// Finds the datapool belonging to a robot. `None` means "not available yet".
pub trait DatapoolResolver: Send + Sync {
    fn resolve(&self, robot: &str) -> Option<Arc<dyn Datapool>>;
}

impl<F> DatapoolResolver for F
where
    F: Fn(&str) -> Option<Arc<dyn Datapool>> + Send + Sync,
{
    fn resolve(&self, robot: &str) -> Option<Arc<dyn Datapool>> {
        self(robot)
    }
}

/// Latest value per key.
#[derive(Debug, Default)]
pub struct MemoryDatapool {
    entries: RwLock<HashMap<String, DatapoolMessage>>,
}

impl MemoryDatapool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<DatapoolMessage> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// All entries, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, DatapoolMessage> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Datapool for MemoryDatapool {
    fn accept(&self, msg: DatapoolMessage) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(msg.key.clone(), msg);
    }
}

/// One [`MemoryDatapool`] per robot, available once registered.
#[derive(Debug, Default)]
pub struct DatapoolRegistry {
    pools: RwLock<HashMap<String, Arc<MemoryDatapool>>>,
}

impl DatapoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or return the existing) pool for `robot`.
    pub fn register(&self, robot: &str) -> Arc<MemoryDatapool> {
        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            pools
                .entry(robot.to_string())
                .or_insert_with(|| Arc::new(MemoryDatapool::new())),
        )
    }

    pub fn get(&self, robot: &str) -> Option<Arc<MemoryDatapool>> {
        self.pools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(robot)
            .cloned()
    }
}

impl DatapoolResolver for DatapoolRegistry {
    fn resolve(&self, robot: &str) -> Option<Arc<dyn Datapool>> {
        self.get(robot).map(|p| p as Arc<dyn Datapool>)
    }
}
