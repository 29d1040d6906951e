//! Gate config resolution: cache first, durable store on miss

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::GateError;
use crate::gate::Gate;

/// Durable gate storage, keyed by (owner, name) and by id
#[async_trait]
pub trait GateStore: Send + Sync {
    async fn get_by_name(&self, owner_id: &str, name: &str) -> Result<Option<Gate>>;
    async fn get_by_id(&self, id: &str) -> Result<Option<Gate>>;
    /// All gates of an owner, newest first
    async fn list(&self, owner_id: &str) -> Result<Vec<Gate>>;
    async fn insert(&self, gate: &Gate) -> Result<()>;
    async fn update(&self, gate: &Gate) -> Result<()>;
    /// Returns whether a row was removed
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// Gate cache keyed by (owner, name). Entries never expire on their own;
/// whoever mutates a gate must invalidate it.
#[async_trait]
pub trait GateCache: Send + Sync {
    async fn get(&self, owner_id: &str, name: &str) -> Result<Option<Gate>>;
    async fn set(&self, owner_id: &str, name: &str, gate: &Gate) -> Result<()>;
    async fn invalidate(&self, owner_id: &str, name: &str) -> Result<()>;
}

/// Resolves gates by (owner, name)
#[derive(Clone)]
pub struct GateResolver {
    cache: Arc<dyn GateCache>,
    store: Arc<dyn GateStore>,
}

impl GateResolver {
    pub fn new(cache: Arc<dyn GateCache>, store: Arc<dyn GateStore>) -> Self {
        Self { cache, store }
    }

    /// Look a gate up, populating the cache on a store hit.
    ///
    /// A cache failure is logged and treated as a miss; only the store decides
    /// whether the gate exists.
    pub async fn resolve(&self, owner_id: &str, gate_name: &str) -> Result<Gate, GateError> {
        match self.cache.get(owner_id, gate_name).await {
            Ok(Some(gate)) => {
                debug!("Gate cache hit: {}/{}", owner_id, gate_name);
                return Ok(gate);
            }
            Ok(None) => debug!("Gate cache miss: {}/{}", owner_id, gate_name),
            Err(e) => warn!(
                "Gate cache read failed for {}/{}, falling back to store: {:#}",
                owner_id, gate_name, e
            ),
        }

        let gate = self
            .store
            .get_by_name(owner_id, gate_name)
            .await
            .map_err(|e| GateError::Internal(e.context("Failed to load gate from store")))?
            .ok_or_else(|| GateError::NotFound(gate_name.to_string()))?;

        if let Err(e) = self.cache.set(owner_id, gate_name, &gate).await {
            warn!(
                "Failed to populate gate cache for {}/{}: {:#}",
                owner_id, gate_name, e
            );
        }

        Ok(gate)
    }

    pub fn cache(&self) -> &Arc<dyn GateCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn GateStore> {
        &self.store
    }
}

/// Hand-rolled collaborators shared by the crate's tests
#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use anyhow::anyhow;

    use super::*;

    /// In-memory store that counts name lookups
    #[derive(Default)]
    pub struct CountingStore {
        gates: Mutex<Vec<Gate>>,
        pub name_lookups: AtomicUsize,
        pub fail: AtomicBool,
        /// Name lookups miss, as if another writer had not committed yet
        pub stale_reads: AtomicBool,
    }

    impl CountingStore {
        pub fn with(gates: Vec<Gate>) -> Self {
            Self {
                gates: Mutex::new(gates),
                ..Default::default()
            }
        }

        pub fn lookups(&self) -> usize {
            self.name_lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GateStore for CountingStore {
        async fn get_by_name(&self, owner_id: &str, name: &str) -> Result<Option<Gate>> {
            self.name_lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow!("connection refused"));
            }
            if self.stale_reads.load(Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(self
                .gates
                .lock()
                .unwrap()
                .iter()
                .find(|g| g.owner_id == owner_id && g.name == name)
                .cloned())
        }

        async fn get_by_id(&self, id: &str) -> Result<Option<Gate>> {
            Ok(self.gates.lock().unwrap().iter().find(|g| g.id == id).cloned())
        }

        async fn list(&self, owner_id: &str) -> Result<Vec<Gate>> {
            let mut gates: Vec<Gate> = self
                .gates
                .lock()
                .unwrap()
                .iter()
                .filter(|g| g.owner_id == owner_id)
                .cloned()
                .collect();
            gates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(gates)
        }

        async fn insert(&self, gate: &Gate) -> Result<()> {
            let mut gates = self.gates.lock().unwrap();
            check_unique(&gates, gate)?;
            gates.push(gate.clone());
            Ok(())
        }

        async fn update(&self, gate: &Gate) -> Result<()> {
            let mut gates = self.gates.lock().unwrap();
            check_unique(&gates, gate)?;
            if let Some(existing) = gates.iter_mut().find(|g| g.id == gate.id) {
                *existing = gate.clone();
            }
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<bool> {
            let mut gates = self.gates.lock().unwrap();
            let before = gates.len();
            gates.retain(|g| g.id != id);
            Ok(gates.len() != before)
        }
    }

    fn check_unique(gates: &[Gate], gate: &Gate) -> Result<()> {
        let taken = gates
            .iter()
            .any(|g| g.id != gate.id && g.owner_id == gate.owner_id && g.name == gate.name);
        if taken {
            return Err(crate::error::DuplicateGateName {
                owner_id: gate.owner_id.clone(),
                name: gate.name.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// HashMap cache that can be switched into an outage
    #[derive(Default)]
    pub struct MapCache {
        entries: Mutex<HashMap<(String, String), Gate>>,
        pub down: AtomicBool,
    }

    impl MapCache {
        pub fn contains(&self, owner_id: &str, name: &str) -> bool {
            self.entries
                .lock()
                .unwrap()
                .contains_key(&(owner_id.to_string(), name.to_string()))
        }
    }

    #[async_trait]
    impl GateCache for MapCache {
        async fn get(&self, owner_id: &str, name: &str) -> Result<Option<Gate>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(anyhow!("cache unavailable"));
            }
            Ok(self
                .entries
                .lock()
                .unwrap()
                .get(&(owner_id.to_string(), name.to_string()))
                .cloned())
        }

        async fn set(&self, owner_id: &str, name: &str, gate: &Gate) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(anyhow!("cache unavailable"));
            }
            self.entries
                .lock()
                .unwrap()
                .insert((owner_id.to_string(), name.to_string()), gate.clone());
            Ok(())
        }

        async fn invalidate(&self, owner_id: &str, name: &str) -> Result<()> {
            self.entries
                .lock()
                .unwrap()
                .remove(&(owner_id.to_string(), name.to_string()));
            Ok(())
        }
    }
}
