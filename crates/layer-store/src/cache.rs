//! In-process gate cache
//!
//! Bounded by entry count only; nothing expires by time. Evicted entries are
//! simply re-read from the store on the next resolution.

use std::num::NonZeroUsize;

use anyhow::Result;
use async_trait::async_trait;
use layer_core::{Gate, GateCache};
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 1024;

type CacheKey = (String, String);

pub struct LruGateCache {
    entries: Mutex<LruCache<CacheKey, Gate>>,
}

impl LruGateCache {
    /// A capacity of zero is bumped to one
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for LruGateCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn key(owner_id: &str, name: &str) -> CacheKey {
    (owner_id.to_string(), name.to_string())
}

#[async_trait]
impl GateCache for LruGateCache {
    async fn get(&self, owner_id: &str, name: &str) -> Result<Option<Gate>> {
        Ok(self.entries.lock().await.get(&key(owner_id, name)).cloned())
    }

    async fn set(&self, owner_id: &str, name: &str, gate: &Gate) -> Result<()> {
        let k = key(owner_id, name);
        let displaced = self.entries.lock().await.push(k.clone(), gate.clone());
        // push also hands back the old value when the key was already present
        if let Some((old_key, _)) = displaced {
            if old_key != k {
                debug!("Gate cache evicted {}/{}", old_key.0, old_key.1);
            }
        }
        Ok(())
    }

    async fn invalidate(&self, owner_id: &str, name: &str) -> Result<()> {
        self.entries.lock().await.pop(&key(owner_id, name));
        Ok(())
    }
}
