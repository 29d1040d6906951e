//! Gate administration: create, read, update and delete gates for an owner.
//!
//! This is the collaborator responsible for cache invalidation. Every update
//! or delete evicts the gate's (owner, name) cache entry, and the old name
//! too when a gate is renamed.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{DuplicateGateName, GateError};
use crate::gate::{Gate, GateDraft, GatePatch};
use crate::registry::ModelRegistry;
use crate::resolver::{GateCache, GateStore};

#[derive(Clone)]
pub struct GateAdmin {
    store: Arc<dyn GateStore>,
    cache: Arc<dyn GateCache>,
    registry: Arc<ModelRegistry>,
}

/// A uniqueness violation caught by the store (two writers racing past the
/// name check) is still a conflict
fn write_error(e: anyhow::Error) -> GateError {
    match e.downcast_ref::<DuplicateGateName>() {
        Some(dup) => GateError::Conflict(dup.name.clone()),
        None => GateError::Internal(e),
    }
}

impl GateAdmin {
    pub fn new(
        store: Arc<dyn GateStore>,
        cache: Arc<dyn GateCache>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            store,
            cache,
            registry,
        }
    }

    fn validate_models(&self, model: &str, fallbacks: &[String]) -> Result<(), GateError> {
        if model.trim().is_empty() {
            return Err(GateError::Validation("Model is required".to_string()));
        }
        if !self.registry.contains(model) {
            return Err(GateError::Validation(format!(
                "Invalid model '{}'. Supported models: {}",
                model,
                self.registry.model_ids().join(", ")
            )));
        }
        if let Some(unknown) = fallbacks.iter().find(|m| !self.registry.contains(m)) {
            return Err(GateError::Validation(format!(
                "Invalid fallback model '{}'",
                unknown
            )));
        }
        Ok(())
    }

    async fn evict(&self, owner_id: &str, name: &str) {
        if let Err(e) = self.cache.invalidate(owner_id, name).await {
            warn!(
                "Failed to invalidate gate cache for {}/{}: {:#}",
                owner_id, name, e
            );
        }
    }

    pub async fn create(&self, owner_id: &str, mut draft: GateDraft) -> Result<Gate, GateError> {
        draft.name = draft.name.trim().to_string();
        if draft.name.is_empty() {
            return Err(GateError::Validation("Gate name is required".to_string()));
        }
        self.validate_models(&draft.model, &draft.fallback_models)?;

        if self.store.get_by_name(owner_id, &draft.name).await?.is_some() {
            return Err(GateError::Conflict(draft.name));
        }

        let gate = Gate::from_draft(owner_id, draft);
        self.store.insert(&gate).await.map_err(write_error)?;
        info!("Created gate '{}' ({}) for {}", gate.name, gate.id, owner_id);
        Ok(gate)
    }

    /// Fetch by id. A gate owned by someone else is reported as missing.
    pub async fn get(&self, owner_id: &str, id: &str) -> Result<Gate, GateError> {
        match self.store.get_by_id(id).await? {
            Some(gate) if gate.owner_id == owner_id => Ok(gate),
            _ => Err(GateError::NotFound(id.to_string())),
        }
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<Gate>, GateError> {
        Ok(self.store.list(owner_id).await?)
    }

    pub async fn update(
        &self,
        owner_id: &str,
        id: &str,
        mut patch: GatePatch,
    ) -> Result<Gate, GateError> {
        let mut gate = self.get(owner_id, id).await?;
        let old_name = gate.name.clone();

        patch.name = patch.name.map(|n| n.trim().to_string());
        if let Some(name) = patch.name.as_deref() {
            if name.is_empty() {
                return Err(GateError::Validation("Gate name is required".to_string()));
            }
            if name != old_name && self.store.get_by_name(owner_id, name).await?.is_some() {
                return Err(GateError::Conflict(name.to_string()));
            }
        }

        gate.apply(patch);
        self.validate_models(&gate.model, &gate.fallback_models)?;
        self.store.update(&gate).await.map_err(write_error)?;

        self.evict(owner_id, &old_name).await;
        if gate.name != old_name {
            self.evict(owner_id, &gate.name).await;
        }
        info!("Updated gate '{}' ({})", gate.name, gate.id);
        Ok(gate)
    }

    pub async fn delete(&self, owner_id: &str, id: &str) -> Result<(), GateError> {
        let gate = self.get(owner_id, id).await?;
        if !self.store.delete(&gate.id).await? {
            return Err(GateError::NotFound(id.to_string()));
        }
        self.evict(owner_id, &gate.name).await;
        info!("Deleted gate '{}' ({})", gate.name, gate.id);
        Ok(())
    }
}
