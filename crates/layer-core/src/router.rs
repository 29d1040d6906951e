//! Completion routing
//!
//! `complete` validates the request, resolves the gate, merges parameters,
//! then walks the candidate models one at a time until a vendor answers.
//! Exactly one audit record is queued per request that passes validation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::audit::{AuditRecord, RequestAuditor};
use crate::error::{GateError, ProviderError};
use crate::gate::Gate;
use crate::policy::{EffectiveParams, GenerationDefaults, merge_effective_params};
use crate::providers::ProviderTable;
use crate::registry::ModelRegistry;
use crate::resolver::GateResolver;
use crate::types::{CallerContext, CompletionOutcome, CompletionRequest, ProviderResponse};

/// Ordered, de-duplicated list of models to try.
///
/// `single` yields only `primary`. `fallback` and `round-robin` append the
/// gate's fallback models; a model listed twice is tried once, at its first
/// position.
pub fn candidate_models(gate: &Gate, primary: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut candidates = vec![primary.to_string()];
    seen.insert(primary.to_string());
    if gate.routing_strategy.uses_fallbacks() {
        for model in &gate.fallback_models {
            if seen.insert(model.clone()) {
                candidates.push(model.clone());
            }
        }
    }
    candidates
}

/// Routes completion requests through gates to vendor adapters
#[derive(Clone)]
pub struct CompletionRouter {
    resolver: GateResolver,
    registry: Arc<ModelRegistry>,
    providers: ProviderTable,
    auditor: RequestAuditor,
    defaults: GenerationDefaults,
}

impl CompletionRouter {
    pub fn new(
        resolver: GateResolver,
        registry: Arc<ModelRegistry>,
        providers: ProviderTable,
        auditor: RequestAuditor,
    ) -> Self {
        Self {
            resolver,
            registry,
            providers,
            auditor,
            defaults: GenerationDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: GenerationDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn providers(&self) -> &ProviderTable {
        &self.providers
    }

    /// Run [`complete`](Self::complete) on its own task.
    ///
    /// Dropping the returned future (a client hanging up) does not cancel
    /// the request: the candidate chain still runs to the end and the audit
    /// record is still written.
    pub async fn spawn_complete(
        &self,
        caller: CallerContext,
        request: CompletionRequest,
    ) -> Result<CompletionOutcome, GateError> {
        let router = self.clone();
        tokio::spawn(async move { router.complete(&caller, request).await })
            .await
            .map_err(|e| GateError::Internal(anyhow!("Completion task failed: {}", e)))?
    }

    /// Serve one completion request for `caller`
    pub async fn complete(
        &self,
        caller: &CallerContext,
        request: CompletionRequest,
    ) -> Result<CompletionOutcome, GateError> {
        let gate_name = request.gate.trim();
        if gate_name.is_empty() {
            return Err(GateError::Validation("Gate name is required".to_string()));
        }
        if request.messages.is_empty() {
            return Err(GateError::Validation(
                "At least one message is required".to_string(),
            ));
        }
        let gate_name = gate_name.to_string();

        let started = Instant::now();
        let mut record = AuditRecord::begin(caller);
        record.gate_name = Some(gate_name.clone());
        record.model_requested = request.overrides.model.clone();

        let result = self
            .route(caller, &gate_name, request, &mut record)
            .await;

        record.latency_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => {
                record.success = true;
                record.model_used = Some(outcome.model_used.clone());
                record = record.with_usage(&outcome.usage, outcome.cost_usd);
            }
            Err(e) => {
                record.success = false;
                record.error_message = Some(e.detail());
            }
        }
        self.auditor.record(record);

        result
    }

    async fn route(
        &self,
        caller: &CallerContext,
        gate_name: &str,
        request: CompletionRequest,
        record: &mut AuditRecord,
    ) -> Result<CompletionOutcome, GateError> {
        let gate = self.resolver.resolve(&caller.owner_id, gate_name).await?;
        record.gate_id = Some(gate.id.clone());
        if record.model_requested.is_none() {
            record.model_requested = Some(gate.model.clone());
        }

        let params = merge_effective_params(
            &gate,
            &request.overrides,
            request.messages,
            &self.registry,
            &self.defaults,
        );
        let candidates = candidate_models(&gate, &params.model);
        debug!(
            "Gate '{}' ({}) candidates: {:?}",
            gate.name, gate.routing_strategy, candidates
        );

        let mut last_error: Option<ProviderError> = None;
        for (attempt, model) in candidates.iter().enumerate() {
            let attempt_params = params.for_model(model);
            match self.dispatch(&attempt_params).await {
                Ok(response) => {
                    if attempt > 0 {
                        info!(
                            "Gate '{}' served by fallback model '{}' after {} failed attempt(s)",
                            gate.name, model, attempt
                        );
                    }
                    return Ok(CompletionOutcome {
                        content: response.content,
                        model_used: model.clone(),
                        usage: response.usage,
                        cost_usd: response.cost_usd,
                    });
                }
                Err(e) => {
                    warn!("Gate '{}': {}", gate.name, e);
                    last_error = Some(e);
                }
            }
        }

        let source = last_error.unwrap_or_else(|| {
            ProviderError::unroutable(params.model.clone(), anyhow!("no candidate models"))
        });
        Err(GateError::AllProvidersFailed {
            attempts: candidates.len(),
            source,
        })
    }

    /// One vendor call. Unknown models and vendors without an adapter count
    /// as a failed attempt rather than aborting the chain.
    async fn dispatch(&self, params: &EffectiveParams) -> Result<ProviderResponse, ProviderError> {
        let vendor = self.registry.vendor_of(&params.model).ok_or_else(|| {
            ProviderError::unroutable(
                params.model.clone(),
                anyhow!("model is not in the registry"),
            )
        })?;
        let adapter = self.providers.get(vendor).ok_or_else(|| {
            ProviderError::unroutable(
                params.model.clone(),
                anyhow!("no adapter registered for vendor '{}'", vendor),
            )
        })?;
        adapter.create_completion(params).await
    }
}
