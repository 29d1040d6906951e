//! layer-core - Gate resolution and completion routing for the layer gateway
//!
//! This crate provides:
//! - Gates: owner-scoped, named model configurations with override policies
//! - A static model registry with per-1K-token pricing
//! - Vendor adapters for OpenAI, Anthropic and Google Gemini
//! - A completion router with ordered fallback across candidate models
//! - Detached request auditing

pub mod admin;
pub mod audit;
pub mod error;
pub mod gate;
pub mod policy;
pub mod providers;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod types;

// Re-export main types for convenience
pub use admin::GateAdmin;
pub use audit::{AuditRecord, AuditSink, AuditWriteError, RequestAuditor};
pub use error::{DuplicateGateName, ErrorCode, GateError, ProviderError};
pub use gate::{Gate, GateDraft, GatePatch, RoutingStrategy};
pub use policy::{
    EffectiveParams, GenerationDefaults, OverrideField, OverridePolicy, is_overridable,
    merge_effective_params,
};
pub use providers::{ProviderAdapter, ProviderSettings, ProviderTable};
pub use registry::{ModelInfo, ModelPricing, ModelRegistry, Vendor};
pub use resolver::{GateCache, GateResolver, GateStore};
pub use router::{CompletionRouter, candidate_models};
pub use types::{
    CallerContext, ChatMessage, ChatRole, CompletionOutcome, CompletionRequest, Overrides,
    ProviderResponse, Usage,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let _ = std::mem::size_of::<CompletionRouter>();
        let _ = std::mem::size_of::<GateResolver>();
        let _ = std::mem::size_of::<ProviderTable>();
        let _ = std::mem::size_of::<AuditRecord>();
        let _ = std::mem::size_of::<Gate>();
    }
}
