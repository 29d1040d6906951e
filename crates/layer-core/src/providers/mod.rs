//! Vendor adapters for OpenAI, Anthropic and Google Gemini
//!
//! Each adapter implements [`ProviderAdapter`]. The router never branches on
//! vendor; it looks adapters up in a [`ProviderTable`] keyed by [`Vendor`], so
//! supporting another vendor means registering another adapter.

pub mod anthropic;
pub mod google;
pub mod openai;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use crate::registry::Vendor;

pub use anthropic::AnthropicAdapter;
pub use google::GoogleAdapter;
pub use openai::OpenAiAdapter;
pub use types::{ProviderAdapter, ProviderSettings, mask_secret};

/// Lookup table from vendor to adapter
#[derive(Clone, Default)]
pub struct ProviderTable {
    adapters: HashMap<Vendor, Arc<dyn ProviderAdapter>>,
}

impl ProviderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own vendor, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.vendor(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, vendor: Vendor) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&vendor).cloned()
    }

    pub fn vendors(&self) -> Vec<Vendor> {
        self.adapters.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for ProviderTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTable")
            .field("vendors", &self.vendors())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::policy::EffectiveParams;
    use crate::types::ProviderResponse;
    use async_trait::async_trait;

    struct NullAdapter(Vendor);

    #[async_trait]
    impl ProviderAdapter for NullAdapter {
        fn vendor(&self) -> Vendor {
            self.0
        }
        async fn create_completion(
            &self,
            params: &EffectiveParams,
        ) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::new(
                self.0,
                params.model.clone(),
                anyhow::anyhow!("null adapter"),
            ))
        }
    }

    #[test]
    fn test_table_keyed_by_vendor() {
        let table = ProviderTable::new()
            .with(Arc::new(NullAdapter(Vendor::OpenAi)))
            .with(Arc::new(NullAdapter(Vendor::Google)));
        assert_eq!(table.len(), 2);
        assert!(table.get(Vendor::OpenAi).is_some());
        assert!(table.get(Vendor::Anthropic).is_none());
    }

    #[test]
    fn test_register_replaces_same_vendor() {
        let mut table = ProviderTable::new();
        table.register(Arc::new(NullAdapter(Vendor::Anthropic)));
        table.register(Arc::new(NullAdapter(Vendor::Anthropic)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.vendors(), vec![Vendor::Anthropic]);
    }
}
