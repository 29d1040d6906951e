//! Provider-agnostic adapter interface

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::policy::EffectiveParams;
use crate::registry::{ModelPricing, Vendor};
use crate::types::{ProviderResponse, Usage};

/// Trait that every vendor adapter implements
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Vendor this adapter serves; also its key in the provider table
    fn vendor(&self) -> Vendor;

    /// Run one completion with fully merged parameters
    async fn create_completion(
        &self,
        params: &EffectiveParams,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// Connection settings shared by all HTTP adapters
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl ProviderSettings {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub(crate) fn http_client(&self) -> anyhow::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout())
            .build()
            .map_err(Into::into)
    }

    /// Base URL without a trailing slash
    pub(crate) fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Mask an API key for display, keeping a short prefix and suffix
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

/// What an adapter extracts from a vendor reply before pricing
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct VendorReply {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Only some vendors report a total
    pub total_tokens: Option<u32>,
}

impl VendorReply {
    pub fn into_response(self, pricing: &ModelPricing) -> ProviderResponse {
        let total_tokens = self
            .total_tokens
            .unwrap_or(self.prompt_tokens + self.completion_tokens);
        ProviderResponse {
            cost_usd: pricing.cost(self.prompt_tokens, self.completion_tokens),
            content: self.content,
            usage: Usage {
                prompt_tokens: self.prompt_tokens,
                completion_tokens: self.completion_tokens,
                total_tokens,
            },
        }
    }
}
