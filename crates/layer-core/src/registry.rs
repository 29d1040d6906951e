//! Model registry: the closed set of routable models, their vendor and pricing

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// LLM vendor a model is served by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    OpenAi,
    Anthropic,
    Google,
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Google => write!(f, "google"),
        }
    }
}

/// Pricing for a specific model (USD per 1000 tokens)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_ktok: f64,
    pub output_per_ktok: f64,
}

impl ModelPricing {
    pub const fn new(input_per_ktok: f64, output_per_ktok: f64) -> Self {
        Self {
            input_per_ktok,
            output_per_ktok,
        }
    }

    /// Cost in USD for the given token counts
    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.input_per_ktok
            + (completion_tokens as f64 / 1000.0) * self.output_per_ktok
    }
}

/// Registry entry for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub vendor: Vendor,
    pub display_name: String,
    pub pricing: ModelPricing,
}

const BUILTIN_MODELS: &[(&str, Vendor, &str, ModelPricing)] = &[
    ("gpt-4o", Vendor::OpenAi, "GPT-4o", ModelPricing::new(0.005, 0.015)),
    ("gpt-4o-mini", Vendor::OpenAi, "GPT-4o Mini", ModelPricing::new(0.00015, 0.0006)),
    (
        "claude-sonnet-4-5-20250929",
        Vendor::Anthropic,
        "Claude Sonnet 4.5",
        ModelPricing::new(0.003, 0.015),
    ),
    (
        "claude-opus-4-1-20250805",
        Vendor::Anthropic,
        "Claude Opus 4.1",
        ModelPricing::new(0.015, 0.075),
    ),
    (
        "claude-haiku-4-5-20251001",
        Vendor::Anthropic,
        "Claude Haiku 4.5",
        ModelPricing::new(0.001, 0.005),
    ),
    (
        "claude-sonnet-4-20250514",
        Vendor::Anthropic,
        "Claude Sonnet 4",
        ModelPricing::new(0.003, 0.015),
    ),
    (
        "claude-3-7-sonnet-20250219",
        Vendor::Anthropic,
        "Claude 3.7 Sonnet",
        ModelPricing::new(0.003, 0.015),
    ),
    (
        "claude-3-5-haiku-20241022",
        Vendor::Anthropic,
        "Claude 3.5 Haiku",
        ModelPricing::new(0.0008, 0.004),
    ),
    (
        "gemini-2.0-flash",
        Vendor::Google,
        "Gemini 2.0 Flash",
        ModelPricing::new(0.0001, 0.0004),
    ),
    (
        "gemini-2.5-pro",
        Vendor::Google,
        "Gemini 2.5 Pro",
        ModelPricing::new(0.00125, 0.01),
    ),
    (
        "gemini-2.5-flash",
        Vendor::Google,
        "Gemini 2.5 Flash",
        ModelPricing::new(0.000075, 0.0003),
    ),
];

/// Closed mapping from model identifier to vendor and pricing.
///
/// Built once at bootstrap and shared read-only (usually behind an `Arc`).
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelInfo>,
}

impl ModelRegistry {
    /// Empty registry; mostly useful for tests
    pub fn new() -> Self {
        Self::default()
    }

    /// The models the gateway ships with
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (id, vendor, display_name, pricing) in BUILTIN_MODELS {
            registry.insert(*id, *vendor, *display_name, *pricing);
        }
        registry
    }

    pub fn insert(
        &mut self,
        id: impl Into<String>,
        vendor: Vendor,
        display_name: impl Into<String>,
        pricing: ModelPricing,
    ) {
        self.models.insert(
            id.into(),
            ModelInfo {
                vendor,
                display_name: display_name.into(),
                pricing,
            },
        );
    }

    pub fn get(&self, model: &str) -> Option<&ModelInfo> {
        self.models.get(model)
    }

    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    pub fn vendor_of(&self, model: &str) -> Option<Vendor> {
        self.get(model).map(|m| m.vendor)
    }

    /// Model ids, sorted for stable output
    pub fn model_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.models.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pricing_cost_per_thousand() {
        let pricing = ModelPricing::new(0.005, 0.015);
        // 1000 prompt + 500 completion = 0.005 + 0.0075
        let cost = pricing.cost(1000, 500);
        assert!((cost - 0.0125).abs() < 1e-12);
    }

    #[test]
    fn test_pricing_zero_tokens() {
        assert_eq!(ModelPricing::new(1.0, 1.0).cost(0, 0), 0.0);
    }

    #[test]
    fn test_builtin_registry() {
        let registry = ModelRegistry::builtin();
        assert_eq!(registry.len(), BUILTIN_MODELS.len());
        assert_eq!(registry.vendor_of("gpt-4o"), Some(Vendor::OpenAi));
        assert_eq!(
            registry.vendor_of("claude-opus-4-1-20250805"),
            Some(Vendor::Anthropic)
        );
        assert_eq!(registry.vendor_of("gemini-2.5-pro"), Some(Vendor::Google));
        assert!(!registry.contains("gpt-5-imaginary"));
    }

    #[test]
    fn test_model_ids_sorted() {
        let registry = ModelRegistry::builtin();
        let ids = registry.model_ids();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_vendor_serde() {
        assert_eq!(serde_json::to_string(&Vendor::OpenAi).unwrap(), "\"openai\"");
        let v: Vendor = serde_json::from_str("\"google\"").unwrap();
        assert_eq!(v, Vendor::Google);
        assert_eq!(Vendor::Anthropic.to_string(), "anthropic");
    }
}
