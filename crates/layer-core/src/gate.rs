//! Gate: an owner-scoped, named completion configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::policy::OverridePolicy;

/// Which models are attempted for a gate, and in what order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    #[default]
    Single,
    Fallback,
    /// Currently tries the same ordered list as `Fallback`; no rotation state
    /// is kept per gate.
    RoundRobin,
}

impl RoutingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Fallback => "fallback",
            Self::RoundRobin => "round-robin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(Self::Single),
            "fallback" => Some(Self::Fallback),
            "round-robin" => Some(Self::RoundRobin),
            _ => None,
        }
    }

    /// Whether the gate's fallback list takes part in dispatch
    pub fn uses_fallbacks(&self) -> bool {
        matches!(self, Self::Fallback | Self::RoundRobin)
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gate {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub allow_overrides: OverridePolicy,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub routing_strategy: RoutingStrategy,
    #[serde(default)]
    pub fallback_models: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a gate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub allow_overrides: OverridePolicy,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub routing_strategy: RoutingStrategy,
    #[serde(default)]
    pub fallback_models: Vec<String>,
}

/// Partial update; `None` leaves the stored value untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub allow_overrides: Option<OverridePolicy>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub routing_strategy: Option<RoutingStrategy>,
    #[serde(default)]
    pub fallback_models: Option<Vec<String>>,
}

impl Gate {
    /// Materialize a new gate from a draft, assigning id and timestamps
    pub fn from_draft(owner_id: &str, draft: GateDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: draft.name,
            description: draft.description,
            model: draft.model,
            system_prompt: draft.system_prompt,
            temperature: draft.temperature,
            max_tokens: draft.max_tokens,
            top_p: draft.top_p,
            allow_overrides: draft.allow_overrides,
            tags: draft.tags,
            routing_strategy: draft.routing_strategy,
            fallback_models: draft.fallback_models,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update in place and bump `updated_at`
    pub fn apply(&mut self, patch: GatePatch) {
        if let Some(v) = patch.name {
            self.name = v;
        }
        if let Some(v) = patch.description {
            self.description = Some(v);
        }
        if let Some(v) = patch.model {
            self.model = v;
        }
        if let Some(v) = patch.system_prompt {
            self.system_prompt = Some(v);
        }
        if let Some(v) = patch.temperature {
            self.temperature = Some(v);
        }
        if let Some(v) = patch.max_tokens {
            self.max_tokens = Some(v);
        }
        if let Some(v) = patch.top_p {
            self.top_p = Some(v);
        }
        if let Some(v) = patch.allow_overrides {
            self.allow_overrides = v;
        }
        if let Some(v) = patch.tags {
            self.tags = v;
        }
        if let Some(v) = patch.routing_strategy {
            self.routing_strategy = v;
        }
        if let Some(v) = patch.fallback_models {
            self.fallback_models = v;
        }
        self.updated_at = Utc::now();
    }
}
