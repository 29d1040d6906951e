//! Override policy: which caller-supplied parameters may replace a gate's values
//!
//! A gate's `allowOverrides` arrives on the wire as either a boolean or a
//! per-field boolean map. It is resolved into [`OverridePolicy`] once, when the
//! gate is deserialized, and never re-interpreted afterwards.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::gate::Gate;
use crate::registry::ModelRegistry;
use crate::types::{ChatMessage, Overrides};

/// A parameter a caller may try to override
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverrideField {
    Model,
    Temperature,
    MaxTokens,
    TopP,
}

impl OverrideField {
    pub const ALL: [OverrideField; 4] = [
        Self::Model,
        Self::Temperature,
        Self::MaxTokens,
        Self::TopP,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Temperature => "temperature",
            Self::MaxTokens => "maxTokens",
            Self::TopP => "topP",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

/// Resolved form of a gate's `allowOverrides` setting
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<RawAllowOverrides>", into = "RawAllowOverrides")]
pub enum OverridePolicy {
    /// Setting absent or `true`
    #[default]
    AllowAll,
    /// Setting `false`
    DenyAll,
    /// Per-field map; unlisted fields are denied
    PerField(BTreeMap<OverrideField, bool>),
}

/// Wire form: `true`, `false`, or `{"temperature": true, ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawAllowOverrides {
    Flag(bool),
    Fields(HashMap<String, bool>),
}

impl From<Option<RawAllowOverrides>> for OverridePolicy {
    fn from(raw: Option<RawAllowOverrides>) -> Self {
        match raw {
            None | Some(RawAllowOverrides::Flag(true)) => Self::AllowAll,
            Some(RawAllowOverrides::Flag(false)) => Self::DenyAll,
            Some(RawAllowOverrides::Fields(map)) => Self::PerField(
                map.into_iter()
                    .filter_map(|(name, allowed)| {
                        OverrideField::from_name(&name).map(|field| (field, allowed))
                    })
                    .collect(),
            ),
        }
    }
}

impl From<OverridePolicy> for RawAllowOverrides {
    fn from(policy: OverridePolicy) -> Self {
        match policy {
            OverridePolicy::AllowAll => Self::Flag(true),
            OverridePolicy::DenyAll => Self::Flag(false),
            OverridePolicy::PerField(map) => Self::Fields(
                map.into_iter()
                    .map(|(field, allowed)| (field.as_str().to_string(), allowed))
                    .collect(),
            ),
        }
    }
}

impl OverridePolicy {
    /// Build a per-field policy that allows exactly `fields`
    pub fn allow_only(fields: &[OverrideField]) -> Self {
        Self::PerField(fields.iter().map(|f| (*f, true)).collect())
    }

    pub fn is_overridable(&self, field: OverrideField) -> bool {
        match self {
            Self::AllowAll => true,
            Self::DenyAll => false,
            Self::PerField(map) => map.get(&field).copied().unwrap_or(false),
        }
    }
}

/// Free function form of [`OverridePolicy::is_overridable`]
pub fn is_overridable(policy: &OverridePolicy, field: OverrideField) -> bool {
    policy.is_overridable(field)
}

/// Values used when neither the request nor the gate sets a parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationDefaults {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
}

fn default_temperature() -> f64 {
    1.0
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_top_p() -> f64 {
    1.0
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
        }
    }
}

/// The fully populated parameter set sent to a vendor
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveParams {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    /// False when `top_p` is only the generation default
    pub top_p_explicit: bool,
}

impl EffectiveParams {
    /// Same parameters, retargeted at another model (used for fallback)
    pub fn for_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }
}

fn pick<T: Copy>(
    policy: &OverridePolicy,
    field: OverrideField,
    requested: Option<T>,
    stored: Option<T>,
    default: T,
) -> T {
    let stored = stored.unwrap_or(default);
    match requested {
        Some(value) if policy.is_overridable(field) => value,
        _ => stored,
    }
}

/// Merge a gate's stored configuration with the caller's overrides.
///
/// A requested model is honored only when overridable *and* present in the
/// registry; otherwise the gate's model is used without raising an error.
pub fn merge_effective_params(
    gate: &Gate,
    overrides: &Overrides,
    messages: Vec<ChatMessage>,
    registry: &ModelRegistry,
    defaults: &GenerationDefaults,
) -> EffectiveParams {
    let policy = &gate.allow_overrides;

    let model = match overrides.model.as_deref() {
        Some(requested) if policy.is_overridable(OverrideField::Model) => {
            if registry.contains(requested) {
                requested.to_string()
            } else {
                debug!(
                    "Ignoring unknown override model '{}' for gate '{}'",
                    requested, gate.name
                );
                gate.model.clone()
            }
        }
        _ => gate.model.clone(),
    };

    let top_p_explicit = gate.top_p.is_some()
        || (overrides.top_p.is_some() && policy.is_overridable(OverrideField::TopP));

    EffectiveParams {
        model,
        messages,
        system_prompt: gate.system_prompt.clone(),
        temperature: pick(
            policy,
            OverrideField::Temperature,
            overrides.temperature,
            gate.temperature,
            defaults.temperature,
        ),
        max_tokens: pick(
            policy,
            OverrideField::MaxTokens,
            overrides.max_tokens,
            gate.max_tokens,
            defaults.max_tokens,
        ),
        top_p: pick(
            policy,
            OverrideField::TopP,
            overrides.top_p,
            gate.top_p,
            defaults.top_p,
        ),
        top_p_explicit,
    }
}
