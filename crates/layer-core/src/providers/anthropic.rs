//! Anthropic Claude messages adapter

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderError;
use crate::policy::EffectiveParams;
use crate::registry::{ModelRegistry, Vendor};
use crate::types::{ChatRole, ProviderResponse};

use super::types::{ProviderAdapter, ProviderSettings, VendorReply};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic adapter
pub struct AnthropicAdapter {
    client: Client,
    settings: ProviderSettings,
    registry: Arc<ModelRegistry>,
}

impl std::fmt::Debug for AnthropicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAdapter")
            .field("settings", &self.settings)
            .finish()
    }
}

impl AnthropicAdapter {
    pub fn new(settings: ProviderSettings, registry: Arc<ModelRegistry>) -> Result<Self> {
        let client = settings
            .http_client()
            .context("Failed to build Anthropic HTTP client")?;
        Ok(Self {
            client,
            settings,
            registry,
        })
    }

    /// Anthropic takes the system prompt out of band. The gate's prompt and
    /// any system-role messages are joined into it.
    fn system_text(params: &EffectiveParams) -> Option<String> {
        let parts: Vec<&str> = params
            .system_prompt
            .as_deref()
            .into_iter()
            .chain(
                params
                    .messages
                    .iter()
                    .filter(|m| m.role == ChatRole::System)
                    .map(|m| m.content.as_str()),
            )
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    fn to_anthropic_messages(params: &EffectiveParams) -> Vec<AnthropicMessage> {
        params
            .messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| AnthropicMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn from_anthropic_response(resp: AnthropicApiResponse) -> VendorReply {
        let content = resp
            .content
            .into_iter()
            .filter_map(|b| match b {
                AnthropicBlock::Text { text } => Some(text),
                AnthropicBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        VendorReply {
            content,
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
            total_tokens: None,
        }
    }

    async fn send(&self, params: &EffectiveParams) -> Result<VendorReply> {
        let url = format!("{}/v1/messages", self.settings.base());
        let body = AnthropicRequest {
            model: &params.model,
            max_tokens: params.max_tokens,
            system: Self::system_text(params),
            messages: Self::to_anthropic_messages(params),
            temperature: params.temperature,
            // newer Claude models reject temperature and top_p together
            top_p: params.top_p_explicit.then_some(params.top_p),
        };

        debug!(
            "Anthropic request: model={}, messages={}",
            params.model,
            body.messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Anthropic API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Anthropic API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: AnthropicApiResponse = response
            .json()
            .await
            .context("Failed to parse Anthropic API response")?;

        debug!(
            "Anthropic response: blocks={}, stop_reason={:?}",
            api_response.content.len(),
            api_response.stop_reason
        );

        Ok(Self::from_anthropic_response(api_response))
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Anthropic
    }

    async fn create_completion(
        &self,
        params: &EffectiveParams,
    ) -> Result<ProviderResponse, ProviderError> {
        let wrap = |e| ProviderError::new(Vendor::Anthropic, params.model.clone(), e);
        let pricing = self
            .registry
            .get(&params.model)
            .map(|m| m.pricing)
            .ok_or_else(|| wrap(anyhow!("model '{}' is not in the registry", params.model)))?;

        let reply = self.send(params).await.map_err(wrap)?;
        Ok(reply.into_response(&pricing))
    }
}

// ── Anthropic wire types ──

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicApiResponse {
    content: Vec<AnthropicBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::stub_vendor;
    use crate::types::ChatMessage;

    fn params(system_prompt: Option<&str>, messages: Vec<ChatMessage>) -> EffectiveParams {
        EffectiveParams {
            model: "claude-opus-4-1-20250805".to_string(),
            messages,
            system_prompt: system_prompt.map(str::to_string),
            temperature: 0.7,
            max_tokens: 1024,
            top_p: 1.0,
            top_p_explicit: false,
        }
    }

    #[test]
    fn test_to_anthropic_messages_filters_system() {
        let p = params(
            None,
            vec![
                ChatMessage::new(ChatRole::System, "be terse"),
                ChatMessage::user("hello"),
                ChatMessage::new(ChatRole::Assistant, "hi"),
            ],
        );
        let result = AnthropicAdapter::to_anthropic_messages(&p);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].role, "user");
        assert_eq!(result[1].role, "assistant");
    }

    #[test]
    fn test_system_text_joins_gate_prompt_and_system_messages() {
        let p = params(
            Some("gate prompt"),
            vec![
                ChatMessage::new(ChatRole::System, "request prompt"),
                ChatMessage::user("hello"),
            ],
        );
        assert_eq!(
            AnthropicAdapter::system_text(&p).as_deref(),
            Some("gate prompt\n\nrequest prompt")
        );
        let p = params(None, vec![ChatMessage::user("hello")]);
        assert!(AnthropicAdapter::system_text(&p).is_none());
    }

    #[test]
    fn test_from_anthropic_response_concatenates_text_and_skips_others() {
        let resp: AnthropicApiResponse = serde_json::from_value(serde_json::json!({
            "id": "msg_1",
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "Hello"},
                {"type": "text", "text": ", world"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }))
        .unwrap();
        let reply = AnthropicAdapter::from_anthropic_response(resp);
        assert_eq!(reply.content, "Hello, world");
        assert_eq!(reply.prompt_tokens, 10);
        assert_eq!(reply.completion_tokens, 5);
        assert!(reply.total_tokens.is_none());
    }

    #[tokio::test]
    async fn test_create_completion_against_stub() {
        let (base, seen) = stub_vendor(
            200,
            serde_json::json!({
                "id": "msg_1",
                "content": [{"type": "text", "text": "Bonjour"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 2000, "output_tokens": 1000}
            }),
        )
        .await;

        let adapter = AnthropicAdapter::new(
            ProviderSettings::new("sk-ant-test-9999", base),
            Arc::new(ModelRegistry::builtin()),
        )
        .unwrap();
        let resp = adapter
            .create_completion(&params(Some("sys"), vec![ChatMessage::user("hi")]))
            .await
            .unwrap();

        assert_eq!(resp.content, "Bonjour");
        // total not reported: falls back to the sum
        assert_eq!(resp.usage.total_tokens, 3000);
        // opus 4.1: 2 * 0.015 + 1 * 0.075
        assert!((resp.cost_usd - 0.105).abs() < 1e-9);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].path, "/v1/messages");
        assert_eq!(seen[0].body["system"], "sys");
        assert_eq!(seen[0].headers.get("x-api-key").unwrap(), "sk-ant-test-9999");
        assert_eq!(seen[0].headers.get("anthropic-version").unwrap(), ANTHROPIC_VERSION);
        assert_eq!(seen[0].body["temperature"], 0.7);
        // default top_p is left to the vendor
        assert!(seen[0].body.get("top_p").is_none());
    }

    #[tokio::test]
    async fn test_configured_top_p_is_sent() {
        let (base, seen) = stub_vendor(
            200,
            serde_json::json!({
                "content": [{"type": "text", "text": "ok"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 1, "output_tokens": 1}
            }),
        )
        .await;
        let adapter = AnthropicAdapter::new(
            ProviderSettings::new("key", base),
            Arc::new(ModelRegistry::builtin()),
        )
        .unwrap();
        let mut p = params(None, vec![ChatMessage::user("hi")]);
        p.top_p = 0.4;
        p.top_p_explicit = true;
        adapter.create_completion(&p).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].body["top_p"], 0.4);
    }

    #[tokio::test]
    async fn test_malformed_response_is_provider_error() {
        let (base, _) = stub_vendor(200, serde_json::json!({"unexpected": true})).await;
        let adapter = AnthropicAdapter::new(
            ProviderSettings::new("key", base),
            Arc::new(ModelRegistry::builtin()),
        )
        .unwrap();
        let err = adapter
            .create_completion(&params(None, vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert_eq!(err.vendor, Some(Vendor::Anthropic));
        assert!(err.to_string().contains("Failed to parse Anthropic API response"));
    }
}
