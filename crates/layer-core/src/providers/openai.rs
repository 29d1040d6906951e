//! OpenAI chat completions adapter (GPT-4o family)

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

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI adapter
pub struct OpenAiAdapter {
    client: Client,
    settings: ProviderSettings,
    registry: Arc<ModelRegistry>,
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("settings", &self.settings)
            .finish()
    }
}

impl OpenAiAdapter {
    pub fn new(settings: ProviderSettings, registry: Arc<ModelRegistry>) -> Result<Self> {
        let client = settings
            .http_client()
            .context("Failed to build OpenAI HTTP client")?;
        Ok(Self {
            client,
            settings,
            registry,
        })
    }

    /// The gate's system prompt leads; request messages follow unchanged
    fn to_openai_messages(params: &EffectiveParams) -> Vec<OpenAiMessage> {
        let mut result = Vec::with_capacity(params.messages.len() + 1);
        if let Some(system) = params.system_prompt.as_deref() {
            result.push(OpenAiMessage {
                role: ChatRole::System.to_string(),
                content: system.to_string(),
            });
        }
        result.extend(params.messages.iter().map(|m| OpenAiMessage {
            role: m.role.to_string(),
            content: m.content.clone(),
        }));
        result
    }

    fn from_openai_response(resp: OpenAiApiResponse) -> Result<VendorReply> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("OpenAI response had no choices"))?;

        let usage = resp.usage.unwrap_or_default();
        Ok(VendorReply {
            content: choice.message.content.unwrap_or_default(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
    }

    async fn send(&self, params: &EffectiveParams) -> Result<VendorReply> {
        let url = format!("{}/v1/chat/completions", self.settings.base());
        let body = OpenAiRequest {
            model: &params.model,
            messages: Self::to_openai_messages(params),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
        };

        debug!(
            "OpenAI request: model={}, messages={}",
            params.model,
            body.messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.settings.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to OpenAI API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "OpenAI API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: OpenAiApiResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI API response")?;

        Self::from_openai_response(api_response)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::OpenAi
    }

    async fn create_completion(
        &self,
        params: &EffectiveParams,
    ) -> Result<ProviderResponse, ProviderError> {
        let wrap = |e| ProviderError::new(Vendor::OpenAi, params.model.clone(), e);
        let pricing = self
            .registry
            .get(&params.model)
            .map(|m| m.pricing)
            .ok_or_else(|| wrap(anyhow!("model '{}' is not in the registry", params.model)))?;

        let reply = self.send(params).await.map_err(wrap)?;
        Ok(reply.into_response(&pricing))
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage>,
    temperature: f64,
    max_tokens: u32,
    top_p: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiApiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    total_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::stub_vendor;
    use crate::types::ChatMessage;

    fn params(model: &str) -> EffectiveParams {
        EffectiveParams {
            model: model.to_string(),
            messages: vec![
                ChatMessage::user("hello"),
                ChatMessage::new(ChatRole::Assistant, "hi there"),
                ChatMessage::user("how are you?"),
            ],
            system_prompt: Some("You are helpful.".to_string()),
            temperature: 0.5,
            max_tokens: 64,
            top_p: 0.9,
            top_p_explicit: true,
        }
    }

    fn adapter(base_url: &str) -> OpenAiAdapter {
        OpenAiAdapter::new(
            ProviderSettings::new("sk-test-key-0000", base_url),
            Arc::new(ModelRegistry::builtin()),
        )
        .unwrap()
    }

    #[test]
    fn test_to_openai_messages_system_first() {
        let result = OpenAiAdapter::to_openai_messages(&params("gpt-4o"));
        assert_eq!(result.len(), 4);
        assert_eq!(result[0].role, "system");
        assert_eq!(result[0].content, "You are helpful.");
        assert_eq!(result[2].role, "assistant");
    }

    #[test]
    fn test_to_openai_messages_without_system_prompt() {
        let mut p = params("gpt-4o");
        p.system_prompt = None;
        let result = OpenAiAdapter::to_openai_messages(&p);
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].role, "user");
    }

    #[test]
    fn test_from_openai_response() {
        let resp: OpenAiApiResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }))
        .unwrap();
        let reply = OpenAiAdapter::from_openai_response(resp).unwrap();
        assert_eq!(reply.content, "Hello!");
        assert_eq!(reply.total_tokens, Some(15));
    }

    #[test]
    fn test_from_openai_response_no_choices() {
        let resp = OpenAiApiResponse {
            choices: vec![],
            usage: None,
        };
        assert!(OpenAiAdapter::from_openai_response(resp).is_err());
    }

    #[tokio::test]
    async fn test_create_completion_against_stub() {
        let (base, seen) = stub_vendor(
            200,
            serde_json::json!({
                "choices": [{"message": {"content": "pong"}}],
                "usage": {"prompt_tokens": 1000, "completion_tokens": 1000}
            }),
        )
        .await;

        let resp = adapter(&base).create_completion(&params("gpt-4o")).await.unwrap();
        assert_eq!(resp.content, "pong");
        assert_eq!(resp.usage.total_tokens, 2000);
        // gpt-4o: 0.005 + 0.015 per 1k
        assert!((resp.cost_usd - 0.02).abs() < 1e-9);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path, "/v1/chat/completions");
        assert_eq!(seen[0].body["model"], "gpt-4o");
        assert_eq!(seen[0].body["max_tokens"], 64);
        assert_eq!(seen[0].body["messages"][0]["role"], "system");
        assert_eq!(
            seen[0].headers.get("authorization").unwrap(),
            "Bearer sk-test-key-0000"
        );
    }

    #[tokio::test]
    async fn test_create_completion_wraps_http_error() {
        let (base, _) = stub_vendor(
            429,
            serde_json::json!({"error": {"message": "rate limit"}}),
        )
        .await;

        let err = adapter(&base)
            .create_completion(&params("gpt-4o-mini"))
            .await
            .unwrap_err();
        assert_eq!(err.vendor, Some(Vendor::OpenAi));
        assert_eq!(err.model, "gpt-4o-mini");
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_create_completion_unknown_model_fails_before_call() {
        let (base, seen) = stub_vendor(200, serde_json::json!({})).await;
        let err = adapter(&base)
            .create_completion(&params("gpt-unknown"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not in the registry"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_openai_adapter_debug_hides_key() {
        let debug = format!("{:?}", adapter("https://api.openai.com"));
        assert!(!debug.contains("sk-test-key-0000"));
    }
}
