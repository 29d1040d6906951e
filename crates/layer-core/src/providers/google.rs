//! Google Gemini generateContent adapter

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

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini adapter
pub struct GoogleAdapter {
    client: Client,
    settings: ProviderSettings,
    registry: Arc<ModelRegistry>,
}

impl std::fmt::Debug for GoogleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleAdapter")
            .field("settings", &self.settings)
            .finish()
    }
}

impl GoogleAdapter {
    pub fn new(settings: ProviderSettings, registry: Arc<ModelRegistry>) -> Result<Self> {
        let client = settings
            .http_client()
            .context("Failed to build Gemini HTTP client")?;
        Ok(Self {
            client,
            settings,
            registry,
        })
    }

    /// Gemini calls the assistant role "model"; system messages go to
    /// `systemInstruction` instead
    fn to_gemini_contents(params: &EffectiveParams) -> Vec<GeminiContent> {
        params
            .messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| {
                let role = match m.role {
                    ChatRole::Assistant => "model",
                    ChatRole::User | ChatRole::System => "user",
                };
                GeminiContent {
                    role: role.to_string(),
                    parts: vec![GeminiPart {
                        text: m.content.clone(),
                    }],
                }
            })
            .collect()
    }

    fn system_instruction(params: &EffectiveParams) -> Option<GeminiSystemInstruction> {
        let parts: Vec<GeminiPart> = params
            .system_prompt
            .iter()
            .map(String::as_str)
            .chain(
                params
                    .messages
                    .iter()
                    .filter(|m| m.role == ChatRole::System)
                    .map(|m| m.content.as_str()),
            )
            .map(|text| GeminiPart {
                text: text.to_string(),
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(GeminiSystemInstruction { parts })
        }
    }

    fn from_gemini_response(resp: GeminiApiResponse) -> Result<VendorReply> {
        let candidate = resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Gemini response had no candidates"))?;

        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage = resp.usage_metadata.unwrap_or_default();
        Ok(VendorReply {
            content,
            prompt_tokens: usage.prompt_token_count.unwrap_or(0),
            completion_tokens: usage.candidates_token_count.unwrap_or(0),
            total_tokens: usage.total_token_count,
        })
    }

    async fn send(&self, params: &EffectiveParams) -> Result<VendorReply> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.settings.base(),
            params.model
        );
        let body = GeminiRequest {
            contents: Self::to_gemini_contents(params),
            system_instruction: Self::system_instruction(params),
            generation_config: GeminiGenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
                top_p: params.top_p,
            },
        };

        debug!(
            "Gemini request: model={}, contents={}",
            params.model,
            body.contents.len()
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.settings.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Failed to send request to Gemini API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Gemini API request failed with status {}: {}",
                status,
                error_text
            ));
        }

        let api_response: GeminiApiResponse = response
            .json()
            .await
            .context("Failed to parse Gemini API response")?;

        debug!(
            "Gemini response: candidates={}",
            api_response.candidates.len()
        );

        Self::from_gemini_response(api_response)
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Google
    }

    async fn create_completion(
        &self,
        params: &EffectiveParams,
    ) -> Result<ProviderResponse, ProviderError> {
        let wrap = |e| ProviderError::new(Vendor::Google, params.model.clone(), e);
        let pricing = self
            .registry
            .get(&params.model)
            .map(|m| m.pricing)
            .ok_or_else(|| wrap(anyhow!("model '{}' is not in the registry", params.model)))?;

        let reply = self.send(params).await.map_err(wrap)?;
        Ok(reply.into_response(&pricing))
    }
}

// ── Gemini wire types ──

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
    top_p: f64,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiApiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    total_token_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::stub_vendor;
    use crate::types::ChatMessage;

    fn params(messages: Vec<ChatMessage>) -> EffectiveParams {
        EffectiveParams {
            model: "gemini-2.0-flash".to_string(),
            messages,
            system_prompt: Some("gate says hi".to_string()),
            temperature: 0.2,
            max_tokens: 300,
            top_p: 0.95,
            top_p_explicit: true,
        }
    }

    #[test]
    fn test_to_gemini_contents_assistant_is_model() {
        let p = params(vec![
            ChatMessage::user("hello"),
            ChatMessage::new(ChatRole::Assistant, "hi"),
        ]);
        let result = GoogleAdapter::to_gemini_contents(&p);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].role, "user");
        assert_eq!(result[1].role, "model");
    }

    #[test]
    fn test_system_messages_move_to_instruction() {
        let p = params(vec![
            ChatMessage::new(ChatRole::System, "extra rules"),
            ChatMessage::user("hello"),
        ]);
        assert_eq!(GoogleAdapter::to_gemini_contents(&p).len(), 1);
        let instruction = GoogleAdapter::system_instruction(&p).unwrap();
        assert_eq!(instruction.parts.len(), 2);
        assert_eq!(instruction.parts[0].text, "gate says hi");
        assert_eq!(instruction.parts[1].text, "extra rules");
    }

    #[test]
    fn test_from_gemini_response_text() {
        let resp: GeminiApiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hel"}, {"text": "lo!"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5}
        }))
        .unwrap();
        let reply = GoogleAdapter::from_gemini_response(resp).unwrap();
        assert_eq!(reply.content, "Hello!");
        assert_eq!(reply.prompt_tokens, 10);
        assert_eq!(reply.completion_tokens, 5);
        assert!(reply.total_tokens.is_none());
    }

    #[test]
    fn test_from_gemini_response_no_candidates() {
        let resp: GeminiApiResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(GoogleAdapter::from_gemini_response(resp).is_err());
    }

    #[tokio::test]
    async fn test_create_completion_against_stub() {
        let (base, seen) = stub_vendor(
            200,
            serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "ciao"}]}}],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 9}
            }),
        )
        .await;
        let adapter = GoogleAdapter::new(
            ProviderSettings::new("AIza-secret", base),
            Arc::new(ModelRegistry::builtin()),
        )
        .unwrap();

        let resp = adapter
            .create_completion(&params(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(resp.content, "ciao");
        assert_eq!(resp.usage.total_tokens, 9);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].path, "/v1beta/models/gemini-2.0-flash:generateContent");
        assert_eq!(seen[0].body["generationConfig"]["maxOutputTokens"], 300);
        assert_eq!(seen[0].body["systemInstruction"]["parts"][0]["text"], "gate says hi");
        assert_eq!(seen[0].headers.get("x-goog-api-key").unwrap(), "AIza-secret");
    }

    #[test]
    fn test_google_adapter_debug_hides_key() {
        let adapter = GoogleAdapter::new(
            ProviderSettings::new("AIza-secret-key", DEFAULT_BASE_URL),
            Arc::new(ModelRegistry::builtin()),
        )
        .unwrap();
        assert!(!format!("{:?}", adapter).contains("AIza-secret-key"));
    }
}
