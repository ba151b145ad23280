//! Google Gemini provider, called directly through generateContent

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Capabilities, ProviderConfig};
use crate::error::{LlmError, Result};

use super::types::{
    CanonicalResponse, ChatRole, CompletionRequest, FinishReason, GroundingMetadata,
    GroundingSource, ProviderAdapter, ProviderKind, ResponseFormat, TokenUsage,
};

/// Vendor ceiling on output tokens; larger requests are clamped
pub const GEMINI_MAX_OUTPUT_TOKENS: u32 = 65_536;
const GEMINI_TOP_P: f64 = 0.8;
const GEMINI_TOP_K: u32 = 40;

/// Gemini generateContent adapter
pub struct GeminiAdapter {
    client: Client,
    api_key: String,
    base_url: String,
    capabilities: Capabilities,
}

impl std::fmt::Debug for GeminiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiAdapter")
            .field("base_url", &self.base_url)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl GeminiAdapter {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            LlmError::Configuration(format!(
                "API key not found for provider '{}'; set {}",
                ProviderKind::GoogleDirect,
                config.api_key_env
            ))
        })?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.endpoint_root().to_string(),
            capabilities: config.capabilities,
        })
    }

    /// Gemini gets a single user turn: system parts first, then the rest
    fn combined_prompt(request: &CompletionRequest) -> String {
        let (system, rest): (Vec<_>, Vec<_>) = request
            .messages
            .iter()
            .partition(|m| m.role == ChatRole::System);

        system
            .iter()
            .chain(rest.iter())
            .map(|m| m.content.as_str())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn build_body(&self, model: &str, request: &CompletionRequest) -> Value {
        let max_output_tokens = request
            .max_tokens
            .unwrap_or(GEMINI_MAX_OUTPUT_TOKENS)
            .min(GEMINI_MAX_OUTPUT_TOKENS);

        let mut body = serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": Self::combined_prompt(request)}]
            }],
            "generationConfig": {
                "maxOutputTokens": max_output_tokens,
                "temperature": request.temperature,
                "topP": GEMINI_TOP_P,
                "topK": GEMINI_TOP_K,
            },
        });

        if request.response_format == Some(ResponseFormat::JsonObject) {
            if self.capabilities.json_mode {
                body["generationConfig"]["responseMimeType"] =
                    Value::from("application/json");
            } else {
                debug!("JSON mode not enabled for Gemini; relying on the prompt for {}", model);
            }
        }

        if request.web_search {
            if self.capabilities.web_search {
                body["tools"] = serde_json::json!([{"google_search": {}}]);
            } else {
                warn!("Web search requested for {} but the capability is disabled", model);
            }
        }

        body
    }

    fn parse_response(model: &str, raw: Value, prompt_chars: usize) -> Result<CanonicalResponse> {
        let kind = ProviderKind::GoogleDirect;
        let api: GeminiApiResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            LlmError::transport(kind.name(), format!("failed to decode response: {}", e))
        })?;

        let Some(candidate) = api.candidates.into_iter().next() else {
            let reason = api
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .map(|r| format!(" (prompt blocked: {})", r))
                .unwrap_or_default();
            return Err(LlmError::transport(
                kind.name(),
                format!("Gemini response had no candidates{}", reason),
            ));
        };

        let mut text = String::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if part.thought == Some(true) {
                continue;
            }
            match part.text {
                Some(t) => text.push_str(&t),
                None => debug!("Skipping non-text Gemini part"),
            }
        }

        let usage = match api.usage_metadata {
            Some(u) => {
                let prompt_tokens = u.prompt_token_count.unwrap_or(0);
                let completion_tokens = u.candidates_token_count.unwrap_or(0);
                TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: u
                        .total_token_count
                        .unwrap_or(prompt_tokens + completion_tokens),
                    reasoning_tokens: u.thoughts_token_count,
                    cached_tokens: u.cached_content_token_count,
                    ..Default::default()
                }
            }
            None => {
                debug!("Gemini omitted usageMetadata for {}; estimating", model);
                TokenUsage::estimate(prompt_chars, text.chars().count())
            }
        };

        let grounding = candidate.grounding_metadata.map(|g| GroundingMetadata {
            web_search_queries: g.web_search_queries,
            sources: g
                .grounding_chunks
                .into_iter()
                .filter_map(|chunk| chunk.web)
                .filter_map(|web| {
                    web.uri.map(|uri| GroundingSource {
                        uri,
                        title: web.title,
                    })
                })
                .collect(),
        });

        Ok(CanonicalResponse {
            finish_reason: FinishReason::from_gemini(candidate.finish_reason.as_deref()),
            raw_finish_reason: candidate.finish_reason,
            text,
            usage,
            provider: kind,
            model: model.to_string(),
            grounding,
            raw,
        })
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GoogleDirect
    }

    async fn complete(&self, model: &str, request: &CompletionRequest) -> Result<CanonicalResponse> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let body = self.build_body(model, request);
        let kind = ProviderKind::GoogleDirect;

        debug!(
            "Gemini request: model={}, prompt_chars={}, web_search={}",
            model,
            request.prompt_chars(),
            request.web_search
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::transport(kind.name(), format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::transport(
                kind.name(),
                format!("HTTP {}: {}", status, error_text),
            ));
        }

        let raw: Value = response.json().await.map_err(|e| {
            LlmError::transport(kind.name(), format!("failed to read response body: {}", e))
        })?;

        let parsed = Self::parse_response(model, raw, request.prompt_chars())?;
        debug!(
            "Gemini response: {} chars, finish_reason={:?}, grounded={}",
            parsed.text.len(),
            parsed.raw_finish_reason,
            parsed.grounding.is_some()
        );
        Ok(parsed)
    }
}

// ── Gemini wire types ──

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiApiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    grounding_metadata: Option<GeminiGroundingMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u64>,
    #[serde(default)]
    candidates_token_count: Option<u64>,
    #[serde(default)]
    total_token_count: Option<u64>,
    #[serde(default)]
    thoughts_token_count: Option<u64>,
    #[serde(default)]
    cached_content_token_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGroundingMetadata {
    #[serde(default)]
    web_search_queries: Vec<String>,
    #[serde(default)]
    grounding_chunks: Vec<GeminiGroundingChunk>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiGroundingChunk {
    #[serde(default)]
    web: Option<GeminiWebSource>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiWebSource {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}
