//! OpenAI-compatible chat-completions adapter
//!
//! Serves both the direct DeepSeek endpoint and the OpenRouter aggregator.
//! The two differ only in base URL, headers and OpenRouter's routing
//! preferences, which are attached for one model family only.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Capabilities, ProviderConfig, RoutingPreferences};
use crate::error::{LlmError, Result};

use super::types::{
    CanonicalResponse, CompletionRequest, FinishReason, ProviderAdapter, ProviderKind, TokenUsage,
};

/// Adapter for any endpoint speaking the OpenAI chat-completions protocol
pub struct OpenAiCompatAdapter {
    kind: ProviderKind,
    client: Client,
    api_key: String,
    base_url: String,
    capabilities: Capabilities,
    routing_preferences: Option<RoutingPreferences>,
}

impl std::fmt::Debug for OpenAiCompatAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatAdapter")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl OpenAiCompatAdapter {
    /// Build the adapter, failing fast when the credential is absent
    pub fn new(kind: ProviderKind, config: &ProviderConfig) -> Result<Self> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            LlmError::Configuration(format!(
                "API key not found for provider '{}'; set {}",
                kind, config.api_key_env
            ))
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                LlmError::Configuration(format!("invalid header name '{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                LlmError::Configuration(format!("invalid header value for '{}': {}", name, e))
            })?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            kind,
            client,
            api_key,
            base_url: config.endpoint_root().to_string(),
            capabilities: config.capabilities,
            routing_preferences: config.routing_preferences.clone(),
        })
    }

    /// Translate the canonical request into a chat-completions body
    fn build_body(&self, model: &str, request: &CompletionRequest) -> Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": request.messages,
            "temperature": request.temperature,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = Value::from(max_tokens);
        }

        if let Some(format) = request.response_format {
            if self.capabilities.json_mode {
                body["response_format"] = serde_json::json!(format);
            } else {
                warn!(
                    "Provider {} does not support response_format; dropping {:?} for {}",
                    self.kind, format, model
                );
            }
        }

        if request.web_search {
            warn!(
                "Provider {} has no native web search; ignoring the flag for {}",
                self.kind, model
            );
        }

        if let Some(prefs) = self
            .routing_preferences
            .as_ref()
            .filter(|p| p.applies_to(model))
        {
            debug!("Applying routing preferences for {}: {:?}", model, prefs);
            body["provider"] = prefs.to_wire();
        }

        body
    }

    /// Normalize a chat-completions payload
    fn parse_response(
        kind: ProviderKind,
        model: &str,
        raw: Value,
        prompt_chars: usize,
    ) -> Result<CanonicalResponse> {
        if let Some(error) = raw.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(LlmError::transport(kind.name(), format!("API error: {}", message)));
        }

        let api: ChatCompletionResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            LlmError::transport(kind.name(), format!("failed to decode response: {}", e))
        })?;

        let choice = api
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::transport(kind.name(), "response had no choices"))?;

        let text = choice.message.content.unwrap_or_default();

        let usage = match api.usage {
            Some(u) => TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u
                    .total_tokens
                    .unwrap_or(u.prompt_tokens + u.completion_tokens),
                reasoning_tokens: u.completion_tokens_details.and_then(|d| d.reasoning_tokens),
                cached_tokens: u.prompt_tokens_details.and_then(|d| d.cached_tokens),
                cache_hit_tokens: u.prompt_cache_hit_tokens,
                cache_miss_tokens: u.prompt_cache_miss_tokens,
                ..Default::default()
            },
            None => {
                debug!("{} omitted usage for {}; estimating", kind, model);
                TokenUsage::estimate(prompt_chars, text.chars().count())
            }
        };

        Ok(CanonicalResponse {
            finish_reason: FinishReason::from_openai(choice.finish_reason.as_deref()),
            raw_finish_reason: choice.finish_reason,
            text,
            usage,
            provider: kind,
            model: model.to_string(),
            grounding: None,
            raw,
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn complete(&self, model: &str, request: &CompletionRequest) -> Result<CanonicalResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(model, request);

        debug!(
            "{} request: model={}, messages={}",
            self.kind,
            model,
            request.messages.len()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::transport(self.kind.name(), format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::transport(
                self.kind.name(),
                format!("HTTP {}: {}", status, error_text),
            ));
        }

        let raw: Value = response.json().await.map_err(|e| {
            LlmError::transport(self.kind.name(), format!("failed to read response body: {}", e))
        })?;

        let parsed = Self::parse_response(self.kind, model, raw, request.prompt_chars())?;
        debug!(
            "{} response: {} chars, finish_reason={:?}",
            self.kind,
            parsed.text.len(),
            parsed.raw_finish_reason
        );
        Ok(parsed)
    }
}

// ── chat-completions wire types ──

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(default)]
    prompt_cache_hit_tokens: Option<u64>,
    #[serde(default)]
    prompt_cache_miss_tokens: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvidersConfig;
    use crate::providers::types::{ChatMessage, ResponseFormat, UsageAccounting};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn deepseek_config(base_url: &str) -> ProviderConfig {
        let mut cfg = ProvidersConfig::default().deepseek;
        cfg.base_url = base_url.to_string();
        cfg.api_key = Some("test-api-key".to_string());
        cfg
    }

    fn openrouter_config(base_url: &str) -> ProviderConfig {
        let mut cfg = ProvidersConfig::default().openrouter;
        cfg.base_url = base_url.to_string();
        cfg.api_key = Some("test-api-key".to_string());
        cfg
    }

    fn completion_body(content: &str, finish_reason: &str) -> Value {
        serde_json::json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": finish_reason
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 30,
                "total_tokens": 42,
                "completion_tokens_details": {"reasoning_tokens": 18},
                "prompt_cache_hit_tokens": 8,
                "prompt_cache_miss_tokens": 4
            }
        })
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![
            ChatMessage::system("You are an editor."),
            ChatMessage::user("Write a paragraph."),
        ])
    }

    #[tokio::test]
    async fn test_complete_normalizes_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-api-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion_body("Hello there.", "stop")),
            )
            .mount(&server)
            .await;

        let adapter =
            OpenAiCompatAdapter::new(ProviderKind::DeepSeek, &deepseek_config(&server.uri()))
                .unwrap();
        let response = adapter.complete("deepseek-chat", &request()).await.unwrap();

        assert_eq!(response.text, "Hello there.");
        assert_eq!(response.finish_reason, FinishReason::Complete);
        assert_eq!(response.raw_finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.provider, ProviderKind::DeepSeek);
        assert_eq!(response.usage.total_tokens, 42);
        assert_eq!(response.usage.reasoning_tokens, Some(18));
        assert_eq!(response.usage.cache_hit_tokens, Some(8));
        assert_eq!(response.usage.accounting, UsageAccounting::Exact);
    }

    #[tokio::test]
    async fn test_routing_preferences_only_for_family() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok", "stop")))
            .mount(&server)
            .await;

        let adapter =
            OpenAiCompatAdapter::new(ProviderKind::OpenRouter, &openrouter_config(&server.uri()))
                .unwrap();
        adapter
            .complete("deepseek/deepseek-chat-v3.1:free", &request())
            .await
            .unwrap();
        adapter.complete("openai/gpt-4o", &request()).await.unwrap();

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 2);
        let first: Value = received[0].body_json().unwrap();
        let second: Value = received[1].body_json().unwrap();
        assert_eq!(first["provider"]["order"], serde_json::json!(["DeepInfra"]));
        assert_eq!(first["provider"]["allow_fallbacks"], serde_json::json!(false));
        assert!(second.get("provider").is_none());
        assert_eq!(received[0].headers.get("X-Title").unwrap(), "penwright");
    }

    #[tokio::test]
    async fn test_json_response_format_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "response_format": {"type": "json_object"},
                "max_tokens": 2048
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("{}", "stop")))
            .expect(1)
            .mount(&server)
            .await;

        let adapter =
            OpenAiCompatAdapter::new(ProviderKind::DeepSeek, &deepseek_config(&server.uri()))
                .unwrap();
        let mut req = request();
        req.response_format = Some(ResponseFormat::JsonObject);
        req.max_tokens = Some(2048);
        adapter.complete("deepseek-chat", &req).await.unwrap();
    }

    #[test]
    fn test_response_format_dropped_without_capability() {
        let mut cfg = deepseek_config("http://localhost:9");
        cfg.capabilities.json_mode = false;
        let adapter = OpenAiCompatAdapter::new(ProviderKind::DeepSeek, &cfg).unwrap();
        let mut req = request();
        req.response_format = Some(ResponseFormat::JsonObject);
        let body = adapter.build_body("deepseek-chat", &req);
        assert!(body.get("response_format").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[tokio::test]
    async fn test_http_error_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let adapter =
            OpenAiCompatAdapter::new(ProviderKind::DeepSeek, &deepseek_config(&server.uri()))
                .unwrap();
        let err = adapter.complete("deepseek-chat", &request()).await.unwrap_err();
        match err {
            LlmError::Transport { provider, message } => {
                assert_eq!(provider, "deepseek");
                assert!(message.contains("503"));
                assert!(message.contains("overloaded"));
            }
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_error_object_in_ok_body_is_transport_failure() {
        let raw = serde_json::json!({"error": {"message": "Provider returned error", "code": 502}});
        let err =
            OpenAiCompatAdapter::parse_response(ProviderKind::OpenRouter, "openai/gpt-4o", raw, 10)
                .unwrap_err();
        assert!(err.to_string().contains("Provider returned error"));
    }

    #[test]
    fn test_missing_usage_is_estimated() {
        let raw = serde_json::json!({
            "choices": [{"message": {"content": "abcdefgh"}, "finish_reason": "length"}]
        });
        let response =
            OpenAiCompatAdapter::parse_response(ProviderKind::DeepSeek, "deepseek-chat", raw, 40)
                .unwrap();
        assert_eq!(response.finish_reason, FinishReason::Truncated);
        assert!(response.usage.is_estimated());
        assert_eq!(response.usage.prompt_tokens, 10);
        assert_eq!(response.usage.completion_tokens, 2);
    }

    #[test]
    fn test_no_choices_is_transport_failure() {
        let raw = serde_json::json!({"choices": []});
        assert!(
            OpenAiCompatAdapter::parse_response(ProviderKind::DeepSeek, "deepseek-chat", raw, 0)
                .is_err()
        );
    }

    #[test]
    fn test_missing_credential_fails_fast() {
        let mut cfg = ProvidersConfig::default().deepseek;
        cfg.api_key = None;
        cfg.api_key_env = "PENWRIGHT_TEST_MISSING_DEEPSEEK_KEY".to_string();
        let err = OpenAiCompatAdapter::new(ProviderKind::DeepSeek, &cfg).unwrap_err();
        assert!(matches!(err, LlmError::Configuration(_)));
    }

    #[test]
    fn test_debug_hides_key() {
        let adapter =
            OpenAiCompatAdapter::new(ProviderKind::DeepSeek, &deepseek_config("http://localhost"))
                .unwrap();
        let debug = format!("{:?}", adapter);
        assert!(!debug.contains("test-api-key"));
    }
}
