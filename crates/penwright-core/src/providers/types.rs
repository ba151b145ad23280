//! Provider-agnostic request and response types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Rough characters-per-token ratio used when a vendor omits usage
pub const CHARS_PER_TOKEN: usize = 4;

/// The closed set of providers the router can dispatch to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderKind {
    /// DeepSeek's own OpenAI-compatible endpoint
    #[serde(rename = "deepseek")]
    DeepSeek,
    /// OpenRouter aggregator, OpenAI-compatible
    #[serde(rename = "openrouter")]
    OpenRouter,
    /// Gemini generateContent API, called directly
    #[serde(rename = "google_direct")]
    GoogleDirect,
}

impl ProviderKind {
    /// Resolution order when a model matches more than one provider
    pub const ALL: [ProviderKind; 3] = [Self::DeepSeek, Self::GoogleDirect, Self::OpenRouter];

    pub fn name(&self) -> &'static str {
        match self {
            Self::DeepSeek => "deepseek",
            Self::OpenRouter => "openrouter",
            Self::GoogleDirect => "google_direct",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Output format hint forwarded to vendors that support it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

/// What a single provider call needs, independent of the vendor
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub response_format: Option<ResponseFormat>,
    pub web_search: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: 0.3,
            max_tokens: None,
            response_format: None,
            web_search: false,
        }
    }

    /// Total characters across all turns, used for usage estimation
    pub fn prompt_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

/// Why the model stopped generating, normalized across vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    /// Natural end of generation
    Complete,
    /// Output token ceiling hit
    Truncated,
    /// Safety or content filter stopped generation
    Filtered,
    /// Vendor-side generation error
    Error,
    /// Absent or unrecognized vendor code
    Unknown,
}

impl FinishReason {
    /// Map any vendor's finish code (OpenAI-style or Gemini-style, any case)
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stop" | "end_turn" | "stop_sequence" => Self::Complete,
            "length" | "max_tokens" => Self::Truncated,
            "content_filter" | "safety" | "recitation" | "blocklist" | "prohibited_content"
            | "spii" | "language" | "image_safety" => Self::Filtered,
            "error" | "malformed_function_call" => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// OpenAI-compatible vendors: a missing code stays unknown
    pub fn from_openai(raw: Option<&str>) -> Self {
        raw.map_or(Self::Unknown, Self::parse)
    }

    /// Gemini omits the code on some successful candidates; treat that as a stop
    pub fn from_gemini(raw: Option<&str>) -> Self {
        raw.map_or(Self::Complete, Self::parse)
    }

    pub fn is_natural_stop(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// False for an absent or unrecognized vendor code
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "COMPLETE"),
            Self::Truncated => write!(f, "TRUNCATED"),
            Self::Filtered => write!(f, "FILTERED"),
            Self::Error => write!(f, "ERROR"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Whether token counts came from the vendor or were estimated locally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageAccounting {
    #[default]
    Exact,
    Estimated,
}

/// Token usage from a single API call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_miss_tokens: Option<u64>,
    pub accounting: UsageAccounting,
}

impl TokenUsage {
    pub fn exact(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            ..Default::default()
        }
    }

    /// Estimate from character counts when the vendor reported nothing
    pub fn estimate(prompt_chars: usize, completion_chars: usize) -> Self {
        let prompt_tokens = prompt_chars.div_ceil(CHARS_PER_TOKEN) as u64;
        let completion_tokens = completion_chars.div_ceil(CHARS_PER_TOKEN) as u64;
        Self {
            accounting: UsageAccounting::Estimated,
            ..Self::exact(prompt_tokens, completion_tokens)
        }
    }

    pub fn is_estimated(&self) -> bool {
        self.accounting == UsageAccounting::Estimated
    }
}

/// A web source cited by search-grounded generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub uri: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Vendor web-search citation data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingMetadata {
    pub web_search_queries: Vec<String>,
    pub sources: Vec<GroundingSource>,
}

/// Vendor-independent normalized completion result
#[derive(Debug, Clone)]
pub struct CanonicalResponse {
    pub text: String,
    pub finish_reason: FinishReason,
    /// The vendor's own finish code, kept for logs and artifacts
    pub raw_finish_reason: Option<String>,
    pub usage: TokenUsage,
    pub provider: ProviderKind,
    pub model: String,
    pub grounding: Option<GroundingMetadata>,
    /// Undecoded vendor payload for debugging
    pub raw: Value,
}

impl CanonicalResponse {
    /// True when the text is empty or whitespace only
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// One vendor wire protocol: translate request, call, parse response
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter talks to
    fn kind(&self) -> ProviderKind;

    /// Send one completion request for `model`
    async fn complete(&self, model: &str, request: &CompletionRequest) -> Result<CanonicalResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_role_display() {
        assert_eq!(ChatRole::User.to_string(), "user");
        assert_eq!(ChatRole::Assistant.to_string(), "assistant");
        assert_eq!(ChatRole::System.to_string(), "system");
    }

    #[test]
    fn test_finish_reason_parse_both_vocabularies() {
        assert_eq!(FinishReason::parse("STOP"), FinishReason::Complete);
        assert_eq!(FinishReason::parse("stop"), FinishReason::Complete);
        assert_eq!(FinishReason::parse("end_turn"), FinishReason::Complete);
        assert_eq!(FinishReason::parse("MAX_TOKENS"), FinishReason::Truncated);
        assert_eq!(FinishReason::parse("length"), FinishReason::Truncated);
        assert_eq!(FinishReason::parse("SAFETY"), FinishReason::Filtered);
        assert_eq!(FinishReason::parse("content_filter"), FinishReason::Filtered);
        assert_eq!(FinishReason::parse("OTHER"), FinishReason::Unknown);
    }

    #[test]
    fn test_finish_reason_missing_codes() {
        assert_eq!(FinishReason::from_openai(None), FinishReason::Unknown);
        assert_eq!(FinishReason::from_gemini(None), FinishReason::Complete);
        assert!(FinishReason::Complete.is_natural_stop());
        assert!(!FinishReason::Truncated.is_natural_stop());
        assert!(!FinishReason::from_openai(None).is_known());
        assert!(FinishReason::from_openai(Some("length")).is_known());
    }

    #[test]
    fn test_response_format_wire_shape() {
        let json = serde_json::to_value(ResponseFormat::JsonObject).unwrap();
        assert_eq!(json, serde_json::json!({"type": "json_object"}));
    }

    #[test]
    fn test_usage_estimate_is_flagged() {
        let usage = TokenUsage::estimate(10, 7);
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.total_tokens, 5);
        assert!(usage.is_estimated());
        assert!(!TokenUsage::exact(1, 1).is_estimated());
    }

    #[test]
    fn test_provider_kind_serde_names() {
        assert_eq!(
            serde_json::to_value(ProviderKind::GoogleDirect).unwrap(),
            serde_json::json!("google_direct")
        );
        assert_eq!(ProviderKind::DeepSeek.to_string(), "deepseek");
    }
}
