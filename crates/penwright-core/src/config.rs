//! Static configuration consumed by the router and the orchestrator
//!
//! Provider table, per-stage model table and retry schedule. Defaults mirror
//! the production deployment; the CLI overlays a TOML file on top.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LlmError, Result};
use crate::providers::ProviderKind;

/// Attempts per model before moving on to the next one
pub const MAX_ATTEMPTS_PER_MODEL: u32 = 3;

/// Delay before attempt n+1 on the same model, indexed by n-1
pub const DEFAULT_BACKOFF_SECS: [u64; 3] = [2, 5, 10];

/// Wall-clock budget for one section-scoped invocation
pub const DEFAULT_SECTION_TIMEOUT_SECS: u64 = 180;

/// Separator used by section-scoped stage names (`translation_section_3`)
const SECTION_MARKER: &str = "_section_";

fn default_timeout_secs() -> u64 {
    120
}

/// Capability flags advertised by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Honors a JSON `response_format` hint
    #[serde(default)]
    pub json_mode: bool,
    /// Supports search-grounded generation
    #[serde(default)]
    pub web_search: bool,
}

/// Aggregator routing preferences, applied to one model family only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPreferences {
    /// Case-insensitive substring of the model name
    pub model_family: String,
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(default)]
    pub allow_fallbacks: bool,
}

impl RoutingPreferences {
    pub fn applies_to(&self, model: &str) -> bool {
        !self.model_family.is_empty()
            && model
                .to_lowercase()
                .contains(&self.model_family.to_lowercase())
    }

    /// The `provider` object OpenRouter expects in the request body
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "order": self.order,
            "allow_fallbacks": self.allow_fallbacks,
        })
    }
}

/// Connection and capability settings for one provider
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Environment variable holding the credential
    pub api_key_env: String,
    /// Inline credential; takes precedence over `api_key_env` when non-empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    /// Name prefixes routed here when a model is not listed explicitly
    #[serde(default)]
    pub model_prefixes: Vec<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub routing_preferences: Option<RoutingPreferences>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key_env", &self.api_key_env)
            .field("api_key", &self.api_key.as_deref().map(mask_secret))
            .field("models", &self.models)
            .field("model_prefixes", &self.model_prefixes)
            .field("capabilities", &self.capabilities)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ProviderConfig {
    fn new(base_url: &str, api_key_env: &str, models: &[&str], prefixes: &[&str]) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key_env: api_key_env.to_string(),
            api_key: None,
            models: models.iter().map(|m| m.to_string()).collect(),
            model_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
            capabilities: Capabilities::default(),
            extra_headers: BTreeMap::new(),
            routing_preferences: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Inline key if set, otherwise the environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn lists(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    pub fn matches_prefix(&self, model: &str) -> bool {
        self.model_prefixes.iter().any(|p| model.starts_with(p.as_str()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Base URL without a trailing slash
    pub fn endpoint_root(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    fn check(&self, kind: ProviderKind) -> Result<()> {
        url::Url::parse(&self.base_url).map_err(|e| {
            LlmError::Configuration(format!(
                "provider '{}' has an invalid base_url '{}': {}",
                kind, self.base_url, e
            ))
        })?;
        if self.api_key_env.trim().is_empty() && self.api_key.is_none() {
            return Err(LlmError::Configuration(format!(
                "provider '{}' has neither api_key nor api_key_env",
                kind
            )));
        }
        Ok(())
    }
}

/// The provider table: one entry per [`ProviderKind`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub deepseek: ProviderConfig,
    pub openrouter: ProviderConfig,
    pub google_direct: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        let mut deepseek = ProviderConfig::new(
            "https://api.deepseek.com",
            "DEEPSEEK_API_KEY",
            &["deepseek-reasoner", "deepseek-chat"],
            &["deepseek-"],
        );
        deepseek.capabilities.json_mode = true;

        let mut google_direct = ProviderConfig::new(
            "https://generativelanguage.googleapis.com/v1beta",
            "GEMINI_API_KEY",
            &[
                "gemini-2.5-flash-preview-09-2025",
                "gemini-2.5-flash",
                "gemini-2.5-pro",
                "gemini-2.0-flash",
            ],
            &["gemini-"],
        );
        google_direct.capabilities.web_search = true;

        let mut openrouter = ProviderConfig::new(
            "https://openrouter.ai/api/v1",
            "OPENROUTER_API_KEY",
            &[
                "openai/gpt-4o",
                "openai/gpt-4o-mini",
                "google/gemini-2.0-flash-001",
                "google/gemini-2.5-flash-lite-preview-06-17",
                "deepseek/deepseek-chat-v3.1:free",
                "perplexity/sonar-reasoning-pro",
                "x-ai/grok-4-fast:free",
                "z-ai/glm-4.5-air:free",
            ],
            &[
                "openai/",
                "google/",
                "deepseek/",
                "anthropic/",
                "meta-llama/",
                "mistralai/",
                "perplexity/",
                "qwen/",
                "x-ai/",
                "z-ai/",
            ],
        );
        openrouter.capabilities.json_mode = true;
        openrouter
            .extra_headers
            .insert("X-Title".to_string(), "penwright".to_string());
        openrouter.routing_preferences = Some(RoutingPreferences {
            model_family: "deepseek".to_string(),
            order: vec!["DeepInfra".to_string()],
            allow_fallbacks: false,
        });

        Self {
            deepseek,
            openrouter,
            google_direct,
        }
    }
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::DeepSeek => &self.deepseek,
            ProviderKind::OpenRouter => &self.openrouter,
            ProviderKind::GoogleDirect => &self.google_direct,
        }
    }

    pub fn get_mut(&mut self, kind: ProviderKind) -> &mut ProviderConfig {
        match kind {
            ProviderKind::DeepSeek => &mut self.deepseek,
            ProviderKind::OpenRouter => &mut self.openrouter,
            ProviderKind::GoogleDirect => &mut self.google_direct,
        }
    }

    /// Map a model name to its provider: explicit listing first, then prefixes
    pub fn resolve(&self, model: &str) -> Result<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| self.get(*kind).lists(model))
            .or_else(|| {
                ProviderKind::ALL
                    .into_iter()
                    .find(|kind| self.get(*kind).matches_prefix(model))
            })
            .ok_or_else(|| {
                LlmError::Configuration(format!("no provider configured for model '{}'", model))
            })
    }

    /// Reject malformed base URLs and credential settings up front
    pub fn check(&self) -> Result<()> {
        for kind in ProviderKind::ALL {
            self.get(kind).check(kind)?;
        }
        Ok(())
    }
}

/// Primary and optional fallback model for one pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRoute {
    pub primary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl StageRoute {
    pub fn new(primary: impl Into<String>, fallback: Option<&str>) -> Self {
        Self {
            primary: primary.into(),
            fallback: fallback.map(str::to_string),
        }
    }

    /// Ordered model list: primary, then the fallback when it differs
    pub fn models(&self) -> Vec<String> {
        let mut models = vec![self.primary.clone()];
        if let Some(fallback) = self.fallback.as_deref().filter(|f| *f != self.primary) {
            models.push(fallback.to_string());
        }
        models
    }
}

/// Per-stage model table keyed by base stage name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageModels(BTreeMap<String, StageRoute>);

impl Default for StageModels {
    fn default() -> Self {
        const FLASH_LITE: &str = "google/gemini-2.5-flash-lite-preview-06-17";
        let table = [
            ("extract_sections", "deepseek-chat", FLASH_LITE),
            ("create_structure", "deepseek-reasoner", FLASH_LITE),
            ("generate_article", "deepseek-reasoner", FLASH_LITE),
            ("fact_check", "gemini-2.5-flash-preview-09-2025", "gemini-2.5-flash"),
            ("link_placement", "gemini-2.5-flash-preview-09-2025", "gemini-2.5-flash"),
            ("translation", "deepseek-reasoner", FLASH_LITE),
            ("editorial_review", "deepseek-reasoner", FLASH_LITE),
        ];
        Self(
            table
                .into_iter()
                .map(|(stage, primary, fallback)| {
                    (stage.to_string(), StageRoute::new(primary, Some(fallback)))
                })
                .collect(),
        )
    }
}

impl StageModels {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, stage: impl Into<String>, route: StageRoute) {
        self.0.insert(stage.into(), route);
    }

    /// Look up a stage, falling back to its base name for section-scoped stages
    pub fn route_for(&self, stage: &str) -> Option<&StageRoute> {
        self.0
            .get(stage)
            .or_else(|| self.0.get(base_stage_name(stage)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StageRoute)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `translation_section_3` → `translation`
pub fn base_stage_name(stage: &str) -> &str {
    stage
        .split_once(SECTION_MARKER)
        .map_or(stage, |(base, _)| base)
}

/// Backoff schedule between attempts on the same model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,
}

fn default_backoff_secs() -> Vec<u64> {
    DEFAULT_BACKOFF_SECS.to_vec()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl RetryConfig {
    pub fn schedule(&self) -> Vec<Duration> {
        self.backoff_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }
}

/// Mask a secret for Debug output: first 3 and last 4 chars of longer keys
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_listed_models() {
        let providers = ProvidersConfig::default();
        assert_eq!(providers.resolve("deepseek-reasoner").unwrap(), ProviderKind::DeepSeek);
        assert_eq!(providers.resolve("gemini-2.5-flash").unwrap(), ProviderKind::GoogleDirect);
        assert_eq!(
            providers
                .resolve("google/gemini-2.5-flash-lite-preview-06-17")
                .unwrap(),
            ProviderKind::OpenRouter
        );
    }

    #[test]
    fn test_resolve_by_prefix() {
        let providers = ProvidersConfig::default();
        assert_eq!(providers.resolve("gemini-3.0-ultra").unwrap(), ProviderKind::GoogleDirect);
        assert_eq!(providers.resolve("deepseek-v4").unwrap(), ProviderKind::DeepSeek);
        assert_eq!(
            providers.resolve("deepseek/deepseek-r1:free").unwrap(),
            ProviderKind::OpenRouter
        );
    }

    #[test]
    fn test_resolve_unknown_model_is_configuration_error() {
        let providers = ProvidersConfig::default();
        let err = providers.resolve("mystery-model-9000").unwrap_err();
        assert!(matches!(err, LlmError::Configuration(_)));
    }

    #[test]
    fn test_base_stage_name() {
        assert_eq!(base_stage_name("translation_section_3"), "translation");
        assert_eq!(base_stage_name("fact_check"), "fact_check");
    }

    #[test]
    fn test_stage_route_section_lookup() {
        let stages = StageModels::default();
        let route = stages.route_for("generate_article_section_2").unwrap();
        assert_eq!(route.primary, "deepseek-reasoner");
        assert!(stages.route_for("publish").is_none());
    }

    #[test]
    fn test_stage_route_drops_duplicate_fallback() {
        let route = StageRoute::new("deepseek-chat", Some("deepseek-chat"));
        assert_eq!(route.models(), vec!["deepseek-chat".to_string()]);
        let route = StageRoute::new("deepseek-chat", Some("gemini-2.5-flash"));
        assert_eq!(route.models().len(), 2);
    }

    #[test]
    fn test_routing_preferences_family() {
        let prefs = ProvidersConfig::default().openrouter.routing_preferences.unwrap();
        assert!(prefs.applies_to("deepseek/deepseek-chat-v3.1:free"));
        assert!(!prefs.applies_to("openai/gpt-4o"));
        assert_eq!(prefs.to_wire()["allow_fallbacks"], serde_json::json!(false));
    }

    #[test]
    fn test_inline_key_wins_and_blank_is_ignored() {
        let mut cfg = ProvidersConfig::default().deepseek;
        cfg.api_key_env = "PENWRIGHT_TEST_UNSET_VARIABLE".to_string();
        cfg.api_key = Some("   ".to_string());
        assert!(cfg.resolve_api_key().is_none());
        cfg.api_key = Some("sk-inline".to_string());
        assert_eq!(cfg.resolve_api_key().as_deref(), Some("sk-inline"));
    }

    #[test]
    fn test_check_rejects_bad_base_url() {
        let mut providers = ProvidersConfig::default();
        assert!(providers.check().is_ok());
        providers.deepseek.base_url = "not a url".to_string();
        assert!(matches!(providers.check(), Err(LlmError::Configuration(_))));
    }

    #[test]
    fn test_debug_masks_inline_key() {
        let mut cfg = ProvidersConfig::default().openrouter;
        cfg.api_key = Some("sk-or-v1-verysecretvalue".to_string());
        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("verysecret"));
    }

    #[test]
    fn test_retry_schedule_default() {
        let schedule = RetryConfig::default().schedule();
        assert_eq!(
            schedule,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10)
            ]
        );
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("sk-abcdefghij"), "sk-...ghij");
    }
}
