//! penwright-core - reliable LLM requests for a staged article pipeline
//!
//! This crate provides:
//! - Provider adapters for DeepSeek, OpenRouter and Gemini behind one canonical response
//! - A router that maps model names to lazily built, shared adapters
//! - A content-quality gate (minimal, statistical, translation, custom)
//! - Lenient JSON recovery for post-processing
//! - A retry/fallback orchestrator with usage recording and debug artifacts

pub mod artifacts;
pub mod config;
pub mod error;
pub mod postprocess;
pub mod providers;
pub mod request;
pub mod usage;
pub mod validation;

// Re-export main types for convenience
pub use config::{
    MAX_ATTEMPTS_PER_MODEL, ProviderConfig, ProvidersConfig, RetryConfig, StageModels, StageRoute,
};
pub use error::{LlmError, Result};
pub use postprocess::{JsonPostProcessor, PostProcessor, json_as, parse_json_lenient};
pub use providers::{
    CanonicalResponse, ChatMessage, CompletionRequest, CompletionRouter, FinishReason,
    ProviderKind, ProviderRouter, ResponseFormat, TokenUsage,
};
pub use request::{
    AttemptFailure, AttemptRecord, ModelLabel, RequestOrchestrator, RequestOutcome, RequestPhase,
    RequestSpec, with_deadline,
};
pub use usage::{TokenTracker, UsageMetadata, UsageRecorder};
pub use validation::{
    FailureReason, Validation, ValidationLevel, ValidationParams, ValidationVerdict,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_reexports_cover_a_request_setup() {
        let route = StageModels::default()
            .route_for("translation_section_2")
            .cloned()
            .unwrap();
        assert_eq!(route.models()[0], "deepseek-reasoner");
        assert_eq!(route.models().len(), 2);

        let level: ValidationLevel = "v3".parse().unwrap();
        assert_eq!(level, ValidationLevel::Statistical);

        let value = parse_json_lenient("{\"title\": \"Ferries\",}").unwrap();
        assert_eq!(value["title"], "Ferries");

        assert_eq!(FinishReason::from_openai(Some("stop")), FinishReason::Complete);
        assert_eq!(
            RetryConfig::default().schedule().len() as u32,
            MAX_ATTEMPTS_PER_MODEL
        );
    }
}
