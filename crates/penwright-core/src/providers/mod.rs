//! Multi-provider completion layer
//!
//! Supports DeepSeek, OpenRouter and Google Gemini. Vendors implement the
//! [`ProviderAdapter`] trait and are selected per model name by
//! [`ProviderRouter`].

pub mod google;
pub mod openai_compat;
pub mod router;
pub mod types;

pub use router::{CompletionRouter, ProviderRouter};
pub use types::{
    CanonicalResponse, ChatMessage, ChatRole, CompletionRequest, FinishReason, GroundingMetadata,
    GroundingSource, ProviderAdapter, ProviderKind, ResponseFormat, TokenUsage, UsageAccounting,
};
