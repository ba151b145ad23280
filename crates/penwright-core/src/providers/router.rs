//! Model-name routing onto a lazily built adapter registry

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::ProvidersConfig;
use crate::error::{LlmError, Result};

use super::google::GeminiAdapter;
use super::openai_compat::OpenAiCompatAdapter;
use super::types::{CanonicalResponse, CompletionRequest, ProviderAdapter, ProviderKind};

/// Anything that can turn a model name plus request into a normalized response
#[async_trait]
pub trait CompletionRouter: Send + Sync {
    async fn route(&self, model: &str, request: &CompletionRequest) -> Result<CanonicalResponse>;
}

/// Resolves models to providers and caches one adapter per provider
///
/// Adapters are built on first use and shared by every later call, including
/// concurrent ones. The registry lock is never held across an await.
pub struct ProviderRouter {
    providers: ProvidersConfig,
    registry: RwLock<HashMap<ProviderKind, Arc<dyn ProviderAdapter>>>,
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("providers", &self.providers)
            .field("cached", &self.cached_providers())
            .finish()
    }
}

impl ProviderRouter {
    pub fn new(providers: ProvidersConfig) -> Self {
        Self {
            providers,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Pre-register an adapter, bypassing lazy construction for its provider
    pub fn with_adapter(self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(adapter.kind(), adapter);
        self
    }

    pub fn providers(&self) -> &ProvidersConfig {
        &self.providers
    }

    /// Which provider serves `model`
    pub fn resolve(&self, model: &str) -> Result<ProviderKind> {
        self.providers.resolve(model)
    }

    /// Providers whose adapter has already been built
    pub fn cached_providers(&self) -> Vec<ProviderKind> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        let mut kinds: Vec<_> = registry.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Fetch or build the adapter for `kind`; the first writer wins
    pub fn adapter(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderAdapter>> {
        if let Some(adapter) = self
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&kind)
        {
            debug!("Reusing cached {} adapter", kind);
            return Ok(adapter.clone());
        }

        let built = self.build_adapter(kind)?;
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        let (adapter, inserted) = install(&mut registry, kind, built);
        if inserted {
            info!("Initialized {} adapter", kind);
        } else {
            debug!("Discarding duplicate {} adapter; another caller registered one first", kind);
        }
        Ok(adapter)
    }

    fn build_adapter(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderAdapter>> {
        let config = self.providers.get(kind);
        let adapter: Arc<dyn ProviderAdapter> = match kind {
            ProviderKind::DeepSeek | ProviderKind::OpenRouter => {
                Arc::new(OpenAiCompatAdapter::new(kind, config)?)
            }
            ProviderKind::GoogleDirect => Arc::new(GeminiAdapter::new(config)?),
        };
        Ok(adapter)
    }
}

/// Keep an existing adapter over `built`; the flag says whether `built` was stored
fn install(
    registry: &mut HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    kind: ProviderKind,
    built: Arc<dyn ProviderAdapter>,
) -> (Arc<dyn ProviderAdapter>, bool) {
    match registry.entry(kind) {
        Entry::Occupied(existing) => (existing.get().clone(), false),
        Entry::Vacant(slot) => (slot.insert(built).clone(), true),
    }
}

#[async_trait]
impl CompletionRouter for ProviderRouter {
    async fn route(&self, model: &str, request: &CompletionRequest) -> Result<CanonicalResponse> {
        let kind = self.resolve(model)?;
        debug!("Routing {} to {}", model, kind);
        let adapter = self.adapter(kind)?;
        let response = adapter.complete(model, request).await?;
        if response.provider != kind {
            return Err(LlmError::transport(
                kind.name(),
                format!("adapter answered as {}", response.provider),
            ));
        }
        Ok(response)
    }
}
