//! Token usage recording and cost estimation
//!
//! The orchestrator reports every successful attempt to a [`UsageRecorder`].
//! [`TokenTracker`] is the bundled recorder: it keeps an in-memory ledger per
//! pipeline run, prices entries from a configurable table, and writes a JSON
//! report at the end of a run.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::base_stage_name;
use crate::providers::{ProviderKind, TokenUsage};
use crate::request::ModelLabel;

/// Context attached to every recorded usage entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub model: String,
    pub provider: ProviderKind,
    pub attempt: u32,
    pub label: ModelLabel,
    pub post_processed: bool,
}

/// Sink for per-call token usage
pub trait UsageRecorder: Send + Sync {
    fn record(&self, stage: &str, usage: &TokenUsage, metadata: &UsageMetadata);
}

/// Pricing for a specific model (per million tokens)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
    /// Price for prompt tokens served from the vendor's cache
    #[serde(default)]
    pub cache_hit_per_mtok: Option<f64>,
}

impl ModelPricing {
    pub const fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
            cache_hit_per_mtok: None,
        }
    }

    pub fn with_cache_hit(mut self, cache_hit_per_mtok: f64) -> Self {
        self.cache_hit_per_mtok = Some(cache_hit_per_mtok);
        self
    }

    /// Estimate cost in USD; cache hits are billed at the cache rate when known
    pub fn estimate_cost(&self, usage: &TokenUsage) -> f64 {
        let (cached, cache_rate) = match (usage.cache_hit_tokens, self.cache_hit_per_mtok) {
            (Some(hit), Some(rate)) => (hit.min(usage.prompt_tokens), rate),
            _ => (0, 0.0),
        };
        let fresh = usage.prompt_tokens - cached;
        (fresh as f64 / 1_000_000.0) * self.input_per_mtok
            + (cached as f64 / 1_000_000.0) * cache_rate
            + (usage.completion_tokens as f64 / 1_000_000.0) * self.output_per_mtok
    }
}

/// List prices in USD per million tokens for the stock model table
pub fn default_pricing() -> HashMap<String, ModelPricing> {
    let deepseek = ModelPricing::new(0.28, 0.42).with_cache_hit(0.028);
    [
        ("deepseek-chat", deepseek),
        ("deepseek-reasoner", deepseek),
        ("gemini-2.5-flash", ModelPricing::new(0.30, 2.50)),
        ("gemini-2.5-flash-preview-09-2025", ModelPricing::new(0.30, 2.50)),
        ("gemini-2.5-pro", ModelPricing::new(1.25, 10.0)),
        ("gemini-2.0-flash", ModelPricing::new(0.10, 0.40)),
        ("google/gemini-2.5-flash-lite-preview-06-17", ModelPricing::new(0.10, 0.40)),
        ("openai/gpt-4o", ModelPricing::new(2.50, 10.0)),
        ("openai/gpt-4o-mini", ModelPricing::new(0.15, 0.60)),
    ]
    .into_iter()
    .map(|(model, pricing)| (model.to_string(), pricing))
    .collect()
}

/// One recorded call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    pub usage: TokenUsage,
    pub metadata: UsageMetadata,
    /// None when the model has no pricing entry
    pub cost_usd: Option<f64>,
}

/// Totals for one grouping key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub requests: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub reasoning_tokens: u64,
    pub cached_tokens: u64,
    /// Entries whose counts were estimated locally
    pub estimated_requests: u32,
    pub cost_usd: f64,
}

impl UsageTotals {
    fn add(&mut self, entry: &UsageEntry) {
        let usage = &entry.usage;
        self.requests += 1;
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
        self.reasoning_tokens += usage.reasoning_tokens.unwrap_or(0);
        self.cached_tokens += usage.cached_tokens.or(usage.cache_hit_tokens).unwrap_or(0);
        if usage.is_estimated() {
            self.estimated_requests += 1;
        }
        self.cost_usd += entry.cost_usd.unwrap_or(0.0);
    }
}

/// Aggregated view of a tracker's ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    pub topic: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub totals: UsageTotals,
    /// Keyed by base stage name, so section-scoped stages roll up
    pub by_stage: BTreeMap<String, UsageTotals>,
    pub by_model: BTreeMap<String, UsageTotals>,
}

/// In-memory usage ledger for one pipeline run
pub struct TokenTracker {
    topic: String,
    session_id: String,
    started_at: DateTime<Utc>,
    pricing: HashMap<String, ModelPricing>,
    entries: Mutex<Vec<UsageEntry>>,
}

impl std::fmt::Debug for TokenTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenTracker")
            .field("topic", &self.topic)
            .field("session_id", &self.session_id)
            .field("entries", &self.len())
            .finish()
    }
}

impl TokenTracker {
    pub fn new(topic: impl Into<String>) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let topic = topic.into();
        info!("Token tracker initialized for '{}' (session: {})", topic, session_id);
        Self {
            topic,
            session_id,
            started_at: Utc::now(),
            pricing: default_pricing(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_pricing(mut self, pricing: HashMap<String, ModelPricing>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Cost for one call, if the model is priced
    pub fn estimate_cost(&self, model: &str, usage: &TokenUsage) -> Option<f64> {
        self.pricing.get(model).map(|p| p.estimate_cost(usage))
    }

    pub fn entries(&self) -> Vec<UsageEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn summary(&self) -> UsageSummary {
        let entries = self.lock();
        let mut totals = UsageTotals::default();
        let mut by_stage: BTreeMap<String, UsageTotals> = BTreeMap::new();
        let mut by_model: BTreeMap<String, UsageTotals> = BTreeMap::new();

        for entry in entries.iter() {
            totals.add(entry);
            by_stage
                .entry(base_stage_name(&entry.stage).to_string())
                .or_default()
                .add(entry);
            by_model
                .entry(entry.metadata.model.clone())
                .or_default()
                .add(entry);
        }

        UsageSummary {
            topic: self.topic.clone(),
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            totals,
            by_stage,
            by_model,
        }
    }

    /// Write summary and raw entries as pretty JSON
    pub fn save_report(&self, path: &Path) -> anyhow::Result<()> {
        let report = serde_json::json!({
            "summary": self.summary(),
            "entries": self.entries(),
        });
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        info!("Token usage report saved to {}", path.display());
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<UsageEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl UsageRecorder for TokenTracker {
    fn record(&self, stage: &str, usage: &TokenUsage, metadata: &UsageMetadata) {
        let cost_usd = self.estimate_cost(&metadata.model, usage);
        debug!(
            "Recorded usage: {} {} in={} out={} cost={} estimated={}",
            stage,
            metadata.model,
            usage.prompt_tokens,
            usage.completion_tokens,
            cost_usd.map_or_else(|| "n/a".to_string(), |c| format!("${:.4}", c)),
            usage.is_estimated()
        );
        self.lock().push(UsageEntry {
            timestamp: Utc::now(),
            stage: stage.to_string(),
            usage: *usage,
            metadata: metadata.clone(),
            cost_usd,
        });
    }
}

/// Format a UsageSummary as a human-readable string
pub fn format_usage_summary(summary: &UsageSummary) -> String {
    let mut out = String::new();

    out.push_str(&format!("## Token Usage ({})\n\n", summary.topic));
    out.push_str(&format!("**Total Cost:** ${:.4}\n", summary.totals.cost_usd));
    out.push_str(&format!(
        "**Total Tokens:** {} (in: {}, out: {}, reasoning: {})\n",
        summary.totals.total_tokens,
        summary.totals.prompt_tokens,
        summary.totals.completion_tokens,
        summary.totals.reasoning_tokens
    ));
    out.push_str(&format!("**Requests:** {}", summary.totals.requests));
    if summary.totals.estimated_requests > 0 {
        out.push_str(&format!(" ({} estimated)", summary.totals.estimated_requests));
    }
    out.push_str("\n\n");

    for (title, column, rows) in [
        ("By Stage", "Stage", &summary.by_stage),
        ("By Model", "Model", &summary.by_model),
    ] {
        if rows.is_empty() {
            continue;
        }
        out.push_str(&format!("### {}\n\n", title));
        out.push_str(&format!("| {} | Cost | Tokens | Requests |\n", column));
        out.push_str("|------|------|--------|----------|\n");
        let mut sorted: Vec<_> = rows.iter().collect();
        sorted.sort_by(|a, b| b.1.cost_usd.total_cmp(&a.1.cost_usd));
        for (key, totals) in sorted {
            out.push_str(&format!(
                "| {} | ${:.4} | {} | {} |\n",
                key, totals.cost_usd, totals.total_tokens, totals.requests
            ));
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(model: &str, attempt: u32) -> UsageMetadata {
        UsageMetadata {
            model: model.to_string(),
            provider: ProviderKind::DeepSeek,
            attempt,
            label: ModelLabel::Primary,
            post_processed: false,
        }
    }

    #[test]
    fn test_model_pricing() {
        let pricing = ModelPricing::new(1.0, 2.0);
        let cost = pricing.estimate_cost(&TokenUsage::exact(1_000_000, 500_000));
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_cache_hits_billed_at_cache_rate() {
        let pricing = ModelPricing::new(1.0, 0.0).with_cache_hit(0.1);
        let usage = TokenUsage {
            cache_hit_tokens: Some(500_000),
            ..TokenUsage::exact(1_000_000, 0)
        };
        assert!((pricing.estimate_cost(&usage) - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_summary_rolls_up_sections() {
        let tracker = TokenTracker::new("harbor towns");
        tracker.record(
            "translation_section_1",
            &TokenUsage::exact(100, 50),
            &metadata("deepseek-reasoner", 1),
        );
        tracker.record(
            "translation_section_2",
            &TokenUsage::estimate(400, 200),
            &metadata("deepseek-reasoner", 2),
        );
        tracker.record(
            "fact_check",
            &TokenUsage::exact(10, 5),
            &metadata("unpriced-model", 1),
        );

        let summary = tracker.summary();
        assert_eq!(summary.totals.requests, 3);
        assert_eq!(summary.totals.estimated_requests, 1);
        assert_eq!(summary.by_stage.len(), 2);
        assert_eq!(summary.by_stage["translation"].requests, 2);
        assert_eq!(summary.by_stage["translation"].prompt_tokens, 200);
        assert_eq!(summary.by_model["unpriced-model"].cost_usd, 0.0);
        assert!(summary.by_model["deepseek-reasoner"].cost_usd > 0.0);
        assert!(tracker.entries()[2].cost_usd.is_none());
    }

    #[test]
    fn test_save_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("usage.json");
        let tracker = TokenTracker::new("report topic");
        tracker.record("fact_check", &TokenUsage::exact(10, 5), &metadata("gemini-2.5-flash", 1));
        tracker.save_report(&path).unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["summary"]["topic"], "report topic");
        assert_eq!(saved["entries"].as_array().unwrap().len(), 1);
        assert_eq!(saved["entries"][0]["metadata"]["label"], "primary");
    }

    #[test]
    fn test_format_usage_summary() {
        let tracker = TokenTracker::new("formatting");
        tracker.record(
            "generate_article",
            &TokenUsage::exact(10_000, 5_000),
            &metadata("deepseek-chat", 1),
        );
        let formatted = format_usage_summary(&tracker.summary());
        assert!(formatted.contains("15000"));
        assert!(formatted.contains("| generate_article |"));
        assert!(formatted.contains("| deepseek-chat |"));
    }
}
