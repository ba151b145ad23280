use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use penwright_core::config::{DEFAULT_SECTION_TIMEOUT_SECS, mask_secret};
use penwright_core::validation::DEFAULT_MIN_LENGTH;
use penwright_core::{ProviderKind, ProvidersConfig, RetryConfig, StageModels, ValidationLevel};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PenwrightConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub deadline: DeadlineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub validation: ValidationDefaults,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub stages: StageModels,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Read only the `[logging]` table, before the subscriber exists
    pub fn peek(custom_path: &Option<PathBuf>) -> Self {
        #[derive(Deserialize)]
        struct LoggingOnly {
            #[serde(default)]
            logging: LoggingConfig,
        }

        std::fs::read_to_string(config_path(custom_path))
            .ok()
            .and_then(|content| toml::from_str::<LoggingOnly>(&content).ok())
            .map(|c| c.logging)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Root for debug artifacts and usage reports; unset disables both
    #[serde(default)]
    pub base_path: Option<String>,
    #[serde(default = "default_true")]
    pub save_usage_report: bool,
}

fn default_true() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_path: None,
            save_usage_report: true,
        }
    }
}

impl OutputConfig {
    pub fn base_path(&self) -> Option<PathBuf> {
        self.base_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(expand_home)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineConfig {
    #[serde(default = "default_section_timeout_secs")]
    pub section_timeout_secs: u64,
}

fn default_section_timeout_secs() -> u64 {
    DEFAULT_SECTION_TIMEOUT_SECS
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            section_timeout_secs: default_section_timeout_secs(),
        }
    }
}

impl DeadlineConfig {
    pub fn section_timeout(&self) -> Duration {
        Duration::from_secs(self.section_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationDefaults {
    #[serde(default)]
    pub level: ValidationLevel,
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    #[serde(default)]
    pub target_language: Option<String>,
}

fn default_min_length() -> usize {
    DEFAULT_MIN_LENGTH
}

impl Default for ValidationDefaults {
    fn default() -> Self {
        Self {
            level: ValidationLevel::default(),
            min_length: default_min_length(),
            target_language: None,
        }
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".penwright")
}

pub fn config_path(custom_path: &Option<PathBuf>) -> PathBuf {
    custom_path
        .clone()
        .unwrap_or_else(|| config_dir().join("config.toml"))
}

impl PenwrightConfig {
    /// Load the config file; a missing default file falls back to built-in defaults
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = config_path(custom_path);

        if custom_path.is_none() && !path.exists() {
            info!(
                "No config at {}; using built-in defaults. Run `penwright init` to create one.",
                path.display()
            );
            return Ok(Self::default());
        }

        check_permissions(&path)?;

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `penwright init` first.",
                path.display()
            )
        })?;

        Self::parse(&content).with_context(|| format!("Invalid config at {}", path.display()))
    }

    /// Expand allowlisted env vars, parse, and check provider settings
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded).context("Failed to parse config")?;

        config.providers.check()?;
        if config.stages.is_empty() {
            warn!("No stage models configured; every request will need --model");
        }

        for kind in hardcoded_keys(content) {
            warn!(
                "API key for {} is hardcoded in config file. For security, use environment variables: api_key = \"${{{}}}\"",
                kind,
                config.providers.get(kind).api_key_env
            );
        }

        Ok(config)
    }

    /// Copy with inline credentials masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for kind in ProviderKind::ALL {
            let provider = copy.providers.get_mut(kind);
            provider.api_key = provider.api_key.as_deref().map(mask_secret);
        }
        copy
    }
}

/// Providers whose unexpanded `api_key` is a literal rather than `${VAR}`
fn hardcoded_keys(content: &str) -> Vec<ProviderKind> {
    let Ok(raw) = toml::from_str::<toml::Value>(content) else {
        return Vec::new();
    };
    ProviderKind::ALL
        .into_iter()
        .filter(|kind| {
            raw.get("providers")
                .and_then(|p| p.get(kind.name()))
                .and_then(|p| p.get("api_key"))
                .and_then(|k| k.as_str())
                .is_some_and(|k| !k.trim().is_empty() && !k.contains("${"))
        })
        .collect()
}

/// Refuse config files readable by group or other (Unix only)
fn check_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(anyhow::anyhow!(
                    "Config file {:?} has overly permissive permissions ({:o}). \
                     It may contain secrets. Fix with: chmod 600 {:?}",
                    path,
                    mode & 0o777,
                    path
                ));
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &[
    "DEEPSEEK_API_KEY",
    "OPENROUTER_API_KEY",
    "GEMINI_API_KEY",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let var_name = &rest[start + 2..start + len];
        result.push_str(&rest[..start]);

        if ALLOWED_ENV_VARS.contains(&var_name) {
            result.push_str(&std::env::var(var_name).unwrap_or_default());
        } else {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            result.push_str(&rest[start..start + len + 1]);
        }
        rest = &rest[start + len + 1..];
    }

    result.push_str(rest);
    result
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(s: &str) -> PathBuf {
    if let Some(stripped) = s.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(s)
}
