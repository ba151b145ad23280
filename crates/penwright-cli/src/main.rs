use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{LoggingConfig, PenwrightConfig};
use penwright_core::usage::format_usage_summary;
use penwright_core::validation::validate;
use penwright_core::{
    ChatMessage, FinishReason, JsonPostProcessor, LlmError, ProviderKind, ProviderRouter,
    RequestOrchestrator, RequestSpec, ResponseFormat, TokenTracker, Validation, ValidationLevel,
    ValidationParams, with_deadline,
};

#[derive(Parser)]
#[command(name = "penwright")]
#[command(version)]
#[command(about = "penwright - reliable LLM requests with retry, fallback and quality gating")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,

    /// Show the stage model table and where each model routes
    Models,

    /// Send one request through the retry/fallback pipeline
    Ask {
        /// The user message
        message: String,

        /// Stage whose models are used (section-scoped names fall back to the base stage)
        #[arg(short, long, default_value = "generate_article")]
        stage: String,

        /// System prompt
        #[arg(long)]
        system: Option<String>,

        /// Use this model instead of the stage primary
        #[arg(short, long)]
        model: Option<String>,

        /// Request a JSON object and print the recovered value
        #[arg(long)]
        json: bool,

        /// Ask the provider to ground the answer with web search
        #[arg(long)]
        web_search: bool,

        /// Validation level (defaults to the configured level)
        #[arg(long)]
        level: Option<ValidationLevel>,

        /// Minimum accepted length in characters
        #[arg(long)]
        min_length: Option<usize>,

        /// Required script language, e.g. "ru" or "en"
        #[arg(long)]
        lang: Option<String>,

        #[arg(long)]
        temperature: Option<f64>,

        #[arg(long)]
        max_tokens: Option<u32>,
    },

    /// Run the quality gate over a file ("-" reads stdin)
    Validate {
        file: String,

        #[arg(long)]
        level: Option<ValidationLevel>,

        /// Check as a translation of a source with this many characters
        #[arg(long)]
        original_length: Option<usize>,

        #[arg(long)]
        min_length: Option<usize>,

        #[arg(long)]
        lang: Option<String>,

        /// Vendor finish reason the text came back with, e.g. STOP or MAX_TOKENS
        #[arg(long)]
        finish_reason: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli);

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config),
        Commands::Models => cmd_models(&cli.config),
        Commands::Ask {
            message,
            stage,
            system,
            model,
            json,
            web_search,
            level,
            min_length,
            lang,
            temperature,
            max_tokens,
        } => {
            let args = AskArgs {
                message,
                stage,
                system,
                model,
                json,
                web_search,
                level,
                min_length,
                lang,
                temperature,
                max_tokens,
            };
            cmd_ask(&cli.config, args).await
        }
        Commands::Validate {
            file,
            level,
            original_length,
            min_length,
            lang,
            finish_reason,
        } => {
            cmd_validate(
                &cli.config,
                &file,
                level,
                original_length,
                min_length,
                lang,
                finish_reason,
            )
            .await
        }
    }
}

/// RUST_LOG wins, then --debug, then the config file's level
fn init_logging(cli: &Cli) {
    let logging = LoggingConfig::peek(&cli.config);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cli.debug { "debug" } else { logging.level.as_str() };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("penwright initialized at {}", config_dir.display());
    println!(
        "Set DEEPSEEK_API_KEY, OPENROUTER_API_KEY and GEMINI_API_KEY, or edit {}.",
        config_path.display()
    );
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let config = PenwrightConfig::load(config_path)?;
    let shown = toml::to_string_pretty(&config.redacted())?;
    println!("{}", shown);
    Ok(())
}

fn cmd_models(config_path: &Option<PathBuf>) -> Result<()> {
    let config = PenwrightConfig::load(config_path)?;

    println!("{:<20} {:<8} {:<45} {:<14} KEY", "STAGE", "ROLE", "MODEL", "PROVIDER");
    for (stage, route) in config.stages.iter() {
        for (index, model) in route.models().iter().enumerate() {
            let role = if index == 0 { "primary" } else { "fallback" };
            let (provider, key) = match config.providers.resolve(model) {
                Ok(kind) => (kind.to_string(), key_status(&config, kind)),
                Err(_) => ("-".to_string(), "unroutable"),
            };
            println!("{:<20} {:<8} {:<45} {:<14} {}", stage, role, model, provider, key);
        }
    }
    Ok(())
}

fn key_status(config: &PenwrightConfig, kind: ProviderKind) -> &'static str {
    if config.providers.get(kind).resolve_api_key().is_some() {
        "set"
    } else {
        "missing"
    }
}

struct AskArgs {
    message: String,
    stage: String,
    system: Option<String>,
    model: Option<String>,
    json: bool,
    web_search: bool,
    level: Option<ValidationLevel>,
    min_length: Option<usize>,
    lang: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

async fn cmd_ask(config_path: &Option<PathBuf>, args: AskArgs) -> Result<()> {
    let config = PenwrightConfig::load(config_path)?;

    let router = Arc::new(ProviderRouter::new(config.providers.clone()));
    let orchestrator = RequestOrchestrator::new(router, config.stages.clone())
        .with_retry_config(&config.retry);
    let tracker = Arc::new(TokenTracker::new(args.stage.clone()));

    let mut messages = Vec::new();
    if let Some(system) = args.system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(args.message));

    let level = args.level.unwrap_or(config.validation.level);
    let mut params = ValidationParams::default()
        .with_min_length(args.min_length.unwrap_or(config.validation.min_length));
    if let Some(lang) = args.lang.or_else(|| config.validation.target_language.clone()) {
        params = params.with_target_language(lang);
    }

    let mut spec = RequestSpec::new(args.stage.clone(), messages)
        .with_validation(Validation::from(level))
        .with_params(params)
        .with_web_search(args.web_search)
        .with_recorder(tracker.clone());
    if args.json {
        spec = spec.with_response_format(ResponseFormat::JsonObject);
    }
    if let Some(model) = args.model {
        spec = spec.with_model(model);
    }
    if let Some(temperature) = args.temperature {
        spec = spec.with_temperature(temperature);
    }
    if let Some(max_tokens) = args.max_tokens {
        spec = spec.with_max_tokens(max_tokens);
    }
    let base_path = config.output.base_path();
    if let Some(base) = &base_path {
        spec = spec.with_base_path(base.clone());
    }

    let timeout = config.deadline.section_timeout();
    let printed = if args.json {
        with_deadline(&args.stage, timeout, orchestrator.execute_with(&spec, &JsonPostProcessor))
            .await
            .map(|outcome| {
                info!(
                    "Answered by {} via {} on attempt {}",
                    outcome.model, outcome.provider, outcome.attempt
                );
                serde_json::to_string_pretty(&outcome.value)
            })
    } else {
        with_deadline(&args.stage, timeout, orchestrator.execute(&spec))
            .await
            .map(|outcome| {
                info!(
                    "Answered by {} via {} on attempt {} ({})",
                    outcome.model, outcome.provider, outcome.attempt, outcome.value.finish_reason
                );
                Ok::<_, serde_json::Error>(outcome.value.text)
            })
    };

    if let Some(base) = &base_path
        && config.output.save_usage_report
        && !tracker.is_empty()
    {
        let path = base.join(format!("token_usage_{}.json", tracker.session_id()));
        if let Err(e) = tracker.save_report(&path) {
            warn!("Failed to save usage report: {:#}", e);
        }
    }

    match printed {
        Ok(text) => {
            println!("{}", text?);
            eprintln!("\n{}", format_usage_summary(&tracker.summary()));
            Ok(())
        }
        Err(e) => {
            if let LlmError::Exhausted { attempts, .. } = &e {
                for record in attempts {
                    let failure = record
                        .failure()
                        .map_or_else(|| "ok".to_string(), |f| f.to_string());
                    eprintln!(
                        "  {} attempt {} ({}): {}",
                        record.model, record.attempt, record.label, failure
                    );
                }
            }
            Err(e).with_context(|| format!("Request for stage '{}' failed", args.stage))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_validate(
    config_path: &Option<PathBuf>,
    file: &str,
    level: Option<ValidationLevel>,
    original_length: Option<usize>,
    min_length: Option<usize>,
    lang: Option<String>,
    finish_reason: Option<String>,
) -> Result<()> {
    let config = PenwrightConfig::load(config_path)?;
    let text = read_input(file).await?;

    let mut params = ValidationParams::default()
        .with_min_length(min_length.unwrap_or(config.validation.min_length));
    if let Some(lang) = lang.or_else(|| config.validation.target_language.clone()) {
        params = params.with_target_language(lang);
    }
    if let Some(raw) = finish_reason.as_deref() {
        params = params.with_finish_reason(FinishReason::parse(raw));
    }

    let validation = match original_length {
        Some(length) => {
            params = params.with_original_length(length);
            Validation::translation()
        }
        None => Validation::from(level.unwrap_or(config.validation.level)),
    };

    let verdict = validate(&text, &validation, &params);
    match verdict.reason() {
        None => {
            println!("PASS ({}, {} chars)", validation.name(), text.chars().count());
            Ok(())
        }
        Some(reason) => {
            println!("FAIL {}: {}", reason.code(), reason);
            anyhow::bail!("Text rejected by {} validation", validation.name())
        }
    }
}

async fn read_input(file: &str) -> Result<String> {
    if file == "-" {
        use tokio::io::AsyncReadExt;
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read stdin")?;
        Ok(text)
    } else {
        tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_ask_args_parse() {
        let cli = Cli::try_parse_from([
            "penwright",
            "--debug",
            "ask",
            "Write about rivers",
            "--stage",
            "translation_section_2",
            "--level",
            "v3",
            "--json",
        ])
        .unwrap();
        assert!(cli.debug);
        match cli.command {
            Commands::Ask {
                stage, level, json, ..
            } => {
                assert_eq!(stage, "translation_section_2");
                assert_eq!(level, Some(ValidationLevel::Statistical));
                assert!(json);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_bad_level_rejected() {
        assert!(Cli::try_parse_from(["penwright", "validate", "-", "--level", "strict"]).is_err());
    }

    #[tokio::test]
    async fn test_read_input_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("body.txt");
        std::fs::write(&path, "hello").unwrap();
        assert_eq!(read_input(path.to_str().unwrap()).await.unwrap(), "hello");
        assert!(read_input(tmp.path().join("none.txt").to_str().unwrap()).await.is_err());
    }
}
