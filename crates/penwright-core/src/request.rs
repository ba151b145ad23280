//! Retry/fallback orchestration for a single stage invocation
//!
//! One invocation walks an ordered model list (primary, then fallback) and
//! gives each model [`MAX_ATTEMPTS_PER_MODEL`] attempts. Each attempt is a
//! provider call, an emptiness check, the validation gate and an optional
//! post-processor. Any failure short of a configuration error consumes the
//! attempt; between attempts on the same model the orchestrator sleeps per
//! the backoff schedule, and moving to the next model is immediate.
//!
//! ```text
//! ModelSelect ─▶ Attempt ─▶ Validate ─▶ PostProcess ─▶ Success
//!      ▲            ▲  │          │            │
//!      │            └──┴──────────┴────────────┘  (retry, same model)
//!      └─────────────── next model ──┘
//!   no models left ─▶ Exhausted
//! ```

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::artifacts::{ArtifactOutcome, ArtifactSink, AttemptArtifact};
use crate::config::{MAX_ATTEMPTS_PER_MODEL, RetryConfig, StageModels};
use crate::error::{LlmError, Result};
use crate::postprocess::PostProcessor;
use crate::providers::{
    CanonicalResponse, ChatMessage, CompletionRequest, CompletionRouter, ProviderKind,
    ResponseFormat,
};
use crate::usage::{UsageMetadata, UsageRecorder};
use crate::validation::{self, FailureReason, Validation, ValidationParams, ValidationVerdict};

/// Position of a model in the stage's list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelLabel {
    Primary,
    Fallback,
}

impl ModelLabel {
    fn for_index(index: usize) -> Self {
        if index == 0 {
            Self::Primary
        } else {
            Self::Fallback
        }
    }
}

impl std::fmt::Display for ModelLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// States of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    ModelSelect,
    Attempt,
    Validate,
    PostProcess,
    Success,
    Exhausted,
}

impl std::fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelSelect => write!(f, "MODEL_SELECT"),
            Self::Attempt => write!(f, "ATTEMPT"),
            Self::Validate => write!(f, "VALIDATE"),
            Self::PostProcess => write!(f, "POSTPROCESS"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Exhausted => write!(f, "EXHAUSTED"),
        }
    }
}

/// Why an attempt was consumed
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    Transport(String),
    EmptyResponse,
    Validation(FailureReason),
    PostProcess(String),
}

impl AttemptFailure {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::EmptyResponse => "empty_response",
            Self::Validation(reason) => reason.code(),
            Self::PostProcess(_) => "post_process",
        }
    }

    /// The phase the attempt failed in
    pub fn phase(&self) -> RequestPhase {
        match self {
            Self::Transport(_) | Self::EmptyResponse => RequestPhase::Attempt,
            Self::Validation(_) => RequestPhase::Validate,
            Self::PostProcess(_) => RequestPhase::PostProcess,
        }
    }
}

/// Retryable errors become attempt-log entries; anything else is handed back
impl TryFrom<LlmError> for AttemptFailure {
    type Error = LlmError;

    fn try_from(error: LlmError) -> std::result::Result<Self, LlmError> {
        if !error.is_retryable() {
            return Err(error);
        }
        match error {
            LlmError::Transport { provider, message } => {
                Ok(Self::Transport(format!("{}: {}", provider, message)))
            }
            LlmError::EmptyResponse { .. } => Ok(Self::EmptyResponse),
            LlmError::Validation(reason) => Ok(Self::Validation(reason)),
            LlmError::PostProcess(message) => Ok(Self::PostProcess(message)),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "transport: {}", message),
            Self::EmptyResponse => write!(f, "empty response"),
            Self::Validation(reason) => write!(f, "validation: {}", reason),
            Self::PostProcess(message) => write!(f, "post-processing: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(AttemptFailure),
}

/// One entry of an invocation's attempt log
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub model: String,
    /// Known once the provider answered
    pub provider: Option<ProviderKind>,
    /// 1-based, per model
    pub attempt: u32,
    pub label: ModelLabel,
    pub outcome: AttemptOutcome,
    pub timestamp: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Succeeded)
    }

    pub fn failure(&self) -> Option<&AttemptFailure> {
        match &self.outcome {
            AttemptOutcome::Succeeded => None,
            AttemptOutcome::Failed(failure) => Some(failure),
        }
    }
}

/// Everything one invocation needs
#[derive(Clone)]
pub struct RequestSpec {
    /// Stage name, possibly section-scoped (`translation_section_2`)
    pub stage: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub response_format: Option<ResponseFormat>,
    pub web_search: bool,
    pub validation: Validation,
    pub params: ValidationParams,
    /// Replaces the stage's primary model; the stage fallback still applies
    pub model_override: Option<String>,
    /// Enables the debug artifact sink
    pub base_path: Option<PathBuf>,
    pub recorder: Option<Arc<dyn UsageRecorder>>,
}

impl std::fmt::Debug for RequestSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSpec")
            .field("stage", &self.stage)
            .field("messages", &self.messages.len())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("response_format", &self.response_format)
            .field("web_search", &self.web_search)
            .field("validation", &self.validation)
            .field("params", &self.params)
            .field("model_override", &self.model_override)
            .field("base_path", &self.base_path)
            .field("recorder", &self.recorder.is_some())
            .finish()
    }
}

impl RequestSpec {
    pub fn new(stage: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            stage: stage.into(),
            messages,
            temperature: 0.3,
            max_tokens: None,
            response_format: None,
            web_search: false,
            validation: Validation::Minimal,
            params: ValidationParams::default(),
            model_override: None,
            base_path: None,
            recorder: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_web_search(mut self, web_search: bool) -> Self {
        self.web_search = web_search;
        self
    }

    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_params(mut self, params: ValidationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn UsageRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    fn completion_request(&self) -> CompletionRequest {
        CompletionRequest {
            messages: self.messages.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: self.response_format,
            web_search: self.web_search,
        }
    }
}

/// Terminal success of an invocation
#[derive(Debug, Clone)]
pub struct RequestOutcome<T> {
    pub value: T,
    pub model: String,
    pub provider: ProviderKind,
    /// Attempt number on `model` that succeeded
    pub attempt: u32,
    pub label: ModelLabel,
    /// Every attempt made, in order, ending with the success
    pub attempts: Vec<AttemptRecord>,
}

impl<T> RequestOutcome<T> {
    /// `(value, model)`
    pub fn into_parts(self) -> (T, String) {
        (self.value, self.model)
    }
}

/// How a validated response becomes the caller's value
enum Finish<'a, T> {
    Passthrough(fn(CanonicalResponse) -> T),
    PostProcess(&'a dyn PostProcessor<T>),
}

enum Step<'a, T> {
    SelectModel,
    Attempt,
    Validate(CanonicalResponse),
    PostProcess(CanonicalResponse, &'a dyn PostProcessor<T>),
    Succeed(CanonicalResponse, T),
    Fail(LlmError, Option<CanonicalResponse>),
    Exhausted,
}

/// Drives stage invocations over a shared router
#[derive(Clone)]
pub struct RequestOrchestrator {
    router: Arc<dyn CompletionRouter>,
    stages: Arc<StageModels>,
    backoff: Vec<Duration>,
}

impl std::fmt::Debug for RequestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOrchestrator")
            .field("stages", &self.stages.len())
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl RequestOrchestrator {
    pub fn new(router: Arc<dyn CompletionRouter>, stages: StageModels) -> Self {
        Self {
            router,
            stages: Arc::new(stages),
            backoff: RetryConfig::default().schedule(),
        }
    }

    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retry_config(self, retry: &RetryConfig) -> Self {
        self.with_backoff(retry.schedule())
    }

    pub fn stages(&self) -> &StageModels {
        &self.stages
    }

    /// Ordered model list for a spec: override or stage primary, then stage fallback
    pub fn models_for(&self, spec: &RequestSpec) -> Result<Vec<String>> {
        let route = self.stages.route_for(&spec.stage);
        let primary = spec
            .model_override
            .clone()
            .or_else(|| route.map(|r| r.primary.clone()))
            .ok_or_else(|| {
                LlmError::Configuration(format!(
                    "no model configured for stage '{}'",
                    spec.stage
                ))
            })?;

        let mut models = vec![primary];
        if let Some(fallback) = route.and_then(|r| r.fallback.as_ref())
            && !models.contains(fallback)
        {
            models.push(fallback.clone());
        }
        Ok(models)
    }

    /// Delay before the attempt after `attempt`; the last entry repeats
    fn backoff_after(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Run an invocation and return the validated response itself
    pub async fn execute(&self, spec: &RequestSpec) -> Result<RequestOutcome<CanonicalResponse>> {
        self.run(spec, Finish::Passthrough(std::convert::identity))
            .await
    }

    /// Run an invocation and convert the validated text with `processor`
    pub async fn execute_with<T, P>(
        &self,
        spec: &RequestSpec,
        processor: &P,
    ) -> Result<RequestOutcome<T>>
    where
        T: Send,
        P: PostProcessor<T>,
    {
        self.run(spec, Finish::PostProcess(processor)).await
    }

    async fn run<T: Send>(
        &self,
        spec: &RequestSpec,
        finish: Finish<'_, T>,
    ) -> Result<RequestOutcome<T>> {
        let models = self.models_for(spec)?;
        let request = spec.completion_request();
        let sink = spec.base_path.as_ref().map(ArtifactSink::new);
        let post_processed = matches!(finish, Finish::PostProcess(_));

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut model_index = 0usize;
        let mut attempt = 0u32;
        let mut step = Step::SelectModel;

        info!(
            "Stage '{}': models to try {:?} (validation: {})",
            spec.stage,
            models,
            spec.validation.name()
        );

        loop {
            step = match step {
                Step::SelectModel => match models.get(model_index) {
                    Some(model) => {
                        attempt = 0;
                        info!(
                            "Stage '{}': using {} model {}",
                            spec.stage,
                            ModelLabel::for_index(model_index),
                            model
                        );
                        Step::Attempt
                    }
                    None => Step::Exhausted,
                },

                Step::Attempt => {
                    attempt += 1;
                    let model = &models[model_index];
                    debug!(
                        "Stage '{}': attempt {}/{} with {}",
                        spec.stage, attempt, MAX_ATTEMPTS_PER_MODEL, model
                    );
                    match self.router.route(model, &request).await {
                        Ok(response) => {
                            if let Some(sink) = &sink {
                                sink.save_raw(&spec.stage, attempt, &response.raw).await;
                            }
                            if response.is_blank() {
                                let error = LlmError::EmptyResponse {
                                    model: model.clone(),
                                };
                                Step::Fail(error, Some(response))
                            } else {
                                Step::Validate(response)
                            }
                        }
                        Err(e) => Step::Fail(e, None),
                    }
                }

                Step::Validate(response) => {
                    let params = spec
                        .params
                        .clone()
                        .with_finish_reason(response.finish_reason);
                    match validation::validate(&response.text, &spec.validation, &params) {
                        ValidationVerdict::Pass => match &finish {
                            Finish::Passthrough(convert) => {
                                let value = convert(response.clone());
                                Step::Succeed(response, value)
                            }
                            Finish::PostProcess(processor) => {
                                Step::PostProcess(response, *processor)
                            }
                        },
                        ValidationVerdict::Fail(reason) => {
                            Step::Fail(LlmError::Validation(reason), Some(response))
                        }
                    }
                }

                Step::PostProcess(response, processor) => {
                    let model = &models[model_index];
                    match processor.process(&response.text, model) {
                        Ok(Some(value)) => Step::Succeed(response, value),
                        Ok(None) => Step::Fail(
                            LlmError::PostProcess("post-processor returned no value".to_string()),
                            Some(response),
                        ),
                        Err(e) => Step::Fail(LlmError::PostProcess(format!("{:#}", e)), Some(response)),
                    }
                }

                Step::Succeed(response, value) => {
                    let model = models[model_index].clone();
                    let label = ModelLabel::for_index(model_index);

                    if let Some(recorder) = &spec.recorder {
                        recorder.record(
                            &spec.stage,
                            &response.usage,
                            &UsageMetadata {
                                model: model.clone(),
                                provider: response.provider,
                                attempt,
                                label,
                                post_processed,
                            },
                        );
                    }

                    if let Some(sink) = &sink {
                        sink.save_attempt(&AttemptArtifact {
                            stage: &spec.stage,
                            model: &model,
                            attempt,
                            text: &response.text,
                            outcome: ArtifactOutcome::Success {
                                validation: spec.validation.name(),
                                post_processed,
                            },
                        })
                        .await;
                    }

                    attempts.push(AttemptRecord {
                        model: model.clone(),
                        provider: Some(response.provider),
                        attempt,
                        label,
                        outcome: AttemptOutcome::Succeeded,
                        timestamp: Utc::now(),
                    });

                    info!(
                        "Stage '{}': {} on attempt {} ({} chars, {} tokens{})",
                        spec.stage,
                        model,
                        attempt,
                        response.text.chars().count(),
                        response.usage.total_tokens,
                        if response.usage.is_estimated() { ", estimated" } else { "" }
                    );

                    return Ok(RequestOutcome {
                        value,
                        model,
                        provider: response.provider,
                        attempt,
                        label,
                        attempts,
                    });
                }

                Step::Fail(error, response) => {
                    let model = &models[model_index];
                    let failure = match AttemptFailure::try_from(error) {
                        Ok(failure) => failure,
                        Err(error) => {
                            error!(
                                "Stage '{}': attempt {} with {} cannot be retried: {}",
                                spec.stage, attempt, model, error
                            );
                            return Err(error);
                        }
                    };
                    warn!(
                        "Stage '{}': attempt {}/{} with {} failed in {}: {}",
                        spec.stage,
                        attempt,
                        MAX_ATTEMPTS_PER_MODEL,
                        model,
                        failure.phase(),
                        failure
                    );

                    if let (Some(sink), Some(response)) = (&sink, &response) {
                        let error = failure.to_string();
                        sink.save_attempt(&AttemptArtifact {
                            stage: &spec.stage,
                            model,
                            attempt,
                            text: &response.text,
                            outcome: ArtifactOutcome::Failure { error: &error },
                        })
                        .await;
                    }

                    attempts.push(AttemptRecord {
                        model: model.clone(),
                        provider: response.as_ref().map(|r| r.provider),
                        attempt,
                        label: ModelLabel::for_index(model_index),
                        outcome: AttemptOutcome::Failed(failure),
                        timestamp: Utc::now(),
                    });

                    if attempt < MAX_ATTEMPTS_PER_MODEL {
                        let delay = self.backoff_after(attempt);
                        if !delay.is_zero() {
                            info!("Stage '{}': retrying {} in {:?}", spec.stage, model, delay);
                            tokio::time::sleep(delay).await;
                        }
                        Step::Attempt
                    } else {
                        error!(
                            "Stage '{}': all {} attempts failed for {}",
                            spec.stage, MAX_ATTEMPTS_PER_MODEL, model
                        );
                        model_index += 1;
                        Step::SelectModel
                    }
                }

                Step::Exhausted => {
                    error!(
                        "Stage '{}': every model failed ({} attempts total)",
                        spec.stage,
                        attempts.len()
                    );
                    return Err(LlmError::Exhausted {
                        stage: spec.stage.clone(),
                        models,
                        attempts_per_model: MAX_ATTEMPTS_PER_MODEL,
                        attempts,
                    });
                }
            };
        }
    }
}

/// Bound any invocation future by a wall-clock deadline
///
/// On expiry the in-flight attempt is dropped and `DeadlineExceeded` is
/// returned; nothing else is cancelled.
pub async fn with_deadline<T, F>(stage: &str, timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Stage '{}' exceeded its {:?} deadline", stage, timeout);
            Err(LlmError::DeadlineExceeded {
                stage: stage.to_string(),
                timeout,
            })
        }
    }
}
