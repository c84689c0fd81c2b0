//! Model Invocation Gateway.
//!
//! Every executor reaches the model providers through one [`ModelGateway`].
//! The gateway routes a request to the backend registered for its
//! [`BackendClass`], bounds each attempt with a timeout, classifies failures,
//! retries transient ones on the shared [`RetryConfig`] schedule, and
//! reports every invocation to an optional [`InvocationObserver`].
//!
//! # Failure taxonomy
//!
//! | Backend failure                          | Gateway result                        |
//! |------------------------------------------|---------------------------------------|
//! | rate limited, connection, 5xx, timeout   | retried, then [`GatewayError::RetryableExhausted`] |
//! | bad request, unauthorized                | [`GatewayError::Fatal`] after 1 attempt |
//! | unparsable structured output             | one repair pass, then [`GatewayError::ContentInvalid`] |
//! | cancellation token fired                 | [`GatewayError::Cancelled`]           |

pub mod classify;
pub mod policy;
pub mod repair;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use classify::{BackendError, BackendErrorKind, FailureClass};
pub use policy::RetryConfig;

use crate::types::task::{BackendClass, TaskKind};

/// Default per-attempt timeout; long-thinking models need minutes.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(300);

/// Sampling options sent with every model request.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::gateway::LlmOptions;
///
/// let options = LlmOptions::default();
/// assert_eq!(options.max_tokens, 4096);
/// assert!((options.temperature - 0.3).abs() < f32::EPSILON);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct LlmOptions {
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.3,
            top_p: 0.9,
        }
    }
}

/// Binary attachment, e.g. a figure sent to the vision backend.
#[derive(Clone, PartialEq)]
pub struct ImagePayload {
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
    /// Raw bytes; the backend encodes them for its transport.
    pub data: Vec<u8>,
}

impl std::fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePayload")
            .field("media_type", &self.media_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// One generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    /// System prompt, if any.
    pub system: Option<String>,
    /// User prompt.
    pub prompt: String,
    /// Attachments.
    pub images: Vec<ImagePayload>,
    /// Sampling options.
    pub options: LlmOptions,
}

impl ModelRequest {
    /// A text-only request.
    ///
    /// # Examples
    ///
    /// ```
    /// use aiwrite_tasks::gateway::{LlmOptions, ModelRequest};
    ///
    /// let request = ModelRequest::text("Summarise chapter 2", LlmOptions::default())
    ///     .with_system("You are a careful academic editor.");
    /// assert!(request.images.is_empty());
    /// assert!(request.system.is_some());
    /// ```
    pub fn text(prompt: impl Into<String>, options: LlmOptions) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            images: Vec::new(),
            options,
        }
    }

    /// Sets the system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Attaches an image.
    pub fn with_image(mut self, image: ImagePayload) -> Self {
        self.images.push(image);
        self
    }
}

/// Generated content.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    /// Generated text.
    pub content: String,
}

/// A provider endpoint for one backend class.
///
/// Implementations perform exactly one attempt; retries, timeouts and
/// classification are the gateway's job.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Performs one generation attempt.
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, BackendError>;
}

/// Per-call invocation options.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// Timeout of each individual attempt.
    pub timeout: Duration,
    /// Retries after the first attempt for this call. `None` uses the
    /// gateway's [`RetryConfig::max_retries`].
    pub max_retries: Option<u32>,
    /// Fired to abandon the call between or during attempts.
    pub cancel: CancellationToken,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_INVOKE_TIMEOUT,
            max_retries: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Errors surfaced by the gateway after classification and retries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// A transient failure outlived every retry.
    #[error("backend still failing after {attempts} attempts: {last_error}")]
    RetryableExhausted {
        /// Attempts made.
        attempts: u32,
        /// The final attempt's error.
        last_error: BackendError,
    },

    /// A non-recoverable failure; never retried.
    #[error("non-recoverable backend failure after {attempts} attempt(s): {message}")]
    Fatal {
        /// Attempts made.
        attempts: u32,
        /// Provider message.
        message: String,
    },

    /// The response did not have the expected shape, even after repair.
    #[error("invalid model output after {attempts} attempt(s): {message}")]
    ContentInvalid {
        /// Attempts made.
        attempts: u32,
        /// Parse failure description.
        message: String,
    },

    /// The call was cancelled.
    #[error("model invocation cancelled")]
    Cancelled,

    /// No backend is registered for the class.
    #[error("no backend registered for class {class}")]
    BackendUnavailable {
        /// The requested class.
        class: BackendClass,
    },
}

impl GatewayError {
    /// Attempts made before the error surfaced.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::RetryableExhausted { attempts, .. }
            | Self::Fatal { attempts, .. }
            | Self::ContentInvalid { attempts, .. } => *attempts,
            Self::Cancelled | Self::BackendUnavailable { .. } => 0,
        }
    }
}

/// How an invocation ended, as reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// Content returned and accepted.
    Succeeded,
    /// Structured content accepted after the repair pass.
    Repaired,
    /// Transient failures exhausted the retries.
    RetryableExhausted,
    /// Non-recoverable failure.
    Fatal,
    /// Content unusable after repair.
    ContentInvalid,
    /// Cancelled.
    Cancelled,
}

impl InvocationOutcome {
    /// Returns `true` if content was produced.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Repaired)
    }

    fn of(error: &GatewayError) -> Self {
        match error {
            GatewayError::RetryableExhausted { .. } => Self::RetryableExhausted,
            GatewayError::Fatal { .. } | GatewayError::BackendUnavailable { .. } => Self::Fatal,
            GatewayError::ContentInvalid { .. } => Self::ContentInvalid,
            GatewayError::Cancelled => Self::Cancelled,
        }
    }
}

/// One finished invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRecord {
    /// Task kind the call served.
    pub kind: TaskKind,
    /// Backend class called.
    pub class: BackendClass,
    /// Attempts made.
    pub attempts: u32,
    /// Wall-clock time including backoff.
    pub elapsed: Duration,
    /// Outcome.
    pub outcome: InvocationOutcome,
}

/// Receives a record of every invocation.
pub trait InvocationObserver: Send + Sync {
    /// Called once per finished invocation.
    fn record(&self, record: &InvocationRecord);
}

/// The single retry/classification policy object shared by every executor.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::gateway::{ModelGateway, RetryConfig};
/// use aiwrite_tasks::BackendClass;
///
/// let gateway = ModelGateway::new(RetryConfig::default());
/// assert!(!gateway.has_backend(BackendClass::Vision));
/// ```
#[derive(Clone)]
pub struct ModelGateway {
    backends: HashMap<BackendClass, Arc<dyn ModelBackend>>,
    retry: RetryConfig,
    observer: Option<Arc<dyn InvocationObserver>>,
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("classes", &self.backends.keys().collect::<Vec<_>>())
            .field("retry", &self.retry)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl ModelGateway {
    /// Creates a gateway with no backends.
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            backends: HashMap::new(),
            retry,
            observer: None,
        }
    }

    /// Registers the backend for `class`.
    pub fn with_backend(mut self, class: BackendClass, backend: Arc<dyn ModelBackend>) -> Self {
        self.backends.insert(class, backend);
        self
    }

    /// Registers one backend for every class.
    pub fn with_shared_backend(self, backend: Arc<dyn ModelBackend>) -> Self {
        self.with_backend(BackendClass::Reasoning, backend.clone())
            .with_backend(BackendClass::Writing, backend.clone())
            .with_backend(BackendClass::Vision, backend)
    }

    /// Sets the invocation observer.
    pub fn with_observer(mut self, observer: Arc<dyn InvocationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Returns `true` if a backend serves `class`.
    pub fn has_backend(&self, class: BackendClass) -> bool {
        self.backends.contains_key(&class)
    }

    /// The retry schedule.
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Invokes the model and returns its text.
    ///
    /// An empty response is reported as [`GatewayError::ContentInvalid`].
    ///
    /// # Errors
    ///
    /// See the module-level failure taxonomy.
    pub async fn invoke(
        &self,
        kind: TaskKind,
        class: BackendClass,
        request: &ModelRequest,
        options: &InvokeOptions,
    ) -> Result<String, GatewayError> {
        let started = Instant::now();
        let (result, attempts) = self.call(class, request, options).await;
        let result = result.and_then(|content| {
            if content.trim().is_empty() {
                Err(GatewayError::ContentInvalid {
                    attempts,
                    message: "empty response".to_string(),
                })
            } else {
                Ok(content)
            }
        });

        let outcome = match &result {
            Ok(_) => InvocationOutcome::Succeeded,
            Err(err) => InvocationOutcome::of(err),
        };
        self.observe(kind, class, attempts, started, outcome);
        result
    }

    /// Invokes the model and parses its output as JSON, with one repair pass.
    ///
    /// # Errors
    ///
    /// [`GatewayError::ContentInvalid`] when neither the raw text nor the
    /// repaired fragment parses; transport errors as for [`invoke`](Self::invoke).
    pub async fn invoke_structured(
        &self,
        kind: TaskKind,
        class: BackendClass,
        request: &ModelRequest,
        options: &InvokeOptions,
    ) -> Result<Value, GatewayError> {
        let started = Instant::now();
        let (result, attempts) = self.call(class, request, options).await;

        let (result, outcome) = match result {
            Ok(content) => match repair::parse_structured(&content) {
                Ok((value, false)) => (Ok(value), InvocationOutcome::Succeeded),
                Ok((value, true)) => {
                    tracing::debug!(kind = %kind, "structured output salvaged by repair pass");
                    (Ok(value), InvocationOutcome::Repaired)
                },
                Err(message) => (
                    Err(GatewayError::ContentInvalid { attempts, message }),
                    InvocationOutcome::ContentInvalid,
                ),
            },
            Err(err) => {
                let outcome = InvocationOutcome::of(&err);
                (Err(err), outcome)
            },
        };

        self.observe(kind, class, attempts, started, outcome);
        result
    }

    fn observe(
        &self,
        kind: TaskKind,
        class: BackendClass,
        attempts: u32,
        started: Instant,
        outcome: InvocationOutcome,
    ) {
        if let Some(observer) = &self.observer {
            observer.record(&InvocationRecord {
                kind,
                class,
                attempts,
                elapsed: started.elapsed(),
                outcome,
            });
        }
    }

    /// Attempt loop. Returns the result and the number of attempts made.
    async fn call(
        &self,
        class: BackendClass,
        request: &ModelRequest,
        options: &InvokeOptions,
    ) -> (Result<String, GatewayError>, u32) {
        let Some(backend) = self.backends.get(&class) else {
            return (Err(GatewayError::BackendUnavailable { class }), 0);
        };

        let max_retries = options.max_retries.unwrap_or(self.retry.max_retries);
        let mut attempts = 0u32;
        loop {
            if options.cancel.is_cancelled() {
                return (Err(GatewayError::Cancelled), attempts);
            }
            attempts += 1;

            let attempt = tokio::select! {
                _ = options.cancel.cancelled() => return (Err(GatewayError::Cancelled), attempts),
                result = tokio::time::timeout(options.timeout, backend.generate(request)) => result,
            };
            let error = match attempt {
                Ok(Ok(response)) => return (Ok(response.content), attempts),
                Ok(Err(error)) => error,
                Err(_) => BackendError::new(
                    BackendErrorKind::Timeout,
                    format!("no response within {:?}", options.timeout),
                ),
            };

            match error.class() {
                FailureClass::NonRecoverable => {
                    tracing::warn!(class = %class, attempt = attempts, error = %error, "non-recoverable backend failure");
                    return (
                        Err(GatewayError::Fatal {
                            attempts,
                            message: error.to_string(),
                        }),
                        attempts,
                    );
                },
                FailureClass::Transient if attempts > max_retries => {
                    tracing::warn!(class = %class, attempts = attempts, error = %error, "retries exhausted");
                    return (
                        Err(GatewayError::RetryableExhausted {
                            attempts,
                            last_error: error,
                        }),
                        attempts,
                    );
                },
                FailureClass::Transient => {
                    let delay = self.retry.delay_for(attempts);
                    tracing::warn!(
                        class = %class,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient backend failure, backing off"
                    );
                    tokio::select! {
                        _ = options.cancel.cancelled() => return (Err(GatewayError::Cancelled), attempts),
                        _ = tokio::time::sleep(delay) => {},
                    }
                },
            }
        }
    }
}
