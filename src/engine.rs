//! The engine facade: one object wiring registry, gateway, dispatcher,
//! estimator and event log together.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use aiwrite_tasks::domain::{Document, Section};
//! use aiwrite_tasks::engine::{EngineBuilder, SubmitRequest};
//! use aiwrite_tasks::executor::InMemoryDocumentStore;
//! use aiwrite_tasks::gateway::{BackendError, ModelBackend, ModelRequest, ModelResponse};
//! use aiwrite_tasks::TaskKind;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ModelBackend for Echo {
//!     async fn generate(&self, _: &ModelRequest) -> Result<ModelResponse, BackendError> {
//!         Ok(ModelResponse { content: "Generated paragraph.".into() })
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let documents = Arc::new(InMemoryDocumentStore::new());
//! documents.insert(Document {
//!     id: "thesis-1".into(),
//!     title: "On Rivers".into(),
//!     sections: vec![Section {
//!         id: "ch1".into(),
//!         title: "Introduction".into(),
//!         level: 1,
//!         ..Section::default()
//!     }],
//!     ..Document::default()
//! });
//!
//! let engine = EngineBuilder::new(documents)
//!     .with_shared_backend(Arc::new(Echo))
//!     .build()
//!     .unwrap();
//!
//! let parent = engine
//!     .submit(SubmitRequest::new("thesis-1", TaskKind::Draft))
//!     .await
//!     .unwrap();
//! assert_eq!(parent.kind, TaskKind::Draft);
//!
//! engine.shutdown().await;
//! # });
//! ```

use std::sync::Arc;

use crate::config::{ConfigError, EngineConfig};
use crate::context::TaskReporter;
use crate::dispatcher::{Dispatcher, DispatcherParts};
use crate::error::TaskError;
use crate::estimator::{InvocationStats, ProgressEstimator};
use crate::events::{EventPublisher, EventStream};
use crate::executor::{
    DocumentRenderer, DocumentStore, ExecutorSet, MarkdownRenderer, StepExecutor,
};
use crate::gateway::{InvocationObserver, ModelBackend, ModelGateway};
use crate::idempotency::ResolveMode;
use crate::store::{InMemoryTaskStore, TaskStore};
use crate::types::event::Event;
use crate::types::task::{BackendClass, Task, TaskKind};

/// A generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    /// Document the work belongs to.
    pub scope_id: String,
    /// What to generate.
    pub kind: TaskKind,
    /// Explicit sub-scopes for a fan-out kind; `None` derives them.
    pub sub_scopes: Option<Vec<String>>,
    /// Whether a succeeded task may be reused.
    pub mode: ResolveMode,
}

impl SubmitRequest {
    /// A request in [`ResolveMode::Reuse`] with derived sub-scopes.
    pub fn new(scope_id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            scope_id: scope_id.into(),
            kind,
            sub_scopes: None,
            mode: ResolveMode::Reuse,
        }
    }

    /// Restricts a fan-out to the given sub-scopes.
    pub fn with_sub_scopes<I, S>(mut self, sub_scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_scopes = Some(sub_scopes.into_iter().map(Into::into).collect());
        self
    }

    /// Forces new tasks even where succeeded ones exist.
    pub fn regenerate(mut self) -> Self {
        self.mode = ResolveMode::Regenerate;
        self
    }
}

/// Assembles a [`GenerationEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    documents: Arc<dyn DocumentStore>,
    store: Option<Arc<dyn TaskStore>>,
    renderer: Option<Arc<dyn DocumentRenderer>>,
    backends: Vec<(BackendClass, Arc<dyn ModelBackend>)>,
    executors: Vec<Arc<dyn StepExecutor>>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("custom_store", &self.store.is_some())
            .field(
                "backends",
                &self.backends.iter().map(|(c, _)| *c).collect::<Vec<_>>(),
            )
            .field("executors", &self.executors.len())
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    /// Starts a builder over the document collaborator.
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            config: EngineConfig::default(),
            documents,
            store: None,
            renderer: None,
            backends: Vec::new(),
            executors: Vec::new(),
        }
    }

    /// Replaces the default configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `store` instead of an [`InMemoryTaskStore`].
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses `renderer` for exports instead of [`MarkdownRenderer`].
    pub fn renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Registers the backend serving `class`.
    pub fn with_backend(mut self, class: BackendClass, backend: Arc<dyn ModelBackend>) -> Self {
        self.backends.push((class, backend));
        self
    }

    /// Registers one backend for every class.
    pub fn with_shared_backend(self, backend: Arc<dyn ModelBackend>) -> Self {
        self.with_backend(BackendClass::Reasoning, backend.clone())
            .with_backend(BackendClass::Writing, backend.clone())
            .with_backend(BackendClass::Vision, backend)
    }

    /// Overrides the built-in executor for the executor's kind.
    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executors.push(executor);
        self
    }

    /// Validates the configuration and starts the worker pool.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when the configuration fails validation.
    pub fn build(self) -> Result<GenerationEngine, ConfigError> {
        self.config.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()) as Arc<dyn TaskStore>);
        let publisher = Arc::new(EventPublisher::new(self.config.event_channel_capacity));
        let reporter = Arc::new(TaskReporter::new(store, publisher.clone()));
        let estimator = Arc::new(ProgressEstimator::new(
            self.config.estimator.clone(),
            self.config.worker_pool_size,
        ));

        let mut gateway = ModelGateway::new(self.config.retry.clone())
            .with_observer(estimator.clone() as Arc<dyn InvocationObserver>);
        for (class, backend) in self.backends {
            gateway = gateway.with_backend(class, backend);
        }
        for class in [BackendClass::Reasoning, BackendClass::Writing, BackendClass::Vision] {
            if !gateway.has_backend(class) {
                tracing::warn!(class = %class, "no backend registered; tasks needing it will fail");
            }
        }

        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(MarkdownRenderer) as Arc<dyn DocumentRenderer>);
        let executors = self
            .executors
            .into_iter()
            .fold(ExecutorSet::standard(renderer), ExecutorSet::with);

        let dispatcher = Dispatcher::start(
            DispatcherParts {
                reporter: reporter.clone(),
                estimator: estimator.clone(),
                gateway: Arc::new(gateway),
                documents: self.documents,
                executors,
            },
            self.config.dispatcher(),
        );

        Ok(GenerationEngine {
            reporter,
            publisher,
            estimator,
            dispatcher,
        })
    }
}

/// Submit, observe and cancel generation work.
pub struct GenerationEngine {
    reporter: Arc<TaskReporter>,
    publisher: Arc<EventPublisher>,
    estimator: Arc<ProgressEstimator>,
    dispatcher: Dispatcher,
}

impl std::fmt::Debug for GenerationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationEngine")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl GenerationEngine {
    /// Submits a request; returns the task representing it, which for a
    /// fan-out kind is the parent.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidRequest`] for malformed identifiers,
    /// [`TaskError::ShuttingDown`] after [`shutdown`](Self::shutdown), and
    /// registry failures.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Task, TaskError> {
        let record = self
            .dispatcher
            .submit(
                &request.scope_id,
                request.kind,
                request.sub_scopes,
                request.mode,
            )
            .await?;
        Ok(record.to_task())
    }

    /// Snapshot of one task.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] for an unknown id.
    pub async fn get_task(&self, task_id: &str) -> Result<Task, TaskError> {
        Ok(self.reporter.store().get(task_id).await?.to_task())
    }

    /// Every task of a scope, oldest first.
    ///
    /// # Errors
    ///
    /// Registry failures.
    pub async fn list_tasks(&self, scope_id: &str) -> Result<Vec<Task>, TaskError> {
        let records = self.reporter.store().list_by_scope(scope_id).await?;
        Ok(records.iter().map(|r| r.to_task()).collect())
    }

    /// Requests cancellation; returns the task as acknowledged.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`], or [`TaskError::InvalidTransition`] for a
    /// terminal task.
    pub async fn cancel(&self, task_id: &str) -> Result<Task, TaskError> {
        Ok(self.dispatcher.cancel(task_id).await?.to_task())
    }

    /// Events of `scope_id` from `from_seq` (inclusive), then live ones.
    pub fn subscribe(&self, scope_id: &str, from_seq: u64) -> EventStream {
        self.publisher.subscribe(scope_id, from_seq)
    }

    /// Logged events of `scope_id` from `from_seq` (inclusive).
    pub fn events_since(&self, scope_id: &str, from_seq: u64) -> Vec<Event> {
        self.publisher.events_since(scope_id, from_seq)
    }

    /// Seconds to run `unit_count` units of `kind`.
    pub fn estimate(&self, kind: TaskKind, unit_count: usize) -> f64 {
        self.dispatcher.estimate(kind, unit_count)
    }

    /// Model call statistics for `kind`.
    pub fn invocation_stats(&self, kind: TaskKind) -> InvocationStats {
        self.estimator.invocation_stats(kind)
    }

    /// Stops accepting work and waits for in-flight jobs.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}
