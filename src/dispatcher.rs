//! Dispatcher: turns requests into tasks and runs them on a bounded pool.
//!
//! # Scheduling
//!
//! A fixed number of workers pull [`Job`]s from one shared queue, so at
//! most `pool_size` executors (and therefore at most `pool_size` outbound
//! model calls) run at once no matter how wide a fan-out is.
//!
//! # Fan-out / fan-in
//!
//! A fan-out kind creates one parent task plus one child per sub-scope. The
//! parent runs no executor. A completion aggregator keyed by the parent id
//! settles each child as it reaches a terminal status, recomputes the
//! parent's progress as `settled * 100 / total`, and finalizes the parent
//! once every child is terminal:
//!
//! - parent cancel requested: `canceled`
//! - any child failed or was canceled on its own: `failed`, listing them
//! - otherwise: `succeeded`
//!
//! A child failure never touches its siblings; their output stays intact.
//!
//! # Cancellation
//!
//! Cancellation is a request. A task that never started is acknowledged
//! immediately (`queued -> canceling -> canceled`). A running task has its
//! cancellation token fired and settles as `canceled` once its executor
//! reaches the next checkpoint; an executor that never checks runs to
//! completion and is then recorded as `canceled`. Cancelling a parent
//! forwards the request to every child still pending.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::context::TaskReporter;
use crate::domain::{validate_id, Document, IdempotencyKey, TaskRecord};
use crate::error::TaskError;
use crate::estimator::ProgressEstimator;
use crate::executor::{
    build_unit, DocumentStore, ExecutionContext, ExecutorError, ExecutorSet, StepOutcome,
};
use crate::gateway::{InvokeOptions, LlmOptions, ModelGateway, DEFAULT_INVOKE_TIMEOUT};
use crate::idempotency::{IdempotencyResolver, Resolution, ResolveMode};
use crate::store::{TaskStore, TimingUpdate};
use crate::types::task::{TaskKind, TaskStatus};

/// Message of a fan-out parent with no units.
pub const NOTHING_TO_DO: &str = "nothing to do";

const CANCELED_BEFORE_START: &str = "canceled before start";
const CANCELED: &str = "canceled";

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of workers.
    pub pool_size: usize,
    /// Per-attempt model call timeout.
    pub invoke_timeout: Duration,
    /// How often a waiting export re-checks its dependencies.
    pub dependency_poll: Duration,
    /// How often elapsed/remaining time of running tasks is refreshed.
    pub progress_tick: Duration,
    /// Sampling options passed to every executor.
    pub llm: LlmOptions,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
            dependency_poll: Duration::from_millis(250),
            progress_tick: Duration::from_secs(1),
            llm: LlmOptions::default(),
        }
    }
}

/// Collaborators the dispatcher drives.
#[derive(Clone)]
pub struct DispatcherParts {
    /// Registry writer and event publisher.
    pub reporter: Arc<TaskReporter>,
    /// Duration model.
    pub estimator: Arc<ProgressEstimator>,
    /// Model gateway shared by all executors.
    pub gateway: Arc<ModelGateway>,
    /// Document accessor.
    pub documents: Arc<dyn DocumentStore>,
    /// Step executors.
    pub executors: ExecutorSet,
}

/// One unit of work waiting for a worker.
#[derive(Debug, Clone)]
struct Job {
    task_id: String,
    scope_id: String,
    kind: TaskKind,
    sub_scope_id: Option<String>,
}

/// Completion aggregator of one fan-out parent.
#[derive(Debug)]
struct FanIn {
    parent_id: String,
    kind: TaskKind,
    total: usize,
    state: Mutex<FanInState>,
}

#[derive(Debug, Default)]
struct FanInState {
    /// Child task id to sub-scope, for children not yet terminal.
    pending: HashMap<String, String>,
    succeeded: usize,
    /// `sub-scope: message` of failed children.
    failed: Vec<String>,
    /// Sub-scopes of children canceled on their own.
    canceled: Vec<String>,
}

impl FanInState {
    fn settle(&mut self, sub_scope: String, record: &TaskRecord) {
        match record.status() {
            TaskStatus::Succeeded => self.succeeded += 1,
            TaskStatus::Canceled => self.canceled.push(sub_scope),
            _ => self.failed.push(format!(
                "{sub_scope}: {}",
                record.task.message.as_deref().unwrap_or("failed")
            )),
        }
    }

    fn settled(&self) -> usize {
        self.succeeded + self.failed.len() + self.canceled.len()
    }
}

struct Shared {
    parts: DispatcherParts,
    config: DispatcherConfig,
    resolver: IdempotencyResolver,
    queue: mpsc::UnboundedSender<Job>,
    fan_ins: DashMap<String, Arc<FanIn>>,
    /// Child task id to the parents aggregating it.
    watchers: DashMap<String, Vec<String>>,
    /// Running tasks refreshed by the progress ticker.
    active: DashSet<String>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Accepts generation requests and runs them on a bounded worker pool.
///
/// Must be started inside a tokio runtime.
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.shared.config)
            .field("fan_ins", &self.shared.fan_ins.len())
            .field("active", &self.shared.active.len())
            .finish()
    }
}

impl Dispatcher {
    /// Spawns the workers and the progress ticker.
    pub fn start(parts: DispatcherParts, config: DispatcherConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let jobs = Arc::new(Mutex::new(rx));
        let shared = Arc::new(Shared {
            resolver: IdempotencyResolver::new(parts.reporter.store().clone()),
            parts,
            config,
            queue: tx,
            fan_ins: DashMap::new(),
            watchers: DashMap::new(),
            active: DashSet::new(),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });

        let pool_size = shared.config.pool_size.max(1);
        for worker in 0..pool_size {
            shared
                .tracker
                .spawn(worker_loop(shared.clone(), jobs.clone(), worker));
        }
        shared.tracker.spawn(progress_ticker(shared.clone()));
        tracing::info!(pool_size = pool_size, "dispatcher started");

        Self { shared }
    }

    /// Submits a request and returns the task that represents it.
    ///
    /// Fan-out kinds return the parent task. Omitting `sub_scopes` for a
    /// fan-out kind derives them from the document.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidRequest`] for malformed identifiers, sub-scopes
    ///   on a document-scope kind, or an unreadable document.
    /// - [`TaskError::ShuttingDown`] after [`shutdown`](Self::shutdown).
    /// - Registry failures.
    pub async fn submit(
        &self,
        scope_id: &str,
        kind: TaskKind,
        sub_scopes: Option<Vec<String>>,
        mode: ResolveMode,
    ) -> Result<TaskRecord, TaskError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(TaskError::ShuttingDown);
        }
        validate_id("scope", scope_id)?;
        if let Some(subs) = &sub_scopes {
            for sub in subs {
                validate_id("sub-scope", sub)?;
            }
        }

        if kind.is_fan_out() {
            self.shared
                .submit_fan_out(scope_id, kind, sub_scopes, mode)
                .await
        } else if sub_scopes.is_some() {
            Err(TaskError::InvalidRequest(format!(
                "{kind} runs at document scope and takes no sub-scopes"
            )))
        } else {
            self.shared.submit_single(scope_id, kind, mode).await
        }
    }

    /// Requests cooperative cancellation of a task.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`], or [`TaskError::InvalidTransition`] for a
    /// task that is already terminal.
    pub async fn cancel(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.shared.cancel(task_id).await
    }

    /// Seconds to run `unit_count` units of `kind` on this pool.
    pub fn estimate(&self, kind: TaskKind, unit_count: usize) -> f64 {
        self.shared.parts.estimator.estimate(kind, unit_count)
    }

    /// Stops accepting work, lets in-flight jobs finish and waits for the
    /// workers to exit. Jobs still queued stay `queued`.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        tracing::info!("dispatcher stopped");
    }
}

impl Shared {
    fn store(&self) -> &Arc<dyn TaskStore> {
        self.parts.reporter.store()
    }

    fn enqueue(&self, job: Job) -> Result<(), TaskError> {
        tracing::debug!(task_id = %job.task_id, kind = %job.kind, "job queued");
        self.queue.send(job).map_err(|_| TaskError::ShuttingDown)
    }

    async fn set_estimate(&self, task_id: &str, secs: f64) -> Result<TaskRecord, TaskError> {
        self.store()
            .update_timing(
                task_id,
                TimingUpdate {
                    estimated_secs: Some(secs),
                    elapsed_secs: None,
                    remaining_secs: Some(secs),
                },
            )
            .await
    }

    async fn submit_single(
        self: &Arc<Self>,
        scope_id: &str,
        kind: TaskKind,
        mode: ResolveMode,
    ) -> Result<TaskRecord, TaskError> {
        let key = IdempotencyKey::new(scope_id, kind, None);
        let claim = self.resolver.claim(&key, mode, None).await?;
        if !claim.created {
            return Ok(claim.record);
        }

        self.parts.reporter.announce(&claim.record);
        let record = self
            .set_estimate(claim.record.task_id(), self.parts.estimator.estimate(kind, 1))
            .await?;
        let job = Job {
            task_id: record.task_id().to_string(),
            scope_id: scope_id.to_string(),
            kind,
            sub_scope_id: None,
        };
        tracing::info!(task_id = %job.task_id, scope_id = scope_id, kind = %kind, "task dispatched");

        if kind == TaskKind::Export {
            self.tracker.spawn(gate_export(self.clone(), job));
        } else {
            self.enqueue(job)?;
        }
        Ok(record)
    }

    async fn submit_fan_out(
        self: &Arc<Self>,
        scope_id: &str,
        kind: TaskKind,
        sub_scopes: Option<Vec<String>>,
        mode: ResolveMode,
    ) -> Result<TaskRecord, TaskError> {
        let parent_key = IdempotencyKey::new(scope_id, kind, None);
        if let Resolution::Reuse(existing) = self.resolver.resolve(&parent_key, mode).await? {
            return Ok(existing);
        }

        let units = match sub_scopes {
            Some(list) => dedup(list),
            None => {
                let document = self.parts.documents.load(scope_id).await.map_err(|err| {
                    TaskError::InvalidRequest(format!("cannot derive {kind} units: {err}"))
                })?;
                derive_sub_scopes(&document, kind, mode)
            },
        };

        let claim = self.resolver.claim(&parent_key, mode, None).await?;
        if !claim.created {
            return Ok(claim.record);
        }
        let parent_id = claim.record.task_id().to_string();
        self.parts.reporter.announce(&claim.record);

        if units.is_empty() {
            self.parts
                .reporter
                .transition(&parent_id, TaskStatus::Running, None)
                .await?;
            return self
                .parts
                .reporter
                .transition(&parent_id, TaskStatus::Succeeded, Some(NOTHING_TO_DO.to_string()))
                .await;
        }

        // Registered and locked before the parent starts: a cancel arriving
        // from here on waits for the child set and then forwards to it.
        // Children that finish early also wait here.
        let fan_in = Arc::new(FanIn {
            parent_id: parent_id.clone(),
            kind,
            total: units.len(),
            state: Mutex::new(FanInState::default()),
        });
        self.fan_ins.insert(parent_id.clone(), fan_in.clone());
        let mut state = fan_in.state.lock().await;

        let estimate = self.parts.estimator.estimate(kind, units.len());
        let started = match self.set_estimate(&parent_id, estimate).await {
            Ok(_) => {
                self.parts
                    .reporter
                    .transition(
                        &parent_id,
                        TaskStatus::Running,
                        Some(format!("dispatching {} {kind} units", units.len())),
                    )
                    .await
            },
            Err(err) => Err(err),
        };
        match started {
            Ok(_) => {},
            Err(TaskError::InvalidTransition { from, .. }) => {
                tracing::warn!(parent_id = %parent_id, status = %from, "parent settled before fan-out");
                self.fan_ins.remove(&parent_id);
                drop(state);
                return self.store().get(&parent_id).await;
            },
            Err(err) => {
                self.fan_ins.remove(&parent_id);
                drop(state);
                return Err(err);
            },
        }
        self.active.insert(parent_id.clone());

        let child_estimate = self.parts.estimator.estimate(kind, 1);
        for sub in units {
            if self.parent_canceling(&parent_id).await {
                tracing::warn!(parent_id = %parent_id, sub_scope_id = %sub, "parent canceled, remaining units not dispatched");
                break;
            }
            let key = IdempotencyKey::new(scope_id, kind, Some(&sub));
            let claim = match self.resolver.claim(&key, mode, Some(&parent_id)).await {
                Ok(claim) => claim,
                Err(err) => {
                    tracing::error!(parent_id = %parent_id, sub_scope_id = %sub, error = %err, "child task not created");
                    state.failed.push(format!("{sub}: {err}"));
                    continue;
                },
            };
            let child_id = claim.record.task_id().to_string();
            self.watchers
                .entry(child_id.clone())
                .or_default()
                .push(parent_id.clone());

            if claim.created {
                self.parts.reporter.announce(&claim.record);
                if let Err(err) = self.set_estimate(&child_id, child_estimate).await {
                    tracing::debug!(task_id = %child_id, error = %err, "child estimate not recorded");
                }
                let job = Job {
                    task_id: child_id.clone(),
                    scope_id: scope_id.to_string(),
                    kind,
                    sub_scope_id: Some(sub.clone()),
                };
                match self.enqueue(job) {
                    Ok(()) => {
                        state.pending.insert(child_id, sub);
                    },
                    Err(err) => {
                        self.unwatch(&child_id, &parent_id);
                        state.failed.push(format!("{sub}: {err}"));
                    },
                }
                continue;
            }

            // Reused child: it may have settled before the watcher existed.
            match self.store().get(&child_id).await {
                Ok(current) if current.status().is_terminal() => {
                    self.unwatch(&child_id, &parent_id);
                    state.settle(sub, &current);
                },
                Ok(_) => {
                    state.pending.insert(child_id, sub);
                },
                Err(err) => {
                    self.unwatch(&child_id, &parent_id);
                    state.failed.push(format!("{sub}: {err}"));
                },
            }
        }

        tracing::info!(
            parent_id = %parent_id,
            scope_id = scope_id,
            kind = %kind,
            children = fan_in.total,
            "fan-out dispatched"
        );
        self.after_settle(&fan_in, &mut state).await;
        drop(state);
        self.store().get(&parent_id).await
    }

    async fn parent_canceling(&self, parent_id: &str) -> bool {
        matches!(
            self.store().get(parent_id).await.map(|r| r.status()),
            Ok(TaskStatus::Canceling | TaskStatus::Canceled)
        )
    }

    fn unwatch(&self, child_id: &str, parent_id: &str) {
        if let Some(mut parents) = self.watchers.get_mut(child_id) {
            parents.retain(|p| p != parent_id);
        }
        self.watchers.remove_if(child_id, |_, parents| parents.is_empty());
    }

    /// Reports parent progress, or finalizes the parent once nothing is pending.
    async fn after_settle(&self, fan_in: &FanIn, state: &mut FanInState) {
        let settled = state.settled();
        if state.pending.is_empty() {
            self.finalize(fan_in, state).await;
            return;
        }
        if settled == 0 {
            return;
        }

        let progress = (settled * 100 / fan_in.total) as u8;
        let message = format!("{settled}/{} {} units finished", fan_in.total, fan_in.kind);
        if let Err(err) = self
            .parts
            .reporter
            .progress(&fan_in.parent_id, progress, Some(message))
            .await
        {
            tracing::debug!(parent_id = %fan_in.parent_id, error = %err, "parent progress not recorded");
        }
    }

    async fn finalize(&self, fan_in: &FanIn, state: &mut FanInState) {
        let parent_id = fan_in.parent_id.as_str();
        let canceling = matches!(
            self.store().get(parent_id).await.map(|r| r.status()),
            Ok(TaskStatus::Canceling)
        );

        let (status, message) = if canceling {
            (
                TaskStatus::Canceled,
                format!("canceled with {}/{} units succeeded", state.succeeded, fan_in.total),
            )
        } else if !state.failed.is_empty() || !state.canceled.is_empty() {
            let mut problems = state.failed.clone();
            problems.extend(state.canceled.iter().map(|sub| format!("{sub}: canceled")));
            (
                TaskStatus::Failed,
                format!(
                    "{} of {} {} units did not succeed: {}",
                    problems.len(),
                    fan_in.total,
                    fan_in.kind,
                    problems.join("; ")
                ),
            )
        } else {
            (
                TaskStatus::Succeeded,
                format!("{} {} units succeeded", fan_in.total, fan_in.kind),
            )
        };

        self.fan_ins.remove(parent_id);
        self.active.remove(parent_id);
        match self.settle_terminal(parent_id, status, message).await {
            Ok(record) => {
                tracing::info!(parent_id = parent_id, status = %record.status(), "fan-in finalized");
            },
            Err(err) => {
                tracing::error!(parent_id = parent_id, error = %err, "fan-in could not finalize parent");
            },
        }
    }

    /// Moves a task to a terminal status, honoring a pending cancel request.
    async fn settle_terminal(
        &self,
        task_id: &str,
        status: TaskStatus,
        message: String,
    ) -> Result<TaskRecord, TaskError> {
        let reporter = &self.parts.reporter;
        match reporter.transition(task_id, status, Some(message)).await {
            Err(TaskError::InvalidTransition {
                from: TaskStatus::Canceling,
                ..
            }) => {
                reporter
                    .transition(task_id, TaskStatus::Canceled, Some(CANCELED.to_string()))
                    .await
            },
            Err(TaskError::InvalidTransition {
                from: TaskStatus::Running,
                to: TaskStatus::Canceled,
                ..
            }) => {
                reporter.request_cancel(task_id).await?;
                reporter
                    .transition(task_id, TaskStatus::Canceled, Some(CANCELED.to_string()))
                    .await
            },
            other => other,
        }
    }

    /// Settles a task and notifies the aggregators watching it.
    async fn finish(&self, task_id: &str, status: TaskStatus, message: String) -> Option<TaskRecord> {
        let record = match self.settle_terminal(task_id, status, message).await {
            Ok(record) => record,
            Err(TaskError::InvalidTransition { .. }) => {
                tracing::debug!(task_id = task_id, "task already settled");
                return None;
            },
            Err(err) => {
                tracing::error!(task_id = task_id, error = %err, "task could not be settled");
                return None;
            },
        };

        self.active.remove(task_id);
        if record.status() == TaskStatus::Failed {
            tracing::error!(
                task_id = task_id,
                scope_id = %record.task.scope_id,
                kind = %record.kind(),
                reason = record.task.message.as_deref().unwrap_or_default(),
                "task failed"
            );
        }

        let parents = self
            .watchers
            .remove(task_id)
            .map(|(_, parents)| parents)
            .unwrap_or_default();
        for parent_id in parents {
            let Some(fan_in) = self.fan_ins.get(&parent_id).map(|f| f.clone()) else {
                continue;
            };
            let mut state = fan_in.state.lock().await;
            if let Some(sub) = state.pending.remove(task_id) {
                state.settle(sub, &record);
                self.after_settle(&fan_in, &mut state).await;
            }
        }
        Some(record)
    }

    async fn cancel(&self, task_id: &str) -> Result<TaskRecord, TaskError> {
        self.cancel_one(task_id).await?;

        let fan_in = self.fan_ins.get(task_id).map(|f| f.clone());
        if let Some(fan_in) = fan_in {
            let children: Vec<String> = fan_in.state.lock().await.pending.keys().cloned().collect();
            tracing::warn!(parent_id = task_id, children = children.len(), "forwarding cancellation to children");
            for child_id in children {
                if let Err(err) = self.cancel_one(&child_id).await {
                    tracing::debug!(task_id = %child_id, error = %err, "child cancel skipped");
                }
            }
        }
        self.store().get(task_id).await
    }

    async fn cancel_one(&self, task_id: &str) -> Result<(), TaskError> {
        let record = self.parts.reporter.request_cancel(task_id).await?;
        let never_started = record.started_at.is_none();
        if record.status() == TaskStatus::Canceling && never_started {
            self.finish(task_id, TaskStatus::Canceled, CANCELED_BEFORE_START.to_string())
                .await;
        }
        Ok(())
    }

    async fn run_job(&self, job: Job) {
        let task_id = job.task_id.as_str();
        match self
            .parts
            .reporter
            .transition(task_id, TaskStatus::Running, None)
            .await
        {
            Ok(_) => {},
            Err(TaskError::InvalidTransition {
                from: TaskStatus::Canceling,
                ..
            }) => {
                self.finish(task_id, TaskStatus::Canceled, CANCELED_BEFORE_START.to_string())
                    .await;
                return;
            },
            Err(TaskError::InvalidTransition { from, .. }) => {
                tracing::debug!(task_id = task_id, status = %from, "job skipped");
                return;
            },
            Err(err) => {
                self.finish(task_id, TaskStatus::Failed, format!("could not start: {err}"))
                    .await;
                return;
            },
        }

        self.active.insert(job.task_id.clone());
        let started = Instant::now();
        match self.execute(&job).await {
            Ok(outcome) => {
                let message = outcome.message.unwrap_or_else(|| "done".to_string());
                let finished = self.finish(task_id, TaskStatus::Succeeded, message).await;
                if finished.is_some_and(|r| r.status() == TaskStatus::Succeeded) {
                    self.parts
                        .estimator
                        .record_duration(job.kind, started.elapsed().as_secs_f64());
                }
            },
            Err(err) if err.is_cancelled() => {
                tracing::warn!(task_id = task_id, "task canceled at checkpoint");
                self.finish(task_id, TaskStatus::Canceled, CANCELED.to_string())
                    .await;
            },
            Err(err) => {
                self.finish(task_id, TaskStatus::Failed, err.to_string()).await;
            },
        }
    }

    async fn execute(&self, job: &Job) -> Result<StepOutcome, ExecutorError> {
        let executor = self.parts.executors.get(job.kind).ok_or_else(|| {
            ExecutorError::Precondition(format!("no executor registered for {}", job.kind))
        })?;
        let document = self.parts.documents.load(&job.scope_id).await?;
        let unit = build_unit(document, job.kind, job.sub_scope_id.as_deref(), self.config.llm);

        let task = self.parts.reporter.context(&job.task_id);
        let ctx = ExecutionContext {
            invoke: InvokeOptions {
                timeout: self.config.invoke_timeout,
                max_retries: None,
                cancel: task.cancel_token().clone(),
            },
            task,
            gateway: self.parts.gateway.clone(),
            documents: self.parts.documents.clone(),
        };
        executor.execute(&unit, &ctx).await
    }

    /// Content-producing tasks of the scope that are not yet terminal.
    async fn pending_dependencies(&self, scope_id: &str) -> Result<usize, TaskError> {
        Ok(self
            .store()
            .list_by_scope(scope_id)
            .await?
            .iter()
            .filter(|r| r.kind().produces_content() && r.status().is_live())
            .count())
    }
}

async fn worker_loop(shared: Arc<Shared>, jobs: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>, worker: usize) {
    tracing::debug!(worker = worker, "worker started");
    loop {
        let job = {
            let mut jobs = jobs.lock().await;
            tokio::select! {
                _ = shared.shutdown.cancelled() => None,
                job = jobs.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };
        shared.run_job(job).await;
    }
    tracing::debug!(worker = worker, "worker stopped");
}

/// Holds an export until every content-producing task of its scope is
/// terminal, then queues it.
async fn gate_export(shared: Arc<Shared>, job: Job) {
    loop {
        match shared.store().get(&job.task_id).await {
            Ok(record) if record.status() != TaskStatus::Queued => return,
            Ok(_) => {},
            Err(err) => {
                tracing::warn!(task_id = %job.task_id, error = %err, "export gate lost its task");
                return;
            },
        }

        match shared.pending_dependencies(&job.scope_id).await {
            Ok(0) => {
                if let Err(err) = shared.enqueue(job.clone()) {
                    tracing::warn!(task_id = %job.task_id, error = %err, "export not queued");
                }
                return;
            },
            Ok(waiting) => {
                tracing::debug!(task_id = %job.task_id, waiting = waiting, "export waiting on content");
            },
            Err(err) => {
                tracing::warn!(task_id = %job.task_id, error = %err, "export dependency check failed");
            },
        }

        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            _ = tokio::time::sleep(shared.config.dependency_poll) => {},
        }
    }
}

/// Refreshes elapsed and remaining time of running tasks.
async fn progress_ticker(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(shared.config.progress_tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = interval.tick() => {},
        }

        let ids: Vec<String> = shared.active.iter().map(|id| id.key().clone()).collect();
        for id in ids {
            match shared.store().get(&id).await {
                Ok(record) if record.status() == TaskStatus::Running => {
                    if let Err(err) = shared
                        .parts
                        .estimator
                        .update(shared.store().as_ref(), &record)
                        .await
                    {
                        tracing::debug!(task_id = %id, error = %err, "timing refresh skipped");
                    }
                },
                Ok(_) => {},
                Err(_) => {
                    shared.active.remove(&id);
                },
            }
        }
    }
}

fn dedup(list: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    list.into_iter().filter(|s| seen.insert(s.clone())).collect()
}

/// Sub-scopes a fan-out covers when the caller names none.
///
/// Under [`ResolveMode::Reuse`] units whose output already exists are
/// skipped; [`ResolveMode::Regenerate`] covers every eligible unit again.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::dispatcher::derive_sub_scopes;
/// use aiwrite_tasks::domain::{Document, Section};
/// use aiwrite_tasks::{ResolveMode, TaskKind};
///
/// let doc = Document {
///     sections: vec![
///         Section { id: "abs".into(), title: "摘要".into(), level: 0, ..Default::default() },
///         Section { id: "ch1".into(), title: "Intro".into(), level: 1, draft: Some("x".into()), ..Default::default() },
///         Section { id: "ch2".into(), title: "Method".into(), level: 1, ..Default::default() },
///     ],
///     ..Default::default()
/// };
/// assert_eq!(derive_sub_scopes(&doc, TaskKind::Draft, ResolveMode::Reuse), vec!["ch2"]);
/// assert_eq!(derive_sub_scopes(&doc, TaskKind::Draft, ResolveMode::Regenerate), vec!["ch1", "ch2"]);
/// assert_eq!(derive_sub_scopes(&doc, TaskKind::Refine, ResolveMode::Reuse), vec!["ch1"]);
/// ```
pub fn derive_sub_scopes(document: &Document, kind: TaskKind, mode: ResolveMode) -> Vec<String> {
    let redo = mode == ResolveMode::Regenerate;
    match kind {
        TaskKind::Draft => document
            .chapters()
            .filter(|c| !c.is_special() && (redo || c.draft.is_none()))
            .map(|c| c.id.clone())
            .collect(),
        TaskKind::Refine => document
            .chapters()
            .filter(|c| !c.is_special() && c.draft.is_some() && (redo || c.final_text.is_none()))
            .map(|c| c.id.clone())
            .collect(),
        TaskKind::ImageAnalysis => document
            .all_figures()
            .into_iter()
            .filter(|(_, f)| f.path.is_some())
            .map(|(_, f)| f.id.clone())
            .collect(),
        TaskKind::TableParse => document
            .all_tables()
            .into_iter()
            .filter(|(_, t)| t.source.is_some())
            .map(|(_, t)| t.id.clone())
            .collect(),
        TaskKind::Outline | TaskKind::Abstract | TaskKind::Export => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Figure, Section, Table};

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let list = vec!["ch2".to_string(), "ch1".to_string(), "ch2".to_string()];
        assert_eq!(dedup(list), vec!["ch2", "ch1"]);
    }

    #[test]
    fn figures_and_tables_need_source_material() {
        let doc = Document {
            sections: vec![Section {
                id: "ch1".into(),
                title: "Results".into(),
                level: 1,
                figures: vec![
                    Figure { id: "fig1".into(), caption: "A".into(), path: Some("a.png".into()), ..Default::default() },
                    Figure { id: "fig2".into(), caption: "B".into(), ..Default::default() },
                ],
                tables: vec![
                    Table { id: "tab1".into(), caption: "T".into(), ..Default::default() },
                    Table { id: "tab2".into(), caption: "U".into(), source: Some("a,b".into()), ..Default::default() },
                ],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(derive_sub_scopes(&doc, TaskKind::ImageAnalysis, ResolveMode::Reuse), vec!["fig1"]);
        assert_eq!(derive_sub_scopes(&doc, TaskKind::TableParse, ResolveMode::Reuse), vec!["tab2"]);
        assert!(derive_sub_scopes(&doc, TaskKind::Outline, ResolveMode::Reuse).is_empty());
    }

    #[test]
    fn regenerating_covers_units_that_already_have_output() {
        let doc = Document {
            sections: vec![
                Section { id: "ch1".into(), title: "Intro".into(), level: 1, draft: Some("d".into()), final_text: Some("f".into()), ..Default::default() },
                Section { id: "ch2".into(), title: "Method".into(), level: 1, draft: Some("d".into()), ..Default::default() },
                Section { id: "ch3".into(), title: "Results".into(), level: 1, ..Default::default() },
                Section { id: "refs".into(), title: "References".into(), level: 1, ..Default::default() },
            ],
            ..Default::default()
        };
        assert_eq!(derive_sub_scopes(&doc, TaskKind::Draft, ResolveMode::Reuse), vec!["ch3"]);
        assert_eq!(
            derive_sub_scopes(&doc, TaskKind::Draft, ResolveMode::Regenerate),
            vec!["ch1", "ch2", "ch3"]
        );
        assert_eq!(derive_sub_scopes(&doc, TaskKind::Refine, ResolveMode::Reuse), vec!["ch2"]);
        // Refining still needs a draft to work from.
        assert_eq!(
            derive_sub_scopes(&doc, TaskKind::Refine, ResolveMode::Regenerate),
            vec!["ch1", "ch2"]
        );
    }

    #[test]
    fn fan_in_counts_every_terminal_outcome() {
        let key = IdempotencyKey::new("P1", TaskKind::Draft, Some("ch1"));
        let mut record = TaskRecord::new(&key, None);
        let mut state = FanInState::default();

        record.task.status = TaskStatus::Succeeded;
        state.settle("ch1".into(), &record);
        record.task.status = TaskStatus::Failed;
        record.task.message = Some("rate limited".into());
        state.settle("ch2".into(), &record);
        record.task.status = TaskStatus::Canceled;
        state.settle("ch3".into(), &record);

        assert_eq!(state.settled(), 3);
        assert_eq!(state.failed, vec!["ch2: rate limited"]);
        assert_eq!(state.canceled, vec!["ch3"]);
    }
}
