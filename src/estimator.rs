//! Progress Estimator: advisory time-to-completion for tasks.
//!
//! Per-unit durations are tracked per [`TaskKind`] as an exponentially
//! weighted moving average of completed units, seeded from configured
//! defaults. An estimate for `n` units divides the serial work by the
//! effective concurrency `min(n, pool_size)`.
//!
//! The estimator never gates execution. It only writes the timing fields
//! (`estimated_secs`, `elapsed_secs`, `remaining_secs`) of live tasks.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::domain::TaskRecord;
use crate::error::TaskError;
use crate::gateway::{InvocationObserver, InvocationRecord};
use crate::store::{TaskStore, TimingUpdate};
use crate::types::task::TaskKind;

/// Default EWMA smoothing factor.
pub const DEFAULT_ALPHA: f64 = 0.3;

/// Built-in per-unit duration for a kind, in seconds.
pub fn builtin_unit_secs(kind: TaskKind) -> f64 {
    match kind {
        TaskKind::Outline => 60.0,
        TaskKind::Draft => 90.0,
        TaskKind::Refine => 60.0,
        TaskKind::Abstract => 45.0,
        TaskKind::ImageAnalysis => 20.0,
        TaskKind::TableParse => 10.0,
        TaskKind::Export => 5.0,
    }
}

/// Estimator settings.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::estimator::EstimatorConfig;
/// use aiwrite_tasks::TaskKind;
///
/// let config: EstimatorConfig = toml::from_str(r#"
///     alpha = 0.5
///     [default_secs]
///     draft = 120.0
/// "#).unwrap();
/// assert_eq!(config.default_for(TaskKind::Draft), 120.0);
/// assert_eq!(config.default_for(TaskKind::Outline), 60.0);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// EWMA smoothing factor in `(0, 1]`; higher favours recent units.
    pub alpha: f64,
    /// Per-unit duration used before any history exists, keyed by
    /// [`TaskKind::as_str`].
    pub default_secs: BTreeMap<String, f64>,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            default_secs: TaskKind::ALL
                .iter()
                .map(|kind| (kind.as_str().to_string(), builtin_unit_secs(*kind)))
                .collect(),
        }
    }
}

impl EstimatorConfig {
    /// Default per-unit duration for `kind`.
    pub fn default_for(&self, kind: TaskKind) -> f64 {
        self.default_secs
            .get(kind.as_str())
            .copied()
            .unwrap_or_else(|| builtin_unit_secs(kind))
    }
}

/// Aggregated gateway invocations for one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InvocationStats {
    /// Invocations recorded.
    pub count: u64,
    /// Invocations that produced content.
    pub succeeded: u64,
    /// Invocations that ended in an error.
    pub failed: u64,
    /// Attempts across all invocations.
    pub total_attempts: u64,
    /// Wall-clock time across all invocations.
    pub total_elapsed: Duration,
}

impl InvocationStats {
    /// Mean wall-clock time per invocation.
    pub fn mean_latency(&self) -> Option<Duration> {
        (self.count > 0).then(|| self.total_elapsed / self.count as u32)
    }
}

/// EWMA-based estimator shared by the dispatcher and the gateway.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::estimator::{EstimatorConfig, ProgressEstimator};
/// use aiwrite_tasks::TaskKind;
///
/// let estimator = ProgressEstimator::new(EstimatorConfig::default(), 4);
/// // 5 drafts at 90 s each over min(5, 4) = 4 workers
/// assert_eq!(estimator.estimate(TaskKind::Draft, 5), 112.5);
///
/// estimator.record_duration(TaskKind::Draft, 30.0);
/// assert_eq!(estimator.per_unit_secs(TaskKind::Draft), 30.0);
/// ```
#[derive(Debug)]
pub struct ProgressEstimator {
    config: EstimatorConfig,
    pool_size: usize,
    history: Mutex<HashMap<TaskKind, f64>>,
    stats: Mutex<HashMap<TaskKind, InvocationStats>>,
}

impl ProgressEstimator {
    /// Creates an estimator for a worker pool of `pool_size`.
    pub fn new(config: EstimatorConfig, pool_size: usize) -> Self {
        Self {
            config,
            pool_size: pool_size.max(1),
            history: Mutex::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Current per-unit duration for `kind`: the EWMA, or the default.
    pub fn per_unit_secs(&self, kind: TaskKind) -> f64 {
        self.history
            .lock()
            .get(&kind)
            .copied()
            .unwrap_or_else(|| self.config.default_for(kind))
    }

    /// Seconds to complete `unit_count` units of `kind`.
    pub fn estimate(&self, kind: TaskKind, unit_count: usize) -> f64 {
        if unit_count == 0 {
            return 0.0;
        }
        let concurrency = unit_count.min(self.pool_size) as f64;
        self.per_unit_secs(kind) * unit_count as f64 / concurrency
    }

    /// Feeds the duration of one completed unit into the EWMA.
    pub fn record_duration(&self, kind: TaskKind, secs: f64) {
        if !secs.is_finite() || secs < 0.0 {
            return;
        }
        let alpha = self.config.alpha;
        let mut history = self.history.lock();
        history
            .entry(kind)
            .and_modify(|avg| *avg = alpha * secs + (1.0 - alpha) * *avg)
            .or_insert(secs);
    }

    /// Remaining seconds, floored at zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use aiwrite_tasks::estimator::ProgressEstimator;
    ///
    /// assert_eq!(ProgressEstimator::remaining(60.0, 45.0), 15.0);
    /// assert_eq!(ProgressEstimator::remaining(60.0, 75.0), 0.0);
    /// ```
    pub fn remaining(estimated: f64, elapsed: f64) -> f64 {
        (estimated - elapsed).max(0.0)
    }

    /// Recomputes elapsed and remaining time of a live task and writes them.
    ///
    /// A task whose remaining time sits at zero while still running is
    /// the stuck-task signal; nothing fails it automatically.
    ///
    /// # Errors
    ///
    /// Propagates registry failures.
    pub async fn update(
        &self,
        store: &dyn TaskStore,
        record: &TaskRecord,
    ) -> Result<TaskRecord, TaskError> {
        let elapsed = record.running_secs();
        let estimated = record.task.estimated_secs.unwrap_or_else(|| self.estimate(record.kind(), 1));
        store
            .update_timing(
                record.task_id(),
                TimingUpdate {
                    estimated_secs: None,
                    elapsed_secs: Some(elapsed),
                    remaining_secs: Some(Self::remaining(estimated, elapsed)),
                },
            )
            .await
    }

    /// Aggregated gateway invocations for `kind`.
    pub fn invocation_stats(&self, kind: TaskKind) -> InvocationStats {
        self.stats.lock().get(&kind).copied().unwrap_or_default()
    }
}

impl InvocationObserver for ProgressEstimator {
    fn record(&self, record: &InvocationRecord) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(record.kind).or_default();
        entry.count += 1;
        entry.total_attempts += u64::from(record.attempts);
        entry.total_elapsed += record.elapsed;
        if record.outcome.is_success() {
            entry.succeeded += 1;
        } else {
            entry.failed += 1;
        }
    }
}
