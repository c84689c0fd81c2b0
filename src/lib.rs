//! Asynchronous generation task orchestration for AIWrite.
//!
//! This crate turns a generation request for a document ("outline it",
//! "draft every chapter", "export it") into idempotent, independently
//! schedulable tasks, runs them on a bounded worker pool against model
//! backends with retry and backoff, fans section-level work out and back in,
//! and publishes an ordered per-document event log.
//!
//! # Overview
//!
//! A task moves through a small state machine:
//!
//! ```text
//! queued -> running -> succeeded | failed
//!    \          \
//!     +----------+--> canceling -> canceled
//! ```
//!
//! Submitting the same `(document, kind, sub-scope)` twice returns the same
//! live task. A fan-out kind (draft, refine, image analysis, table parse)
//! creates one parent task whose progress is the share of settled children.
//!
//! # Module Organization
//!
//! - [`engine`] - The facade: submit, inspect, cancel, subscribe
//! - [`types`] - Public task and event snapshots
//! - [`store`] - Task Registry trait, generic CAS store and in-memory backend
//! - [`idempotency`] - Reuse or supersede decisions per idempotency key
//! - [`gateway`] - Model invocation with timeout, retry and repair
//! - [`executor`] - One step executor per generation kind
//! - [`dispatcher`] - Worker pool, fan-out/fan-in and cancellation
//! - [`estimator`] - EWMA duration model and remaining-time estimates
//! - [`events`] - Ordered per-scope event log with live fan-out
//! - [`config`] - TOML and environment configuration
//! - [`error`] - Registry error type

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod domain;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod events;
pub mod executor;
pub mod gateway;
pub mod idempotency;
#[cfg(feature = "logging")]
pub mod logging;
pub mod store;
pub mod types;

// Re-exports for ergonomic access
pub use config::{ConfigError, EngineConfig};
pub use engine::{EngineBuilder, GenerationEngine, SubmitRequest};
pub use error::TaskError;
pub use events::{EventPublisher, EventStream};
pub use idempotency::ResolveMode;
pub use types::*;
