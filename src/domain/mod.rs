//! Domain types for internal task representation.
//!
//! - [`TaskRecord`] - The registry's storage representation of a task
//! - [`IdempotencyKey`] - Semantic identity used for deduplication
//! - [`GenerationUnit`] - The per-job executor input
//! - [`Document`] - The document snapshot executors read and write

pub mod document;
pub mod key;
pub mod record;
pub mod unit;

pub use document::{Document, Figure, Section, Table};
pub use key::{validate_id, IdempotencyKey};
pub use record::TaskRecord;
pub use unit::{GenerationUnit, UnitContext};
