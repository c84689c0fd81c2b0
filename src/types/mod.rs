//! Public value types: task snapshots, statuses, kinds and events.
//!
//! Internal bookkeeping (versions, idempotency keys) lives in the
//! [`domain`](crate::domain) module.

pub mod event;
pub mod task;

pub use event::*;
pub use task::*;
