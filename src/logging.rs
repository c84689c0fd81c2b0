//! Logging initialization for embedders and tests.
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! host's decision. [`init_logging`] is a convenience for binaries and test
//! harnesses that have none of their own.

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Single-line output.
    #[default]
    Compact,
    /// Multi-line, human oriented output.
    Pretty,
}

/// Installs a global `fmt` subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. Safe to call more than
/// once; later calls, and calls made after another subscriber was installed,
/// are no-ops.
///
/// # Example
///
/// ```rust
/// use aiwrite_tasks::logging::{init_logging, LogFormat};
///
/// init_logging("aiwrite_tasks=info", LogFormat::Compact);
/// init_logging("debug", LogFormat::Pretty); // no-op
/// ```
pub fn init_logging(default_filter: &str, format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

        let result = match format {
            LogFormat::Compact => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
        if result.is_err() {
            tracing::debug!("global subscriber already installed");
        }
    });
}
