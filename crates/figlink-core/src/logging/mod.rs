//! Structured logging setup.
//!
//! All relay components log through `tracing`. Session and channel context
//! travels as structured fields (`client_id`, `channel_id`, `kind`) rather
//! than being formatted into the message, so the JSON output stays
//! queryable.

pub mod test_utils;

pub use test_utils::{CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

/// Output format for [`init_subscriber`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` wins over `level` when set. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails only when a global subscriber already exists
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
}
