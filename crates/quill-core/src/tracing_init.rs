//! Shared tracing/logging initialization.
//!
//! Both quill-relay and quill-client set up `tracing_subscriber` with an
//! env-filter; the relay can additionally emit JSON.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Where formatted log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    /// Keeps stdout free for conversation output.
    Stderr,
}

/// Build the env filter, falling back to `default_filter` when `RUST_LOG` is unset.
fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"quill_relay=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    init_tracing_with(default_filter, log_json, LogTarget::Stdout);
}

/// Same as [`init_tracing`] with an explicit output target.
pub fn init_tracing_with(default_filter: &str, log_json: bool, target: LogTarget) {
    let env_filter = env_filter(default_filter);
    match (log_json, target) {
        (true, LogTarget::Stdout) => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        (true, LogTarget::Stderr) => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        (false, LogTarget::Stdout) => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        (false, LogTarget::Stderr) => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}
