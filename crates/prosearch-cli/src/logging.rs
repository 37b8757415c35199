//! Diagnostics via `RUST_LOG`, written to stderr. Stdout carries only command output.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Reads `RUST_LOG`; defaults to `warn`. Compact format on stderr.
///
/// ```bash
/// RUST_LOG=prosearch_agent=debug prosearch ask "next lunar eclipse"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
