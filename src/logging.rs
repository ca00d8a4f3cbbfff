//! provides logging helpers

use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// initiate the global tracing subscriber
///
/// Diagnostics go to stderr; stdout is reserved for rollout progress
/// lines. Defaults to WARN, override with RUST_LOG.
pub(crate) fn init() {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::WARN.into())
        .from_env_lossy();

    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter);

    registry().with(fmt_layer).init();
}
