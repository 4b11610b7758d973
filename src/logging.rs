use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LogConfig;

/// Installs the global subscriber. Logs go to stderr because stdout carries
/// the console transport's output.
pub fn init_logging(config: &LogConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        let layer = fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_ansi(false);
        registry.with(layer).init();
    } else {
        let layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        registry.with(layer).init();
    }
}
