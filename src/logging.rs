// Tracing subscriber setup for the CLI

use crate::config::Settings;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over the configured filter,
/// `verbose` forces debug output for this crate.
pub fn init(settings: &Settings, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new(format!("{},sayonara_passthrough=debug", settings.log_filter))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter))
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    // try_init: a second call (tests, embedding) keeps the first subscriber
    let _ = if settings.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
