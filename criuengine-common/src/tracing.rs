use std::io::{self, IsTerminal};

use tracing_subscriber::EnvFilter;

pub use ::tracing::*;

/// Installs the stderr subscriber. Stdout is left alone, it belongs to the
/// runtime and to criu.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}
