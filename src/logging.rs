//! Tracing subscriber setup.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs the global subscriber. `RUST_LOG` overrides the default `info`
/// level. Logs go to stderr so CLI output on stdout stays clean. Safe to
/// call more than once.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let result = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .try_init();

        if let Err(e) = result {
            eprintln!("Failed to initialize tracing: {}", e);
        }
    });
}
