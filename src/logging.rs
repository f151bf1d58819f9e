//! Diagnostics for the harness itself.
//!
//! stdout belongs to the marker stream and the report, so every log line goes
//! to stderr. The filter comes from `RUST_LOG`, then `THINGSPECTOR_LOG`, and
//! defaults to `warn`; each `-v` raises the default one level.

use tracing_subscriber::EnvFilter;

pub const ENV_LOG: &str = "THINGSPECTOR_LOG";

/// Default directive for a given `-v` count.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    }
}

fn filter(verbosity: u8) -> EnvFilter {
    if verbosity == 0 {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
        if let Ok(filter) = EnvFilter::try_from_env(ENV_LOG) {
            return filter;
        }
    }
    EnvFilter::new(default_directive(verbosity))
}

/// Installs the global subscriber. Calling it again is a no-op.
pub fn init(verbosity: u8) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(verbosity))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
