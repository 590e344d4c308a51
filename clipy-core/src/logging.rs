//! Logging setup for binaries and hosts embedding the core.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to whoever owns the process.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a stderr subscriber. `RUST_LOG` overrides `default_level`.
///
/// Returns false if a global subscriber was already installed.
pub fn init(default_level: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},rusqlite=warn", default_level)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()
        .is_ok()
}
