//! Logging bootstrap.

use tracing_subscriber::EnvFilter;

use crate::config::{defaults, env_vars};

/// Install the global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG` (default `twinreg=info`). Set
/// `TWINREG_LOG_JSON=true` for JSON lines. Returns `false` if a subscriber
/// was already installed.
pub fn init_tracing() -> bool {
    let json = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);
    init_tracing_with(json)
}

/// Install the global subscriber with an explicit output format.
pub fn init_tracing_with(json: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(defaults::LOG_FILTER));

    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .try_init()
    };
    result.is_ok()
}
