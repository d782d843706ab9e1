//! Process-wide tracing setup.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber: an `EnvFilter` over a formatting layer.
///
/// `RUST_LOG` wins when set; otherwise the level is `debug` when
/// `FORGE_DEBUG_LOGGING` is on and `info` otherwise. Returns `false` if a
/// subscriber was already installed, which leaves the existing one in place.
pub fn init_tracing(debug: bool) -> bool {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
