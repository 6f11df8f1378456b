//! Logging bootstrap
//!
//! Protocol rejections are logged on the [`AUDIT_TARGET`] target so
//! operators can route them separately, e.g.
//! `RUST_LOG=info,spora::audit=warn`.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Target for remote rejections and refused countersignatures
pub const AUDIT_TARGET: &str = "spora::audit";

/// Install the global subscriber. `RUST_LOG` overrides the configured
/// level. Returns false if a subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let installed = if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    };

    installed.is_ok()
}
