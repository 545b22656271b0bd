//! Logging setup.
//!
//! The library only emits `tracing` events; applications that do not
//! install their own subscriber can call [`init`].

use callguard_core::CallGuardError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Install a global fmt subscriber filtered by `RUST_LOG`, defaulting to
/// `info`.
pub fn init() -> Result<(), CallGuardError> {
    init_with(LogFormat::Pretty, "info")
}

/// Install a global fmt subscriber in `format`. `RUST_LOG` overrides
/// `default_filter` when set.
pub fn init_with(format: LogFormat, default_filter: &str) -> Result<(), CallGuardError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| CallGuardError::configuration(format!("invalid log filter: {e}")))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    result.map_err(|e| CallGuardError::configuration(format!("logging already initialized: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let _ = init_with(LogFormat::Json, "debug");
        assert!(init().is_err());
    }
}
