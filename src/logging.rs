//! Logger initialization with runtime releveling.
//!
//! The daemon re-reads its configuration on SIGHUP and may change the log
//! level without restarting, so the filter is installed behind a reload
//! handle instead of a fixed subscriber.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Registry;

use crate::error::{BalancerError, Result};

/// Handle for releveling the global logger at runtime.
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// Install the global subscriber with the given initial level.
    ///
    /// Must be called once per process; a second call fails.
    pub fn init(level: &str) -> Result<Self> {
        let filter = EnvFilter::try_new(directive(level))
            .map_err(|e| BalancerError::Config(format!("invalid log level '{}': {}", level, e)))?;
        let (filter_layer, handle) = reload::Layer::new(filter);

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_level(true),
            )
            .try_init()
            .map_err(|e| BalancerError::Config(format!("logger already initialized: {}", e)))?;

        Ok(Self { handle })
    }

    /// Change the active log level. Unknown levels fall back to INFO.
    pub fn set_level(&self, level: &str) {
        let filter = EnvFilter::new(directive(level));
        if let Err(e) = self.handle.reload(filter) {
            tracing::warn!("Failed to change log level to {}: {}", level, e);
        }
    }
}

/// Map the configuration vocabulary (INFO, DEBUG, WARNING, CRITICAL) onto
/// tracing filter directives.
fn directive(level: &str) -> &'static str {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARNING" | "WARN" => "warn",
        "CRITICAL" | "ERROR" => "error",
        _ => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_mapping() {
        assert_eq!(directive("DEBUG"), "debug");
        assert_eq!(directive("debug"), "debug");
        assert_eq!(directive("WARNING"), "warn");
        assert_eq!(directive("CRITICAL"), "error");
        assert_eq!(directive("INFO"), "info");
        assert_eq!(directive("bogus"), "info");
    }
}
