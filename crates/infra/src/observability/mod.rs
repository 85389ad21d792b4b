//! Tracing subscriber setup
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and one
//! `fmt` layer, human-readable or JSON. `RUST_LOG` takes precedence over the
//! configured level.

use conduit_domain::{ConduitError, LoggingConfig, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber
///
/// # Errors
/// Returns `ConduitError::Config` if the level directive is invalid or a
/// global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => parse_filter(&config.level)?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry.with(fmt::layer().json().with_current_span(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|err| ConduitError::Config(format!("tracing already initialized: {err}")))
}

/// Build a filter from an `EnvFilter` directive such as `info,conduit_core=debug`
pub fn parse_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|err| ConduitError::Config(format!("invalid log level {directive:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_per_crate_directives() {
        let filter = parse_filter("info,conduit_core=debug").expect("filter");
        assert!(filter.to_string().contains("conduit_core=debug"));
    }

    #[test]
    fn rejects_malformed_directives() {
        assert!(matches!(parse_filter("conduit_core=notalevel"), Err(ConduitError::Config(_))));
    }

    #[test]
    fn second_install_is_an_error() {
        let config = LoggingConfig { level: "warn".to_string(), json: true };
        // The first call may race other tests in this binary; only the
        // second is guaranteed to find a subscriber in place
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
