//! Logging setup
//!
//! The library only emits `tracing` events; binaries call [`init_logging`]
//! once at startup. Output goes to stderr so query results on stdout stay
//! clean for piping.
//!
//! Filter priority: explicit filter > `PGSESSION_LOG` > `RUST_LOG` > default.

use tracing_subscriber::EnvFilter;

/// Environment variable checked before `RUST_LOG`
pub const LOG_ENV: &str = "PGSESSION_LOG";

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Optional custom filter directive
    pub log_filter: Option<String>,
    /// Only show warnings and errors unless a filter says otherwise
    pub quiet: bool,
}

impl LogConfig {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> bool {
    let env_filter = build_env_filter(config.log_filter.as_deref(), config.quiet);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .try_init()
        .is_ok()
}

fn build_env_filter(custom_filter: Option<&str>, quiet: bool) -> EnvFilter {
    let fallback = if quiet {
        quiet_log_filter()
    } else {
        default_log_filter()
    };
    if let Some(filter) = custom_filter {
        return EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(fallback));
    }

    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Default filter, more verbose in debug builds
pub fn default_log_filter() -> &'static str {
    #[cfg(debug_assertions)]
    {
        "info,pgsession=debug,tokio_postgres=warn,rustls=warn"
    }
    #[cfg(not(debug_assertions))]
    {
        "info,tokio_postgres=warn,rustls=warn"
    }
}

fn quiet_log_filter() -> &'static str {
    "warn"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_filter_wins() {
        let filter = build_env_filter(Some("pgsession=trace"), true);
        assert_eq!(filter.to_string(), "pgsession=trace");
    }

    #[test]
    fn test_invalid_custom_filter_falls_back() {
        let filter = build_env_filter(Some("pgsession=loudest"), true);
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn test_config_builder() {
        let config = LogConfig::default().with_filter("debug").quiet(true);
        assert_eq!(config.log_filter.as_deref(), Some("debug"));
        assert!(config.quiet);
    }
}
