//! Tracing subscriber setup.

use concern_core::{ConfigError, DefaultsResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "concern_storage=info,concern_defaults=info,warn";

/// Logging configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives (e.g. "concern_storage=debug,info")
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Read `CONCERN_LOG` and `CONCERN_LOG_FORMAT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            filter: lookup("CONCERN_LOG").unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            json: lookup("CONCERN_LOG_FORMAT")
                .map(|s| s.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup. A second call fails with `ConfigError::SubscriberInit`.
pub fn init_tracing(config: &TelemetryConfig) -> DefaultsResult<()> {
    let env_filter =
        EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
            field: "CONCERN_LOG".to_string(),
            value: config.filter.clone(),
            reason: e.to_string(),
        })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    installed.map_err(|e| ConfigError::SubscriberInit {
        reason: e.to_string(),
    })?;

    tracing::info!(
        filter = %config.filter,
        json = config.json,
        "Tracing initialized"
    );
    Ok(())
}
