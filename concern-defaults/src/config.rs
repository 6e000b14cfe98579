//! Configuration for the defaults manager.

use std::str::FromStr;
use std::time::Duration;

use concern_core::{ConfigError, ReadConcernLevel, SuitabilityPolicy};
use concern_storage::{CacheConfig, ExecutorConfig};

/// Environment variable names read by [`DefaultsConfig::from_env`].
pub mod env {
    pub const FETCH_TIMEOUT_MS: &str = "CONCERN_FETCH_TIMEOUT_MS";
    pub const STALE_RETRY_BACKOFF_MS: &str = "CONCERN_STALE_RETRY_BACKOFF_MS";
    pub const MAX_CONCURRENT_FETCHES: &str = "CONCERN_MAX_CONCURRENT_FETCHES";
    pub const SHUTDOWN_GRACE_MS: &str = "CONCERN_SHUTDOWN_GRACE_MS";
    pub const ALLOWED_READ_CONCERN_LEVELS: &str = "CONCERN_ALLOWED_READ_CONCERN_LEVELS";
}

/// Everything the manager needs to build its cache and executor.
#[derive(Debug, Clone, Default)]
pub struct DefaultsConfig {
    pub cache: CacheConfig,
    pub executor: ExecutorConfig,
    pub policy: SuitabilityPolicy,
}

impl DefaultsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set the refresh executor configuration.
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Set the policy deciding which read concerns may be defaults.
    pub fn with_policy(mut self, policy: SuitabilityPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Load from `CONCERN_*` environment variables, defaulting anything unset.
    ///
    /// Values that fail to parse are logged and fall back to their defaults; call
    /// [`validate`](Self::validate) to reject values that parse but are unusable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str| parse_var::<u64>(&lookup, key).map(Duration::from_millis);

        let defaults = Self::default();

        let cache = CacheConfig {
            fetch_timeout: millis(env::FETCH_TIMEOUT_MS).unwrap_or(defaults.cache.fetch_timeout),
            stale_retry_backoff: millis(env::STALE_RETRY_BACKOFF_MS)
                .unwrap_or(defaults.cache.stale_retry_backoff),
        };

        let executor = ExecutorConfig {
            max_concurrent_fetches: parse_var(&lookup, env::MAX_CONCURRENT_FETCHES)
                .unwrap_or(defaults.executor.max_concurrent_fetches),
            shutdown_grace: millis(env::SHUTDOWN_GRACE_MS)
                .unwrap_or(defaults.executor.shutdown_grace),
            ..defaults.executor
        };

        let policy = lookup(env::ALLOWED_READ_CONCERN_LEVELS)
            .map(|s| SuitabilityPolicy::new(parse_levels(&s)))
            .unwrap_or(defaults.policy);

        Self {
            cache,
            executor,
            policy,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.executor.validate()?;
        self.policy.validate()?;
        Ok(())
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = key, value = %raw, "Ignoring unparseable setting; using default");
            None
        }
    }
}

fn parse_levels(list: &str) -> Vec<ReadConcernLevel> {
    let mut levels = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match ReadConcernLevel::parse(name) {
            Some(level) if !levels.contains(&level) => levels.push(level),
            Some(_) => {}
            None => tracing::warn!(level = name, "Ignoring unknown read concern level"),
        }
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_unset_environment_yields_defaults() {
        let config = DefaultsConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config.cache.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.cache.stale_retry_backoff, Duration::from_secs(1));
        assert_eq!(config.executor.max_concurrent_fetches, 1);
        assert_eq!(config.executor.name, "rwc-defaults-refresh");
        assert_eq!(config.policy, SuitabilityPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_overrides() {
        let config = DefaultsConfig::from_lookup(lookup_from(&[
            (env::FETCH_TIMEOUT_MS, "1500"),
            (env::STALE_RETRY_BACKOFF_MS, "200"),
            (env::MAX_CONCURRENT_FETCHES, "2"),
            (env::SHUTDOWN_GRACE_MS, "750"),
            (env::ALLOWED_READ_CONCERN_LEVELS, "majority, local,majority"),
        ]));

        assert_eq!(config.cache.fetch_timeout, Duration::from_millis(1500));
        assert_eq!(config.cache.stale_retry_backoff, Duration::from_millis(200));
        assert_eq!(config.executor.max_concurrent_fetches, 2);
        assert_eq!(config.executor.shutdown_grace, Duration::from_millis(750));
        assert_eq!(
            config.policy.allowed_read_concern_levels,
            vec![ReadConcernLevel::Majority, ReadConcernLevel::Local]
        );
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = DefaultsConfig::from_lookup(lookup_from(&[
            (env::FETCH_TIMEOUT_MS, "soon"),
            (env::MAX_CONCURRENT_FETCHES, "-3"),
        ]));
        assert_eq!(config.cache.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.executor.max_concurrent_fetches, 1);
    }

    #[test]
    fn test_parse_var() {
        let lookup = lookup_from(&[("A", " 42 "), ("B", "forty")]);
        assert_eq!(parse_var::<u64>(&lookup, "A"), Some(42));
        assert_eq!(parse_var::<u64>(&lookup, "B"), None);
        assert_eq!(parse_var::<u64>(&lookup, "C"), None);
    }

    #[test]
    fn test_validate_rejects_unusable_values() {
        let zero_timeout =
            DefaultsConfig::from_lookup(lookup_from(&[(env::FETCH_TIMEOUT_MS, "0")]));
        assert!(zero_timeout.validate().is_err());

        let no_levels = DefaultsConfig::from_lookup(lookup_from(&[(
            env::ALLOWED_READ_CONCERN_LEVELS,
            "bogus",
        )]));
        assert!(no_levels.policy.allowed_read_concern_levels.is_empty());
        assert!(matches!(
            no_levels.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "allowed_read_concern_levels"
        ));
    }
}
