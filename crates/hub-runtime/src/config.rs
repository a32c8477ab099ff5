//! Hub configuration.
//!
//! Each crate owns its config struct; `HubConfig` aggregates them and
//! applies `AITHER_*` environment overrides on top of the defaults.

use az_01_api_registry::{RegistryConfig, SecurityConfig};
use az_02_module_loader::LoaderConfig;
use serde::{Deserialize, Serialize};
use shared_bus::BusConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Log filter used when `RUST_LOG` is unset. Read by the binary before
/// any configuration is loaded.
pub const LOG_LEVEL_VAR: &str = "AITHER_LOG_LEVEL";

/// Complete hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub bus: BusConfig,
    pub registry: RegistryConfig,
    /// Install the security middleware at startup
    pub enable_security: bool,
    pub security: SecurityConfig,
    pub loader: LoaderConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            registry: RegistryConfig::default(),
            enable_security: false,
            security: SecurityConfig::default(),
            loader: LoaderConfig::default(),
        }
    }
}

impl HubConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`. Values that fail to parse are
    /// ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let env = EnvReader { lookup: &lookup };

        // Message bus
        env.apply("AITHER_MAX_QUEUE_SIZE", &mut config.bus.max_queue_size);
        env.apply("AITHER_MAX_EVENT_HISTORY", &mut config.bus.max_event_history);
        env.apply_secs("AITHER_DEFAULT_TTL_SECS", &mut config.bus.default_ttl);
        env.apply("AITHER_DISPATCH_WORKERS", &mut config.bus.dispatch_workers);

        // API registry
        env.apply_secs("AITHER_API_TIMEOUT_SECS", &mut config.registry.default_timeout);
        env.apply("AITHER_CALL_HISTORY", &mut config.registry.call_history_capacity);
        env.apply(
            "AITHER_CIRCUIT_THRESHOLD",
            &mut config.registry.circuit_breaker.failure_threshold,
        );
        env.apply_secs(
            "AITHER_CIRCUIT_TIMEOUT_SECS",
            &mut config.registry.circuit_breaker.open_timeout,
        );

        // Security
        env.apply("AITHER_ENABLE_SECURITY", &mut config.enable_security);
        env.apply("AITHER_REQUIRE_AUTH", &mut config.security.require_authentication);
        if let Some(minutes) = env.parse::<u64>("AITHER_TOKEN_EXPIRATION_MINUTES") {
            config.security.default_token_expiration = Duration::from_secs(minutes * 60);
        }

        // Loader
        env.apply("AITHER_MAX_PARALLEL", &mut config.loader.max_parallel);
        env.apply("AITHER_LEGACY_MODE", &mut config.loader.legacy_mode);
        env.apply("AITHER_FORCE_RELOAD", &mut config.loader.force);
        if let Some(root) = lookup("AITHER_MODULES_ROOT") {
            config.loader.modules_root = PathBuf::from(root);
        }

        config
    }
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = (self.lookup)(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key, value = %raw, "Ignoring invalid environment override");
                None
            }
        }
    }

    fn apply<T: FromStr>(&self, key: &str, target: &mut T) {
        if let Some(value) = self.parse(key) {
            *target = value;
        }
    }

    fn apply_secs(&self, key: &str, target: &mut Duration) {
        if let Some(secs) = self.parse::<u64>(key) {
            *target = Duration::from_secs(secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.bus.max_queue_size, 10_000);
        assert_eq!(config.bus.default_ttl, Duration::from_secs(300));
        assert_eq!(config.registry.default_timeout, Duration::from_secs(30));
        assert!(!config.enable_security);
    }

    #[test]
    fn test_env_overrides() {
        let config = HubConfig::from_lookup(lookup(&[
            ("AITHER_MAX_QUEUE_SIZE", "50"),
            ("AITHER_DEFAULT_TTL_SECS", "10"),
            ("AITHER_API_TIMEOUT_SECS", "5"),
            ("AITHER_CIRCUIT_THRESHOLD", "2"),
            ("AITHER_ENABLE_SECURITY", "true"),
            ("AITHER_TOKEN_EXPIRATION_MINUTES", "15"),
            ("AITHER_MAX_PARALLEL", "3"),
            ("AITHER_LEGACY_MODE", "true"),
            ("AITHER_MODULES_ROOT", "/opt/aither/modules"),
        ]));

        assert_eq!(config.bus.max_queue_size, 50);
        assert_eq!(config.bus.default_ttl, Duration::from_secs(10));
        assert_eq!(config.registry.default_timeout, Duration::from_secs(5));
        assert_eq!(config.registry.circuit_breaker.failure_threshold, 2);
        assert!(config.enable_security);
        assert_eq!(
            config.security.default_token_expiration,
            Duration::from_secs(15 * 60)
        );
        assert_eq!(config.loader.max_parallel, 3);
        assert!(config.loader.legacy_mode);
        assert_eq!(config.loader.modules_root, PathBuf::from("/opt/aither/modules"));
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let config = HubConfig::from_lookup(lookup(&[
            ("AITHER_MAX_QUEUE_SIZE", "lots"),
            ("AITHER_LEGACY_MODE", "maybe"),
            ("AITHER_DISPATCH_WORKERS", " 4 "),
        ]));
        assert_eq!(config.bus.max_queue_size, 10_000);
        assert!(!config.loader.legacy_mode);
        assert_eq!(config.bus.dispatch_workers, 4);
    }
}
