// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for e2sub-controller.

use std::time::Duration;

use crate::controller::{Backoff, ControllerConfig};

/// Controller configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL or path. `None` runs on embedded in-memory stores.
    pub database_url: Option<String>,
    /// Namespace pods are looked up in.
    pub pod_namespace: String,
    /// Reconcile workers per controller.
    pub workers: usize,
    /// Deadline for a reconcile pass and for each store call inside it.
    pub reconcile_timeout: Duration,
    /// First retry delay after a failed reconcile.
    pub backoff_base: Duration,
    /// Upper bound on retry delays.
    pub backoff_max: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            pod_namespace: "default".to_string(),
            workers: 4,
            reconcile_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_millis(10),
            backoff_max: Duration::from_millis(5000),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = lookup("E2SUB_DATABASE_URL").filter(|url| !url.is_empty());

        let pod_namespace = lookup("E2SUB_POD_NAMESPACE")
            .or_else(|| lookup("POD_NAMESPACE"))
            .unwrap_or(defaults.pod_namespace);

        let workers = parse(&lookup, "E2SUB_WORKERS")?.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                name: "E2SUB_WORKERS",
                value: "0".to_string(),
            });
        }

        let reconcile_timeout = parse(&lookup, "E2SUB_RECONCILE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.reconcile_timeout);

        let backoff_base = parse(&lookup, "E2SUB_BACKOFF_BASE_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff_base);

        let backoff_max = parse(&lookup, "E2SUB_BACKOFF_MAX_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff_max);

        Ok(Self {
            database_url,
            pod_namespace,
            workers,
            reconcile_timeout,
            backoff_base,
            backoff_max,
        })
    }

    /// Controller tuning derived from this configuration.
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            reconcile_timeout: self.reconcile_timeout,
            backoff: Backoff::new(self.backoff_base, self.backoff_max),
        }
    }
}

fn parse<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable holds a value that cannot be used.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
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
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.pod_namespace, "default");
        assert_eq!(config.workers, 4);
        assert_eq!(config.reconcile_timeout, Duration::from_secs(30));
        assert_eq!(config.backoff_base, Duration::from_millis(10));
        assert_eq!(config.backoff_max, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("E2SUB_DATABASE_URL", "sqlite:e2sub.db"),
            ("POD_NAMESPACE", "ricxapp"),
            ("E2SUB_WORKERS", "8"),
            ("E2SUB_RECONCILE_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("sqlite:e2sub.db"));
        assert_eq!(config.pod_namespace, "ricxapp");
        assert_eq!(config.controller_config().workers, 8);
        assert_eq!(config.reconcile_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_specific_namespace_wins() {
        let config = Config::from_lookup(lookup(&[
            ("POD_NAMESPACE", "a"),
            ("E2SUB_POD_NAMESPACE", "b"),
        ]))
        .unwrap();
        assert_eq!(config.pod_namespace, "b");
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_lookup(lookup(&[("E2SUB_WORKERS", "many")])).unwrap_err();
        assert!(err.to_string().contains("E2SUB_WORKERS"));
        assert!(Config::from_lookup(lookup(&[("E2SUB_WORKERS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("E2SUB_BACKOFF_MAX_MS", "-1")])).is_err());
    }
}
