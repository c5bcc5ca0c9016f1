//! Runtime configuration loaded from environment variables.

use thiserror::Error;

use crate::shipment_service::DEFAULT_MAX_RETRIES;

/// Pool size used when `SHIPTRACK_DB_MAX_CONNECTIONS` is unset.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Which event store backs the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local store; history is lost on exit.
    Memory,
    /// Postgres `event_log` table.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiptrackConfig {
    pub store: StoreBackend,
    /// Extra attempts after a conflict or an unknown append outcome.
    pub max_retries: u32,
}

impl Default for ShiptrackConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::Memory,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ShiptrackConfig {
    /// Load configuration from environment variables.
    ///
    /// - `SHIPTRACK_STORE` -- `memory` (default) or `postgres`
    /// - `DATABASE_URL` -- required when the store is `postgres`
    /// - `SHIPTRACK_MAX_RETRIES` -- retry budget per command (default 3)
    /// - `SHIPTRACK_DB_MAX_CONNECTIONS` -- Postgres pool size (default 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_retries = parse_or("SHIPTRACK_MAX_RETRIES", &lookup, DEFAULT_MAX_RETRIES)?;

        let backend = lookup("SHIPTRACK_STORE").unwrap_or_else(|| "memory".to_owned());
        let store = match backend.trim().to_ascii_lowercase().as_str() {
            "memory" | "" => StoreBackend::Memory,
            "postgres" => {
                let database_url = lookup("DATABASE_URL")
                    .filter(|url| !url.trim().is_empty())
                    .ok_or(ConfigError::Missing("DATABASE_URL"))?;
                let max_connections = parse_or(
                    "SHIPTRACK_DB_MAX_CONNECTIONS",
                    &lookup,
                    DEFAULT_DB_MAX_CONNECTIONS,
                )?;
                if max_connections == 0 {
                    return Err(ConfigError::Invalid {
                        name: "SHIPTRACK_DB_MAX_CONNECTIONS",
                        reason: "must be at least 1".to_owned(),
                    });
                }
                StoreBackend::Postgres {
                    database_url,
                    max_connections,
                }
            }
            other => {
                return Err(ConfigError::Invalid {
                    name: "SHIPTRACK_STORE",
                    reason: format!("unknown backend {other:?} (expected memory or postgres)"),
                });
            }
        };

        Ok(Self { store, max_retries })
    }
}

fn parse_or<F>(name: &'static str, lookup: &F, default: u32) -> Result<u32, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::Invalid {
            name,
            reason: format!("{e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ShiptrackConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ShiptrackConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_to_memory_store() {
        assert_eq!(load(&[]).unwrap(), ShiptrackConfig::default());
    }

    #[test]
    fn postgres_requires_database_url() {
        assert_eq!(
            load(&[("SHIPTRACK_STORE", "postgres")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
    }

    #[test]
    fn postgres_with_pool_size() {
        let config = load(&[
            ("SHIPTRACK_STORE", "Postgres"),
            ("DATABASE_URL", "postgres://localhost/shiptrack"),
            ("SHIPTRACK_DB_MAX_CONNECTIONS", "12"),
            ("SHIPTRACK_MAX_RETRIES", "0"),
        ])
        .unwrap();

        assert_eq!(
            config.store,
            StoreBackend::Postgres {
                database_url: "postgres://localhost/shiptrack".to_owned(),
                max_connections: 12,
            }
        );
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(matches!(
            load(&[("SHIPTRACK_STORE", "sqlite")]),
            Err(ConfigError::Invalid {
                name: "SHIPTRACK_STORE",
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_numeric_retries() {
        assert!(matches!(
            load(&[("SHIPTRACK_MAX_RETRIES", "lots")]),
            Err(ConfigError::Invalid {
                name: "SHIPTRACK_MAX_RETRIES",
                ..
            })
        ));
    }

    #[test]
    fn rejects_empty_pool() {
        assert!(load(&[
            ("SHIPTRACK_STORE", "postgres"),
            ("DATABASE_URL", "postgres://localhost/shiptrack"),
            ("SHIPTRACK_DB_MAX_CONNECTIONS", "0"),
        ])
        .is_err());
    }
}
