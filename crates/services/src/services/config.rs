//! Runtime settings, read from `PORTAL_*` environment variables.

use std::{net::SocketAddr, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use super::reference_number::ReferenceStrategy;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const BIND_ADDR: &str = "PORTAL_BIND_ADDR";
pub const BULK_CHUNK_SIZE: &str = "PORTAL_BULK_CHUNK_SIZE";
pub const PAGE_SIZE: &str = "PORTAL_PAGE_SIZE";
pub const IMPORT_CHUNK_SIZE: &str = "PORTAL_IMPORT_CHUNK_SIZE";
pub const REFERENCE_STRATEGY: &str = "PORTAL_REFERENCE_STRATEGY";
pub const DB_MAX_CONNECTIONS: &str = "PORTAL_DB_MAX_CONNECTIONS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct PortalConfig {
    #[serde(skip_serializing)]
    #[ts(skip)]
    pub database_url: String,
    #[ts(type = "string")]
    pub bind_addr: SocketAddr,
    pub bulk_chunk_size: usize,
    pub page_size: usize,
    pub import_chunk_size: usize,
    pub reference_strategy: ReferenceStrategy,
    pub db_max_connections: u32,
}

impl PortalConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup(DATABASE_URL)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(DATABASE_URL))?;

        Ok(Self {
            database_url,
            bind_addr: parsed(&lookup, BIND_ADDR, SocketAddr::from(([0, 0, 0, 0], 3001)))?,
            bulk_chunk_size: positive(&lookup, BULK_CHUNK_SIZE, 10)?,
            page_size: positive(&lookup, PAGE_SIZE, 10)?,
            import_chunk_size: positive(&lookup, IMPORT_CHUNK_SIZE, 50)?,
            reference_strategy: parsed(&lookup, REFERENCE_STRATEGY, ReferenceStrategy::default())?,
            db_max_connections: parsed(&lookup, DB_MAX_CONNECTIONS, 5)?,
        })
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        _ => Ok(default),
    }
}

fn positive(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    let value: usize = parsed(lookup, key, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config =
            PortalConfig::from_lookup(lookup(&[(DATABASE_URL, "postgres://localhost/portal")]))
                .unwrap();
        assert_eq!(config.bind_addr.port(), 3001);
        assert_eq!(config.bulk_chunk_size, 10);
        assert_eq!(config.page_size, 10);
        assert_eq!(config.import_chunk_size, 50);
        assert_eq!(config.reference_strategy, ReferenceStrategy::Sequential);
        assert_eq!(config.db_max_connections, 5);
    }

    #[test]
    fn database_url_is_required() {
        let err = PortalConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing(DATABASE_URL));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = PortalConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://db/portal"),
            (BIND_ADDR, "127.0.0.1:8080"),
            (BULK_CHUNK_SIZE, "25"),
            (REFERENCE_STRATEGY, "Randomized"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.bulk_chunk_size, 25);
        assert_eq!(config.reference_strategy, ReferenceStrategy::Randomized);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = PortalConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://db/portal"),
            (BULK_CHUNK_SIZE, "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == BULK_CHUNK_SIZE));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = PortalConfig::from_lookup(lookup(&[
            (DATABASE_URL, "postgres://db/portal"),
            (REFERENCE_STRATEGY, "alphabetical"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: REFERENCE_STRATEGY,
                value: "alphabetical".to_string()
            }
        );
    }
}
