//! Database configuration
//!
//! Connection settings for [`PostgresBackend`](crate::backends::PostgresBackend),
//! loadable from environment variables.

use std::env;
use std::str::FromStr;

use thiserror::Error;

use crate::error::ModelError;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl From<ConfigError> for ModelError {
    fn from(err: ConfigError) -> Self {
        ModelError::Configuration(err.to_string())
    }
}

/// Connection and pool settings for a SQL backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost:5432/elif".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 30,
            idle_timeout_secs: Some(600), // 10 minutes
        }
    }
}

impl DatabaseConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }

    /// Load from `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`,
    /// `DATABASE_MIN_CONNECTIONS`, `DATABASE_ACQUIRE_TIMEOUT` and
    /// `DATABASE_IDLE_TIMEOUT`. Only the URL is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment, map, ...)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let database_url = lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingRequired {
            field: "DATABASE_URL".to_string(),
        })?;

        let config = Self {
            database_url,
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            min_connections: parse_or(&lookup, "DATABASE_MIN_CONNECTIONS", defaults.min_connections)?,
            acquire_timeout_secs: parse_or(&lookup, "DATABASE_ACQUIRE_TIMEOUT", defaults.acquire_timeout_secs)?,
            idle_timeout_secs: match lookup("DATABASE_IDLE_TIMEOUT") {
                Some(raw) => Some(parse_value("DATABASE_IDLE_TIMEOUT", &raw)?),
                None => defaults.idle_timeout_secs,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.database_url.starts_with("postgres://") || self.database_url.starts_with("postgresql://")) {
            return Err(ConfigError::InvalidValue {
                field: "database_url".to_string(),
                value: self.database_url.clone(),
                expected: "a postgres:// or postgresql:// URL".to_string(),
            });
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_connections".to_string(),
                value: self.max_connections.to_string(),
                expected: "at least 1".to_string(),
            });
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue {
                field: "min_connections".to_string(),
                value: self.min_connections.to_string(),
                expected: format!("at most max_connections ({})", self.max_connections),
            });
        }

        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: key.to_string(),
        value: raw.to_string(),
        expected: "a non-negative integer".to_string(),
    })
}
