// SPDX-License-Identifier: Apache-2.0
//! Process-environment configuration for the sync server.
//!
//! A single fallible constructor (`Config::from_env`) centralizes every
//! recognized environment key instead of scattering `env::var` calls
//! through the codebase.

use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Error produced while resolving configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required key was not set.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    /// A key was set but could not be parsed into the expected type.
    #[error("invalid value for {key}: {message}")]
    Invalid {
        /// Name of the offending key.
        key: &'static str,
        /// Human-readable reason.
        message: String,
    },
}

/// Pool sizing, matching the recommendations in the concurrency model:
/// 10 max leases, 30s idle timeout, 5s acquisition timeout.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrent connection leases.
    pub max_connections: u32,
    /// How long an idle connection may sit in the pool before being closed.
    pub idle_timeout: Duration,
    /// How long a caller will wait to acquire a connection before failing.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            idle_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind host for both the HTTP and channel endpoints.
    pub host: IpAddr,
    /// Bind port for both the HTTP and channel endpoints.
    pub port: u16,
    /// DSN for the backing relational store.
    pub database_url: String,
    /// Plaintext admin key, compared in constant time against `sk_admin_` bearers.
    pub admin_api_key: String,
    /// Allowed cross-origin values for both the HTTP and channel paths.
    pub cors_origins: Vec<String>,
    /// Structured-logger verbosity directive (e.g. "info", "debug").
    pub log_level: String,
    /// Database connection pool shape.
    pub pool: PoolConfig,
}

impl Config {
    /// Resolve configuration from the process environment.
    ///
    /// `DATABASE_URL` and `ADMIN_API_KEY` are required; everything else has
    /// a documented default so the server can start with a minimal
    /// environment during local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = match std::env::var("HOST") {
            Ok(v) => v
                .parse::<IpAddr>()
                .map_err(|e| ConfigError::Invalid { key: "HOST", message: e.to_string() })?,
            Err(_) => IpAddr::from([0, 0, 0, 0]),
        };

        let port = match std::env::var("PORT") {
            Ok(v) => v
                .parse::<u16>()
                .map_err(|e| ConfigError::Invalid { key: "PORT", message: e.to_string() })?,
            Err(_) => 3000,
        };

        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let admin_api_key =
            std::env::var("ADMIN_API_KEY").map_err(|_| ConfigError::Missing("ADMIN_API_KEY"))?;

        let cors_origins = std::env::var("CORS_ORIGINS")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            host,
            port,
            database_url,
            admin_api_key,
            cors_origins,
            log_level,
            pool: PoolConfig::default(),
        })
    }
}
