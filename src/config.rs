// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the settings file read by the
//! server binary. Configuration is loaded once at startup; any error aborts
//! startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `AUTH_CONFIG_PATH` | JSON settings file (see [`Settings`]) | Required |
//! | `AUTH_ENVIRONMENT` | Environment section to use from the settings file | None |
//! | `JWKS_CACHE_TTL_SECS` | JWKS cache TTL, `0` fetches on every request | `300` |
//! | `JWKS_FETCH_TIMEOUT_SECS` | Timeout for one JWKS fetch | `10` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `TLS_CERT_PATH` | PEM certificate chain; HTTPS when set with `TLS_KEY_PATH` | None |
//! | `TLS_KEY_PATH` | PEM private key | None |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::auth::jwks::{DEFAULT_CACHE_TTL, DEFAULT_FETCH_TIMEOUT};
use crate::auth::{Authenticator, ClaimsMapping, ConfigError, JwksManager, JwtOptions, TrustConfig};
use crate::error::StartupError;

pub const AUTH_CONFIG_PATH_ENV: &str = "AUTH_CONFIG_PATH";
pub const AUTH_ENVIRONMENT_ENV: &str = "AUTH_ENVIRONMENT";
pub const JWKS_CACHE_TTL_ENV: &str = "JWKS_CACHE_TTL_SECS";
pub const JWKS_FETCH_TIMEOUT_ENV: &str = "JWKS_FETCH_TIMEOUT_SECS";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default `RUST_LOG` filter.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

/// Settings file contents.
///
/// ```json
/// {
///   "auth": {"dev": {...}, "prod": {...}},
///   "claims": {"sub": "user_id", "email": "email"},
///   "jwt_options": {"leeway": 30},
///   "digest_access_token": true
/// }
/// ```
///
/// `auth` accepts either shape understood by [`TrustConfig::resolve`].
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub auth: Value,
    #[serde(default)]
    pub claims: Option<ClaimsMapping>,
    #[serde(default)]
    pub jwt_options: JwtOptions,
    /// Strip the access token from the body or query once read.
    #[serde(default = "default_digest_access_token")]
    pub digest_access_token: bool,
}

fn default_digest_access_token() -> bool {
    true
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Self, StartupError> {
        serde_json::from_str(text).map_err(StartupError::ParseSettings)
    }

    pub fn load(path: &Path) -> Result<Self, StartupError> {
        let text = std::fs::read_to_string(path).map_err(|source| StartupError::ReadSettings {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Build the authenticator for `environment`, sharing `jwks`.
    pub fn authenticator(
        &self,
        environment: Option<&str>,
        jwks: JwksManager,
    ) -> Result<Authenticator, ConfigError> {
        let trust = TrustConfig::resolve(&self.auth, environment)?;
        let mut auth = Authenticator::new(trust)?
            .with_jwks(jwks)
            .with_options(self.jwt_options.clone())
            .with_digest_access_token(self.digest_access_token);
        if let Some(mapping) = &self.claims {
            auth = auth.with_claims_mapping(mapping.clone());
        }
        Ok(auth)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        match lookup(LOG_FORMAT_ENV).as_deref().map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Process settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub settings_path: PathBuf,
    pub environment: Option<String>,
    pub cache_ttl: Duration,
    pub fetch_timeout: Duration,
    pub addr: SocketAddr,
    pub tls: Option<TlsPaths>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, StartupError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StartupError> {
        let settings_path = lookup(AUTH_CONFIG_PATH_ENV)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .ok_or(StartupError::MissingEnv(AUTH_CONFIG_PATH_ENV))?;
        let environment = lookup(AUTH_ENVIRONMENT_ENV).filter(|value| !value.trim().is_empty());

        let cache_ttl = seconds(&lookup, JWKS_CACHE_TTL_ENV)?.unwrap_or(DEFAULT_CACHE_TTL);
        let fetch_timeout = seconds(&lookup, JWKS_FETCH_TIMEOUT_ENV)?.unwrap_or(DEFAULT_FETCH_TIMEOUT);

        let host = lookup(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = match lookup(PORT_ENV) {
            Some(value) => value.trim().parse::<u16>().map_err(|_| StartupError::InvalidEnv {
                name: PORT_ENV,
                value,
            })?,
            None => DEFAULT_PORT,
        };
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| StartupError::InvalidEnv {
                name: HOST_ENV,
                value: host,
            })?;

        let tls = match (lookup(TLS_CERT_PATH_ENV), lookup(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(StartupError::MissingEnv(TLS_KEY_PATH_ENV)),
            (None, Some(_)) => return Err(StartupError::MissingEnv(TLS_CERT_PATH_ENV)),
        };

        Ok(Self {
            settings_path,
            environment,
            cache_ttl,
            fetch_timeout,
            addr,
            tls,
        })
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<Duration>, StartupError> {
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| StartupError::InvalidEnv { name, value })
        })
        .transpose()
}
