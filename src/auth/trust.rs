// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Trust configuration.
//!
//! Raw settings come in one of two shapes:
//!
//! ```json
//! {"alg": ["RS256"], "audience": "...", "domain": "tenant.auth0.com",
//!  "jwks_uri": "https://tenant.auth0.com/.well-known/jwks.json"}
//! ```
//!
//! or a map from environment name to that shape:
//!
//! ```json
//! {"dev": {...}, "test": {...}, "prod": {...}}
//! ```
//!
//! [`TrustConfig::resolve`] turns either into exactly one validated
//! [`TrustConfig`]. Invalid shapes are rejected before any request is served.

use std::collections::BTreeMap;
use std::str::FromStr;

use jsonwebtoken::Algorithm;
use serde::Deserialize;
use serde_json::{Map, Value};
use url::{Host, Url};

use super::error::ConfigError;

/// Default body/query field holding the access token.
pub const DEFAULT_ACCESS_TOKEN_FIELD: &str = "access_token";

/// Keys that make up a single environment's settings.
const FLAT_KEYS: [&str; 5] = ["alg", "audience", "domain", "jwks_uri", "access_token"];

/// Validated trust settings for one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustConfig {
    algorithms: Vec<Algorithm>,
    audience: String,
    domain: String,
    jwks_uri: Url,
    access_token_field: String,
}

impl TrustConfig {
    /// Resolve raw settings into one trust configuration.
    ///
    /// `environment` selects a section of a nested configuration. It is
    /// ignored for a flat configuration, and may be omitted for a nested
    /// configuration with exactly one environment.
    pub fn resolve(raw: &Value, environment: Option<&str>) -> Result<Self, ConfigError> {
        let map = raw.as_object().ok_or(ConfigError::NotAnObject)?;

        match classify(map)? {
            Shape::Flat => {
                if let Some(env) = environment {
                    tracing::warn!(
                        environment = env,
                        "Environment selected but configuration is flat; using it as-is"
                    );
                }
                Self::from_flat(map)
            }
            Shape::Nested => {
                let name = match environment {
                    Some(env) => env.to_string(),
                    None if map.len() == 1 => map.keys().next().cloned().unwrap_or_default(),
                    None => {
                        let names: Vec<&str> = map.keys().map(String::as_str).collect();
                        return Err(ConfigError::EnvironmentNotSelected(names.join(", ")));
                    }
                };
                let section = map
                    .get(&name)
                    .and_then(Value::as_object)
                    .ok_or_else(|| ConfigError::UnknownEnvironment(name.clone()))?;
                Self::from_flat(section)
            }
        }
    }

    /// Resolve every environment of a configuration.
    ///
    /// A flat configuration yields a single entry under `"default"`.
    pub fn resolve_all(raw: &Value) -> Result<BTreeMap<String, Self>, ConfigError> {
        let map = raw.as_object().ok_or(ConfigError::NotAnObject)?;

        match classify(map)? {
            Shape::Flat => Ok(BTreeMap::from([("default".to_string(), Self::from_flat(map)?)])),
            Shape::Nested => map
                .iter()
                .map(|(name, section)| {
                    let section = section
                        .as_object()
                        .ok_or_else(|| ConfigError::UnknownEnvironment(name.clone()))?;
                    Ok((name.clone(), Self::from_flat(section)?))
                })
                .collect(),
        }
    }

    fn from_flat(map: &Map<String, Value>) -> Result<Self, ConfigError> {
        let raw: RawTrustConfig = RawTrustConfig::from_map(map)?;

        if raw.alg.is_empty() {
            return Err(ConfigError::EmptyAlgorithms);
        }
        let mut algorithms = Vec::with_capacity(raw.alg.len());
        for name in &raw.alg {
            let alg = parse_algorithm(name)?;
            if !algorithms.contains(&alg) {
                algorithms.push(alg);
            }
        }

        let audience = non_empty("audience", raw.audience)?;
        let domain = normalize_domain(&non_empty("domain", raw.domain)?)?;
        let jwks_uri = parse_jwks_uri(&raw.jwks_uri)?;
        let access_token_field = match raw.access_token {
            Some(field) => non_empty("access_token", field)?,
            None => DEFAULT_ACCESS_TOKEN_FIELD.to_string(),
        };

        Ok(Self {
            algorithms,
            audience,
            domain,
            jwks_uri,
            access_token_field,
        })
    }

    /// Allowed signature algorithms, in configured order.
    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    /// Whether `alg` is in the allow-list.
    pub fn allows(&self, alg: Algorithm) -> bool {
        self.algorithms.contains(&alg)
    }

    /// Expected audience.
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Issuer host, without scheme or trailing slash.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Accepted `iss` values: `https://{domain}/` and the bare domain.
    pub fn issuers(&self) -> [String; 2] {
        [format!("https://{}/", self.domain), self.domain.clone()]
    }

    /// JWKS endpoint.
    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    /// Body/query field holding the access token.
    pub fn access_token_field(&self) -> &str {
        &self.access_token_field
    }
}

/// Options controlling which checks run during verification.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JwtOptions {
    /// Clock skew tolerance in seconds for `exp` and `nbf`.
    pub leeway: u64,
    /// Reject tokens whose `nbf` is in the future.
    pub verify_nbf: bool,
    /// Check `at_hash` against the access token when both are present.
    pub verify_at_hash: bool,
}

impl Default for JwtOptions {
    fn default() -> Self {
        Self {
            leeway: 0,
            verify_nbf: true,
            verify_at_hash: true,
        }
    }
}

/// Loosely-typed single-environment settings before validation.
struct RawTrustConfig {
    alg: Vec<String>,
    audience: String,
    domain: String,
    jwks_uri: String,
    access_token: Option<String>,
}

impl RawTrustConfig {
    fn from_map(map: &Map<String, Value>) -> Result<Self, ConfigError> {
        let alg = match map.get("alg") {
            None | Some(Value::Null) => return Err(ConfigError::MissingKey("alg")),
            Some(Value::String(single)) => vec![single.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| ConfigError::InvalidValue {
                        key: "alg",
                        reason: "algorithm names must be strings".to_string(),
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(ConfigError::InvalidValue {
                    key: "alg",
                    reason: "expected a list of algorithm names".to_string(),
                })
            }
        };

        Ok(Self {
            alg,
            audience: required_str(map, "audience")?,
            domain: required_str(map, "domain")?,
            jwks_uri: required_str(map, "jwks_uri")?,
            access_token: optional_str(map, "access_token")?,
        })
    }
}

enum Shape {
    Flat,
    Nested,
}

fn classify(map: &Map<String, Value>) -> Result<Shape, ConfigError> {
    let flat: Vec<&str> = map
        .keys()
        .map(String::as_str)
        .filter(|key| FLAT_KEYS.contains(key))
        .collect();
    let sections: Vec<&str> = map
        .iter()
        .filter(|(key, value)| !FLAT_KEYS.contains(&key.as_str()) && value.is_object())
        .map(|(key, _)| key.as_str())
        .collect();

    match (flat.is_empty(), sections.is_empty()) {
        (false, false) => Err(ConfigError::Ambiguous(format!(
            "flat keys [{}] alongside sections [{}]",
            flat.join(", "),
            sections.join(", ")
        ))),
        (false, true) => Ok(Shape::Flat),
        (true, false) => {
            if let Some((key, _)) = map.iter().find(|(_, value)| !value.is_object()) {
                return Err(ConfigError::Ambiguous(format!(
                    "`{key}` is neither a setting nor an environment section"
                )));
            }
            Ok(Shape::Nested)
        }
        (true, true) => Err(ConfigError::MissingKey("alg")),
    }
}

fn required_str(map: &Map<String, Value>, key: &'static str) -> Result<String, ConfigError> {
    optional_str(map, key)?.ok_or(ConfigError::MissingKey(key))
}

fn optional_str(map: &Map<String, Value>, key: &'static str) -> Result<Option<String>, ConfigError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ConfigError::InvalidValue {
            key,
            reason: "expected a string".to_string(),
        }),
    }
}

fn non_empty(key: &'static str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue {
            key,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

/// Only asymmetric algorithms make sense against a published key set.
fn parse_algorithm(name: &str) -> Result<Algorithm, ConfigError> {
    let alg = Algorithm::from_str(name.trim())
        .map_err(|_| ConfigError::UnsupportedAlgorithm(name.to_string()))?;
    match alg {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            Err(ConfigError::UnsupportedAlgorithm(name.to_string()))
        }
        _ => Ok(alg),
    }
}

/// `https://tenant.auth0.com/` and `tenant.auth0.com` both become `tenant.auth0.com`.
fn normalize_domain(domain: &str) -> Result<String, ConfigError> {
    let host = domain
        .strip_prefix("https://")
        .unwrap_or(domain)
        .trim_end_matches('/');
    if host.is_empty() || host.contains("://") || host.contains('/') {
        return Err(ConfigError::InvalidValue {
            key: "domain",
            reason: format!("expected a host name, got `{domain}`"),
        });
    }
    Ok(host.to_string())
}

fn parse_jwks_uri(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
        key: "jwks_uri",
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "https" => Ok(url),
        "http" if is_loopback(&url) => Ok(url),
        _ => Err(ConfigError::InsecureJwksUri(url.to_string())),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain == "localhost",
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
