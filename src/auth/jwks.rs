// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! ## Security
//!
//! - Only public keys (`RSA`, `EC`, `OKP`) are kept; symmetric `oct` keys
//!   published in a key set are ignored
//! - Keys without a `kid` are ignored since tokens are matched by `kid`
//! - A fetch failure fails the request; there is no retry and no fallback
//!   to an expired cache entry
//!
//! ## Caching
//!
//! [`JwksManager`] keeps parsed key sets per `jwks_uri` in a bounded LRU map.
//! Reads take a shared lock; a refresh holds a per-URI async mutex so
//! concurrent requests that miss the cache trigger a single fetch. A TTL of
//! zero disables caching and every call fetches.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use lru::LruCache;
use serde_json::Value;
use tokio::sync::RwLock;
use url::Url;

use super::error::{AuthError, ConfigError};

/// Default JWKS cache TTL (5 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default timeout for one JWKS fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum age of a cached key set before an unknown `kid` forces a refetch.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Number of distinct JWKS endpoints kept in the cache.
const CACHE_CAPACITY: usize = 16;

/// Key family of a JWK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ec,
    Okp,
}

/// A verification key parsed from one JWK.
#[derive(Clone)]
pub struct PublicKeyMaterial {
    kid: String,
    family: KeyFamily,
    algorithm: Option<Algorithm>,
    key: DecodingKey,
}

impl PublicKeyMaterial {
    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// Algorithm pinned by the JWK's `alg` member, if any.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for PublicKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKeyMaterial")
            .field("kid", &self.kid)
            .field("family", &self.family)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Verification keys indexed by `kid`.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, PublicKeyMaterial>,
}

impl KeySet {
    /// Parse a JWKS document.
    ///
    /// The document must be an object with a `keys` array. Entries with an
    /// unsupported `kty`, or without a `kid`, are skipped; entries of a
    /// supported type that lack required members fail the whole document.
    pub fn from_json(document: &Value) -> Result<Self, AuthError> {
        let entries = document
            .get("keys")
            .and_then(Value::as_array)
            .ok_or_else(|| AuthError::KeySetFormat("document has no `keys` array".to_string()))?;

        let mut keys = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if let Some(material) = parse_key(index, entry)? {
                keys.insert(material.kid.clone(), material);
            }
        }
        Ok(Self { keys })
    }

    pub fn get(&self, kid: &str) -> Option<&PublicKeyMaterial> {
        self.keys.get(kid)
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

impl FromIterator<PublicKeyMaterial> for KeySet {
    fn from_iter<I: IntoIterator<Item = PublicKeyMaterial>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().map(|key| (key.kid.clone(), key)).collect(),
        }
    }
}

fn parse_key(index: usize, entry: &Value) -> Result<Option<PublicKeyMaterial>, AuthError> {
    let object = entry
        .as_object()
        .ok_or_else(|| AuthError::KeySetFormat(format!("key #{index} is not an object")))?;

    let kty = object
        .get("kty")
        .and_then(Value::as_str)
        .ok_or_else(|| AuthError::KeySetFormat(format!("key #{index} has no `kty`")))?;
    let family = match kty {
        "RSA" => KeyFamily::Rsa,
        "EC" => KeyFamily::Ec,
        "OKP" => KeyFamily::Okp,
        other => {
            tracing::debug!(index, kty = other, "Skipping non-public key in JWKS");
            return Ok(None);
        }
    };

    let Some(kid) = object.get("kid").and_then(Value::as_str) else {
        tracing::debug!(index, "Skipping JWKS key without kid");
        return Ok(None);
    };

    let jwk: Jwk = serde_json::from_value(entry.clone()).map_err(|e| {
        AuthError::KeySetFormat(format!("key `{kid}` ({kty}) is missing required members: {e}"))
    })?;
    let key = jwk_to_decoding_key(&jwk)
        .map_err(|e| AuthError::KeySetFormat(format!("key `{kid}` ({kty}) is unusable: {e}")))?;

    Ok(Some(PublicKeyMaterial {
        kid: kid.to_string(),
        family,
        algorithm: jwk.common.key_algorithm.and_then(signing_algorithm),
        key,
    }))
}

/// Convert a JWK to a DecodingKey.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, jsonwebtoken::errors::Error> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e),
        AlgorithmParameters::EllipticCurve(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y),
        AlgorithmParameters::OctetKeyPair(okp) => DecodingKey::from_ed_components(&okp.x),
        _ => Err(jsonwebtoken::errors::ErrorKind::InvalidKeyFormat.into()),
    }
}

fn signing_algorithm(alg: KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Fetches and parses JWKS documents.
#[derive(Clone)]
pub struct JwksFetcher {
    client: reqwest::Client,
}

impl JwksFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }

    /// Fetch the key set published at `jwks_uri`.
    pub async fn fetch(&self, jwks_uri: &Url) -> Result<KeySet, AuthError> {
        tracing::debug!(jwks_uri = %jwks_uri, "Fetching JWKS");

        let response = self
            .client
            .get(jwks_uri.clone())
            .send()
            .await
            .map_err(|e| AuthError::KeySetUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::KeySetUnavailable(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AuthError::KeySetUnavailable(e.to_string()))?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| AuthError::KeySetUnavailable(format!("JWKS body is not UTF-8: {e}")))?;
        let document: Value = serde_json::from_str(text)
            .map_err(|e| AuthError::KeySetUnavailable(format!("JWKS body is not JSON: {e}")))?;

        let keys = KeySet::from_json(&document)?;
        tracing::info!(jwks_uri = %jwks_uri, keys = keys.len(), "Fetched JWKS");
        Ok(keys)
    }
}

/// JWKS cache entry.
struct CacheEntry {
    keys: Arc<KeySet>,
    fetched_at: Instant,
}

#[derive(Default)]
struct CacheSlot {
    current: RwLock<Option<CacheEntry>>,
    refresh: tokio::sync::Mutex<()>,
}

impl CacheSlot {
    async fn fresh(&self, ttl: Duration) -> Option<Arc<KeySet>> {
        let current = self.current.read().await;
        current
            .as_ref()
            .filter(|entry| entry.fetched_at.elapsed() < ttl)
            .map(|entry| entry.keys.clone())
    }

    async fn store(&self, keys: KeySet) -> Arc<KeySet> {
        let keys = Arc::new(keys);
        *self.current.write().await = Some(CacheEntry {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });
        keys
    }
}

/// JWKS manager with caching.
///
/// Cheap to clone; clones share the cache. One manager can serve several
/// trust configurations since entries are keyed by `jwks_uri`.
#[derive(Clone)]
pub struct JwksManager {
    fetcher: JwksFetcher,
    cache_ttl: Duration,
    min_refresh_interval: Duration,
    slots: Arc<Mutex<LruCache<String, Arc<CacheSlot>>>>,
}

impl JwksManager {
    /// Create a manager with the default timeout and TTL.
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    /// Create a manager whose fetches time out after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, ConfigError> {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            fetcher: JwksFetcher::new(timeout)?,
            cache_ttl: DEFAULT_CACHE_TTL,
            min_refresh_interval: MIN_REFRESH_INTERVAL,
            slots: Arc::new(Mutex::new(LruCache::new(capacity))),
        })
    }

    /// Set the cache TTL. Zero disables caching.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Minimum age of a cached set before an unknown `kid` may refetch it.
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    fn caching(&self) -> bool {
        !self.cache_ttl.is_zero()
    }

    fn slot(&self, jwks_uri: &Url) -> Arc<CacheSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get_or_insert(jwks_uri.to_string(), || Arc::new(CacheSlot::default()))
            .clone()
    }

    /// Get the key set for `jwks_uri`, fetching it if not cached.
    pub async fn key_set(&self, jwks_uri: &Url) -> Result<Arc<KeySet>, AuthError> {
        if !self.caching() {
            return self.fetcher.fetch(jwks_uri).await.map(Arc::new);
        }

        let slot = self.slot(jwks_uri);
        if let Some(keys) = slot.fresh(self.cache_ttl).await {
            return Ok(keys);
        }

        let _refresh = slot.refresh.lock().await;
        // Another request may have refreshed while we waited.
        if let Some(keys) = slot.fresh(self.cache_ttl).await {
            return Ok(keys);
        }
        let keys = self.fetcher.fetch(jwks_uri).await?;
        Ok(slot.store(keys).await)
    }

    /// Refetch after an unknown `kid` was looked up in `stale`.
    ///
    /// If the cache already holds a different set (another request refreshed
    /// it), that set is returned without fetching. Otherwise the set is
    /// refetched unless it is younger than the minimum refresh interval.
    /// Returns `None` when there is nothing new to try.
    pub async fn refresh_for_unknown_kid(
        &self,
        jwks_uri: &Url,
        stale: &Arc<KeySet>,
    ) -> Result<Option<Arc<KeySet>>, AuthError> {
        if !self.caching() {
            return Ok(None);
        }

        let slot = self.slot(jwks_uri);
        let _refresh = slot.refresh.lock().await;
        {
            let current = slot.current.read().await;
            if let Some(entry) = current.as_ref() {
                if !Arc::ptr_eq(&entry.keys, stale) {
                    return Ok(Some(entry.keys.clone()));
                }
                if entry.fetched_at.elapsed() < self.min_refresh_interval {
                    return Ok(None);
                }
            }
        }
        let keys = self.fetcher.fetch(jwks_uri).await?;
        Ok(Some(slot.store(keys).await))
    }

    /// Check if a key set for `jwks_uri` is cached and within TTL.
    pub async fn is_cached(&self, jwks_uri: &Url) -> bool {
        if !self.caching() {
            return false;
        }
        self.slot(jwks_uri).fresh(self.cache_ttl).await.is_some()
    }
}
