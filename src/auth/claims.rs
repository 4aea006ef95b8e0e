// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims.
//!
//! [`Claims`] is the decoded payload of a token: standard claims (`iss`,
//! `sub`, `aud`, `exp`, ...) alongside whatever custom claims the issuer adds.
//! [`ClaimsMapping`] optionally renames and filters claims before they are
//! handed to downstream handlers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decoded token payload, keyed by claim name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// A string-valued claim.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// A numeric claim as whole seconds. Fractional values are truncated.
    pub fn get_timestamp(&self, name: &str) -> Option<i64> {
        let value = self.get(name)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
    }

    /// Subject
    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub")
    }

    /// Issuer
    pub fn issuer(&self) -> Option<&str> {
        self.get_str("iss")
    }

    /// Expiration timestamp
    pub fn expires_at(&self) -> Option<i64> {
        self.get_timestamp("exp")
    }

    /// Audience values; `aud` may be a single string or an array.
    pub fn audiences(&self) -> Vec<&str> {
        match self.get("aud") {
            Some(Value::String(aud)) => vec![aud.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Renames claims: `source claim -> target name`.
///
/// Only mapped claims survive projection. Claims missing from the token are
/// left out rather than set to `null`.
///
/// ```json
/// {"email": "email", "sub": "subject", "https://example.com/roles": "roles"}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ClaimsMapping(BTreeMap<String, String>);

impl ClaimsMapping {
    pub fn new<I, S, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(source, target)| (source.into(), target.into()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Project `claims` through the mapping.
    pub fn apply(&self, claims: &Claims) -> Claims {
        let projected = self
            .0
            .iter()
            .filter_map(|(source, target)| {
                claims
                    .get(source)
                    .map(|value| (target.clone(), value.clone()))
            })
            .collect();
        Claims(projected)
    }
}
