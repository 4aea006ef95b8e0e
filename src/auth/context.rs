// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication outcome attached to each request.
//!
//! The middleware inserts exactly one [`AuthContext`] into the request
//! extensions. It is either [`AuthContext::Anonymous`] (no credential was
//! presented) or [`AuthContext::Authenticated`] with credential, validated
//! claims and access token together; there is no partially filled state.

use std::fmt;
use std::sync::LazyLock;

use serde::{Serialize, Serializer};

use super::claims::Claims;

static NO_CLAIMS: LazyLock<Claims> = LazyLock::new(Claims::default);

/// A verified caller.
#[derive(Clone)]
pub struct Identity {
    credential: String,
    claims: Claims,
    access_token: Option<String>,
}

impl Identity {
    pub fn new(credential: String, claims: Claims, access_token: Option<String>) -> Self {
        Self {
            credential,
            claims,
            access_token,
        }
    }

    /// The verified bearer token.
    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// The access token bound to this identity, if one was presented.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("credential", &"<redacted>")
            .field("claims", &self.claims)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Per-request authentication state.
#[derive(Debug, Clone, Default)]
pub enum AuthContext {
    /// No `Authorization` header was presented
    #[default]
    Anonymous,
    /// Token verified and claims validated
    Authenticated(Identity),
}

impl AuthContext {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthContext::Authenticated(_))
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthContext::Authenticated(identity) => Some(identity),
            AuthContext::Anonymous => None,
        }
    }

    /// The bearer credential, or `None` when anonymous.
    pub fn auth(&self) -> Option<&str> {
        self.identity().map(Identity::credential)
    }

    /// Validated claims; empty when anonymous.
    pub fn claims(&self) -> &Claims {
        self.identity().map(Identity::claims).unwrap_or(&*NO_CLAIMS)
    }

    /// The separately presented access token, or `None`.
    pub fn token(&self) -> Option<&str> {
        self.identity().and_then(Identity::access_token)
    }
}

/// Serializes as `{"auth": ..., "claims": {...}, "token": ...}`.
impl Serialize for AuthContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct View<'a> {
            auth: Option<&'a str>,
            claims: &'a Claims,
            token: Option<&'a str>,
        }

        View {
            auth: self.auth(),
            claims: self.claims(),
            token: self.token(),
        }
        .serialize(serializer)
    }
}
