// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Bearer JWT verification against a remote JWKS.
//!
//! ## Auth Flow
//!
//! 1. Client sends `Authorization: Bearer <JWT>`, optionally with an access
//!    token in `X-Auth-Token`, the body, or the `access_token` query parameter
//! 2. Middleware:
//!    - Fetches the JWKS for the configured environment via HTTPS
//!    - Verifies the JWT signature, `kid`, `alg` and `at_hash` binding
//!    - Validates `exp`, `nbf`, `aud` and `iss`
//! 3. The outcome is stored as an [`AuthContext`] in the request extensions
//!
//! ## Security
//!
//! - Requests without `Authorization` proceed as anonymous; handlers decide
//!   whether that is acceptable (see [`Auth`])
//! - Only asymmetric algorithms from the configured allow-list are accepted
//! - JWKS is cached with a TTL; refreshes are single-flight per endpoint
//! - Raw tokens and key material are never logged

pub mod claims;
pub mod context;
pub mod credential;
pub mod error;
pub mod extractor;
pub mod jwks;
pub mod middleware;
pub mod trust;
pub mod validation;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testutil;

pub use claims::{Claims, ClaimsMapping};
pub use context::{AuthContext, Identity};
pub use error::{AuthError, AuthErrorBody, ConfigError};
pub use extractor::{Auth, OptionalAuth};
pub use jwks::{JwksManager, KeySet};
pub use middleware::{auth_middleware, Authenticator};
pub use trust::{JwtOptions, TrustConfig};
