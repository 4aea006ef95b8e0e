// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Claims validation.
//!
//! A gate over verified claims: `exp`, `nbf`, `aud` and `iss` are checked and
//! the claims are returned untouched.

use chrono::Utc;

use super::claims::Claims;
use super::error::AuthError;
use super::trust::{JwtOptions, TrustConfig};

/// Validate `claims` against `trust` at the current time.
pub fn validate(claims: Claims, trust: &TrustConfig, options: &JwtOptions) -> Result<Claims, AuthError> {
    validate_at(claims, trust, options, Utc::now().timestamp())
}

/// Validate `claims` as of `now` (Unix seconds).
pub fn validate_at(
    claims: Claims,
    trust: &TrustConfig,
    options: &JwtOptions,
    now: i64,
) -> Result<Claims, AuthError> {
    let leeway = i64::try_from(options.leeway).unwrap_or(i64::MAX);

    let exp = claims.expires_at().ok_or(AuthError::TokenExpired)?;
    if exp.saturating_add(leeway) <= now {
        return Err(AuthError::TokenExpired);
    }

    if options.verify_nbf {
        if let Some(nbf) = claims.get_timestamp("nbf") {
            if nbf.saturating_sub(leeway) > now {
                return Err(AuthError::TokenNotYetValid);
            }
        }
    }

    if !claims.audiences().contains(&trust.audience()) {
        return Err(AuthError::AudienceMismatch);
    }

    let issuer = claims.issuer().ok_or(AuthError::IssuerMismatch)?;
    if !trust.issuers().iter().any(|accepted| accepted == issuer) {
        return Err(AuthError::IssuerMismatch);
    }

    Ok(claims)
}
