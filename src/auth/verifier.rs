// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signature verification.
//!
//! [`verify`] checks a token against a key set and returns its payload
//! without looking at `exp`, `aud` or `iss`; those belong to
//! [`validation`](super::validation).

use base64ct::{Base64UrlUnpadded, Encoding};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha384, Sha512};

use super::claims::Claims;
use super::error::AuthError;
use super::jwks::KeySet;
use super::trust::TrustConfig;

/// Verify `token` and return its unvalidated claims.
///
/// Steps, in order:
///
/// 1. read `kid` and `alg` from the unverified header
/// 2. look up `kid` in `keys` ([`AuthError::UnknownKey`])
/// 3. check `alg` against the allow-list and the key's own `alg`
///    ([`AuthError::AlgorithmNotAllowed`])
/// 4. verify the signature ([`AuthError::InvalidSignature`])
/// 5. if the token has `at_hash` and `access_token` is given, compare
///    ([`AuthError::TokenBinding`]); skipped when `check_binding` is false
pub fn verify(
    token: &str,
    keys: &KeySet,
    trust: &TrustConfig,
    access_token: Option<&str>,
    check_binding: bool,
) -> Result<Claims, AuthError> {
    let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;

    let kid = header.kid.as_deref().ok_or(AuthError::UnknownKey)?;
    let key = keys.get(kid).ok_or(AuthError::UnknownKey)?;

    let alg = header.alg;
    if !trust.allows(alg) {
        return Err(AuthError::AlgorithmNotAllowed(format!("{alg:?}")));
    }
    if key.algorithm().is_some_and(|pinned| pinned != alg) {
        return Err(AuthError::AlgorithmNotAllowed(format!(
            "{alg:?} (key {kid} is pinned to another algorithm)"
        )));
    }

    let data = decode::<Map<String, Value>>(token, key.decoding_key(), &signature_only(alg))
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidAlgorithm => AuthError::AlgorithmNotAllowed(format!("{alg:?}")),
            _ => AuthError::MalformedToken,
        })?;
    let claims = Claims::new(data.claims);

    if check_binding {
        if let (Some(expected), Some(access_token)) = (claims.get("at_hash"), access_token) {
            let expected = expected.as_str().ok_or(AuthError::TokenBinding)?;
            if access_token_hash(access_token, alg) != expected {
                return Err(AuthError::TokenBinding);
            }
        }
    }

    Ok(claims)
}

/// Validation that checks the signature and nothing else.
fn signature_only(alg: Algorithm) -> Validation {
    let mut validation = Validation::new(alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation
}

/// OIDC `at_hash`: left half of the access token's digest, base64url.
///
/// The digest follows the token's algorithm: SHA-256 for `*256`, SHA-384 for
/// `*384`, SHA-512 for `*512` and EdDSA.
pub fn access_token_hash(access_token: &str, alg: Algorithm) -> String {
    let digest: Vec<u8> = match alg {
        Algorithm::RS384 | Algorithm::PS384 | Algorithm::ES384 | Algorithm::HS384 => {
            Sha384::digest(access_token.as_bytes()).to_vec()
        }
        Algorithm::RS512 | Algorithm::PS512 | Algorithm::HS512 | Algorithm::EdDSA => {
            Sha512::digest(access_token.as_bytes()).to_vec()
        }
        _ => Sha256::digest(access_token.as_bytes()).to_vec(),
    };
    Base64UrlUnpadded::encode_string(&digest[..digest.len() / 2])
}
