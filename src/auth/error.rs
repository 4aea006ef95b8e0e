// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! [`AuthError`] covers every per-request failure and is converted into a
//! response at the middleware boundary. [`ConfigError`] is raised while
//! building the middleware and never reaches a request.

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Per-request authentication error.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was presented where one is required
    #[error("Authorization is required")]
    MissingCredential,
    /// Authorization header present but not `Bearer <token>`
    #[error("Invalid authorization header format (expected 'Bearer <token>'): {0}")]
    MalformedCredential(&'static str),
    /// Bearer value is not a decodable JWS
    #[error("Token is malformed")]
    MalformedToken,
    /// JWKS endpoint unreachable, non-success status, or unparseable body
    #[error("Failed to fetch JWKS: {0}")]
    KeySetUnavailable(String),
    /// JWKS document structurally invalid
    #[error("JWKS document is invalid: {0}")]
    KeySetFormat(String),
    /// Token `kid` not present in the key set
    #[error("No matching key found in JWKS")]
    UnknownKey,
    /// Token `alg` not in the configured allow-list
    #[error("Token algorithm {0} is not allowed")]
    AlgorithmNotAllowed(String),
    /// Signature does not verify
    #[error("Token signature is invalid")]
    InvalidSignature,
    /// `at_hash` does not match the presented access token
    #[error("Access token does not match the token's at_hash claim")]
    TokenBinding,
    /// `exp` missing or in the past
    #[error("Token has expired")]
    TokenExpired,
    /// `nbf` in the future
    #[error("Token is not yet valid")]
    TokenNotYetValid,
    /// `aud` does not contain the configured audience
    #[error("Token audience is invalid")]
    AudienceMismatch,
    /// `iss` does not match the configured domain
    #[error("Token issuer is invalid")]
    IssuerMismatch,
    /// Request body could not be read while looking for an access token
    #[error("Request body could not be read: {0}")]
    InvalidRequestBody(String),
}

/// Error body returned to the client.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuthErrorBody {
    /// Human-readable message.
    pub error: String,
    /// Machine-readable error code.
    pub error_code: String,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::MalformedCredential(_) => "malformed_credential",
            AuthError::MalformedToken => "malformed_token",
            AuthError::KeySetUnavailable(_) => "key_set_unavailable",
            AuthError::KeySetFormat(_) => "key_set_format",
            AuthError::UnknownKey => "unknown_key",
            AuthError::AlgorithmNotAllowed(_) => "algorithm_not_allowed",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::TokenBinding => "token_binding",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::AudienceMismatch => "audience_mismatch",
            AuthError::IssuerMismatch => "issuer_mismatch",
            AuthError::InvalidRequestBody(_) => "invalid_request_body",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// `WWW-Authenticate` challenge (RFC 6750 §3).
    fn challenge(&self) -> Option<&'static str> {
        match self {
            AuthError::InvalidRequestBody(_) => None,
            AuthError::MissingCredential => Some("Bearer"),
            AuthError::MalformedCredential(_) => Some(r#"Bearer error="invalid_request""#),
            _ => Some(r#"Bearer error="invalid_token""#),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let challenge = self.challenge();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        let mut response = (status, body).into_response();
        if let Some(challenge) = challenge {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
        }
        response
    }
}

/// Invalid middleware configuration, surfaced at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration must be a JSON object")]
    NotAnObject,
    #[error("missing required key `{0}`")]
    MissingKey(&'static str),
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("`alg` must list at least one algorithm")]
    EmptyAlgorithms,
    #[error("unsupported algorithm `{0}`")]
    UnsupportedAlgorithm(String),
    #[error("configuration mixes flat keys with environment sections: {0}")]
    Ambiguous(String),
    #[error("environment `{0}` is not configured")]
    UnknownEnvironment(String),
    #[error("multiple environments configured ({0}); select one")]
    EnvironmentNotSelected(String),
    #[error("`jwks_uri` must use https (got {0})")]
    InsecureJwksUri(String),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}
