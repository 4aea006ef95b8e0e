// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for the authentication outcome.
//!
//! The middleware never rejects anonymous requests. Handlers that need a
//! caller use `Auth`:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(identity): Auth) -> impl IntoResponse {
//!     identity.claims().subject()
//! }
//! ```

use axum::{extract::FromRequestParts, http::request::Parts};

use super::context::{AuthContext, Identity};
use super::error::AuthError;

/// Extractor for authenticated callers.
///
/// Rejects with [`AuthError::MissingCredential`] when the request is
/// anonymous or the middleware is not installed on the route.
pub struct Auth(pub Identity);

impl<S: Send + Sync> FromRequestParts<S> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<AuthContext>() {
            Some(AuthContext::Authenticated(identity)) => Ok(Auth(identity.clone())),
            Some(AuthContext::Anonymous) => Err(AuthError::MissingCredential),
            None => {
                tracing::error!(
                    path = parts.uri.path(),
                    "Auth extractor used on a route without auth middleware"
                );
                Err(AuthError::MissingCredential)
            }
        }
    }
}

/// Optional authentication extractor.
///
/// Returns `None` for anonymous requests instead of rejecting.
pub struct OptionalAuth(pub Option<Identity>);

impl<S: Send + Sync> FromRequestParts<S> for OptionalAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts
            .extensions
            .get::<AuthContext>()
            .and_then(AuthContext::identity)
            .cloned();
        Ok(OptionalAuth(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::Claims;
    use axum::http::Request;

    fn parts_with(context: Option<AuthContext>) -> Parts {
        let mut parts = Request::builder()
            .uri("/test")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        if let Some(context) = context {
            parts.extensions.insert(context);
        }
        parts
    }

    fn authenticated() -> AuthContext {
        let claims: Claims = serde_json::from_value(serde_json::json!({ "sub": "user_123" })).unwrap();
        AuthContext::Authenticated(Identity::new("a.b.c".into(), claims, None))
    }

    #[tokio::test]
    async fn auth_requires_authenticated_context() {
        let mut parts = parts_with(Some(AuthContext::Anonymous));
        let result = Auth::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(AuthError::MissingCredential)));
    }

    #[tokio::test]
    async fn auth_without_middleware_is_rejected() {
        let mut parts = parts_with(None);
        let result = Auth::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(AuthError::MissingCredential)));
    }

    #[tokio::test]
    async fn auth_returns_identity() {
        let mut parts = parts_with(Some(authenticated()));
        let Auth(identity) = Auth::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(identity.claims().subject(), Some("user_123"));
    }

    #[tokio::test]
    async fn optional_auth_returns_none_when_anonymous() {
        let mut parts = parts_with(Some(AuthContext::Anonymous));
        let OptionalAuth(identity) = OptionalAuth::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(identity.is_none());

        let mut parts = parts_with(Some(authenticated()));
        let OptionalAuth(identity) = OptionalAuth::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(identity.is_some());
    }
}
