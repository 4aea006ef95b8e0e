// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{Extension, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::{Auth, AuthContext, AuthErrorBody, Claims};

/// Authentication outcome for the current request.
#[derive(Debug, Serialize, ToSchema)]
pub struct WhoAmIResponse {
    /// The verified bearer token, `null` when anonymous.
    pub auth: Option<String>,
    /// Validated claims, `{}` when anonymous.
    #[schema(value_type = Object)]
    pub claims: Claims,
    /// The bound access token, if one was presented.
    pub token: Option<String>,
}

impl From<&AuthContext> for WhoAmIResponse {
    fn from(context: &AuthContext) -> Self {
        Self {
            auth: context.auth().map(str::to_string),
            claims: context.claims().clone(),
            token: context.token().map(str::to_string),
        }
    }
}

/// Subject of an authenticated caller.
#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub sub: Option<String>,
    #[schema(value_type = Object)]
    pub claims: Claims,
}

/// Report the authentication context. Anonymous requests succeed.
#[utoipa::path(
    get,
    path = "/v1/whoami",
    tag = "Auth",
    responses(
        (status = 200, description = "Authentication context", body = WhoAmIResponse),
        (status = 401, description = "Credential rejected", body = AuthErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn whoami(Extension(context): Extension<AuthContext>) -> Json<WhoAmIResponse> {
    Json(WhoAmIResponse::from(&context))
}

/// Claims of the caller; anonymous requests are rejected.
#[utoipa::path(
    get,
    path = "/v1/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Caller claims", body = MeResponse),
        (status = 401, description = "Missing or rejected credential", body = AuthErrorBody)
    ),
    security(("bearer_auth" = []))
)]
pub async fn me(Auth(identity): Auth) -> Json<MeResponse> {
    Json(MeResponse {
        sub: identity.claims().subject().map(str::to_string),
        claims: identity.claims().clone(),
    })
}
