// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for Axum.
//!
//! Every request passes through [`auth_middleware`]:
//!
//! 1. Read `Authorization`. Absent → [`AuthContext::Anonymous`], continue.
//!    Malformed → 401.
//! 2. Find the access token (`X-Auth-Token`, body, query).
//! 3. Fetch the key set, verify the signature and `at_hash`.
//! 4. Validate `exp`, `nbf`, `aud`, `iss`.
//! 5. Insert [`AuthContext::Authenticated`] and run the handler.
//!
//! Any failure in 3-4 rejects the request before the handler runs and no
//! context is inserted. Whether anonymous requests may proceed is left to
//! handlers (see [`Auth`](super::extractor::Auth)).
//!
//! ```rust,ignore
//! let trust = TrustConfig::resolve(&raw, Some("prod"))?;
//! let auth = Authenticator::new(trust)?;
//!
//! let app = Router::new()
//!     .route("/protected", get(protected_handler))
//!     .layer(axum::middleware::from_fn_with_state(auth, auth_middleware));
//! ```

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::claims::{Claims, ClaimsMapping};
use super::context::{AuthContext, Identity};
use super::credential::{
    extract_authorization, read_access_token, TokenLookup, DEFAULT_BODY_LIMIT,
};
use super::error::{AuthError, ConfigError};
use super::jwks::JwksManager;
use super::trust::{JwtOptions, TrustConfig};
use super::{validation, verifier};

/// Verification pipeline for one trust configuration.
///
/// Cheap to clone. Several authenticators (one per environment) can share a
/// [`JwksManager`] through [`Authenticator::with_jwks`].
#[derive(Clone)]
pub struct Authenticator {
    trust: Arc<TrustConfig>,
    options: JwtOptions,
    claims_mapping: Option<Arc<ClaimsMapping>>,
    jwks: JwksManager,
    body_limit: usize,
    digest_access_token: bool,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("trust", &self.trust)
            .field("options", &self.options)
            .field("claims_mapping", &self.claims_mapping)
            .field("body_limit", &self.body_limit)
            .field("digest_access_token", &self.digest_access_token)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Create an authenticator with its own key-set cache.
    pub fn new(trust: TrustConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            trust: Arc::new(trust),
            options: JwtOptions::default(),
            claims_mapping: None,
            jwks: JwksManager::new()?,
            body_limit: DEFAULT_BODY_LIMIT,
            digest_access_token: true,
        })
    }

    /// Use a shared key-set manager.
    pub fn with_jwks(mut self, jwks: JwksManager) -> Self {
        self.jwks = jwks;
        self
    }

    pub fn with_options(mut self, options: JwtOptions) -> Self {
        self.options = options;
        self
    }

    /// Project validated claims through `mapping` before exposing them.
    pub fn with_claims_mapping(mut self, mapping: ClaimsMapping) -> Self {
        self.claims_mapping = (!mapping.is_empty()).then(|| Arc::new(mapping));
        self
    }

    /// Largest JSON or form body buffered while looking for an access token.
    /// Larger bodies are passed on unread.
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Remove the access token from the body or query before the handler
    /// runs. On by default.
    pub fn with_digest_access_token(mut self, digest: bool) -> Self {
        self.digest_access_token = digest;
        self
    }

    pub fn trust(&self) -> &TrustConfig {
        &self.trust
    }

    pub fn options(&self) -> &JwtOptions {
        &self.options
    }

    pub fn jwks(&self) -> &JwksManager {
        &self.jwks
    }

    pub fn digest_access_token(&self) -> bool {
        self.digest_access_token
    }

    /// Decide the auth context for a bearer credential and access token.
    ///
    /// `None` credential is not an error: the result is
    /// [`AuthContext::Anonymous`].
    pub async fn authenticate(
        &self,
        credential: Option<String>,
        access_token: Option<String>,
    ) -> Result<AuthContext, AuthError> {
        let Some(credential) = credential else {
            return Ok(AuthContext::Anonymous);
        };

        let claims = self.verify(&credential, access_token.as_deref()).await?;
        let claims = validation::validate(claims, &self.trust, &self.options)?;
        let claims = match &self.claims_mapping {
            Some(mapping) => mapping.apply(&claims),
            None => claims,
        };

        Ok(AuthContext::Authenticated(Identity::new(
            credential,
            claims,
            access_token,
        )))
    }

    /// Verify the signature, retrying once with a refreshed key set when the
    /// `kid` is unknown (key rotation).
    async fn verify(&self, token: &str, access_token: Option<&str>) -> Result<Claims, AuthError> {
        let jwks_uri = self.trust.jwks_uri();
        let check_binding = self.options.verify_at_hash;

        let keys = self.jwks.key_set(jwks_uri).await?;
        match verifier::verify(token, &keys, &self.trust, access_token, check_binding) {
            Err(AuthError::UnknownKey) => {
                let Some(keys) = self.jwks.refresh_for_unknown_kid(jwks_uri, &keys).await?
                else {
                    return Err(AuthError::UnknownKey);
                };
                tracing::info!(jwks_uri = %jwks_uri, "Refreshed JWKS after unknown kid");
                verifier::verify(token, &keys, &self.trust, access_token, check_binding)
            }
            result => result,
        }
    }

    /// Authenticate `request` and attach the resulting [`AuthContext`].
    pub async fn process(&self, request: Request) -> Result<Request, AuthError> {
        let credential = extract_authorization(request.headers())?;

        let (mut request, context) = match credential {
            None => {
                tracing::debug!("Continuing with no authorization");
                (request, AuthContext::Anonymous)
            }
            Some(credential) => {
                let lookup = TokenLookup {
                    field: self.trust.access_token_field(),
                    body_limit: self.body_limit,
                    digest: self.digest_access_token,
                };
                let (request, access_token) = read_access_token(request, lookup).await?;
                let context = self.authenticate(Some(credential), access_token).await?;
                (request, context)
            }
        };

        request.extensions_mut().insert(context);
        Ok(request)
    }
}

/// Authentication middleware function.
pub async fn auth_middleware(
    State(auth): State<Authenticator>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();

    match auth.process(request).await {
        Ok(request) => next.run(request).await,
        Err(error) => {
            tracing::warn!(
                path = %path,
                error_code = error.error_code(),
                error = %error,
                "Rejected request"
            );
            error.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testutil::{
        at_hash, test_key, trust_config, valid_claims, TEST_AUDIENCE, TEST_DOMAIN,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request as HttpRequest, StatusCode, Uri},
        routing::{get, post},
        Extension, Json, Router,
    };
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        server: MockServer,
        hits: Arc<AtomicUsize>,
        app: Router,
    }

    async fn mount_jwks(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "keys": [test_key().jwk()] })),
            )
            .mount(server)
            .await;
    }

    fn router(auth: Authenticator, hits: Arc<AtomicUsize>) -> Router {
        let echo = move |Extension(context): Extension<AuthContext>, uri: Uri, body: String| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Json(json!({ "context": context, "query": uri.query(), "body": body }))
            }
        };
        Router::new()
            .route("/whoami", get(echo.clone()))
            .route("/submit", post(echo))
            .route("/upload", post(upload))
            .layer(axum::middleware::from_fn_with_state(auth, auth_middleware))
    }

    async fn upload(Extension(context): Extension<AuthContext>, body: Body) -> Json<Value> {
        let bytes = to_bytes(body, usize::MAX).await.unwrap();
        Json(json!({ "authenticated": context.is_authenticated(), "len": bytes.len() }))
    }

    async fn harness() -> Harness {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        let trust = trust_config(&format!("{}/.well-known/jwks.json", server.uri()));
        let hits = Arc::new(AtomicUsize::new(0));
        let app = router(Authenticator::new(trust).unwrap(), hits.clone());
        Harness { server, hits, app }
    }

    async fn send(app: &Router, request: HttpRequest<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_with(authorization: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri("/whoami");
        if let Some(value) = authorization {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn missing_authorization_proceeds_anonymously() {
        let h = harness().await;
        let (status, body) = send(&h.app, get_with(None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["context"], json!({ "auth": null, "claims": {}, "token": null }));
        assert_eq!(h.hits.load(Ordering::SeqCst), 1);
        // No key set is needed for anonymous requests.
        assert!(h.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_authorization_is_rejected() {
        let h = harness().await;
        for header in ["Basic dXNlcjpwYXNz", "Bearer", "Bearer a b"] {
            let (status, body) = send(&h.app, get_with(Some(header))).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{header}");
            assert_eq!(body["error_code"], "malformed_credential");
        }
        assert_eq!(h.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_token_populates_context() {
        let h = harness().await;
        let payload = valid_claims();
        let token = test_key().sign(&payload);

        let (status, body) = send(&h.app, get_with(Some(&format!("Bearer {token}")))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["context"]["auth"], json!(token));
        assert_eq!(body["context"]["claims"], payload);
        assert_eq!(body["context"]["token"], Value::Null);
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let h = harness().await;
        let mut payload = valid_claims();
        payload["exp"] = json!(chrono::Utc::now().timestamp() - 60);
        let token = test_key().sign(&payload);

        let (status, body) = send(&h.app, get_with(Some(&format!("Bearer {token}")))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "token_expired");
        assert_eq!(h.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_kid_is_rejected_without_extra_fetch() {
        let h = harness().await;
        let token = test_key().sign_with(jsonwebtoken::Algorithm::RS256, Some("K9"), &valid_claims());

        let (status, body) = send(&h.app, get_with(Some(&format!("Bearer {token}")))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "unknown_key");
        // The freshly cached set is not refetched.
        assert_eq!(h.server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn key_set_failure_rejects_without_context() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let trust = trust_config(&format!("{}/.well-known/jwks.json", server.uri()));
        let hits = Arc::new(AtomicUsize::new(0));
        let app = router(Authenticator::new(trust).unwrap(), hits.clone());

        let token = test_key().sign(&valid_claims());
        let (status, body) = send(&app, get_with(Some(&format!("Bearer {token}")))).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "key_set_unavailable");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    fn bound_submit(request_body: &'static str) -> HttpRequest<Body> {
        let mut payload = valid_claims();
        payload["at_hash"] = json!(at_hash("body-access-token"));
        let token = test_key().sign(&payload);
        HttpRequest::builder()
            .method(Method::POST)
            .uri("/submit")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(request_body))
            .unwrap()
    }

    #[tokio::test]
    async fn body_access_token_is_bound_and_removed() {
        let h = harness().await;
        let request = bound_submit(r#"{"access_token":"body-access-token","item":7}"#);
        let (status, body) = send(&h.app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["context"]["token"], "body-access-token");
        assert_eq!(body["body"], r#"{"item":7}"#);
    }

    #[tokio::test]
    async fn body_is_preserved_when_digest_disabled() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        let trust = trust_config(&format!("{}/.well-known/jwks.json", server.uri()));
        let auth = Authenticator::new(trust)
            .unwrap()
            .with_digest_access_token(false);
        let app = router(auth, Arc::new(AtomicUsize::new(0)));

        let request_body = r#"{"access_token":"body-access-token","item":7}"#;
        let (status, body) = send(&app, bound_submit(request_body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["context"]["token"], "body-access-token");
        assert_eq!(body["body"], request_body);
    }

    #[tokio::test]
    async fn query_access_token_is_removed_before_handler() {
        let h = harness().await;
        let mut payload = valid_claims();
        payload["at_hash"] = json!(at_hash("query-access-token"));
        let token = test_key().sign(&payload);

        let request = HttpRequest::builder()
            .uri("/whoami?page=3&access_token=query-access-token")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["context"]["token"], "query-access-token");
        assert_eq!(body["query"], "page=3");
    }

    #[tokio::test]
    async fn large_opaque_body_reaches_handler() {
        let h = harness().await;
        let token = test_key().sign(&valid_claims());
        let size = 3 * 1024 * 1024;

        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/upload")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/octet-stream")
            .body(Body::from(vec![7u8; size]))
            .unwrap();
        let (status, body) = send(&h.app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["authenticated"], true);
        assert_eq!(body["len"], size);
    }

    #[tokio::test]
    async fn large_json_body_falls_back_to_query_token() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        let trust = trust_config(&format!("{}/.well-known/jwks.json", server.uri()));
        let auth = Authenticator::new(trust).unwrap().with_body_limit(64);
        let app = router(auth, Arc::new(AtomicUsize::new(0)));

        let mut payload = valid_claims();
        payload["at_hash"] = json!(at_hash("query-access-token"));
        let token = test_key().sign(&payload);
        let request_body = json!({ "access_token": "ignored", "pad": "x".repeat(256) }).to_string();

        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri("/submit?access_token=query-access-token")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(request_body.clone()))
            .unwrap();
        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["context"]["token"], "query-access-token");
        assert_eq!(body["body"], request_body);
        assert_eq!(body["query"], Value::Null);
    }

    #[tokio::test]
    async fn header_access_token_mismatch_is_rejected() {
        let h = harness().await;
        let mut payload = valid_claims();
        payload["at_hash"] = json!(at_hash("expected-access-token"));
        let token = test_key().sign(&payload);

        let request = HttpRequest::builder()
            .uri("/whoami?access_token=expected-access-token")
            .header("authorization", format!("Bearer {token}"))
            .header("x-auth-token", "other-access-token")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.app, request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "token_binding");
    }

    #[tokio::test]
    async fn claims_mapping_projects_claims() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        let trust = trust_config(&format!("{}/.well-known/jwks.json", server.uri()));
        let auth = Authenticator::new(trust)
            .unwrap()
            .with_claims_mapping(ClaimsMapping::new([("sub", "user_id"), ("email", "email")]));

        let token = test_key().sign(&valid_claims());
        let context = auth.authenticate(Some(token), None).await.unwrap();

        assert_eq!(context.claims().get_str("user_id"), Some("auth0|user-123"));
        assert_eq!(context.claims().len(), 2);
    }

    #[tokio::test]
    async fn environments_do_not_leak_into_each_other() {
        let server = MockServer::start().await;
        mount_jwks(&server).await;
        let jwks_uri = format!("{}/.well-known/jwks.json", server.uri());
        let raw = json!({
            "dev": {
                "alg": ["RS256"],
                "audience": "dev-client",
                "domain": "dev.example.auth0.com",
                "jwks_uri": jwks_uri,
            },
            "test": {
                "alg": ["RS256"],
                "audience": TEST_AUDIENCE,
                "domain": TEST_DOMAIN,
                "jwks_uri": jwks_uri,
            },
        });
        let shared = JwksManager::new().unwrap();
        let dev = Authenticator::new(TrustConfig::resolve(&raw, Some("dev")).unwrap())
            .unwrap()
            .with_jwks(shared.clone());
        let test = Authenticator::new(TrustConfig::resolve(&raw, Some("test")).unwrap())
            .unwrap()
            .with_jwks(shared);

        let token = test_key().sign(&valid_claims());
        assert!(test
            .authenticate(Some(token.clone()), None)
            .await
            .unwrap()
            .is_authenticated());
        let err = dev.authenticate(Some(token), None).await.unwrap_err();
        assert!(matches!(err, AuthError::AudienceMismatch));
        // Both environments were served from one cached fetch.
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    fn jwk_with_kid(kid: &str) -> Value {
        let mut jwk = test_key().jwk();
        jwk["kid"] = json!(kid);
        jwk
    }

    /// Serves a set without the signing key once, then the rotated set.
    async fn mount_rotation(server: &MockServer, delay: Duration) {
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "keys": [jwk_with_kid("K0")] })),
            )
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "keys": [test_key().jwk()] }))
                    .set_delay(delay),
            )
            .mount(server)
            .await;
    }

    fn rotating_authenticator(server: &MockServer) -> Authenticator {
        let trust = trust_config(&format!("{}/.well-known/jwks.json", server.uri()));
        let jwks = JwksManager::new()
            .unwrap()
            .with_min_refresh_interval(Duration::ZERO);
        Authenticator::new(trust).unwrap().with_jwks(jwks)
    }

    #[tokio::test]
    async fn rotated_key_is_accepted_after_refetch() {
        let server = MockServer::start().await;
        mount_rotation(&server, Duration::ZERO).await;
        let auth = rotating_authenticator(&server);

        let token = test_key().sign(&valid_claims());
        let context = auth.authenticate(Some(token), None).await.unwrap();

        assert!(context.is_authenticated());
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_unknown_kid_requests_share_one_refetch() {
        let server = MockServer::start().await;
        mount_rotation(&server, Duration::from_millis(300)).await;
        let auth = rotating_authenticator(&server);

        let token = test_key().sign(&valid_claims());
        let (first, second) = tokio::join!(
            auth.authenticate(Some(token.clone()), None),
            auth.authenticate(Some(token), None),
        );

        assert!(first.unwrap().is_authenticated());
        assert!(second.unwrap().is_authenticated());
        // One initial fetch plus one rotation refetch.
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[test]
    fn debug_omits_key_cache() {
        let auth = Authenticator::new(trust_config("https://tenant.example.auth0.com/jwks"))
            .unwrap()
            .with_body_limit(1024);
        let rendered = format!("{auth:?}");
        assert!(rendered.starts_with("Authenticator {"));
        assert!(rendered.contains("body_limit: 1024"));
        assert!(rendered.contains("digest_access_token: true"));
        assert!(!rendered.contains("jwks:"));
    }

    #[tokio::test]
    async fn authenticate_without_credential_is_anonymous() {
        let auth = Authenticator::new(trust_config("https://tenant.example.auth0.com/jwks")).unwrap();
        let context = auth.authenticate(None, Some("ignored".into())).await.unwrap();
        assert!(!context.is_authenticated());
        assert!(context.token().is_none());
    }
}
