// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared test helpers: RSA key pairs, JWKS documents, signed tokens.
//!
//! Key generation is slow, so each key is created once per test binary.

use std::sync::OnceLock;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};

use super::trust::TrustConfig;

pub const TEST_KID: &str = "K1";
pub const TEST_AUDIENCE: &str = "test-client-id";
pub const TEST_DOMAIN: &str = "tenant.example.auth0.com";

/// An RSA key pair with its public JWK members.
pub struct TestKey {
    kid: String,
    private_pem: String,
    n: String,
    e: String,
}

impl TestKey {
    fn generate(kid: &str) -> Self {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("Failed to generate RSA key");
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("Failed to encode private key")
            .to_string();

        Self {
            kid: kid.to_string(),
            private_pem,
            n: Base64UrlUnpadded::encode_string(&private_key.n().to_bytes_be()),
            e: Base64UrlUnpadded::encode_string(&private_key.e().to_bytes_be()),
        }
    }

    /// Public JWK for this key.
    pub fn jwk(&self) -> Value {
        json!({
            "kty": "RSA",
            "kid": self.kid,
            "use": "sig",
            "alg": "RS256",
            "n": self.n,
            "e": self.e,
        })
    }

    /// Sign `claims` with RS256 and this key's `kid`.
    pub fn sign(&self, claims: &Value) -> String {
        self.sign_with(Algorithm::RS256, Some(&self.kid), claims)
    }

    pub fn sign_with(&self, alg: Algorithm, kid: Option<&str>, claims: &Value) -> String {
        let mut header = Header::new(alg);
        header.typ = Some("JWT".to_string());
        header.kid = kid.map(str::to_string);
        let key = EncodingKey::from_rsa_pem(self.private_pem.as_bytes()).expect("Invalid RSA key");
        jsonwebtoken::encode(&header, claims, &key).expect("Failed to encode test JWT")
    }
}

/// Primary signing key, published as `K1`.
pub fn test_key() -> &'static TestKey {
    static KEY: OnceLock<TestKey> = OnceLock::new();
    KEY.get_or_init(|| TestKey::generate(TEST_KID))
}

/// Unrelated key that claims the same `kid`, for forged signatures.
pub fn impostor_key() -> &'static TestKey {
    static KEY: OnceLock<TestKey> = OnceLock::new();
    KEY.get_or_init(|| TestKey::generate(TEST_KID))
}

/// Claims that pass validation against [`trust_config`].
pub fn valid_claims() -> Value {
    let now = Utc::now().timestamp();
    json!({
        "iss": format!("https://{TEST_DOMAIN}/"),
        "sub": "auth0|user-123",
        "aud": TEST_AUDIENCE,
        "iat": now,
        "exp": now + 3600,
        "email": "user@example.com",
    })
}

/// Trust configuration pointing at `jwks_uri`.
pub fn trust_config(jwks_uri: &str) -> TrustConfig {
    TrustConfig::resolve(
        &json!({
            "alg": ["RS256"],
            "audience": TEST_AUDIENCE,
            "domain": TEST_DOMAIN,
            "jwks_uri": jwks_uri,
        }),
        None,
    )
    .expect("valid test trust config")
}

/// OIDC `at_hash` for an RS256 token.
pub fn at_hash(access_token: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(access_token.as_bytes());
    Base64UrlUnpadded::encode_string(&digest[..digest.len() / 2])
}
