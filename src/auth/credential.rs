// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential extraction.
//!
//! Two values are pulled from a request:
//!
//! - the bearer token from `Authorization: Bearer <token>`, which is the JWT
//!   that gets verified;
//! - the access token, looked up in `X-Auth-Token`, then the body (for methods
//!   that carry one), then the query string. It is only used for the
//!   `at_hash` binding check, and may be removed from the request once read
//!   (see [`TokenLookup::digest`]).
//!
//! A missing `Authorization` header is a normal state and yields `None`.

use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{
        header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE},
        request::Parts,
        HeaderMap, HeaderName, HeaderValue, Method, Uri,
    },
};
use futures::StreamExt;
use serde_json::Value;

use super::error::AuthError;

/// Dedicated access-token header.
pub static X_AUTH_TOKEN: HeaderName = HeaderName::from_static("x-auth-token");

/// Largest JSON or form body buffered while looking for an access token (2 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Read the bearer token from the `Authorization` header.
///
/// Returns `Ok(None)` when the header is absent. A header that is present but
/// not exactly `<scheme> <token>` with a case-insensitive `Bearer` scheme is a
/// [`AuthError::MalformedCredential`].
pub fn extract_authorization(headers: &HeaderMap) -> Result<Option<String>, AuthError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AuthError::MalformedCredential("header is not valid ASCII"))?;

    let mut parts = value.split_whitespace();
    let (scheme, token) = match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) => (scheme, token),
        (Some(_), None, _) | (None, _, _) => {
            return Err(AuthError::MalformedCredential("expected '<scheme> <token>'"))
        }
        (Some(_), Some(_), Some(_)) => {
            return Err(AuthError::MalformedCredential("unexpected extra segments"))
        }
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedCredential("scheme is not Bearer"));
    }
    Ok(Some(token.to_string()))
}

/// Find the access token in the header, body, or query string, in that order.
///
/// `body` is only consulted for methods other than `GET` and `HEAD`.
pub fn extract_token(parts: &Parts, body: &[u8], field: &str) -> Option<String> {
    locate_token(parts, body, field).map(|(token, _)| token)
}

/// Where an access token was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Header,
    Body,
    Query,
}

/// Access-token lookup settings for [`read_access_token`].
#[derive(Debug, Clone, Copy)]
pub struct TokenLookup<'a> {
    /// Body/query field holding the token.
    pub field: &'a str,
    /// Largest JSON or form body buffered; bigger bodies are not searched.
    pub body_limit: usize,
    /// Remove the token from the body or query once read.
    pub digest: bool,
}

/// Extract the access token from a live request.
///
/// Only JSON and form bodies are buffered, and only up to `body_limit`; a
/// larger body is passed on untouched and the query string is consulted
/// instead. With `digest` set, a token taken from the body or query is
/// removed from it so handlers never see it. The header is left as is.
pub async fn read_access_token(
    request: Request,
    lookup: TokenLookup<'_>,
) -> Result<(Request, Option<String>), AuthError> {
    let (mut parts, body) = request.into_parts();

    if let Some(token) = header_token(&parts.headers) {
        return Ok((Request::from_parts(parts, body), Some(token)));
    }

    let mut body = body;
    if method_has_body(&parts.method) && body_kind(&parts.headers).is_some() {
        match buffer_body(&parts.headers, body, lookup.body_limit).await? {
            Buffered::Complete(bytes) => {
                if let Some(token) = body_token(&parts.headers, &bytes, lookup.field) {
                    tracing::debug!("Access token found in request body");
                    let bytes = if lookup.digest {
                        let stripped = strip_body_field(&parts.headers, &bytes, lookup.field)
                            .unwrap_or(bytes);
                        parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(stripped.len()));
                        stripped
                    } else {
                        bytes
                    };
                    return Ok((Request::from_parts(parts, Body::from(bytes)), Some(token)));
                }
                body = Body::from(bytes);
            }
            Buffered::Overflow(rest) => {
                tracing::debug!(
                    limit = lookup.body_limit,
                    "Request body too large to search for an access token"
                );
                body = rest;
            }
        }
    }

    let token = query_token(parts.uri.query(), lookup.field);
    if token.is_some() {
        tracing::debug!("Access token found in query string");
        if lookup.digest {
            if let Some(uri) = strip_query_field(&parts.uri, lookup.field) {
                parts.uri = uri;
            }
        }
    }
    Ok((Request::from_parts(parts, body), token))
}

/// Locate the access token without touching the request.
pub fn locate_token(parts: &Parts, body: &[u8], field: &str) -> Option<(String, TokenSource)> {
    if let Some(token) = header_token(&parts.headers) {
        return Some((token, TokenSource::Header));
    }
    if method_has_body(&parts.method) {
        if let Some(token) = body_token(&parts.headers, body, field) {
            return Some((token, TokenSource::Body));
        }
    }
    query_token(parts.uri.query(), field).map(|token| (token, TokenSource::Query))
}

enum Buffered {
    Complete(Bytes),
    /// Body exceeded the limit; holds the full body, already-read chunks first.
    Overflow(Body),
}

async fn buffer_body(
    headers: &HeaderMap,
    body: Body,
    limit: usize,
) -> Result<Buffered, AuthError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Ok(Buffered::Overflow(body));
    }

    let mut stream = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut total = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AuthError::InvalidRequestBody(e.to_string()))?;
        total = total.saturating_add(chunk.len());
        chunks.push(chunk);
        if total > limit {
            let read = futures::stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
            return Ok(Buffered::Overflow(Body::from_stream(read.chain(stream))));
        }
    }

    let bytes = match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.remove(0),
        _ => Bytes::from(chunks.concat()),
    };
    Ok(Buffered::Complete(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
}

fn body_kind(headers: &HeaderMap) -> Option<BodyKind> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if mime == "application/json" || mime.ends_with("+json") {
        Some(BodyKind::Json)
    } else if mime == "application/x-www-form-urlencoded" {
        Some(BodyKind::Form)
    } else {
        None
    }
}

/// Re-encode a JSON or form body without `field`.
fn strip_body_field(headers: &HeaderMap, body: &[u8], field: &str) -> Option<Bytes> {
    match body_kind(headers)? {
        BodyKind::Json => {
            let mut value: Value = serde_json::from_slice(body).ok()?;
            value.as_object_mut()?.remove(field);
            serde_json::to_vec(&value).ok().map(Bytes::from)
        }
        BodyKind::Form => Some(Bytes::from(without_field(body, field))),
    }
}

fn strip_query_field(uri: &Uri, field: &str) -> Option<Uri> {
    let query = uri.query()?;
    let kept = without_field(query.as_bytes(), field);
    let path_and_query = if kept.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), kept)
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse().ok()?);
    Uri::from_parts(parts).ok()
}

fn without_field(input: &[u8], field: &str) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(url::form_urlencoded::parse(input).filter(|(key, _)| key != field))
        .finish()
}

fn method_has_body(method: &Method) -> bool {
    method != Method::GET && method != Method::HEAD
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(&X_AUTH_TOKEN)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn body_token(headers: &HeaderMap, body: &[u8], field: &str) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    match body_kind(headers)? {
        BodyKind::Json => {
            let value: Value = serde_json::from_slice(body).ok()?;
            value
                .get(field)
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(str::to_string)
        }
        BodyKind::Form => form_value(body, field),
    }
}

fn query_token(query: Option<&str>, field: &str) -> Option<String> {
    form_value(query?.as_bytes(), field)
}

fn form_value(input: &[u8], field: &str) -> Option<String> {
    url::form_urlencoded::parse(input)
        .find(|(key, value)| key == field && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}
