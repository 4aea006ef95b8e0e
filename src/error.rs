// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Startup errors for the server binary.
//!
//! Request-time failures are [`crate::auth::AuthError`]; everything here
//! aborts the process before it starts serving.

use std::path::PathBuf;

use thiserror::Error;

use crate::auth::ConfigError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("failed to read settings file {path}: {source}")]
    ReadSettings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file: {0}")]
    ParseSettings(#[source] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load TLS certificate or key: {0}")]
    Tls(#[source] std::io::Error),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}
