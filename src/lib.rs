// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS Auth - bearer JWT authentication middleware for Axum
//!
//! Verifies `Authorization: Bearer <JWT>` credentials against a remote JSON
//! Web Key Set and attaches the outcome to each request as an
//! [`auth::AuthContext`].
//!
//! ## Modules
//!
//! - `auth` - Trust configuration, credential extraction, JWKS cache, token verification
//! - `api` - Demo HTTP surface (whoami, health checks, OpenAPI docs)
//! - `config` - Environment variables and the settings file
//! - `error` - Startup errors
//! - `state` - Shared application state

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod state;
