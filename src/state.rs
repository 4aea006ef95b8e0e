// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use crate::auth::Authenticator;

#[derive(Clone)]
pub struct AppState {
    pub auth: Authenticator,
}

impl AppState {
    pub fn new(auth: Authenticator) -> Self {
        Self { auth }
    }
}
