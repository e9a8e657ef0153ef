// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory credentials. Nothing here is ever written to disk.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::fmt;

/// Bearer credential captured from portal traffic, plus the optional identity correlator.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    correlator: Option<String>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            correlator: None,
        }
    }

    pub fn with_correlator(mut self, correlator: Option<String>) -> Self {
        self.correlator = correlator;
        self
    }

    /// The raw token, without any scheme prefix.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn correlator(&self) -> Option<&str> {
        self.correlator.as_deref()
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Short prefix safe to put in logs.
    pub fn redacted(&self) -> String {
        let prefix: String = self.token.chars().take(6).collect();
        format!("{prefix}…")
    }

    /// Expiry from the `exp` claim when the token is a JWT.
    ///
    /// The signature is not verified; this is informational only.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let payload = self.token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        let exp = claims.get("exp")?.as_i64()?;
        DateTime::from_timestamp(exp, 0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &self.redacted())
            .field("correlator", &self.correlator)
            .finish()
    }
}

/// Operator sign-in details for the identity provider.
#[derive(Clone)]
pub struct OperatorCredentials {
    pub username: String,
    password: String,
}

impl OperatorCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for OperatorCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
