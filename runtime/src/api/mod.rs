// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Portal API access.
//!
//! The portal exposes JSON-over-HTTP POST endpoints authorised with the
//! bearer credential captured during sign-in. Response field names are
//! natural-language strings ("Membership number", "Expiry date"), so
//! payload parsing folds case and whitespace instead of relying on a schema.

pub mod client;
pub mod payload;

pub use client::{ApiEndpoints, PortalClient};

/// Errors from a single portal API call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("portal rejected the credential (HTTP {0})")]
    Unauthorized(u16),

    #[error("portal returned HTTP {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Malformed(String),
}
