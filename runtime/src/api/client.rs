// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Async portal API client wrapping reqwest.
//!
//! POSTs JSON with the captured bearer credential. Retries transport
//! errors and 5xx with exponential backoff, and backs off on 429.

use super::payload::{parse_lookup, parse_modules};
use super::ApiError;
use crate::acquire::Credential;
use crate::compliance::{InternalIdentity, RawComplianceRecord};
use crate::members::ResolvedMember;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Portal API endpoint paths, relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiEndpoints {
    /// Resolves an external membership identifier to an internal identity.
    pub lookup: String,
    /// Lists the per-requirement modules for an internal identity.
    pub modules: String,
    /// Header carrying the identity correlator, when one was captured.
    pub correlator_header: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            lookup: "/api/members/search".to_string(),
            modules: "/api/members/training".to_string(),
            correlator_header: "x-identity-correlator".to_string(),
        }
    }
}

/// HTTP client for the portal API.
#[derive(Clone)]
pub struct PortalClient {
    client: reqwest::Client,
    api_base: String,
    endpoints: ApiEndpoints,
    max_retries: u32,
}

impl PortalClient {
    /// Create a client for `api_base` with a per-request timeout.
    pub fn new(api_base: &str, endpoints: ApiEndpoints, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("muster/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            endpoints,
            max_retries: 2,
        })
    }

    /// Override the retry count (default 2).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// POST `body` to `path` and parse the JSON response.
    ///
    /// `Ok(None)` means the portal answered 404.
    async fn post_json(
        &self,
        credential: &Credential,
        path: &str,
        body: &Value,
    ) -> Result<Option<Value>, ApiError> {
        let url = self.url(path);
        let mut retries = 0u32;

        loop {
            let mut request = self
                .client
                .post(&url)
                .header(reqwest::header::AUTHORIZATION, credential.authorization())
                .json(body);
            if let Some(correlator) = credential.correlator() {
                request = request.header(self.endpoints.correlator_header.as_str(), correlator);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    if retries < self.max_retries {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tracing::debug!(%url, "transport error, retrying in {delay:?}: {e}");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e.into());
                }
            };

            let status = response.status().as_u16();

            // Retry on 5xx
            if status >= 500 && retries < self.max_retries {
                retries += 1;
                let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                tokio::time::sleep(delay).await;
                continue;
            }

            // Backoff on 429
            if status == 429 && retries < self.max_retries {
                retries += 1;
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(2);
                let delay = Duration::from_secs(retry_after.min(10));
                tokio::time::sleep(delay).await;
                continue;
            }

            return match status {
                401 | 403 => Err(ApiError::Unauthorized(status)),
                404 => Ok(None),
                s if !(200..300).contains(&s) => Err(ApiError::Status(s)),
                _ => {
                    let text = response.text().await?;
                    if text.trim().is_empty() {
                        return Ok(Some(Value::Null));
                    }
                    serde_json::from_str(&text)
                        .map(Some)
                        .map_err(|e| ApiError::Malformed(format!("invalid JSON from {path}: {e}")))
                }
            };
        }
    }

    /// Resolve one membership identifier. `Ok(None)` when the portal has no match.
    pub async fn lookup_member(
        &self,
        credential: &Credential,
        identifier: &str,
    ) -> Result<Option<ResolvedMember>, ApiError> {
        let body = json!({ "membershipNumber": identifier });
        match self.post_json(credential, &self.endpoints.lookup, &body).await? {
            Some(payload) => parse_lookup(&payload),
            None => Ok(None),
        }
    }

    /// Fetch the raw module list for one internal identity.
    pub async fn fetch_modules(
        &self,
        credential: &Credential,
        identity: &InternalIdentity,
    ) -> Result<Vec<RawComplianceRecord>, ApiError> {
        let body = json!({ "contactNumber": identity.id });
        match self.post_json(credential, &self.endpoints.modules, &body).await? {
            Some(payload) => parse_modules(&payload),
            None => Err(ApiError::Status(404)),
        }
    }
}
