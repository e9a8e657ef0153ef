// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Passive traffic observation.
//!
//! The observer is subscribed before the first navigation and watches
//! every request the portal makes on its own. The first request to the
//! API host carrying a recognised bearer prefix resolves the token
//! channel; the identity-detail response, if seen, resolves the
//! correlator channel. Both are oneshot channels, so each resolves at
//! most once and later matches are dropped.

use crate::api::payload::extract_correlator;
use crate::renderer::{TrafficEvent, TrafficStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// What counts as a credential-bearing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRules {
    /// Host of the portal API. Requests elsewhere are ignored.
    pub api_host: String,
    /// Recognised `Authorization` prefixes, e.g. `"Bearer "`.
    pub bearer_prefixes: Vec<String>,
    /// Path fragment of the identity-detail endpoint.
    pub identity_endpoint: String,
    /// Field in the identity-detail response holding the correlator.
    pub correlator_field: String,
}

impl CaptureRules {
    /// Token carried by `event`, if it is a qualifying API request.
    pub fn bearer_token(&self, event: &TrafficEvent) -> Option<String> {
        let TrafficEvent::Request { url, .. } = event else {
            return None;
        };
        let host = url::Url::parse(url).ok()?.host_str()?.to_ascii_lowercase();
        if host != self.api_host.to_ascii_lowercase() {
            return None;
        }
        let value = event.header("authorization")?.trim();
        self.bearer_prefixes.iter().find_map(|prefix| {
            let head = value.get(..prefix.len())?;
            if !head.eq_ignore_ascii_case(prefix) {
                return None;
            }
            let token = value[prefix.len()..].trim();
            (!token.is_empty()).then(|| token.to_string())
        })
    }

    /// Correlator carried by `event`, if it is a successful identity-detail response.
    pub fn correlator(&self, event: &TrafficEvent) -> Option<String> {
        let TrafficEvent::Response { url, status, body } = event else {
            return None;
        };
        if !(200..300).contains(status) || !url.contains(self.identity_endpoint.as_str()) {
            return None;
        }
        extract_correlator(body.as_deref()?, &self.correlator_field)
    }
}

/// Background task feeding the token and correlator channels.
///
/// Dropping the observer aborts the task and drops the traffic subscription.
pub struct TrafficObserver {
    token: oneshot::Receiver<String>,
    correlator: oneshot::Receiver<String>,
    task: JoinHandle<()>,
}

impl TrafficObserver {
    /// Start observing `stream` under `rules`.
    pub fn spawn(mut stream: TrafficStream, rules: CaptureRules) -> Self {
        let (token_tx, token) = oneshot::channel();
        let (correlator_tx, correlator) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut token_tx = Some(token_tx);
            let mut correlator_tx = Some(correlator_tx);
            while let Some(event) = stream.next().await {
                if let Some(found) = rules.bearer_token(&event) {
                    if let Some(tx) = token_tx.take() {
                        tracing::debug!("bearer credential observed");
                        let _ = tx.send(found);
                    }
                }
                if let Some(found) = rules.correlator(&event) {
                    if let Some(tx) = correlator_tx.take() {
                        tracing::debug!("identity correlator observed");
                        let _ = tx.send(found);
                    }
                }
                if token_tx.is_none() && correlator_tx.is_none() {
                    break;
                }
            }
        });

        Self {
            token,
            correlator,
            task,
        }
    }

    /// Take the captured token if it has arrived.
    pub fn try_token(&mut self) -> Option<String> {
        self.token.try_recv().ok()
    }

    /// Take the captured correlator if it has arrived.
    pub fn try_correlator(&mut self) -> Option<String> {
        self.correlator.try_recv().ok()
    }

    /// Unsubscribe from traffic.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for TrafficObserver {
    fn drop(&mut self) {
        self.task.abort();
    }
}
