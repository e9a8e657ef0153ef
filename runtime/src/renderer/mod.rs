// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Renderer abstraction for browser-driven sign-in.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide). Every
//! context is an isolated browser session: no cookies or storage are
//! shared between contexts, and closing a context discards all of it.

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A network event observed in a browser context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrafficEvent {
    /// An outgoing request, with the headers the page attached to it.
    Request {
        url: String,
        headers: Vec<(String, String)>,
    },
    /// A response. `body` is only populated for URLs the subscriber asked for.
    Response {
        url: String,
        status: u16,
        body: Option<String>,
    },
}

impl TrafficEvent {
    /// Case-insensitive header lookup on a request event.
    pub fn header(&self, name: &str) -> Option<&str> {
        match self {
            TrafficEvent::Request { headers, .. } => headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str()),
            TrafficEvent::Response { .. } => None,
        }
    }
}

/// Stream of traffic events. Dropping it unsubscribes.
pub type TrafficStream = BoxStream<'static, TrafficEvent>;

/// A browser engine that can create isolated rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new isolated browser session.
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser session (one tab in its own profile).
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Subscribe to network traffic. Response bodies are captured for
    /// URLs containing any of `capture_bodies_for`.
    async fn observe_traffic(&self, capture_bodies_for: &[String]) -> Result<TrafficStream>;
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// Get the current URL.
    async fn get_url(&self) -> Result<String>;
    /// Close this context and discard its state.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A renderer used when Chromium is unavailable. Every context request fails.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        Err(anyhow::anyhow!("browser not available"))
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
    fn active_contexts(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_ignores_case() {
        let event = TrafficEvent::Request {
            url: "https://api.example.org/v1/me".to_string(),
            headers: vec![("Authorization".to_string(), "Bearer abc".to_string())],
        };
        assert_eq!(event.header("authorization"), Some("Bearer abc"));
        assert_eq!(event.header("x-missing"), None);

        let response = TrafficEvent::Response {
            url: "https://api.example.org/v1/me".to_string(),
            status: 200,
            body: None,
        };
        assert_eq!(response.header("authorization"), None);
    }

    #[tokio::test]
    async fn test_noop_renderer_refuses_contexts() {
        let renderer = NoopRenderer;
        assert!(renderer.new_context().await.is_err());
        assert_eq!(renderer.active_contexts(), 0);
    }
}
