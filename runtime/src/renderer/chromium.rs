// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Chromium-based renderer using chromiumoxide.
//!
//! Each context is its own browser process with a throwaway profile
//! directory, so sessions never share cookies or storage.

use super::{NavigationResult, RenderContext, Renderer, TrafficEvent, TrafficStream};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. MUSTER_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("MUSTER_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.muster/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".muster/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".muster/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".muster/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".muster/chromium/chrome-linux64/chrome"),
                home.join(".muster/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer. Launches one browser per context.
pub struct ChromiumRenderer {
    executable: PathBuf,
    headless: bool,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Create a renderer using the discovered Chromium binary.
    pub fn new(headless: bool) -> Result<Self> {
        let executable = find_chromium()
            .context("Chromium not found. Set MUSTER_CHROMIUM_PATH or install Chrome.")?;
        Ok(Self::with_executable(executable, headless))
    }

    /// Create a renderer for a specific Chromium binary.
    pub fn with_executable(executable: PathBuf, headless: bool) -> Self {
        Self {
            executable,
            headless,
            active_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn browser_config(&self, profile_dir: &Path) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .chrome_executable(&self.executable)
            .user_data_dir(profile_dir)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run");
        builder = if self.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let profile_dir =
            std::env::temp_dir().join(format!("muster-profile-{}", uuid::Uuid::new_v4()));
        let config = self.browser_config(&profile_dir)?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Spawn the handler task
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                handler_task.abort();
                let _ = std::fs::remove_dir_all(&profile_dir);
                bail!("failed to create new page: {e}");
            }
        };

        self.active_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(profile = %profile_dir.display(), "browser session started");

        Ok(Box::new(ChromiumContext {
            browser,
            page,
            handler_task,
            profile_dir,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        // Each context owns its browser; nothing shared to tear down
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single Chromium session.
pub struct ChromiumContext {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    profile_dir: PathBuf,
    active_count: Arc<AtomicUsize>,
}

fn header_pairs(headers: &serde_json::Value) -> Vec<(String, String)> {
    headers
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Responses to watched URLs, held until their body is readable.
///
/// An entry leaves on `LoadingFinished` or `LoadingFailed`, whichever
/// the browser reports for that request.
struct PendingBodies {
    filters: Vec<String>,
    awaiting: HashMap<String, (String, u16)>,
}

impl PendingBodies {
    fn new(filters: Vec<String>) -> Self {
        Self {
            filters,
            awaiting: HashMap::new(),
        }
    }

    /// Returns the event to yield now, or `None` if the response waits for its body.
    fn on_response(&mut self, request_id: &str, url: String, status: u16) -> Option<TrafficEvent> {
        if self.filters.iter().any(|f| url.contains(f.as_str())) {
            self.awaiting.insert(request_id.to_string(), (url, status));
            None
        } else {
            Some(TrafficEvent::Response {
                url,
                status,
                body: None,
            })
        }
    }

    fn on_finished(&mut self, request_id: &str) -> Option<(String, u16)> {
        self.awaiting.remove(request_id)
    }

    /// The body will never arrive; report the response without it.
    fn on_failed(&mut self, request_id: &str) -> Option<TrafficEvent> {
        self.awaiting
            .remove(request_id)
            .map(|(url, status)| TrafficEvent::Response {
                url,
                status,
                body: None,
            })
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn observe_traffic(&self, capture_bodies_for: &[String]) -> Result<TrafficStream> {
        let mut requests = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .context("failed to subscribe to requests")?;
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .context("failed to subscribe to responses")?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .context("failed to subscribe to loading events")?;
        let mut failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .context("failed to subscribe to loading failures")?;

        let page = self.page.clone();
        let mut pending = PendingBodies::new(capture_bodies_for.to_vec());

        let stream = async_stream::stream! {
            loop {
                let event = tokio::select! {
                    Some(ev) = requests.next() => Some(TrafficEvent::Request {
                        url: ev.request.url.clone(),
                        headers: header_pairs(ev.request.headers.inner()),
                    }),
                    Some(ev) = responses.next() => pending.on_response(
                        ev.request_id.inner(),
                        ev.response.url.clone(),
                        ev.response.status as u16,
                    ),
                    Some(ev) = failed.next() => pending.on_failed(ev.request_id.inner()),
                    Some(ev) = finished.next() => {
                        // Bodies are only readable once loading finishes
                        match pending.on_finished(ev.request_id.inner()) {
                            Some((url, status)) => {
                                let body = page
                                    .execute(GetResponseBodyParams::new(ev.request_id.clone()))
                                    .await
                                    .ok()
                                    .map(|resp| resp.result.body.clone());
                                Some(TrafficEvent::Response { url, status, body })
                            }
                            None => None,
                        }
                    }
                    else => break,
                };
                if let Some(event) = event {
                    yield event;
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            self.page.goto(url),
        )
        .await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn get_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .context("failed to get URL")?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromiumContext {
            mut browser,
            page,
            handler_task,
            profile_dir,
            active_count,
        } = *self;

        active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = page.close().await;
        if let Err(e) = browser.close().await {
            tracing::debug!("browser close failed: {e}");
        }
        let _ = browser.wait().await;
        handler_task.abort();
        if let Err(e) = std::fs::remove_dir_all(&profile_dir) {
            tracing::debug!(profile = %profile_dir.display(), "profile cleanup failed: {e}");
        }
        Ok(())
    }
}
