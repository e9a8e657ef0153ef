// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! The sign-in state machine.
//!
//! ```text
//! Init → PortalLoading → ConsentHandling → AwaitingProviderRedirect
//!      → FormReady → Submitted → AwaitingReturnRedirect → TokenCaptured
//! ```
//!
//! Any state can fall to `Failed`. When the provider redirect never comes
//! but the portal already holds a token in client storage, the machine
//! jumps straight from `AwaitingProviderRedirect` to waiting for the
//! credential without entering anything.

use super::locator::{act_on, resolve_cascade, Locator, LocatorAction};
use super::observer::{CaptureRules, TrafficObserver};
use super::poll::{poll_until, PollBudget, DEFAULT_POLL_INTERVAL};
use super::{AcquisitionError, Credential, OperatorCredentials, SessionSource};
use crate::events::{EventBus, PipelineEvent};
use crate::renderer::{RenderContext, Renderer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lists every key in local and session storage.
const STORAGE_KEYS_JS: &str = "(() => { const keys = []; \
    try { for (let i = 0; i < localStorage.length; i++) keys.push(localStorage.key(i)); } catch (e) {} \
    try { for (let i = 0; i < sessionStorage.length; i++) keys.push(sessionStorage.key(i)); } catch (e) {} \
    return keys; })()";

/// States of the sign-in flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Init,
    PortalLoading,
    ConsentHandling,
    AwaitingProviderRedirect,
    FormReady,
    Submitted,
    AwaitingReturnRedirect,
    TokenCaptured,
    Failed,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquisitionState::Init => "Init",
            AcquisitionState::PortalLoading => "PortalLoading",
            AcquisitionState::ConsentHandling => "ConsentHandling",
            AcquisitionState::AwaitingProviderRedirect => "AwaitingProviderRedirect",
            AcquisitionState::FormReady => "FormReady",
            AcquisitionState::Submitted => "Submitted",
            AcquisitionState::AwaitingReturnRedirect => "AwaitingReturnRedirect",
            AcquisitionState::TokenCaptured => "TokenCaptured",
            AcquisitionState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Time budgets for each wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionBudgets {
    pub portal_load: Duration,
    pub consent: Duration,
    pub provider_redirect: Duration,
    pub login_form: Duration,
    pub return_redirect: Duration,
    pub credential: PollBudget,
    /// How long to keep listening for the correlator once the token is in hand.
    pub correlator_grace: Duration,
    pub poll_interval: Duration,
    /// Caller-imposed ceiling on the whole attempt.
    pub overall: Duration,
}

impl Default for AcquisitionBudgets {
    fn default() -> Self {
        Self {
            portal_load: Duration::from_secs(60),
            consent: Duration::from_secs(5),
            provider_redirect: Duration::from_secs(30),
            login_form: Duration::from_secs(15),
            return_redirect: Duration::from_secs(60),
            credential: PollBudget::new(Duration::from_secs(15), Duration::from_millis(200)),
            correlator_grace: Duration::from_secs(2),
            poll_interval: DEFAULT_POLL_INTERVAL,
            overall: Duration::from_secs(300),
        }
    }
}

/// Locator cascades for each control on the sign-in path.
///
/// The identifier and secret fields must both be on the first provider page;
/// two-step flows that reveal the password only after "Next" are not handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginCascades {
    pub consent: Vec<Locator>,
    pub identifier: Vec<Locator>,
    pub secret: Vec<Locator>,
    pub submit: Vec<Locator>,
}

impl Default for LoginCascades {
    fn default() -> Self {
        Self {
            consent: vec![
                Locator::css("#onetrust-accept-btn-handler"),
                Locator::css("button#accept-cookies"),
                Locator::text("button", "Accept all cookies"),
                Locator::text("button", "Accept all"),
                Locator::text("button", "Accept"),
            ],
            identifier: vec![
                Locator::css("input#signInName"),
                Locator::css("input#email"),
                Locator::css("input[type='email']"),
                Locator::css("input[name='username']"),
                Locator::xpath("//input[contains(translate(@placeholder, 'EMAIL', 'email'), 'email')]"),
            ],
            secret: vec![
                Locator::css("input#password"),
                Locator::css("input[type='password']"),
            ],
            submit: vec![
                Locator::css("button#next"),
                Locator::css("button[type='submit']"),
                Locator::text("button", "Sign in"),
                Locator::text("button", "Log in"),
                Locator::css("input[type='submit']"),
            ],
        }
    }
}

/// Everything the acquirer needs to know about the target.
#[derive(Debug, Clone)]
pub struct AcquirerSettings {
    /// Portal root URL.
    pub portal_url: String,
    /// Identity-provider host; subdomains also match.
    pub identity_provider_host: String,
    pub capture: CaptureRules,
    pub cascades: LoginCascades,
    pub budgets: AcquisitionBudgets,
}

/// Drives a fresh browser session through sign-in and returns the captured credential.
pub struct SessionAcquirer {
    renderer: Arc<dyn Renderer>,
    settings: AcquirerSettings,
    events: Option<Arc<EventBus>>,
}

/// Host of `url`, lowercased.
fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .host_str()
        .map(|h| h.to_ascii_lowercase())
}

/// `url`'s host is exactly `host` (already lowercased).
fn on_host(url: &str, host: &str) -> bool {
    host_of(url).as_deref() == Some(host)
}

/// `url`'s host equals `host` or is a subdomain of it.
pub fn host_matches(url: &str, host: &str) -> bool {
    let Some(actual) = host_of(url) else {
        return false;
    };
    let wanted = host.trim().to_ascii_lowercase();
    !wanted.is_empty()
        && (actual == wanted
            || actual
                .strip_suffix(wanted.as_str())
                .is_some_and(|rest| rest.ends_with('.')))
}

async fn current_url(ctx: &dyn RenderContext) -> Option<String> {
    match ctx.get_url().await {
        Ok(url) => Some(url),
        Err(e) => {
            debug!("could not read location: {e:#}");
            None
        }
    }
}

fn browser_error(e: anyhow::Error) -> AcquisitionError {
    AcquisitionError::Browser(format!("{e:#}"))
}

impl SessionAcquirer {
    pub fn new(renderer: Arc<dyn Renderer>, settings: AcquirerSettings) -> Self {
        Self {
            renderer,
            settings,
            events: None,
        }
    }

    /// Publish state transitions on `events`.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    fn enter(&self, state: AcquisitionState) {
        info!(%state, "sign-in");
        if let Some(events) = &self.events {
            events.emit(PipelineEvent::StateEntered {
                state: state.to_string(),
            });
        }
    }

    fn poll_budget(&self, timeout: Duration) -> PollBudget {
        PollBudget::new(timeout, self.settings.budgets.poll_interval)
    }

    /// Run one sign-in attempt in a new isolated browser session.
    ///
    /// The session is torn down before returning, on success or failure.
    pub async fn acquire(
        &self,
        operator: &OperatorCredentials,
    ) -> Result<Credential, AcquisitionError> {
        debug!(state = %AcquisitionState::Init, "sign-in");
        let overall = self.settings.budgets.overall;
        let mut ctx = self.renderer.new_context().await.map_err(browser_error)?;

        let capture_bodies = std::slice::from_ref(&self.settings.capture.identity_endpoint);
        let outcome = match ctx.observe_traffic(capture_bodies).await {
            Ok(stream) => {
                let mut observer = TrafficObserver::spawn(stream, self.settings.capture.clone());
                let attempt = self.drive(ctx.as_mut(), &mut observer, operator);
                let outcome = tokio::time::timeout(overall, attempt)
                    .await
                    .unwrap_or(Err(AcquisitionError::DeadlineExceeded(overall)));
                observer.stop();
                outcome
            }
            Err(e) => Err(browser_error(e)),
        };

        if let Err(e) = ctx.close().await {
            warn!("browser teardown failed: {e:#}");
        }

        match &outcome {
            Ok(credential) => {
                info!(
                    token = %credential.redacted(),
                    correlator = credential.correlator().is_some(),
                    "credential captured"
                );
                if let Some(events) = &self.events {
                    events.emit(PipelineEvent::CredentialCaptured {
                        correlator_present: credential.correlator().is_some(),
                    });
                }
            }
            Err(e) => {
                warn!(state = %AcquisitionState::Failed, "sign-in failed: {e}");
                if let Some(events) = &self.events {
                    events.emit(PipelineEvent::AcquisitionFailed {
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        outcome
    }

    async fn drive(
        &self,
        ctx: &mut dyn RenderContext,
        observer: &mut TrafficObserver,
        operator: &OperatorCredentials,
    ) -> Result<Credential, AcquisitionError> {
        let settings = &self.settings;
        let budgets = &settings.budgets;
        let cascades = &settings.cascades;
        let portal_host = host_of(&settings.portal_url).ok_or_else(|| {
            AcquisitionError::PortalLoadFailed(format!("invalid portal URL: {}", settings.portal_url))
        })?;

        self.enter(AcquisitionState::PortalLoading);
        let nav = ctx
            .navigate(&settings.portal_url, budgets.portal_load.as_millis() as u64)
            .await
            .map_err(|e| AcquisitionError::PortalLoadFailed(format!("{e:#}")))?;
        debug!(url = %nav.final_url, load_ms = nav.load_time_ms, "portal loaded");

        // Everything from here on only reads the page or runs scripts in it
        let ctx: &dyn RenderContext = ctx;

        self.enter(AcquisitionState::ConsentHandling);
        self.dismiss_consent(ctx).await;

        self.enter(AcquisitionState::AwaitingProviderRedirect);
        let idp = settings.identity_provider_host.as_str();
        let redirected = poll_until(self.poll_budget(budgets.provider_redirect), move || async move {
            current_url(ctx).await.filter(|url| host_matches(url, idp))
        })
        .await;

        if redirected.is_err() {
            let last = current_url(ctx).await.unwrap_or_default();
            if on_host(&last, &portal_host) && self.storage_has_token(ctx).await {
                info!("portal already holds a token; skipping credential entry");
                return self.await_credential(observer).await;
            }
            return Err(AcquisitionError::ProviderRedirectTimeout(
                budgets.provider_redirect,
            ));
        }

        self.enter(AcquisitionState::FormReady);
        let form_budget = self.poll_budget(budgets.login_form);
        let identifier = resolve_cascade(ctx, &cascades.identifier, form_budget)
            .await
            .map_err(|e| {
                debug!("identifier cascade: {e}");
                AcquisitionError::LoginFormNotFound("identifier")
            })?;
        let secret = resolve_cascade(ctx, &cascades.secret, form_budget)
            .await
            .map_err(|e| {
                debug!("secret cascade: {e}");
                AcquisitionError::LoginFormNotFound("secret")
            })?;

        self.enter(AcquisitionState::Submitted);
        if !act_on(ctx, &identifier, LocatorAction::Fill(&operator.username))
            .await
            .map_err(browser_error)?
        {
            return Err(AcquisitionError::LoginFormNotFound("identifier"));
        }
        if !act_on(ctx, &secret, LocatorAction::Fill(operator.password()))
            .await
            .map_err(browser_error)?
        {
            return Err(AcquisitionError::LoginFormNotFound("secret"));
        }
        let submit = resolve_cascade(ctx, &cascades.submit, form_budget)
            .await
            .map_err(|e| {
                debug!("submit cascade: {e}");
                AcquisitionError::SubmitControlNotFound
            })?;
        if !act_on(ctx, &submit, LocatorAction::Click)
            .await
            .map_err(browser_error)?
        {
            return Err(AcquisitionError::SubmitControlNotFound);
        }

        self.enter(AcquisitionState::AwaitingReturnRedirect);
        let portal = portal_host.as_str();
        poll_until(self.poll_budget(budgets.return_redirect), move || async move {
            current_url(ctx).await.filter(|url| on_host(url, portal))
        })
        .await
        .map_err(|_| AcquisitionError::ReturnRedirectTimeout(budgets.return_redirect))?;

        self.await_credential(observer).await
    }

    /// Best effort: a missing consent prompt is normal.
    async fn dismiss_consent(&self, ctx: &dyn RenderContext) {
        let budget = self.poll_budget(self.settings.budgets.consent);
        match resolve_cascade(ctx, &self.settings.cascades.consent, budget).await {
            Ok(locator) => match act_on(ctx, &locator, LocatorAction::Click).await {
                Ok(true) => debug!(?locator, "consent dismissed"),
                Ok(false) => debug!(?locator, "consent control vanished before click"),
                Err(e) => debug!("consent click failed: {e:#}"),
            },
            Err(_) => debug!("no consent prompt"),
        }
    }

    async fn storage_has_token(&self, ctx: &dyn RenderContext) -> bool {
        match ctx.execute_js(STORAGE_KEYS_JS).await {
            Ok(serde_json::Value::Array(keys)) => keys
                .iter()
                .filter_map(|k| k.as_str())
                .any(|k| k.to_lowercase().contains("token")),
            Ok(_) => false,
            Err(e) => {
                debug!("storage inspection failed: {e:#}");
                false
            }
        }
    }

    async fn await_credential(
        &self,
        observer: &mut TrafficObserver,
    ) -> Result<Credential, AcquisitionError> {
        let budget = self.settings.budgets.credential;
        let token = poll_until(budget, || std::future::ready(observer.try_token()))
            .await
            .map_err(|_| AcquisitionError::CredentialCaptureTimeout(budget.timeout))?;

        let grace = self.poll_budget(self.settings.budgets.correlator_grace);
        let correlator = poll_until(grace, || std::future::ready(observer.try_correlator()))
            .await
            .ok();
        if correlator.is_none() {
            debug!("identity correlator not observed; continuing without it");
        }

        self.enter(AcquisitionState::TokenCaptured);
        Ok(Credential::new(token).with_correlator(correlator))
    }
}

#[async_trait]
impl SessionSource for SessionAcquirer {
    async fn acquire(
        &self,
        operator: &OperatorCredentials,
    ) -> Result<Credential, AcquisitionError> {
        SessionAcquirer::acquire(self, operator).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{NavigationResult, NoopRenderer, TrafficEvent, TrafficStream};
    use futures::channel::mpsc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    const PORTAL: &str = "https://portal.example.org/";
    const IDP_LOGIN: &str = "https://login.idp.example.net/tenant/oauth2/authorize?client=x";
    const API: &str = "https://api.portal.example.org";

    /// How the fake site behaves.
    #[derive(Clone, Default)]
    struct Scenario {
        /// Location after navigating to the portal.
        after_navigate: String,
        /// Traffic the portal emits on load.
        navigate_traffic: Vec<TrafficEvent>,
        /// Selectors that match a live element.
        present: Vec<String>,
        /// Present controls whose click changes nothing (consent banners).
        inert: Vec<String>,
        storage_keys: Vec<String>,
        /// Location after the submit click, if it changes.
        after_submit: Option<String>,
        submit_traffic: Vec<TrafficEvent>,
    }

    struct Shared {
        url: Mutex<String>,
        actions: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    struct FakeSite {
        scenario: Scenario,
        shared: Arc<Shared>,
        tx: mpsc::UnboundedSender<TrafficEvent>,
        rx: Mutex<Option<mpsc::UnboundedReceiver<TrafficEvent>>>,
    }

    #[async_trait]
    impl RenderContext for FakeSite {
        async fn observe_traffic(&self, _: &[String]) -> anyhow::Result<TrafficStream> {
            let rx = self.rx.lock().unwrap().take().expect("subscribed twice");
            Ok(Box::pin(rx))
        }

        async fn navigate(&mut self, url: &str, _: u64) -> anyhow::Result<NavigationResult> {
            *self.shared.url.lock().unwrap() = self.scenario.after_navigate.clone();
            for event in &self.scenario.navigate_traffic {
                let _ = self.tx.unbounded_send(event.clone());
            }
            Ok(NavigationResult {
                final_url: url.to_string(),
                load_time_ms: 12,
            })
        }

        async fn execute_js(&self, script: &str) -> anyhow::Result<serde_json::Value> {
            if script.contains("localStorage") {
                return Ok(serde_json::json!(self.scenario.storage_keys));
            }
            let Some(hit) = self
                .scenario
                .present
                .iter()
                .find(|p| script.contains(p.as_str()))
            else {
                return Ok(serde_json::Value::Bool(false));
            };
            if script.contains("el.click()") {
                self.shared.actions.lock().unwrap().push(format!("click {hit}"));
                if self.scenario.inert.contains(hit) {
                    return Ok(serde_json::Value::Bool(true));
                }
                if let Some(next) = &self.scenario.after_submit {
                    *self.shared.url.lock().unwrap() = next.clone();
                }
                for event in &self.scenario.submit_traffic {
                    let _ = self.tx.unbounded_send(event.clone());
                }
            } else if script.contains("dispatchEvent") {
                self.shared.actions.lock().unwrap().push(format!("fill {hit}"));
            }
            Ok(serde_json::Value::Bool(true))
        }

        async fn get_url(&self) -> anyhow::Result<String> {
            Ok(self.shared.url.lock().unwrap().clone())
        }

        async fn close(self: Box<Self>) -> anyhow::Result<()> {
            self.shared.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeRenderer {
        scenario: Scenario,
        shared: Arc<Shared>,
        opened: AtomicUsize,
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn new_context(&self) -> anyhow::Result<Box<dyn RenderContext>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded();
            Ok(Box::new(FakeSite {
                scenario: self.scenario.clone(),
                shared: Arc::clone(&self.shared),
                tx,
                rx: Mutex::new(Some(rx)),
            }))
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn active_contexts(&self) -> usize {
            0
        }
    }

    fn bearer(token: &str) -> TrafficEvent {
        TrafficEvent::Request {
            url: format!("{API}/v1/profile"),
            headers: vec![("Authorization".to_string(), format!("Bearer {token}"))],
        }
    }

    fn identity_response() -> TrafficEvent {
        TrafficEvent::Response {
            url: format!("{API}/api/user/details"),
            status: 200,
            body: Some(r#"{"data":[{"Contact number":"4242"}]}"#.to_string()),
        }
    }

    fn settings() -> AcquirerSettings {
        AcquirerSettings {
            portal_url: PORTAL.to_string(),
            identity_provider_host: "idp.example.net".to_string(),
            capture: CaptureRules {
                api_host: "api.portal.example.org".to_string(),
                bearer_prefixes: vec!["Bearer ".to_string()],
                identity_endpoint: "/api/user/details".to_string(),
                correlator_field: "Contact number".to_string(),
            },
            cascades: LoginCascades::default(),
            budgets: AcquisitionBudgets::default(),
        }
    }

    fn login_page() -> Scenario {
        Scenario {
            after_navigate: IDP_LOGIN.to_string(),
            present: vec![
                "input#signInName".to_string(),
                "input#password".to_string(),
                "button#next".to_string(),
            ],
            after_submit: Some(format!("{PORTAL}home")),
            submit_traffic: vec![
                TrafficEvent::Request {
                    url: format!("{PORTAL}assets/app.js"),
                    headers: Vec::new(),
                },
                bearer("tok-first"),
                identity_response(),
                bearer("tok-second"),
            ],
            ..Scenario::default()
        }
    }

    fn acquirer(scenario: Scenario, settings: AcquirerSettings) -> (SessionAcquirer, Arc<Shared>) {
        let shared = Arc::new(Shared {
            url: Mutex::new("about:blank".to_string()),
            actions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        let renderer = FakeRenderer {
            scenario,
            shared: Arc::clone(&shared),
            opened: AtomicUsize::new(0),
        };
        (SessionAcquirer::new(Arc::new(renderer), settings), shared)
    }

    fn operator() -> OperatorCredentials {
        OperatorCredentials::new("leader@example.org", "correct horse")
    }

    #[test]
    fn test_host_matching() {
        assert!(host_matches("https://idp.example.net/x", "idp.example.net"));
        assert!(host_matches("https://login.IDP.example.net/x", "idp.example.net"));
        assert!(!host_matches("https://evilidp.example.net/x", "idp.example.net"));
        assert!(!host_matches("https://idp.example.net.evil.io/", "idp.example.net"));
        assert!(!host_matches("not a url", "idp.example.net"));
        assert!(!host_matches("https://idp.example.net/", ""));

        assert!(on_host("https://portal.example.org/home", "portal.example.org"));
        assert!(!on_host("https://login.portal.example.org/", "portal.example.org"));
        assert!(!on_host("about:blank", "portal.example.org"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_sign_in_captures_first_bearer() {
        let (acq, shared) = acquirer(login_page(), settings());
        let events = Arc::new(EventBus::new(64));
        let mut rx = events.subscribe();
        let acq = acq.with_events(Arc::clone(&events));

        let credential = acq.acquire(&operator()).await.unwrap();

        assert_eq!(credential.token(), "tok-first");
        assert_eq!(credential.correlator(), Some("4242"));
        assert_eq!(
            *shared.actions.lock().unwrap(),
            vec![
                "fill input#signInName".to_string(),
                "fill input#password".to_string(),
                "click button#next".to_string(),
            ]
        );
        assert!(shared.closed.load(Ordering::SeqCst));

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::StateEntered { state } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                "PortalLoading",
                "ConsentHandling",
                "AwaitingProviderRedirect",
                "FormReady",
                "Submitted",
                "AwaitingReturnRedirect",
                "TokenCaptured",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_correlator_is_optional() {
        let mut scenario = login_page();
        scenario.submit_traffic = vec![bearer("tok-only")];
        let (acq, _) = acquirer(scenario, settings());

        let credential = acq.acquire(&operator()).await.unwrap();
        assert_eq!(credential.token(), "tok-only");
        assert_eq!(credential.correlator(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_token_skips_credential_entry() {
        let scenario = Scenario {
            after_navigate: format!("{PORTAL}dashboard"),
            navigate_traffic: vec![bearer("tok-session")],
            storage_keys: vec!["theme".to_string(), "msal.AccessToken.abc".to_string()],
            present: vec!["input#signInName".to_string()],
            ..Scenario::default()
        };
        let (acq, shared) = acquirer(scenario, settings());

        let credential = acq.acquire(&operator()).await.unwrap();
        assert_eq!(credential.token(), "tok-session");
        assert!(shared.actions.lock().unwrap().is_empty());
        assert!(shared.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_token_off_portal_host_still_times_out() {
        for location in [
            "https://status.example.com/maintenance",
            "https://app.portal.example.org/",
        ] {
            let scenario = Scenario {
                after_navigate: location.to_string(),
                navigate_traffic: vec![bearer("tok-session")],
                storage_keys: vec!["msal.AccessToken.abc".to_string()],
                ..Scenario::default()
            };
            let (acq, shared) = acquirer(scenario, settings());

            let err = acq.acquire(&operator()).await.unwrap_err();
            assert_eq!(
                err,
                AcquisitionError::ProviderRedirectTimeout(Duration::from_secs(30)),
                "location {location}"
            );
            assert!(shared.closed.load(Ordering::SeqCst));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_consent_banner_dismissed_before_login() {
        let mut scenario = login_page();
        scenario.present.push("#onetrust-accept-btn-handler".to_string());
        scenario.inert.push("#onetrust-accept-btn-handler".to_string());
        let (acq, shared) = acquirer(scenario, settings());

        let credential = acq.acquire(&operator()).await.unwrap();
        assert_eq!(credential.token(), "tok-first");
        assert_eq!(
            *shared.actions.lock().unwrap(),
            vec![
                "click #onetrust-accept-btn-handler".to_string(),
                "fill input#signInName".to_string(),
                "fill input#password".to_string(),
                "click button#next".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_on_portal_subdomain_needs_exact_return() {
        let mut scenario = login_page();
        scenario.after_navigate = "https://login.portal.example.org/authorize".to_string();
        scenario.after_submit = None;
        scenario.submit_traffic = Vec::new();
        let mut s = settings();
        s.identity_provider_host = "login.portal.example.org".to_string();
        let (acq, _) = acquirer(scenario, s);

        let err = acq.acquire(&operator()).await.unwrap_err();
        assert_eq!(
            err,
            AcquisitionError::ReturnRedirectTimeout(Duration::from_secs(60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_redirect_and_no_stored_token() {
        let scenario = Scenario {
            after_navigate: format!("{PORTAL}landing"),
            storage_keys: vec!["theme".to_string()],
            ..Scenario::default()
        };
        let (acq, _) = acquirer(scenario, settings());

        let err = acq.acquire(&operator()).await.unwrap_err();
        assert_eq!(
            err,
            AcquisitionError::ProviderRedirectTimeout(Duration::from_secs(30))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_capture_timeout() {
        let mut scenario = login_page();
        scenario.submit_traffic = Vec::new();
        let (acq, shared) = acquirer(scenario, settings());

        let started = Instant::now();
        let err = acq.acquire(&operator()).await.unwrap_err();
        assert_eq!(
            err,
            AcquisitionError::CredentialCaptureTimeout(Duration::from_secs(15))
        );
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert!(shared.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_form_not_found() {
        let mut scenario = login_page();
        scenario.present = vec!["button#next".to_string()];
        let (acq, shared) = acquirer(scenario, settings());

        let err = acq.acquire(&operator()).await.unwrap_err();
        assert_eq!(err, AcquisitionError::LoginFormNotFound("identifier"));
        assert!(shared.actions.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_control_not_found() {
        let mut scenario = login_page();
        scenario.present = vec![
            "input#signInName".to_string(),
            "input#password".to_string(),
        ];
        let (acq, _) = acquirer(scenario, settings());

        let err = acq.acquire(&operator()).await.unwrap_err();
        assert_eq!(err, AcquisitionError::SubmitControlNotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_cascade_entries_are_tried() {
        let mut scenario = login_page();
        scenario.present = vec![
            "input[name=\\'username\\']".to_string(),
            "input[type=\\'password\\']".to_string(),
            "button[type=\\'submit\\']".to_string(),
        ];
        let (acq, shared) = acquirer(scenario, settings());

        acq.acquire(&operator()).await.unwrap();
        assert_eq!(
            *shared.actions.lock().unwrap(),
            vec![
                "fill input[name=\\'username\\']".to_string(),
                "fill input[type=\\'password\\']".to_string(),
                "click button[type=\\'submit\\']".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_return_redirect_timeout() {
        let mut scenario = login_page();
        scenario.after_submit = None;
        let (acq, _) = acquirer(scenario, settings());

        let err = acq.acquire(&operator()).await.unwrap_err();
        assert_eq!(
            err,
            AcquisitionError::ReturnRedirectTimeout(Duration::from_secs(60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_deadline_tears_down() {
        let scenario = Scenario {
            after_navigate: format!("{PORTAL}landing"),
            ..Scenario::default()
        };
        let mut s = settings();
        s.budgets.overall = Duration::from_secs(10);
        let (acq, shared) = acquirer(scenario, s);

        let err = acq.acquire(&operator()).await.unwrap_err();
        assert_eq!(err, AcquisitionError::DeadlineExceeded(Duration::from_secs(10)));
        assert!(shared.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_browser_fails_cleanly() {
        let acq = SessionAcquirer::new(Arc::new(NoopRenderer), settings());
        let err = acq.acquire(&operator()).await.unwrap_err();
        assert!(matches!(err, AcquisitionError::Browser(_)));
        assert!(!err.is_transient());
    }
}
