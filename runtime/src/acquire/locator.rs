// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Locator cascades for identity-provider markup that is not contractually stable.
//!
//! A cascade is an ordered list of [`Locator`]s kept as configuration. The
//! resolver walks the list each poll round and returns the first locator
//! that matches a live, interactive element.
//!
//! ## Security: JS encoding
//!
//! Selectors and fill values are injected into page scripts only as
//! escaped string literals, never into code positions.

use super::poll::{poll_until, PollBudget, PollTimeout};
use crate::renderer::RenderContext;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// One element-locating strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Locator {
    /// CSS selector.
    Css { selector: String },
    /// XPath expression.
    Xpath { expression: String },
    /// Element of `tag` whose visible text (or value) equals `text`, ignoring case.
    Text { tag: String, text: String },
}

impl Locator {
    pub fn css(selector: &str) -> Self {
        Locator::Css {
            selector: selector.to_string(),
        }
    }

    pub fn xpath(expression: &str) -> Self {
        Locator::Xpath {
            expression: expression.to_string(),
        }
    }

    pub fn text(tag: &str, text: &str) -> Self {
        Locator::Text {
            tag: tag.to_string(),
            text: text.to_string(),
        }
    }

    /// JS expression evaluating to the array of candidate elements.
    fn candidates_js(&self) -> String {
        match self {
            Locator::Css { selector } => format!(
                "Array.from(document.querySelectorAll({}))",
                js_string(selector)
            ),
            Locator::Xpath { expression } => format!(
                "(() => {{ const snap = document.evaluate({}, document, null, \
                 XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); const out = []; \
                 for (let i = 0; i < snap.snapshotLength; i++) out.push(snap.snapshotItem(i)); \
                 return out; }})()",
                js_string(expression)
            ),
            Locator::Text { tag, text } => format!(
                "Array.from(document.querySelectorAll({})).filter(e => \
                 (e.innerText || e.value || '').trim().toLowerCase() === {})",
                js_string(tag),
                js_string(&text.trim().to_lowercase())
            ),
        }
    }

    /// Build the page script for `action` against this locator.
    ///
    /// Every script evaluates to a boolean: whether a live element was found
    /// (and, for actions, acted on).
    pub fn script(&self, action: &LocatorAction<'_>) -> String {
        let act = match action {
            LocatorAction::Present => "return true;".to_string(),
            LocatorAction::Click => "el.click(); return true;".to_string(),
            LocatorAction::Fill(value) => format!(
                "el.focus(); \
                 const setter = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(el), 'value'); \
                 if (setter && setter.set) {{ setter.set.call(el, {v}); }} else {{ el.value = {v}; }} \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
                 return true;",
                v = js_string(value)
            ),
        };
        format!(
            "(() => {{ \
             const live = (e) => {{ if (!e || !e.getBoundingClientRect) return false; \
             const r = e.getBoundingClientRect(); const s = window.getComputedStyle(e); \
             return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' \
             && s.display !== 'none' && !e.disabled; }}; \
             const el = ({}).find(live); \
             if (!el) return false; {} }})()",
            self.candidates_js(),
            act
        )
    }
}

/// What to do with the element a locator finds.
#[derive(Clone, Copy)]
pub enum LocatorAction<'a> {
    Present,
    Click,
    Fill(&'a str),
}

/// No locator in the cascade matched within the budget.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("none of {tried} locators matched within {timeout:?}")]
pub struct CascadeExhausted {
    pub tried: usize,
    pub timeout: std::time::Duration,
}

/// Return the first locator in `cascade` that matches a live element.
///
/// Script errors (e.g. a page mid-navigation) count as "no match" for that round.
pub async fn resolve_cascade(
    ctx: &dyn RenderContext,
    cascade: &[Locator],
    budget: PollBudget,
) -> Result<Locator, CascadeExhausted> {
    poll_until(budget, move || async move {
        for locator in cascade {
            match ctx.execute_js(&locator.script(&LocatorAction::Present)).await {
                Ok(serde_json::Value::Bool(true)) => return Some(locator.clone()),
                Ok(_) => {}
                Err(e) => tracing::debug!(?locator, "locator check failed: {e:#}"),
            }
        }
        None
    })
    .await
    .map_err(|PollTimeout(timeout)| CascadeExhausted {
        tried: cascade.len(),
        timeout,
    })
}

/// Run `action` against the element `locator` finds. `Ok(false)` if it is gone.
pub async fn act_on(
    ctx: &dyn RenderContext,
    locator: &Locator,
    action: LocatorAction<'_>,
) -> Result<bool> {
    let result = ctx.execute_js(&locator.script(&action)).await?;
    Ok(result.as_bool().unwrap_or(false))
}

/// Quote `s` as a single-quoted JS string literal.
fn js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 10);
    result.push('\'');
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\u{2028}' => result.push_str("\\u2028"),
            '\u{2029}' => result.push_str("\\u2029"),
            '\0' => {}                       // Strip null bytes
            '<' => result.push_str("\\x3c"), // Prevent </script> injection
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result.push('\'');
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::poll::DEFAULT_POLL_INTERVAL;
    use crate::renderer::{NavigationResult, TrafficStream};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Page where only scripts mentioning one of `present` find an element.
    struct StaticPage {
        present: Vec<String>,
        scripts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RenderContext for StaticPage {
        async fn observe_traffic(&self, _: &[String]) -> Result<TrafficStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
        async fn navigate(&mut self, url: &str, _: u64) -> Result<NavigationResult> {
            Ok(NavigationResult {
                final_url: url.to_string(),
                load_time_ms: 0,
            })
        }
        async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
            self.scripts.lock().unwrap().push(script.to_string());
            let hit = self.present.iter().any(|p| script.contains(p.as_str()));
            Ok(serde_json::Value::Bool(hit))
        }
        async fn get_url(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    fn page(present: &[&str]) -> StaticPage {
        StaticPage {
            present: present.iter().map(|s| s.to_string()).collect(),
            scripts: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn test_js_string_escaping() {
        assert_eq!(js_string("hello"), "'hello'");
        assert_eq!(js_string("it's"), "'it\\'s'");
        assert_eq!(js_string("a\\b"), "'a\\\\b'");
        assert_eq!(js_string("</script>"), "'\\x3c/script\\x3e'");
        assert_eq!(js_string("a\0b"), "'ab'");
    }

    #[test]
    fn test_fill_value_never_lands_in_code_position() {
        let script = Locator::css("#password").script(&LocatorAction::Fill("x'); alert(1); ('"));
        assert!(script.contains("'x\\'); alert(1); (\\''"));
    }

    #[test]
    fn test_locator_serde_shape() {
        let cascade: Vec<Locator> = serde_json::from_value(serde_json::json!([
            { "by": "css", "selector": "input[type=email]" },
            { "by": "xpath", "expression": "//input[@name='loginfmt']" },
            { "by": "text", "tag": "button", "text": "Sign in" }
        ]))
        .unwrap();
        assert_eq!(
            cascade,
            vec![
                Locator::css("input[type=email]"),
                Locator::xpath("//input[@name='loginfmt']"),
                Locator::text("button", "Sign in"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cascade_returns_first_match_in_order() {
        let ctx = page(&["#signInName", "#email"]);
        let cascade = vec![
            Locator::css("#missing"),
            Locator::css("#email"),
            Locator::css("#signInName"),
        ];
        let found = resolve_cascade(&ctx, &cascade, PollBudget::new(Duration::from_secs(1), DEFAULT_POLL_INTERVAL))
            .await
            .unwrap();
        assert_eq!(found, Locator::css("#email"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cascade_exhaustion() {
        let ctx = page(&[]);
        let cascade = vec![Locator::css("#a"), Locator::text("button", "Next")];
        let err = resolve_cascade(&ctx, &cascade, PollBudget::new(Duration::from_secs(15), DEFAULT_POLL_INTERVAL))
            .await
            .unwrap_err();
        assert_eq!(err.tried, 2);
        assert_eq!(err.timeout, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_act_on_reports_missing_element() {
        let ctx = page(&["#next"]);
        assert!(act_on(&ctx, &Locator::css("#next"), LocatorAction::Click)
            .await
            .unwrap());
        assert!(!act_on(&ctx, &Locator::css("#gone"), LocatorAction::Click)
            .await
            .unwrap());
        let scripts = ctx.scripts.lock().unwrap();
        assert!(scripts[0].contains("el.click()"));
    }
}
