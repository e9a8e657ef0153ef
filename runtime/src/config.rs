// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration loading and resolution.
//!
//! ## Config file
//!
//! The JSON config is loaded from (in order of priority):
//! 1. `--config <path>`
//! 2. `MUSTER_CONFIG` env
//! 3. `~/.muster/config.json`, if it exists
//! 4. Built-in defaults
//!
//! `MUSTER_PORTAL_URL`, `MUSTER_API_URL` and `MUSTER_IDP_HOST` override the
//! corresponding fields afterwards.
//!
//! ## Operator secret
//!
//! `MUSTER_PASSWORD_FILE` is preferred over `MUSTER_PASSWORD` because file
//! paths are not visible in the process list, unlike environment values.

use crate::acquire::{
    AcquirerSettings, AcquisitionBudgets, CaptureRules, LoginCascades, OperatorCredentials,
    PollBudget,
};
use crate::api::ApiEndpoints;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors resolving configuration or operator credentials.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("`{0}` is not configured")]
    Missing(&'static str),

    #[error("`{field}` is not a valid URL: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("no operator username (pass --username or set MUSTER_USERNAME)")]
    MissingUsername,

    #[error("no operator password (set MUSTER_PASSWORD_FILE or MUSTER_PASSWORD)")]
    MissingPassword,

    #[error("cannot read password file {path}: {source}")]
    PasswordFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Timeouts in milliseconds, as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub portal_load_ms: u64,
    pub consent_ms: u64,
    pub provider_redirect_ms: u64,
    pub login_form_ms: u64,
    pub return_redirect_ms: u64,
    pub credential_ms: u64,
    pub credential_poll_ms: u64,
    pub correlator_grace_ms: u64,
    pub poll_interval_ms: u64,
    pub overall_ms: u64,
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            portal_load_ms: 60_000,
            consent_ms: 5_000,
            provider_redirect_ms: 30_000,
            login_form_ms: 15_000,
            return_redirect_ms: 60_000,
            credential_ms: 15_000,
            credential_poll_ms: 200,
            correlator_grace_ms: 2_000,
            poll_interval_ms: 250,
            overall_ms: 300_000,
            request_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn budgets(&self) -> AcquisitionBudgets {
        let ms = Duration::from_millis;
        AcquisitionBudgets {
            portal_load: ms(self.portal_load_ms),
            consent: ms(self.consent_ms),
            provider_redirect: ms(self.provider_redirect_ms),
            login_form: ms(self.login_form_ms),
            return_redirect: ms(self.return_redirect_ms),
            credential: PollBudget::new(ms(self.credential_ms), ms(self.credential_poll_ms.max(1))),
            correlator_grace: ms(self.correlator_grace_ms),
            poll_interval: ms(self.poll_interval_ms.max(1)),
            overall: ms(self.overall_ms),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MusterConfig {
    /// Portal root the browser opens.
    pub portal_url: String,
    /// Base URL of the portal API; its host is where bearer headers are watched for.
    pub api_url: String,
    /// Identity-provider host the portal redirects to.
    pub identity_provider_host: String,
    pub bearer_prefixes: Vec<String>,
    pub endpoints: ApiEndpoints,
    /// Path fragment of the endpoint whose response carries the identity correlator.
    pub identity_endpoint: String,
    pub correlator_field: String,
    /// Requirements every member must hold, reported even when never attempted.
    pub mandatory_requirements: Vec<String>,
    pub timeouts: TimeoutConfig,
    pub cascades: LoginCascades,
}

impl Default for MusterConfig {
    fn default() -> Self {
        Self {
            portal_url: String::new(),
            api_url: String::new(),
            identity_provider_host: String::new(),
            bearer_prefixes: vec!["Bearer ".to_string()],
            endpoints: ApiEndpoints::default(),
            identity_endpoint: "/api/user/details".to_string(),
            correlator_field: "Contact number".to_string(),
            mandatory_requirements: vec![
                "Safeguarding".to_string(),
                "Safety".to_string(),
                "First Response".to_string(),
            ],
            timeouts: TimeoutConfig::default(),
            cascades: LoginCascades::default(),
        }
    }
}

/// Resolve which config file to read, if any.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var("MUSTER_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    let home_config = dirs::home_dir()?.join(".muster").join("config.json");
    home_config.exists().then_some(home_config)
}

impl MusterConfig {
    /// Read a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from the resolved path (or defaults), then apply env overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match resolve_config_path(explicit) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config");
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `MUSTER_*` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MUSTER_PORTAL_URL") {
            self.portal_url = v;
        }
        if let Some(v) = lookup("MUSTER_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = lookup("MUSTER_IDP_HOST") {
            self.identity_provider_host = v;
        }
    }

    fn host_of(field: &'static str, value: &str) -> Result<String, ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::Missing(field));
        }
        url::Url::parse(value)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
            .ok_or_else(|| ConfigError::InvalidUrl {
                field,
                value: value.to_string(),
            })
    }

    /// Check that the target is fully described.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::host_of("portal_url", &self.portal_url)?;
        Self::host_of("api_url", &self.api_url)?;
        if self.identity_provider_host.trim().is_empty() {
            return Err(ConfigError::Missing("identity_provider_host"));
        }
        if self.bearer_prefixes.is_empty() {
            return Err(ConfigError::Missing("bearer_prefixes"));
        }
        if self.cascades.identifier.is_empty() || self.cascades.secret.is_empty() {
            return Err(ConfigError::Missing("cascades.identifier / cascades.secret"));
        }
        if self.cascades.submit.is_empty() {
            return Err(ConfigError::Missing("cascades.submit"));
        }
        Ok(())
    }

    /// Settings for the session acquirer.
    pub fn acquirer_settings(&self) -> Result<AcquirerSettings, ConfigError> {
        self.validate()?;
        Ok(AcquirerSettings {
            portal_url: self.portal_url.clone(),
            identity_provider_host: self.identity_provider_host.trim().to_string(),
            capture: CaptureRules {
                api_host: Self::host_of("api_url", &self.api_url)?,
                bearer_prefixes: self.bearer_prefixes.clone(),
                identity_endpoint: self.identity_endpoint.clone(),
                correlator_field: self.correlator_field.clone(),
            },
            cascades: self.cascades.clone(),
            budgets: self.timeouts.budgets(),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.request_ms)
    }
}

/// Resolve operator credentials from `username` (or `MUSTER_USERNAME`) and the secret env.
pub fn operator_credentials(
    username: Option<String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<OperatorCredentials, ConfigError> {
    let username = username
        .or_else(|| lookup("MUSTER_USERNAME"))
        .filter(|u| !u.trim().is_empty())
        .ok_or(ConfigError::MissingUsername)?;

    // 1. MUSTER_PASSWORD_FILE (recommended)
    if let Some(path) = lookup("MUSTER_PASSWORD_FILE") {
        let path = PathBuf::from(path);
        let secret = std::fs::read_to_string(&path)
            .map_err(|source| ConfigError::PasswordFile {
                path: path.clone(),
                source,
            })?;
        let secret = secret.trim_end_matches(['\r', '\n']);
        if secret.is_empty() {
            return Err(ConfigError::MissingPassword);
        }
        return Ok(OperatorCredentials::new(username, secret));
    }

    // 2. MUSTER_PASSWORD (visible in the process environment)
    match lookup("MUSTER_PASSWORD") {
        Some(secret) if !secret.is_empty() => Ok(OperatorCredentials::new(username, secret)),
        _ => Err(ConfigError::MissingPassword),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn configured() -> MusterConfig {
        MusterConfig {
            portal_url: "https://portal.example.org/".to_string(),
            api_url: "https://API.portal.example.org/v2".to_string(),
            identity_provider_host: "idp.example.net".to_string(),
            ..MusterConfig::default()
        }
    }

    #[test]
    fn test_defaults_need_a_target() {
        let err = MusterConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("portal_url")));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r##"{
                "portal_url": "https://portal.example.org/",
                "mandatory_requirements": ["First Response"],
                "timeouts": { "login_form_ms": 20000 },
                "cascades": {
                    "consent": [],
                    "identifier": [{ "by": "css", "selector": "#user" }],
                    "secret": [{ "by": "css", "selector": "#pass" }],
                    "submit": [{ "by": "text", "tag": "button", "text": "Continue" }]
                }
            }"##,
        )
        .unwrap();

        let config = MusterConfig::from_file(&path).unwrap();
        assert_eq!(config.mandatory_requirements, vec!["First Response"]);
        assert_eq!(config.timeouts.login_form_ms, 20_000);
        assert_eq!(config.timeouts.portal_load_ms, 60_000);
        assert_eq!(config.bearer_prefixes, vec!["Bearer "]);
        assert_eq!(config.cascades.identifier.len(), 1);
    }

    #[test]
    fn test_unreadable_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            MusterConfig::from_file(&missing),
            Err(ConfigError::Read { .. })
        ));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(
            MusterConfig::from_file(&bad),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = configured();
        config.apply_overrides(env(&[
            ("MUSTER_PORTAL_URL", "https://other.example.org/"),
            ("MUSTER_IDP_HOST", "login.other.example.net"),
        ]));
        assert_eq!(config.portal_url, "https://other.example.org/");
        assert_eq!(config.identity_provider_host, "login.other.example.net");
        assert_eq!(config.api_url, "https://API.portal.example.org/v2");
    }

    #[test]
    fn test_acquirer_settings_derive_api_host() {
        let settings = configured().acquirer_settings().unwrap();
        assert_eq!(settings.capture.api_host, "api.portal.example.org");
        assert_eq!(settings.budgets.provider_redirect, Duration::from_secs(30));
        assert_eq!(
            settings.budgets.credential,
            PollBudget::new(Duration::from_secs(15), Duration::from_millis(200))
        );
    }

    #[test]
    fn test_invalid_api_url() {
        let mut config = configured();
        config.api_url = "api.portal.example.org".to_string();
        assert!(matches!(
            config.acquirer_settings(),
            Err(ConfigError::InvalidUrl { field: "api_url", .. })
        ));
    }

    #[test]
    fn test_password_file_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        std::fs::write(&path, "from-file\n").unwrap();
        let path_str = path.display().to_string();

        let op = operator_credentials(
            Some("leader@example.org".to_string()),
            env(&[
                ("MUSTER_PASSWORD_FILE", path_str.as_str()),
                ("MUSTER_PASSWORD", "from-env"),
            ]),
        )
        .unwrap();
        assert_eq!(op.password(), "from-file");
    }

    #[test]
    fn test_password_env_and_username_fallback() {
        let op = operator_credentials(
            None,
            env(&[
                ("MUSTER_USERNAME", "env-user"),
                ("MUSTER_PASSWORD", "from-env"),
            ]),
        )
        .unwrap();
        assert_eq!(op.username, "env-user");
        assert_eq!(op.password(), "from-env");
    }

    #[test]
    fn test_missing_operator_details() {
        assert!(matches!(
            operator_credentials(None, env(&[("MUSTER_PASSWORD", "x")])),
            Err(ConfigError::MissingUsername)
        ));
        assert!(matches!(
            operator_credentials(Some("u".to_string()), env(&[])),
            Err(ConfigError::MissingPassword)
        ));
    }
}
