// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Session acquisition: interactive sign-in through the identity provider,
//! with the bearer credential harvested from the portal's own traffic.

pub mod credential;
pub mod locator;
pub mod observer;
pub mod poll;
pub mod session;

pub use credential::{Credential, OperatorCredentials};
pub use locator::{resolve_cascade, Locator};
pub use observer::{CaptureRules, TrafficObserver};
pub use poll::{poll_until, PollBudget, PollTimeout};
pub use session::{
    AcquirerSettings, AcquisitionBudgets, AcquisitionState, LoginCascades, SessionAcquirer,
};

use async_trait::async_trait;
use std::time::Duration;

/// Why a sign-in attempt failed. Every variant is fatal to the attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquisitionError {
    #[error("portal did not load: {0}")]
    PortalLoadFailed(String),

    #[error("no redirect to the identity provider within {0:?}")]
    ProviderRedirectTimeout(Duration),

    #[error("login form not found ({0} field)")]
    LoginFormNotFound(&'static str),

    #[error("no submit control matched")]
    SubmitControlNotFound,

    #[error("no return to the portal within {0:?}")]
    ReturnRedirectTimeout(Duration),

    #[error("no bearer credential observed within {0:?}")]
    CredentialCaptureTimeout(Duration),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("sign-in exceeded the overall deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl AcquisitionError {
    /// Stable machine-readable name for reports.
    pub fn kind(&self) -> &'static str {
        match self {
            AcquisitionError::PortalLoadFailed(_) => "PortalLoadFailed",
            AcquisitionError::ProviderRedirectTimeout(_) => "ProviderRedirectTimeout",
            AcquisitionError::LoginFormNotFound(_) => "LoginFormNotFound",
            AcquisitionError::SubmitControlNotFound => "SubmitControlNotFound",
            AcquisitionError::ReturnRedirectTimeout(_) => "ReturnRedirectTimeout",
            AcquisitionError::CredentialCaptureTimeout(_) => "CredentialCaptureTimeout",
            AcquisitionError::Browser(_) => "Browser",
            AcquisitionError::DeadlineExceeded(_) => "DeadlineExceeded",
        }
    }

    /// Navigation timeouts may clear on a later run; locator exhaustion means
    /// the identity provider's markup changed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AcquisitionError::PortalLoadFailed(_)
                | AcquisitionError::ProviderRedirectTimeout(_)
                | AcquisitionError::ReturnRedirectTimeout(_)
                | AcquisitionError::DeadlineExceeded(_)
        )
    }
}

/// Anything that can produce a credential for an operator.
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn acquire(&self, operator: &OperatorCredentials) -> Result<Credential, AcquisitionError>;
}
