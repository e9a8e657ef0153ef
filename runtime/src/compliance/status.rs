// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Status classification by remaining time to expiry.

use super::CurrentLevel;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Expiries closer than this many days are `Expiring`.
pub const EXPIRING_WINDOW_DAYS: i64 = 30;

/// Expiries closer than this many days (but outside the expiring window) are `RenewalDue`.
pub const RENEWAL_WINDOW_DAYS: i64 = 60;

/// Canonical compliance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplianceStatus {
    Valid,
    Expiring,
    RenewalDue,
    Expired,
    NotStarted,
}

impl ComplianceStatus {
    /// Ordinal standing, higher is better. Used to compare statuses.
    pub fn standing(self) -> u8 {
        match self {
            ComplianceStatus::NotStarted => 0,
            ComplianceStatus::Expired => 1,
            ComplianceStatus::Expiring => 2,
            ComplianceStatus::RenewalDue => 3,
            ComplianceStatus::Valid => 4,
        }
    }

    /// Human label as shown in reports.
    pub fn label(self) -> &'static str {
        match self {
            ComplianceStatus::Valid => "Valid",
            ComplianceStatus::Expiring => "Expiring",
            ComplianceStatus::RenewalDue => "Renewal Due",
            ComplianceStatus::Expired => "Expired",
            ComplianceStatus::NotStarted => "Not Started",
        }
    }

    /// All statuses in report order.
    pub fn all() -> [ComplianceStatus; 5] {
        [
            ComplianceStatus::Valid,
            ComplianceStatus::RenewalDue,
            ComplianceStatus::Expiring,
            ComplianceStatus::Expired,
            ComplianceStatus::NotStarted,
        ]
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a record. Pure function of its inputs.
///
/// | expiry                      | status                               |
/// |-----------------------------|--------------------------------------|
/// | none                        | `Valid` if achieved, else `NotStarted` |
/// | before `now`                | `Expired`                            |
/// | within 30 days of `now`     | `Expiring`                           |
/// | within 60 days of `now`     | `RenewalDue`                         |
/// | 60 days or more after `now` | `Valid`                              |
pub fn classify(
    level: CurrentLevel,
    expiry: Option<NaiveDate>,
    now: NaiveDate,
) -> ComplianceStatus {
    let Some(expiry) = expiry else {
        return if level == CurrentLevel::Achieved {
            ComplianceStatus::Valid
        } else {
            ComplianceStatus::NotStarted
        };
    };

    let remaining = expiry.signed_duration_since(now).num_days();
    if remaining < 0 {
        ComplianceStatus::Expired
    } else if remaining < EXPIRING_WINDOW_DAYS {
        ComplianceStatus::Expiring
    } else if remaining < RENEWAL_WINDOW_DAYS {
        ComplianceStatus::RenewalDue
    } else {
        ComplianceStatus::Valid
    }
}
