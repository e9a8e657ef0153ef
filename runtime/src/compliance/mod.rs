// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Compliance data model and the raw → canonical transformation.
//!
//! Raw records arrive from the portal one per module per member. The
//! transformer classifies them against a reference date, collapses
//! duplicates, and synthesizes entries for mandatory requirements the
//! member has never attempted.

pub mod status;
pub mod transform;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use status::{classify, ComplianceStatus, EXPIRING_WINDOW_DAYS, RENEWAL_WINDOW_DAYS};
pub use transform::{transform, MemberRecords};

/// Internal identity resolved from an external membership identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalIdentity {
    /// Internal record id used by the portal API.
    pub id: String,
    /// Name as displayed by the portal.
    pub display_name: String,
}

/// Achievement level reported upstream for a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentLevel {
    Achieved,
    NotAchieved,
    Unknown,
}

impl CurrentLevel {
    /// Parse the portal's free-text level. Unrecognised text is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        let folded: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match folded.as_str() {
            "achieved" | "complete" | "completed" => CurrentLevel::Achieved,
            "notachieved" | "notstarted" | "notcomplete" | "incomplete" => {
                CurrentLevel::NotAchieved
            }
            _ => CurrentLevel::Unknown,
        }
    }
}

/// One module row as returned by the portal for a single member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawComplianceRecord {
    pub requirement_title: String,
    pub current_level: CurrentLevel,
    pub expiry_date: Option<NaiveDate>,
    /// When the member started this module, if the portal reports it.
    pub start_date: Option<NaiveDate>,
}

/// A resolved member as it flows into the transformer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// External membership identifier supplied by the caller.
    pub membership_number: String,
    pub identity: InternalIdentity,
    /// Earliest known role start, used as the start date of synthesized records.
    pub earliest_role_start: Option<NaiveDate>,
}

/// Deduplicated, classified record for one member and one requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalComplianceRecord {
    pub membership_number: String,
    pub member_name: String,
    pub requirement_title: String,
    pub status: ComplianceStatus,
    pub expiry_date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
}

/// Parse a portal date. Accepts `YYYY-MM-DD`, ISO date-times, and `DD/MM/YYYY`.
///
/// Empty strings and unparseable values yield `None`.
pub fn parse_portal_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive());
    }
    // "2024-05-01T00:00:00" and "2024-05-01T00:00:00.000" carry no offset
    if let Some((date_part, _)) = trimmed.split_once('T') {
        if let Ok(d) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
            return Some(d);
        }
    }
    NaiveDate::parse_from_str(trimmed, "%d/%m/%Y").ok()
}

/// Fold a requirement title for comparison: trimmed, inner whitespace collapsed, lowercased.
pub fn title_key(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
