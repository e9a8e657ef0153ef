// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pipeline coordinator: one sign-in, then every member in input order.
//!
//! A failed sign-in stops the run before any API call. After that, every
//! failure is scoped to a single member and recorded in the report; the
//! batch always runs to the end.

use crate::acquire::{AcquisitionError, Credential, OperatorCredentials, SessionSource};
use crate::api::ApiError;
use crate::compliance::{
    transform, CanonicalComplianceRecord, ComplianceStatus, InternalIdentity, Member,
    MemberRecords,
};
use crate::events::{EventBus, PipelineEvent};
use crate::members::{MemberDirectory, MemberResolver};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// How the sign-in went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CredentialStatus {
    Acquired {
        correlator_present: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
    },
    Failed {
        kind: String,
        message: String,
        transient: bool,
    },
}

impl CredentialStatus {
    fn from_error(err: &AcquisitionError) -> Self {
        CredentialStatus::Failed {
            kind: err.kind().to_string(),
            message: err.to_string(),
            transient: err.is_transient(),
        }
    }
}

/// Why a single member produced no (or only synthesized) records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum MemberFailure {
    NotFound,
    LookupFailed(String),
    MalformedResponse(String),
    FetchFailed(String),
}

impl MemberFailure {
    fn from_lookup(err: ApiError) -> Self {
        match err {
            ApiError::Malformed(m) => MemberFailure::MalformedResponse(m),
            other => MemberFailure::LookupFailed(other.to_string()),
        }
    }

    fn from_fetch(err: ApiError) -> Self {
        match err {
            ApiError::Malformed(m) => MemberFailure::MalformedResponse(m),
            other => MemberFailure::FetchFailed(other.to_string()),
        }
    }
}

impl std::fmt::Display for MemberFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberFailure::NotFound => f.write_str("not found"),
            MemberFailure::LookupFailed(m) => write!(f, "lookup failed: {m}"),
            MemberFailure::MalformedResponse(m) => write!(f, "malformed response: {m}"),
            MemberFailure::FetchFailed(m) => write!(f, "fetch failed: {m}"),
        }
    }
}

/// One input identifier, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberEntry {
    pub identifier: String,
    /// `None` when the identifier did not resolve.
    pub identity: Option<InternalIdentity>,
    pub earliest_role_start: Option<NaiveDate>,
    /// Canonical records produced for this member.
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<MemberFailure>,
}

/// Overall result class, mapped to the process exit code by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    NoSession,
    Complete,
    Partial { failed: usize, total: usize },
}

/// Everything one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub as_of: NaiveDate,
    pub credential: CredentialStatus,
    pub members: Vec<MemberEntry>,
    pub records: Vec<CanonicalComplianceRecord>,
    /// Failures keyed by identifier. Repeated identifiers keep the last one;
    /// each entry in `members` carries its own.
    pub per_member_errors: BTreeMap<String, MemberFailure>,
}

impl PipelineReport {
    /// Member entries that failed, counting repeated identifiers separately.
    pub fn failed_count(&self) -> usize {
        self.members.iter().filter(|m| m.failure.is_some()).count()
    }

    pub fn outcome(&self) -> PipelineOutcome {
        if matches!(self.credential, CredentialStatus::Failed { .. }) {
            return PipelineOutcome::NoSession;
        }
        match self.failed_count() {
            0 => PipelineOutcome::Complete,
            failed => PipelineOutcome::Partial {
                failed,
                total: self.members.len(),
            },
        }
    }

    /// Record count per status, in report order. Zero counts are kept.
    pub fn summary(&self) -> Vec<(ComplianceStatus, usize)> {
        ComplianceStatus::all()
            .into_iter()
            .map(|status| {
                let n = self.records.iter().filter(|r| r.status == status).count();
                (status, n)
            })
            .collect()
    }

    /// Canonical records for one membership number.
    pub fn records_for<'a>(
        &'a self,
        membership_number: &'a str,
    ) -> impl Iterator<Item = &'a CanonicalComplianceRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| r.membership_number == membership_number)
    }
}

/// Drives acquisition, resolution, fetch and transformation.
pub struct PipelineCoordinator {
    source: Arc<dyn SessionSource>,
    directory: Arc<dyn MemberDirectory>,
    mandatory: Vec<String>,
    events: Option<Arc<EventBus>>,
}

impl PipelineCoordinator {
    pub fn new(
        source: Arc<dyn SessionSource>,
        directory: Arc<dyn MemberDirectory>,
        mandatory: Vec<String>,
    ) -> Self {
        Self {
            source,
            directory,
            mandatory,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }

    /// Run the whole batch against reference date `now`.
    pub async fn run(
        &self,
        operator: &OperatorCredentials,
        identifiers: &[String],
        now: NaiveDate,
    ) -> PipelineReport {
        let started = Instant::now();

        let credential = match self.source.acquire(operator).await {
            Ok(credential) => credential,
            Err(err) => {
                tracing::error!(kind = err.kind(), "sign-in failed: {err}");
                let report = PipelineReport {
                    as_of: now,
                    credential: CredentialStatus::from_error(&err),
                    members: Vec::new(),
                    records: Vec::new(),
                    per_member_errors: BTreeMap::new(),
                };
                self.complete(&report, started);
                return report;
            }
        };

        let credential_status = CredentialStatus::Acquired {
            correlator_present: credential.correlator().is_some(),
            expires_at: credential.expires_at(),
        };

        let (entries, gathered, per_member_errors) =
            self.gather(&credential, identifiers).await;

        let records = transform(&gathered, now, &self.mandatory);
        let members = entries
            .into_iter()
            .map(|mut entry| {
                if entry.identity.is_some() {
                    entry.records = records
                        .iter()
                        .filter(|r| r.membership_number == entry.identifier)
                        .count();
                }
                entry
            })
            .collect();

        let report = PipelineReport {
            as_of: now,
            credential: credential_status,
            members,
            records,
            per_member_errors,
        };
        self.complete(&report, started);
        report
    }

    async fn gather(
        &self,
        credential: &Credential,
        identifiers: &[String],
    ) -> (
        Vec<MemberEntry>,
        Vec<MemberRecords>,
        BTreeMap<String, MemberFailure>,
    ) {
        let resolver = MemberResolver::new(self.directory.as_ref());
        let total = identifiers.len();
        let mut entries = Vec::with_capacity(total);
        let mut gathered = Vec::with_capacity(total);
        let mut failures = BTreeMap::new();

        for (i, raw_identifier) in identifiers.iter().enumerate() {
            let identifier = raw_identifier.trim().to_string();
            self.emit(PipelineEvent::MemberStarted {
                identifier: identifier.clone(),
                position: i + 1,
                total,
            });

            let resolved = match resolver.resolve(credential, &identifier).await {
                Ok(Some(resolved)) => resolved,
                Ok(None) => {
                    self.emit(PipelineEvent::MemberNotFound {
                        identifier: identifier.clone(),
                    });
                    entries.push(placeholder(&identifier, MemberFailure::NotFound));
                    failures.insert(identifier, MemberFailure::NotFound);
                    continue;
                }
                Err(err) => {
                    tracing::warn!(identifier = %identifier, "lookup failed: {err}");
                    let failure = MemberFailure::from_lookup(err);
                    self.emit(PipelineEvent::MemberFailed {
                        identifier: identifier.clone(),
                        reason: failure.to_string(),
                    });
                    entries.push(placeholder(&identifier, failure.clone()));
                    failures.insert(identifier, failure);
                    continue;
                }
            };

            self.emit(PipelineEvent::MemberResolved {
                identifier: identifier.clone(),
                display_name: resolved.identity.display_name.clone(),
            });

            let mut fetch_failure = None;
            let raw = match self
                .directory
                .fetch_records(credential, &resolved.identity)
                .await
            {
                Ok(raw) => {
                    self.emit(PipelineEvent::MemberFetched {
                        identifier: identifier.clone(),
                        records: raw.len(),
                    });
                    raw
                }
                Err(err) => {
                    // The member is still reported; mandatory requirements
                    // come out as NotStarted.
                    tracing::warn!(identifier = %identifier, "record fetch failed: {err}");
                    let failure = MemberFailure::from_fetch(err);
                    self.emit(PipelineEvent::MemberFailed {
                        identifier: identifier.clone(),
                        reason: failure.to_string(),
                    });
                    failures.insert(identifier.clone(), failure.clone());
                    fetch_failure = Some(failure);
                    Vec::new()
                }
            };

            entries.push(MemberEntry {
                identifier: identifier.clone(),
                identity: Some(resolved.identity.clone()),
                earliest_role_start: resolved.earliest_role_start,
                records: 0,
                failure: fetch_failure,
            });
            gathered.push(MemberRecords {
                member: Member {
                    membership_number: identifier,
                    identity: resolved.identity,
                    earliest_role_start: resolved.earliest_role_start,
                },
                records: raw,
            });
        }

        (entries, gathered, failures)
    }

    fn complete(&self, report: &PipelineReport, started: Instant) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            members = report.members.len(),
            failed = report.failed_count(),
            records = report.records.len(),
            elapsed_ms,
            "pipeline complete"
        );
        self.emit(PipelineEvent::PipelineComplete {
            members: report.members.len(),
            failed: report.failed_count(),
            records: report.records.len(),
            elapsed_ms,
        });
    }
}

fn placeholder(identifier: &str, failure: MemberFailure) -> MemberEntry {
    MemberEntry {
        identifier: identifier.to_string(),
        identity: None,
        earliest_role_start: None,
        records: 0,
        failure: Some(failure),
    }
}
