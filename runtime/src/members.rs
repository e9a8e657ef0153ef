// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Member resolution: external membership identifiers to internal identities,
//! and the raw compliance records held against them.

use crate::acquire::Credential;
use crate::api::{ApiError, PortalClient};
use crate::compliance::{InternalIdentity, RawComplianceRecord};
use async_trait::async_trait;
use chrono::NaiveDate;

/// A successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMember {
    pub identity: InternalIdentity,
    /// Earliest start date across the member's roles.
    pub earliest_role_start: Option<NaiveDate>,
}

/// Upstream member data, keyed by credential.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// Look up one identifier. `Ok(None)` means the upstream has no such member.
    async fn lookup(
        &self,
        credential: &Credential,
        identifier: &str,
    ) -> Result<Option<ResolvedMember>, ApiError>;

    /// Fetch the raw compliance records for a resolved identity.
    async fn fetch_records(
        &self,
        credential: &Credential,
        identity: &InternalIdentity,
    ) -> Result<Vec<RawComplianceRecord>, ApiError>;
}

#[async_trait]
impl MemberDirectory for PortalClient {
    async fn lookup(
        &self,
        credential: &Credential,
        identifier: &str,
    ) -> Result<Option<ResolvedMember>, ApiError> {
        self.lookup_member(credential, identifier).await
    }

    async fn fetch_records(
        &self,
        credential: &Credential,
        identity: &InternalIdentity,
    ) -> Result<Vec<RawComplianceRecord>, ApiError> {
        self.fetch_modules(credential, identity).await
    }
}

/// Resolves identifiers one at a time through a [`MemberDirectory`].
pub struct MemberResolver<'a> {
    directory: &'a dyn MemberDirectory,
}

impl<'a> MemberResolver<'a> {
    pub fn new(directory: &'a dyn MemberDirectory) -> Self {
        Self { directory }
    }

    /// Resolve one identifier. Surrounding whitespace is ignored; a blank
    /// identifier is not found without asking upstream.
    pub async fn resolve(
        &self,
        credential: &Credential,
        identifier: &str,
    ) -> Result<Option<ResolvedMember>, ApiError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Ok(None);
        }

        let resolved = self.directory.lookup(credential, identifier).await?;
        match &resolved {
            Some(member) => tracing::debug!(
                identifier,
                internal_id = %member.identity.id,
                "resolved member"
            ),
            None => tracing::info!(identifier, "member not found"),
        }
        Ok(resolved)
    }
}
