// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Raw → canonical compliance transformation.
//!
//! Three passes over each member's raw rows:
//! - inclusion: keep rows that carry an expiry date or name a mandatory requirement
//! - deduplication: one row per (member, requirement), earliest start date wins
//! - synthesis: every mandatory requirement missing after the first two passes
//!   gets a `NotStarted` record
//!
//! Output is ordered by input member order, then by folded requirement title,
//! so identical inputs always produce identical output.

use super::{
    classify, title_key, CanonicalComplianceRecord, ComplianceStatus, Member,
    RawComplianceRecord,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

/// A member together with every raw row fetched for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecords {
    pub member: Member,
    pub records: Vec<RawComplianceRecord>,
}

/// Transform raw rows into canonical records.
///
/// Members appearing more than once (same membership number) are merged.
pub fn transform(
    members: &[MemberRecords],
    now: NaiveDate,
    mandatory: &[String],
) -> Vec<CanonicalComplianceRecord> {
    let mut mandatory_titles: BTreeMap<String, &str> = BTreeMap::new();
    for title in mandatory {
        let key = title_key(title);
        if !key.is_empty() {
            mandatory_titles.entry(key).or_insert_with(|| title.trim());
        }
    }

    let mut order: Vec<&Member> = Vec::new();
    let mut surviving: HashMap<&str, BTreeMap<String, &RawComplianceRecord>> = HashMap::new();

    for entry in members {
        let slot = surviving
            .entry(entry.member.membership_number.as_str())
            .or_insert_with(|| {
                order.push(&entry.member);
                BTreeMap::new()
            });

        for raw in &entry.records {
            let key = title_key(&raw.requirement_title);
            if key.is_empty() {
                continue;
            }
            if raw.expiry_date.is_none() && !mandatory_titles.contains_key(&key) {
                continue;
            }
            match slot.entry(key) {
                Entry::Vacant(v) => {
                    v.insert(raw);
                }
                Entry::Occupied(mut o) => {
                    if starts_earlier(raw.start_date, o.get().start_date) {
                        o.insert(raw);
                    }
                }
            }
        }
    }

    let mut out = Vec::new();
    for member in order {
        let Some(slot) = surviving.get(member.membership_number.as_str()) else {
            continue;
        };

        let mut by_title: BTreeMap<&str, CanonicalComplianceRecord> = BTreeMap::new();
        for (key, raw) in slot {
            by_title.insert(
                key.as_str(),
                CanonicalComplianceRecord {
                    membership_number: member.membership_number.clone(),
                    member_name: member.identity.display_name.clone(),
                    requirement_title: raw.requirement_title.trim().to_string(),
                    status: classify(raw.current_level, raw.expiry_date, now),
                    expiry_date: raw.expiry_date,
                    start_date: raw.start_date,
                },
            );
        }
        for (key, title) in &mandatory_titles {
            by_title
                .entry(key.as_str())
                .or_insert_with(|| synthesize(member, title));
        }
        out.extend(by_title.into_values());
    }
    out
}

/// Missing start dates sort after every present one; ties keep the incumbent.
fn starts_earlier(candidate: Option<NaiveDate>, incumbent: Option<NaiveDate>) -> bool {
    match (candidate, incumbent) {
        (Some(c), Some(i)) => c < i,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn synthesize(member: &Member, title: &str) -> CanonicalComplianceRecord {
    CanonicalComplianceRecord {
        membership_number: member.membership_number.clone(),
        member_name: member.identity.display_name.clone(),
        requirement_title: title.to_string(),
        status: ComplianceStatus::NotStarted,
        expiry_date: None,
        start_date: member.earliest_role_start,
    }
}
