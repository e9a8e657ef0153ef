// Copyright 2026 Muster Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tolerant parsing of portal payloads.

use super::ApiError;
use crate::compliance::{parse_portal_date, CurrentLevel, InternalIdentity, RawComplianceRecord};
use crate::members::ResolvedMember;
use chrono::NaiveDate;
use serde_json::{Map, Value};

/// Upstream names for the internal identity id, most specific first.
pub const INTERNAL_ID_FIELDS: &[&str] = &["Contact number", "Contact id", "Id"];
/// Upstream names for the member's display name.
pub const DISPLAY_NAME_FIELDS: &[&str] = &["Name", "Full name", "Display name"];
/// Upstream names for a role start date on a lookup row.
pub const ROLE_START_FIELDS: &[&str] = &["Role start date", "Start date"];
/// Upstream names for the module title.
pub const TITLE_FIELDS: &[&str] = &["Module title", "Title", "Module"];
pub const LEVEL_FIELDS: &[&str] = &["Current level", "Level", "Status"];
pub const EXPIRY_FIELDS: &[&str] = &["Expiry date", "Expires"];
pub const MODULE_START_FIELDS: &[&str] = &["Start date", "Started"];

/// Fold a field name: lowercase with whitespace runs collapsed to one space.
pub fn normalize_key(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Look up a field by natural-language name.
pub fn field<'a>(row: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    if let Some(v) = row.get(name) {
        return Some(v);
    }
    let wanted = normalize_key(name);
    row.iter()
        .find(|(k, _)| normalize_key(k) == wanted)
        .map(|(_, v)| v)
}

/// First non-empty string (or number, stringified) among `names`.
pub fn field_str(row: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match field(row, name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn field_date(row: &Map<String, Value>, names: &[&str]) -> Option<NaiveDate> {
    field_str(row, names).and_then(|s| parse_portal_date(&s))
}

/// The row list of a payload: a bare array, or an object wrapping one under
/// `data`/`items`/`results`. A lone object is a single row.
pub fn rows(payload: &Value) -> Result<Vec<&Map<String, Value>>, ApiError> {
    let list = match payload {
        Value::Array(items) => items,
        Value::Object(obj) => {
            let wrapped = ["data", "items", "results"]
                .iter()
                .find_map(|k| field(obj, k))
                .and_then(Value::as_array);
            match wrapped {
                Some(items) => items,
                None => return Ok(vec![obj]),
            }
        }
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(ApiError::Malformed(format!(
                "expected rows, got {}",
                kind_of(other)
            )))
        }
    };
    list.iter()
        .map(|item| {
            item.as_object().ok_or_else(|| {
                ApiError::Malformed(format!("expected row object, got {}", kind_of(item)))
            })
        })
        .collect()
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Parse a member lookup payload. One row per role; no rows means not found.
pub fn parse_lookup(payload: &Value) -> Result<Option<ResolvedMember>, ApiError> {
    let rows = rows(payload)?;
    let Some(first) = rows.first() else {
        return Ok(None);
    };

    let id = field_str(first, INTERNAL_ID_FIELDS)
        .ok_or_else(|| ApiError::Malformed("lookup row has no internal id".to_string()))?;
    let display_name = field_str(first, DISPLAY_NAME_FIELDS).unwrap_or_default();
    let earliest_role_start = rows
        .iter()
        .filter_map(|row| field_date(row, ROLE_START_FIELDS))
        .min();

    Ok(Some(ResolvedMember {
        identity: InternalIdentity { id, display_name },
        earliest_role_start,
    }))
}

/// Parse a module-list payload into raw records. Rows without a title are skipped.
pub fn parse_modules(payload: &Value) -> Result<Vec<RawComplianceRecord>, ApiError> {
    let rows = rows(payload)?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(title) = field_str(row, TITLE_FIELDS) else {
            tracing::debug!("skipping module row without a title");
            continue;
        };
        out.push(RawComplianceRecord {
            requirement_title: title,
            current_level: field_str(row, LEVEL_FIELDS)
                .map(|s| CurrentLevel::parse(&s))
                .unwrap_or(CurrentLevel::Unknown),
            expiry_date: field_date(row, EXPIRY_FIELDS),
            start_date: field_date(row, MODULE_START_FIELDS),
        });
    }
    Ok(out)
}

/// Pull the identity correlator out of an identity-detail response body.
pub fn extract_correlator(body: &str, field_name: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(body).ok()?;
    let rows = rows(&payload).ok()?;
    rows.iter().find_map(|row| field_str(row, &[field_name]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_field_tolerates_case_and_spacing() {
        let row = json!({ "Expiry  date": "2026-01-01", "membership Number": 12 });
        let row = row.as_object().unwrap();
        assert_eq!(
            field_str(row, &["Expiry date"]),
            Some("2026-01-01".to_string())
        );
        assert_eq!(
            field_str(row, &["Membership number"]),
            Some("12".to_string())
        );
        assert_eq!(field_str(row, &["Expirydate"]), None);
    }

    #[test]
    fn test_rows_shapes() {
        assert_eq!(rows(&json!([{ "a": 1 }, { "a": 2 }])).unwrap().len(), 2);
        assert_eq!(rows(&json!({ "data": [{ "a": 1 }] })).unwrap().len(), 1);
        assert_eq!(rows(&json!({ "Name": "x" })).unwrap().len(), 1);
        assert!(rows(&Value::Null).unwrap().is_empty());
        assert!(matches!(rows(&json!("nope")), Err(ApiError::Malformed(_))));
        assert!(matches!(rows(&json!([1, 2])), Err(ApiError::Malformed(_))));
    }

    #[test]
    fn test_lookup_takes_earliest_role_start() {
        let payload = json!({ "data": [
            { "Contact number": "881", "Name": "Ada Lovelace", "Role start date": "2021-09-01" },
            { "Contact number": "881", "Name": "Ada Lovelace", "Role start date": "12/03/2018" },
            { "Contact number": "881", "Name": "Ada Lovelace" }
        ]});
        let member = parse_lookup(&payload).unwrap().unwrap();
        assert_eq!(member.identity.id, "881");
        assert_eq!(member.identity.display_name, "Ada Lovelace");
        assert_eq!(member.earliest_role_start, Some(day(2018, 3, 12)));
    }

    #[test]
    fn test_lookup_empty_is_not_found() {
        assert!(parse_lookup(&json!([])).unwrap().is_none());
        assert!(parse_lookup(&json!({ "data": [] })).unwrap().is_none());
    }

    #[test]
    fn test_lookup_without_id_is_malformed() {
        let err = parse_lookup(&json!([{ "Name": "Nobody" }])).unwrap_err();
        assert!(matches!(err, ApiError::Malformed(_)));
    }

    #[test]
    fn test_modules_parsing() {
        let payload = json!([
            { "Module title": "Safety", "Current level": "Achieved", "Expiry date": "2027-02-01T00:00:00", "Start date": "2024-02-01" },
            { "Module title": "First Response", "Current level": "Not Achieved", "Expiry date": null },
            { "Current level": "Achieved" },
            { "Title": "Growing Roots", "Level": "Something else", "Expiry date": "" }
        ]);
        let records = parse_modules(&payload).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].requirement_title, "Safety");
        assert_eq!(records[0].current_level, CurrentLevel::Achieved);
        assert_eq!(records[0].expiry_date, Some(day(2027, 2, 1)));
        assert_eq!(records[0].start_date, Some(day(2024, 2, 1)));
        assert_eq!(records[1].current_level, CurrentLevel::NotAchieved);
        assert_eq!(records[1].expiry_date, None);
        assert_eq!(records[2].current_level, CurrentLevel::Unknown);
        assert_eq!(records[2].expiry_date, None);
    }

    #[test]
    fn test_correlator_extraction() {
        let body = r#"{"data":[{"Contact number":"12345","Name":"Operator"}]}"#;
        assert_eq!(
            extract_correlator(body, "Contact number"),
            Some("12345".to_string())
        );
        assert_eq!(extract_correlator("<html>", "Contact number"), None);
        assert_eq!(extract_correlator(r#"{"other":1}"#, "Contact number"), None);
    }
}
