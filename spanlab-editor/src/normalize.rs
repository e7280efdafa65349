//! Backend record normalization
//!
//! Pure functions that reshape raw backend JSON into typed records before
//! any entity is built: camelCase keys are mapped to snake_case, `pk`
//! falls back to `id`, numeric strings are coerced, unparseable
//! timestamps are dropped and null result lists become empty.
//!
//! Nothing here touches the store.

use crate::error::{Error, Result};
use crate::region::Region;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use spanlab_common::time;

/// camelCase spellings accepted from older clients
const KEY_ALIASES: &[(&str, &str)] = &[
    ("userGenerate", "user_generate"),
    ("createdBy", "created_by"),
    ("createdDate", "created_at"),
    ("created_date", "created_at"),
    ("leadTime", "lead_time"),
    ("draftId", "draft_id"),
    ("parentPrediction", "parent_prediction"),
    ("parentAnnotation", "parent_annotation"),
    ("completedBy", "completed_by"),
    ("wasCancelled", "was_cancelled"),
    ("annotationId", "annotation_id"),
    ("createdUsername", "created_username"),
];

const INT_FIELDS: &[&str] = &[
    "draft_id",
    "parent_prediction",
    "parent_annotation",
    "completed_by",
    "annotation_id",
    "annotation",
];

const FLOAT_FIELDS: &[&str] = &["lead_time", "offset"];

/// Annotation or prediction record as the backend sends it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    #[serde(default)]
    pub pk: Option<i64>,
    #[serde(default)]
    pub user_generate: bool,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lead_time: Option<f64>,
    #[serde(default)]
    pub result: Vec<Region>,
    /// In-progress draft payload attached by the backend
    #[serde(default)]
    pub draft: Option<Vec<Region>>,
    #[serde(default)]
    pub draft_id: Option<i64>,
    #[serde(default)]
    pub parent_prediction: Option<i64>,
    #[serde(default)]
    pub parent_annotation: Option<i64>,
    #[serde(default)]
    pub completed_by: Option<i64>,
    #[serde(default)]
    pub offset: Option<f64>,
    #[serde(default)]
    pub was_cancelled: bool,
}

/// Earlier submitted state of an annotation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub annotation_id: Option<i64>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub result: Vec<Region>,
}

/// Server-side draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftRecord {
    pub id: i64,
    /// pk of the annotation the draft belongs to, if any
    #[serde(default)]
    pub annotation: Option<i64>,
    #[serde(default)]
    pub result: Vec<Region>,
    #[serde(default)]
    pub lead_time: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_username: Option<String>,
}

/// Normalize an annotation or prediction record
pub fn normalize_annotation(raw: Value) -> Result<AnnotationRecord> {
    let mut map = into_object(raw, "annotation")?;
    rename_keys(&mut map);

    // Local ids are always fresh; the backend id becomes pk
    let id = map.remove("id");
    let pk_source = match map.remove("pk") {
        Some(Value::Null) | None => id,
        some => some,
    };
    let pk = pk_source.as_ref().and_then(|v| coerce_id("pk", v));
    map.insert("pk".into(), pk.map(Value::from).unwrap_or(Value::Null));

    if let Some(Value::Object(user)) = map.get("completed_by") {
        let id = user.get("id").cloned().unwrap_or(Value::Null);
        map.insert("completed_by".into(), id);
    }
    if let Some(user) = map.get("created_by").and_then(created_by_text) {
        map.insert("created_by".into(), Value::String(user));
    }

    coerce_common(&mut map);
    ensure_list(&mut map, "result");
    if matches!(map.get("draft"), Some(v) if !v.is_array()) {
        map.remove("draft");
    }
    if matches!(map.get("user_generate"), Some(Value::Null)) {
        map.remove("user_generate");
    }

    Ok(serde_json::from_value(Value::Object(map))?)
}

/// Normalize a history record
pub fn normalize_history(raw: Value) -> Result<HistoryRecord> {
    let mut map = into_object(raw, "history item")?;
    rename_keys(&mut map);

    if let Some(id) = map.get("id").cloned() {
        map.insert("id".into(), coerce_id("history id", &id).map(Value::from).unwrap_or(Value::Null));
    }
    if let Some(user) = map.get("created_by").and_then(created_by_text) {
        map.insert("created_by".into(), Value::String(user));
    }
    coerce_common(&mut map);
    ensure_list(&mut map, "result");

    Ok(serde_json::from_value(Value::Object(map))?)
}

/// Normalize a draft record; drafts without a usable id are rejected
pub fn normalize_draft(raw: Value) -> Result<DraftRecord> {
    let mut map = into_object(raw, "draft")?;
    rename_keys(&mut map);

    let id = map
        .get("id")
        .and_then(|v| coerce_id("draft id", v))
        .ok_or_else(|| Error::BadRequest("draft without id".to_string()))?;
    map.insert("id".into(), Value::from(id));

    coerce_common(&mut map);
    ensure_list(&mut map, "result");

    Ok(serde_json::from_value(Value::Object(map))?)
}

/// Interpret a backend id: integers, integral floats and numeric strings
///
/// Anything else is logged and treated as missing.
pub fn coerce_id(field: &str, value: &Value) -> Option<i64> {
    let parsed = match value {
        Value::Null => return None,
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    if parsed.is_none() {
        tracing::warn!(field, value = %value, "Non-numeric id ignored");
    }
    parsed
}

/// Interpret a numeric field: numbers and numeric strings
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Pull the e-mail address out of a `created_by` hint
///
/// Drafts created by other users only carry a display string such as
/// `"Jane Doe jane@example.com, 12"`; the address is the token holding `@`.
pub fn email_from_created_by(created_by: &str) -> Option<String> {
    created_by
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .find(|token| {
            let mut parts = token.splitn(2, '@');
            matches!((parts.next(), parts.next()), (Some(local), Some(domain))
                if !local.is_empty() && !domain.is_empty() && !domain.contains('@'))
        })
        .map(str::to_string)
}

fn into_object(raw: Value, what: &str) -> Result<Map<String, Value>> {
    match raw {
        Value::Object(map) => Ok(map),
        other => Err(Error::BadRequest(format!(
            "{} record must be an object, got {}",
            what,
            json_kind(&other)
        ))),
    }
}

fn rename_keys(map: &mut Map<String, Value>) {
    for (alias, canonical) in KEY_ALIASES {
        if let Some(value) = map.remove(*alias) {
            if !map.contains_key(*canonical) {
                map.insert((*canonical).to_string(), value);
            }
        }
    }
}

fn coerce_common(map: &mut Map<String, Value>) {
    for field in INT_FIELDS {
        if let Some(value) = map.get(*field) {
            let coerced = coerce_id(field, value).map(Value::from).unwrap_or(Value::Null);
            map.insert((*field).to_string(), coerced);
        }
    }

    for field in FLOAT_FIELDS {
        if let Some(value) = map.get(*field) {
            match coerce_number(value) {
                Some(n) => {
                    map.insert((*field).to_string(), Value::from(n));
                }
                None => {
                    map.remove(*field);
                }
            }
        }
    }

    if let Some(raw) = map.get("created_at") {
        let parsed = raw.as_str().and_then(time::parse_timestamp);
        match parsed {
            Some(ts) => {
                map.insert("created_at".into(), Value::String(ts.to_rfc3339()));
            }
            None => {
                tracing::debug!(value = %raw, "Unparseable created_at dropped");
                map.remove("created_at");
            }
        }
    }

    if matches!(map.get("was_cancelled"), Some(v) if !v.is_boolean()) {
        map.remove("was_cancelled");
    }
}

fn ensure_list(map: &mut Map<String, Value>, key: &str) {
    match map.get(key) {
        Some(Value::Array(_)) => {}
        Some(Value::Null) | None => {
            map.insert(key.to_string(), Value::Array(Vec::new()));
        }
        Some(other) => {
            tracing::warn!(key, kind = json_kind(other), "Result list replaced with empty list");
            map.insert(key.to_string(), Value::Array(Vec::new()));
        }
    }
}

fn created_by_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(user) => user
            .get("email")
            .or_else(|| user.get("display_name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pk_falls_back_to_id() {
        let record = normalize_annotation(json!({"id": 12, "result": []})).unwrap();
        assert_eq!(record.pk, Some(12));

        let record = normalize_annotation(json!({"id": 3, "pk": "15"})).unwrap();
        assert_eq!(record.pk, Some(15));
    }

    #[test]
    fn test_non_numeric_pk_becomes_none() {
        let record = normalize_annotation(json!({"pk": "abc12", "result": []})).unwrap();
        assert_eq!(record.pk, None);
    }

    #[test]
    fn test_camel_case_keys_and_coercion() {
        let record = normalize_annotation(json!({
            "id": 4,
            "userGenerate": true,
            "createdBy": "Jane jane@example.com, 4",
            "leadTime": "12.5",
            "draftId": "88",
            "parent_annotation": 7.0,
            "completed_by": {"id": 3, "email": "x@y.z"},
            "createdDate": "2024-03-01T10:00:00Z",
            "result": null
        }))
        .unwrap();

        assert!(record.user_generate);
        assert_eq!(record.lead_time, Some(12.5));
        assert_eq!(record.draft_id, Some(88));
        assert_eq!(record.parent_annotation, Some(7));
        assert_eq!(record.completed_by, Some(3));
        assert!(record.created_at.is_some());
        assert!(record.result.is_empty());
    }

    #[test]
    fn test_bad_timestamp_dropped() {
        let record = normalize_annotation(json!({"created_at": "yesterday"})).unwrap();
        assert_eq!(record.created_at, None);
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(matches!(normalize_annotation(json!([1, 2])), Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_draft_requires_id() {
        assert!(normalize_draft(json!({"result": []})).is_err());

        let draft = normalize_draft(json!({"id": "5", "annotation": "7", "lead_time": 3})).unwrap();
        assert_eq!(draft.id, 5);
        assert_eq!(draft.annotation, Some(7));
        assert_eq!(draft.lead_time, Some(3.0));
    }

    #[test]
    fn test_history_record() {
        let history = normalize_history(json!({
            "id": 100,
            "annotationId": "7",
            "action": "submitted",
            "result": [{"id": "r1", "value": {"start": 0.0, "end": 1.0}}]
        }))
        .unwrap();
        assert_eq!(history.annotation_id, Some(7));
        assert_eq!(history.result.len(), 1);
    }

    #[test]
    fn test_email_from_created_by() {
        assert_eq!(
            email_from_created_by("Jane Doe jane@example.com, 12").as_deref(),
            Some("jane@example.com")
        );
        assert_eq!(email_from_created_by("jane@example.com").as_deref(), Some("jane@example.com"));
        assert_eq!(email_from_created_by("Jane Doe, 12"), None);
    }
}
