//! Task model
//!
//! The unit of work being labeled: opaque data payload, the raw records the
//! store is initialized from, and the metadata blob that carries the
//! offset override list.

use crate::error::{Error, Result};
use crate::normalize::{self, AnnotationRecord, DraftRecord};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One per-annotation offset override
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffsetOverride {
    /// Annotation pk
    pub annotation: i64,
    pub offset: f64,
}

/// Task metadata blob
///
/// Context fields are kept verbatim; only the offset entries are typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    /// Task-level default offset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,

    /// Per-annotation overrides, at most one entry per pk
    #[serde(default)]
    pub annotations_offset: Vec<OffsetOverride>,

    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl TaskMeta {
    /// Lenient parse of the metadata blob
    ///
    /// Accepts an object or a JSON string holding one. Anything
    /// unparseable yields empty metadata. Override entries whose pk is not
    /// numeric are skipped; duplicate pks keep the last entry.
    pub fn from_value(raw: Value) -> Self {
        let raw = match raw {
            Value::String(s) => match serde_json::from_str::<Value>(&s) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "Task meta is not valid JSON, using empty meta");
                    return Self::default();
                }
            },
            other => other,
        };
        let Value::Object(mut map) = raw else {
            return Self::default();
        };

        let offset = map.remove("offset").as_ref().and_then(normalize::coerce_number);

        let mut meta = Self {
            offset,
            annotations_offset: Vec::new(),
            context: Map::new(),
        };

        if let Some(Value::Array(entries)) = map.remove("annotations_offset") {
            for entry in entries {
                let pk = entry.get("annotation").and_then(|v| normalize::coerce_id("annotation", v));
                let value = entry.get("offset").and_then(normalize::coerce_number);
                match (pk, value) {
                    (Some(pk), Some(value)) => meta.upsert_override(pk, value),
                    _ => tracing::warn!(entry = %entry, "Offset override skipped"),
                }
            }
        }

        meta.context = map;
        meta
    }

    pub fn override_for(&self, pk: i64) -> Option<f64> {
        self.annotations_offset
            .iter()
            .find(|o| o.annotation == pk)
            .map(|o| o.offset)
    }

    /// Replace the entry for `pk`, or append one
    pub fn upsert_override(&mut self, pk: i64, offset: f64) {
        match self.annotations_offset.iter_mut().find(|o| o.annotation == pk) {
            Some(existing) => existing.offset = offset,
            None => self.annotations_offset.push(OffsetOverride {
                annotation: pk,
                offset,
            }),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A task with its backend records
#[derive(Debug, Clone, Default)]
pub struct Task {
    pub id: i64,
    pub data: Value,
    pub annotations: Vec<AnnotationRecord>,
    pub predictions: Vec<AnnotationRecord>,
    pub drafts: Vec<DraftRecord>,
    pub meta: TaskMeta,
    /// Optimistic-concurrency token echoed back on submit
    pub unique_lock_id: Option<String>,
}

impl Task {
    /// Parse a task payload
    ///
    /// `completions` (older projects) are loaded ahead of `annotations`.
    /// Records that fail normalization are logged and skipped.
    pub fn from_json(raw: Value) -> Result<Self> {
        let Value::Object(mut map) = raw else {
            return Err(Error::BadRequest("task payload must be an object".to_string()));
        };

        let id = map
            .get("id")
            .and_then(|v| normalize::coerce_id("task id", v))
            .ok_or_else(|| Error::BadRequest("task payload without numeric id".to_string()))?;

        let mut annotations = Vec::new();
        for key in ["completions", "annotations"] {
            for raw in take_list(&mut map, key) {
                match normalize::normalize_annotation(raw) {
                    Ok(record) => annotations.push(record),
                    Err(e) => tracing::warn!(task_id = id, error = %e, "Annotation record skipped"),
                }
            }
        }

        let mut predictions = Vec::new();
        for raw in take_list(&mut map, "predictions") {
            match normalize::normalize_annotation(raw) {
                Ok(record) => predictions.push(record),
                Err(e) => tracing::warn!(task_id = id, error = %e, "Prediction record skipped"),
            }
        }

        let mut drafts = Vec::new();
        for raw in take_list(&mut map, "drafts") {
            match normalize::normalize_draft(raw) {
                Ok(record) => drafts.push(record),
                Err(e) => tracing::warn!(task_id = id, error = %e, "Draft record skipped"),
            }
        }

        let meta = map.remove("meta").map(TaskMeta::from_value).unwrap_or_default();
        let unique_lock_id = match map.remove("unique_lock_id") {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Ok(Self {
            id,
            data: map.remove("data").unwrap_or(Value::Null),
            annotations,
            predictions,
            drafts,
            meta,
            unique_lock_id,
        })
    }

    /// Lead time stored on the task's first draft, in seconds
    pub fn draft_lead_time(&self) -> f64 {
        self.drafts.first().and_then(|d| d.lead_time).unwrap_or(0.0)
    }
}

fn take_list(map: &mut Map<String, Value>, key: &str) -> Vec<Value> {
    match map.remove(key) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Entry of the annotator's task history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHistoryEntry {
    pub task_id: i64,
    pub annotation_id: Option<i64>,
}

/// Back/forward navigation over the tasks visited in this session
#[derive(Debug, Clone, Default)]
pub struct TaskNavigator {
    entries: Vec<TaskHistoryEntry>,
    current: Option<i64>,
}

impl TaskNavigator {
    pub fn new(entries: Vec<TaskHistoryEntry>) -> Self {
        Self {
            entries,
            current: None,
        }
    }

    /// Make `task_id` current, appending it on first visit
    pub fn assign(&mut self, task_id: i64) {
        if !self.entries.iter().any(|e| e.task_id == task_id) {
            self.entries.push(TaskHistoryEntry {
                task_id,
                annotation_id: None,
            });
        }
        self.current = Some(task_id);
    }

    /// Remember which annotation was last viewed on the current task
    pub fn record_annotation(&mut self, pk: i64) {
        let Some(current) = self.current else {
            return;
        };
        if let Some(entry) = self.entries.iter_mut().find(|e| e.task_id == current) {
            entry.annotation_id = Some(pk);
        }
    }

    fn current_index(&self) -> Option<usize> {
        let current = self.current?;
        self.entries.iter().position(|e| e.task_id == current)
    }

    pub fn can_go_next(&self) -> bool {
        matches!(self.current_index(), Some(idx) if idx + 1 < self.entries.len())
    }

    pub fn can_go_prev(&self) -> bool {
        matches!(self.current_index(), Some(idx) if idx > 0)
    }

    /// Move forward; returns the entry to load
    pub fn next(&mut self) -> Option<TaskHistoryEntry> {
        let idx = self.current_index()?;
        let entry = *self.entries.get(idx + 1)?;
        self.current = Some(entry.task_id);
        Some(entry)
    }

    /// Move back; returns the entry to load
    pub fn prev(&mut self) -> Option<TaskHistoryEntry> {
        let idx = self.current_index()?.checked_sub(1)?;
        let entry = self.entries[idx];
        self.current = Some(entry.task_id);
        Some(entry)
    }

    pub fn entries(&self) -> &[TaskHistoryEntry] {
        &self.entries
    }

    pub fn current(&self) -> Option<TaskHistoryEntry> {
        self.current_index().map(|idx| self.entries[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_meta_from_string_and_upsert() {
        let mut meta = TaskMeta::from_value(json!(
            r#"{"workout_id": "w-1", "offset": "500", "annotations_offset": [{"annotation": 7, "offset": 150}]}"#
        ));
        assert_eq!(meta.offset, Some(500.0));
        assert_eq!(meta.override_for(7), Some(150.0));
        assert_eq!(meta.context["workout_id"], "w-1");

        meta.upsert_override(7, 175.0);
        meta.upsert_override(8, 20.0);
        assert_eq!(meta.annotations_offset.len(), 2);
        assert_eq!(meta.override_for(7), Some(175.0));

        let value = meta.to_value();
        assert_eq!(value["workout_id"], "w-1");
        assert_eq!(value["annotations_offset"][0]["offset"], 175.0);
    }

    #[test]
    fn test_meta_duplicate_entries_collapse() {
        let meta = TaskMeta::from_value(json!({
            "annotations_offset": [
                {"annotation": 7, "offset": 1},
                {"annotation": "7", "offset": 2},
                {"annotation": "x", "offset": 3}
            ]
        }));
        assert_eq!(meta.annotations_offset.len(), 1);
        assert_eq!(meta.override_for(7), Some(2.0));
    }

    #[test]
    fn test_meta_garbage_is_empty() {
        assert_eq!(TaskMeta::from_value(json!("{not json")), TaskMeta::default());
        assert_eq!(TaskMeta::from_value(json!(42)), TaskMeta::default());
    }

    #[test]
    fn test_task_from_json() {
        let task = Task::from_json(json!({
            "id": 31,
            "data": {"video": "v.mp4"},
            "completions": [{"id": 1, "result": []}],
            "annotations": [{"id": 2, "result": []}, "garbage"],
            "predictions": [{"id": 5, "result": []}],
            "drafts": [{"id": 9, "lead_time": 4.5, "result": []}],
            "meta": {"offset": 10},
            "unique_lock_id": "lock-1"
        }))
        .unwrap();

        assert_eq!(task.id, 31);
        let pks: Vec<_> = task.annotations.iter().map(|a| a.pk).collect();
        assert_eq!(pks, vec![Some(1), Some(2)]);
        assert_eq!(task.predictions.len(), 1);
        assert_eq!(task.draft_lead_time(), 4.5);
        assert_eq!(task.meta.offset, Some(10.0));
        assert_eq!(task.unique_lock_id.as_deref(), Some("lock-1"));
    }

    #[test]
    fn test_task_requires_id() {
        assert!(Task::from_json(json!({"data": {}})).is_err());
    }

    #[test]
    fn test_navigator() {
        let mut nav = TaskNavigator::default();
        nav.assign(1);
        nav.assign(2);
        nav.record_annotation(70);
        assert!(nav.can_go_prev());
        assert!(!nav.can_go_next());

        let back = nav.prev().unwrap();
        assert_eq!(back.task_id, 1);
        assert!(nav.prev().is_none());

        let forward = nav.next().unwrap();
        assert_eq!(forward, TaskHistoryEntry { task_id: 2, annotation_id: Some(70) });
    }
}
