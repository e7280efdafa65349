//! Time alignment
//!
//! Externally sourced sample data (IMU charts and the like) is aligned to
//! the task timeline by a numeric offset. The offset of an annotation is
//! resolved from three places, first match wins:
//!
//! 1. the annotation's own stored offset, when non-zero
//! 2. the override stored for its pk in the task metadata
//! 3. the task-level default in the task metadata
//!
//! A resolved zero from (2) or (3) is a real value and reported with its
//! source; only when all three are missing is the offset [`OffsetSource::Unset`].

use crate::error::Result;
use crate::persistence::Persistence;
use crate::task::TaskMeta;
use serde::{Deserialize, Serialize};

/// Where a resolved offset came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetSource {
    Annotation,
    Override,
    TaskDefault,
    Unset,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedOffset {
    pub value: f64,
    pub source: OffsetSource,
}

impl ResolvedOffset {
    pub const UNSET: ResolvedOffset = ResolvedOffset {
        value: 0.0,
        source: OffsetSource::Unset,
    };

    pub fn is_set(&self) -> bool {
        self.source != OffsetSource::Unset
    }
}

/// One time-series sample; `values` holds the channels in a fixed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: f64,
    pub values: Vec<f64>,
}

impl Sample {
    pub fn zero(timestamp: f64, channels: usize) -> Self {
        Self {
            timestamp,
            values: vec![0.0; channels],
        }
    }
}

/// Offset resolution plus the user-edited working offset
#[derive(Debug, Clone, Default)]
pub struct TimeAlignmentService {
    working_offset: Option<f64>,
}

impl TimeAlignmentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the offset for an annotation
    pub fn resolve(annotation_offset: f64, pk: Option<i64>, meta: &TaskMeta) -> ResolvedOffset {
        if annotation_offset != 0.0 && annotation_offset.is_finite() {
            return ResolvedOffset {
                value: annotation_offset,
                source: OffsetSource::Annotation,
            };
        }

        if let Some(value) = pk.and_then(|pk| meta.override_for(pk)) {
            return ResolvedOffset {
                value,
                source: OffsetSource::Override,
            };
        }

        match meta.offset {
            Some(value) => ResolvedOffset {
                value,
                source: OffsetSource::TaskDefault,
            },
            None => ResolvedOffset::UNSET,
        }
    }

    /// Offset the user is currently editing; ignored when not finite
    pub fn set_working_offset(&mut self, value: f64) {
        if value.is_finite() {
            self.working_offset = Some(value);
        } else {
            tracing::warn!(value, "Non-finite working offset ignored");
        }
    }

    pub fn working_offset(&self) -> Option<f64> {
        self.working_offset
    }

    pub fn clear_working_offset(&mut self) {
        self.working_offset = None;
    }

    /// Offset sent with the next submission: working offset, else the task
    /// default, else zero
    pub fn submission_offset(&self, meta: &TaskMeta) -> f64 {
        self.working_offset.or(meta.offset).unwrap_or(0.0)
    }

    /// Metadata with the override for `pk` upserted
    pub fn with_override(meta: &TaskMeta, pk: i64, value: f64) -> TaskMeta {
        let mut updated = meta.clone();
        updated.upsert_override(pk, value);
        updated
    }

    /// Upsert the override for `pk` and persist the whole metadata blob
    ///
    /// Returns the metadata the store should adopt: the server's copy when
    /// the answer carries one, otherwise the locally upserted blob.
    pub async fn save_offset_on_annotation_submit(
        persistence: &dyn Persistence,
        task_id: i64,
        meta: &TaskMeta,
        pk: i64,
        value: f64,
    ) -> Result<TaskMeta> {
        let updated = Self::with_override(meta, pk, value);
        let response = persistence.save_offset(task_id, &updated.to_value()).await?;

        let adopted = match response.get("meta") {
            Some(server_meta) if !server_meta.is_null() => TaskMeta::from_value(server_meta.clone()),
            _ => updated,
        };
        tracing::info!(task_id, pk, offset = value, "Offset override saved");
        Ok(adopted)
    }
}

/// Slice samples to the window starting at `offset`
///
/// The window starts at the first sample with `timestamp >= offset`. When
/// that sample lies more than one native interval (distance between the
/// first two samples) after the offset, zero samples are synthesized
/// backward at that interval, never earlier than the offset.
pub fn window_samples(samples: &[Sample], offset: f64) -> Vec<Sample> {
    let Some(start) = samples.iter().position(|s| s.timestamp >= offset) else {
        return Vec::new();
    };
    let window = &samples[start..];
    let first = &window[0];

    let interval = match samples {
        [a, b, ..] => (b.timestamp - a.timestamp).abs(),
        _ => 0.0,
    };
    let gap = first.timestamp - offset;
    if !interval.is_finite() || interval <= 0.0 || gap <= interval {
        return window.to_vec();
    }

    let channels = first.values.len();
    let mut padding = Vec::new();
    let mut step = 1.0;
    loop {
        let ts = first.timestamp - step * interval;
        if ts < offset {
            break;
        }
        padding.push(Sample::zero(ts, channels));
        step += 1.0;
    }
    padding.reverse();
    padding.extend_from_slice(window);
    padding
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{DraftTarget, SubmissionBody};
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::sync::Mutex;

    fn meta(default: Option<f64>, overrides: &[(i64, f64)]) -> TaskMeta {
        let mut meta = TaskMeta {
            offset: default,
            ..TaskMeta::default()
        };
        for (pk, value) in overrides {
            meta.upsert_override(*pk, *value);
        }
        meta
    }

    #[test]
    fn test_precedence_override_beats_default() {
        let resolved = TimeAlignmentService::resolve(0.0, Some(7), &meta(Some(500.0), &[(7, 150.0)]));
        assert_eq!(resolved, ResolvedOffset { value: 150.0, source: OffsetSource::Override });
    }

    #[test]
    fn test_precedence_annotation_wins() {
        let resolved = TimeAlignmentService::resolve(75.0, Some(7), &meta(Some(500.0), &[(7, 150.0)]));
        assert_eq!(resolved, ResolvedOffset { value: 75.0, source: OffsetSource::Annotation });
    }

    #[test]
    fn test_falls_back_to_task_default() {
        let resolved = TimeAlignmentService::resolve(0.0, Some(8), &meta(Some(500.0), &[(7, 150.0)]));
        assert_eq!(resolved.value, 500.0);
        assert_eq!(resolved.source, OffsetSource::TaskDefault);

        let resolved = TimeAlignmentService::resolve(0.0, None, &meta(Some(500.0), &[(7, 150.0)]));
        assert_eq!(resolved.source, OffsetSource::TaskDefault);
    }

    #[test]
    fn test_zero_is_distinguishable_from_unset() {
        let zero = TimeAlignmentService::resolve(0.0, Some(7), &meta(None, &[(7, 0.0)]));
        assert_eq!(zero.value, 0.0);
        assert!(zero.is_set());

        let unset = TimeAlignmentService::resolve(0.0, Some(7), &meta(None, &[]));
        assert_eq!(unset, ResolvedOffset::UNSET);
        assert!(!unset.is_set());
    }

    #[test]
    fn test_submission_offset_order() {
        let mut service = TimeAlignmentService::new();
        assert_eq!(service.submission_offset(&meta(None, &[])), 0.0);
        assert_eq!(service.submission_offset(&meta(Some(40.0), &[])), 40.0);
        service.set_working_offset(12.0);
        assert_eq!(service.submission_offset(&meta(Some(40.0), &[])), 12.0);
        service.set_working_offset(f64::NAN);
        assert_eq!(service.working_offset(), Some(12.0));
    }

    fn samples(timestamps: &[f64]) -> Vec<Sample> {
        timestamps
            .iter()
            .map(|ts| Sample { timestamp: *ts, values: vec![1.0, 2.0] })
            .collect()
    }

    fn timestamps(samples: &[Sample]) -> Vec<f64> {
        samples.iter().map(|s| s.timestamp).collect()
    }

    #[test]
    fn test_window_starts_at_offset() {
        let data = samples(&[0.0, 10.0, 20.0, 30.0]);
        assert_eq!(timestamps(&window_samples(&data, 15.0)), vec![20.0, 30.0]);
        assert_eq!(timestamps(&window_samples(&data, 20.0)), vec![20.0, 30.0]);
        assert!(window_samples(&data, 31.0).is_empty());
    }

    #[test]
    fn test_window_pads_gap_with_zero_samples() {
        let data = samples(&[0.0, 10.0, 50.0, 60.0]);
        let window = window_samples(&data, 15.0);

        assert_eq!(timestamps(&window), vec![20.0, 30.0, 40.0, 50.0, 60.0]);
        assert_eq!(window[0].values, vec![0.0, 0.0]);
        assert_eq!(window[3].values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_window_padding_can_land_on_offset() {
        let data = samples(&[0.0, 10.0, 50.0]);
        let window = window_samples(&data, 20.0);
        assert_eq!(timestamps(&window), vec![20.0, 30.0, 40.0, 50.0]);
    }

    #[test]
    fn test_window_single_sample_is_not_padded() {
        let data = samples(&[100.0]);
        assert_eq!(timestamps(&window_samples(&data, 0.0)), vec![100.0]);
    }

    #[derive(Default)]
    struct MetaRecorder {
        saved: Mutex<Vec<Value>>,
        answer: Value,
    }

    #[async_trait]
    impl Persistence for MetaRecorder {
        async fn submit(&self, _: i64, _: &SubmissionBody) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn update(&self, _: i64, _: i64, _: &SubmissionBody) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn create_draft(&self, _: DraftTarget, _: &Map<String, Value>) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn update_draft(&self, _: i64, _: &Map<String, Value>) -> Result<Value> {
            Ok(Value::Null)
        }
        async fn delete_draft(&self, _: i64) -> Result<()> {
            Ok(())
        }
        async fn delete_annotation(&self, _: i64, _: i64) -> Result<()> {
            Ok(())
        }
        async fn save_offset(&self, _: i64, meta: &Value) -> Result<Value> {
            self.saved.lock().unwrap().push(meta.clone());
            Ok(self.answer.clone())
        }
    }

    #[tokio::test]
    async fn test_save_offset_upserts_by_pk() {
        let recorder = MetaRecorder::default();
        let mut current = meta(Some(500.0), &[(7, 150.0)]);
        current.context.insert("workout_id".into(), json!("w-9"));

        let adopted =
            TimeAlignmentService::save_offset_on_annotation_submit(&recorder, 3, &current, 7, 180.0)
                .await
                .unwrap();
        let adopted =
            TimeAlignmentService::save_offset_on_annotation_submit(&recorder, 3, &adopted, 9, 20.0)
                .await
                .unwrap();

        assert_eq!(adopted.annotations_offset.len(), 2);
        assert_eq!(adopted.override_for(7), Some(180.0));
        assert_eq!(adopted.override_for(9), Some(20.0));

        let saved = recorder.saved.lock().unwrap();
        assert_eq!(saved[0]["workout_id"], "w-9");
        assert_eq!(saved[0]["annotations_offset"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_offset_adopts_server_meta() {
        let recorder = MetaRecorder {
            answer: json!({"id": 3, "meta": {"offset": 1, "annotations_offset": [{"annotation": 7, "offset": 99}]}}),
            ..MetaRecorder::default()
        };
        let adopted =
            TimeAlignmentService::save_offset_on_annotation_submit(&recorder, 3, &TaskMeta::default(), 7, 180.0)
                .await
                .unwrap();
        assert_eq!(adopted.override_for(7), Some(99.0));
        assert_eq!(adopted.offset, Some(1.0));
    }
}
