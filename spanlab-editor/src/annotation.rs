//! Annotation entity
//!
//! One annotation (or prediction) of a task: the ordered region list plus
//! draft and submission bookkeeping. Predictions share the type and are
//! tagged [`EntityKind::Prediction`]; every edit on them is rejected.
//!
//! History items are frozen snapshots of earlier submitted states and live
//! in [`HistoryItem`].

use crate::error::{Error, Result};
use crate::history::UndoHistory;
use crate::normalize::{AnnotationRecord, HistoryRecord};
use crate::region::{self, Region, ORIGIN_MANUAL, ORIGIN_PREDICTION};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use spanlab_common::events::{AnnotationSnapshot, EntityKind, LabelSummary};
use spanlab_common::{time, uuid_utils};
use std::collections::BTreeSet;

const RAW_ID_LEN: usize = 10;

/// Options for [`Annotation::deserialize_results`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DeserializeOptions {
    /// Load regions hidden (bulk init; the selected entity un-hides later)
    pub hidden: bool,
}

/// Result payloads the annotation was loaded with
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Versions {
    pub result: Option<Vec<Region>>,
    pub draft: Option<Vec<Region>>,
}

#[derive(Debug, Clone)]
pub struct Annotation {
    /// Session-local id, also the region id scope
    pub id: String,
    /// Server id, set after the first successful submission
    pub pk: Option<i64>,
    pub kind: EntityKind,
    pub user_generate: bool,
    pub sent_user_generate: bool,
    regions: Vec<Region>,
    pub draft_id: Option<i64>,
    pub draft_saved: Option<DateTime<Utc>>,
    history: UndoHistory<Vec<Region>>,
    /// Stored offset; 0.0 means "not set on the annotation"
    pub offset: f64,
    pub parent_prediction: Option<i64>,
    pub parent_annotation: Option<i64>,
    pub completed_by: Option<i64>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When this session loaded the annotation (lead-time accounting)
    pub loaded_at: DateTime<Utc>,
    /// Lead time accumulated by earlier sessions, in seconds
    pub lead_time: f64,
    pub editable: bool,
    pub selected: bool,
    pub was_cancelled: bool,
    selected_regions: BTreeSet<String>,
    pub versions: Versions,
    suggestions: Vec<Region>,
}

impl Annotation {
    /// Build an entity from a normalized record
    ///
    /// Regions are not imported here; callers pick `draft` or `result` and
    /// run [`deserialize_results`](Self::deserialize_results).
    pub fn from_record(id: String, kind: EntityKind, record: &AnnotationRecord) -> Self {
        let now = time::now();
        Self {
            id,
            pk: record.pk,
            kind,
            user_generate: record.user_generate,
            sent_user_generate: false,
            regions: Vec::new(),
            draft_id: record.draft_id,
            draft_saved: None,
            history: UndoHistory::default(),
            offset: record.offset.unwrap_or(0.0),
            parent_prediction: record.parent_prediction,
            parent_annotation: record.parent_annotation,
            completed_by: record.completed_by,
            created_by: record.created_by.clone(),
            created_at: record.created_at.unwrap_or(now),
            loaded_at: now,
            lead_time: record.lead_time.unwrap_or(0.0),
            editable: kind == EntityKind::Annotation,
            selected: false,
            was_cancelled: record.was_cancelled,
            selected_regions: BTreeSet::new(),
            versions: Versions {
                result: Some(record.result.clone()),
                draft: record.draft.clone(),
            },
            suggestions: Vec::new(),
        }
    }

    /// Fresh, empty, user-generated annotation
    pub fn empty(id: String) -> Self {
        let record = AnnotationRecord {
            user_generate: true,
            ..AnnotationRecord::default()
        };
        Self::from_record(id, EntityKind::Annotation, &record)
    }

    pub fn is_prediction(&self) -> bool {
        self.kind == EntityKind::Prediction
    }

    /// Annotation was created in this session and never sent
    pub fn is_unsent(&self) -> bool {
        self.user_generate && !self.sent_user_generate && self.pk.is_none()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    /// Import results, replacing the current region list
    ///
    /// Untagged results get an origin (prediction for prediction entities,
    /// manual otherwise). Ids are scoped to this annotation and dangling
    /// `parent_id`s are nulled.
    pub fn deserialize_results(&mut self, results: Vec<Region>, options: DeserializeOptions) {
        let default_origin = if self.is_prediction() {
            ORIGIN_PREDICTION
        } else {
            ORIGIN_MANUAL
        };

        let tagged: Vec<Region> = results
            .into_iter()
            .map(|mut r| {
                if r.origin.is_none() {
                    r.origin = Some(default_origin.to_string());
                }
                r.hidden = options.hidden;
                r
            })
            .collect();

        self.regions = region::rescope(tagged, &self.id);
        self.selected_regions.clear();
        tracing::debug!(
            annotation = %self.id,
            kind = %self.kind,
            regions = self.regions.len(),
            "Results deserialized"
        );
    }

    /// Export the region list with raw ids and rewritten parent links
    pub fn serialize_annotation(&self) -> Vec<Region> {
        region::export(&self.regions)
    }

    /// Whether a draft write would store anything new
    pub fn needs_draft_save(&self) -> bool {
        if !self.history.has_changes() {
            return false;
        }
        match (self.draft_saved, self.history.last_edit()) {
            (None, _) => true,
            (Some(saved), Some(edited)) => edited > saved,
            (Some(_), None) => false,
        }
    }

    /// Adopt the server id; region ids keep their session-local scope
    pub fn update_personal_key(&mut self, pk: i64) {
        self.pk = Some(pk);
    }

    pub fn drop_draft(&mut self) {
        self.draft_id = None;
        self.draft_saved = None;
    }

    pub fn set_draft_id(&mut self, draft_id: i64) {
        self.draft_id = Some(draft_id);
    }

    pub fn mark_draft_saved(&mut self, at: DateTime<Utc>) {
        self.draft_saved = Some(at);
    }

    pub fn send_user_generate(&mut self) {
        self.sent_user_generate = true;
    }

    /// Whether the user edited since the last history reset
    pub fn is_dirty(&self) -> bool {
        self.history.can_undo()
    }

    pub fn last_edit(&self) -> Option<DateTime<Utc>> {
        self.history.last_edit()
    }

    // ------------------------------------------------------------------
    // Editing
    // ------------------------------------------------------------------

    fn ensure_editable(&self) -> Result<()> {
        if self.is_prediction() {
            return Err(Error::InvalidState(format!(
                "prediction {} is read-only",
                self.id
            )));
        }
        if !self.editable {
            return Err(Error::InvalidState(format!(
                "annotation {} is not editable",
                self.id
            )));
        }
        Ok(())
    }

    /// Add a region; returns its scoped id
    pub fn add_region(&mut self, mut region: Region) -> Result<String> {
        self.ensure_editable()?;

        let mut raw = region.raw_id().to_string();
        let taken = |candidate: &str| {
            let scoped = region::scoped_id(candidate, &self.id);
            self.regions.iter().any(|r| r.id == scoped)
        };
        if raw.is_empty() || taken(&raw) {
            raw = uuid_utils::unique_short_id(RAW_ID_LEN, taken);
        }
        region.id = region::scoped_id(&raw, &self.id);

        if let Some(parent) = region.parent_id.take() {
            let scoped_parent = region::scoped_id(&parent, &self.id);
            if self.region(&scoped_parent).is_some() {
                region.parent_id = Some(scoped_parent);
            } else {
                tracing::warn!(region = %region.id, parent = %parent, "Dangling parent_id dropped");
            }
        }
        if region.origin.is_none() {
            region.origin = Some(ORIGIN_MANUAL.to_string());
        }

        let id = region.id.clone();
        self.checkpoint();
        self.regions.push(region);
        Ok(id)
    }

    /// Merge `patch` into a region's value payload
    pub fn update_region_value(&mut self, id: &str, patch: Map<String, Value>) -> Result<()> {
        self.ensure_editable()?;
        let idx = self.region_index(id)?;
        if self.regions[idx].readonly {
            return Err(Error::InvalidState(format!("region {} is read-only", id)));
        }

        self.checkpoint();
        let region = &mut self.regions[idx];
        for (key, value) in patch {
            region.value.insert(key, value);
        }
        if region.origin.as_deref() == Some(ORIGIN_PREDICTION) {
            region.origin = Some("prediction-changed".to_string());
        }
        Ok(())
    }

    /// Remove a region; children pointing at it lose their parent link
    pub fn delete_region(&mut self, id: &str) -> Result<Region> {
        self.ensure_editable()?;
        let idx = self.region_index(id)?;

        self.checkpoint();
        let removed = self.regions.remove(idx);
        for region in self.regions.iter_mut() {
            if region.parent_id.as_deref() == Some(removed.id.as_str()) {
                region.parent_id = None;
            }
        }
        self.selected_regions.remove(&removed.id);
        Ok(removed)
    }

    pub fn delete_all_regions(&mut self) -> Result<()> {
        self.ensure_editable()?;
        if self.regions.is_empty() {
            return Ok(());
        }
        self.checkpoint();
        self.regions.clear();
        self.selected_regions.clear();
        Ok(())
    }

    /// Toggle region selection (view state, allowed on read-only entities)
    pub fn select_region(&mut self, id: &str) -> Result<()> {
        self.region_index(id)?;
        if !self.selected_regions.remove(id) {
            self.selected_regions.insert(id.to_string());
        }
        Ok(())
    }

    pub fn unselect_all(&mut self) {
        self.selected_regions.clear();
    }

    pub fn selected_region_ids(&self) -> Vec<String> {
        self.selected_regions.iter().cloned().collect()
    }

    pub fn undo(&mut self) -> bool {
        match self.history.undo(self.regions.clone()) {
            Some(previous) => {
                self.restore(previous);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo(self.regions.clone()) {
            Some(next) => {
                self.restore(next);
                true
            }
            None => false,
        }
    }

    /// Current regions become the history baseline
    pub fn reinit_history(&mut self) {
        self.history.reset();
    }

    /// Make every region visible (the entity became the active view)
    pub fn reveal(&mut self) {
        for region in self.regions.iter_mut() {
            region.hidden = false;
        }
    }

    // ------------------------------------------------------------------
    // Suggestions
    // ------------------------------------------------------------------

    /// Replace pending suggestions
    pub fn set_suggestions(&mut self, results: Vec<Region>) {
        let tagged: Vec<Region> = results
            .into_iter()
            .map(|mut r| {
                r.origin.get_or_insert_with(|| ORIGIN_PREDICTION.to_string());
                r
            })
            .collect();
        self.suggestions = region::rescope(tagged, &self.id);
    }

    pub fn suggestions(&self) -> &[Region] {
        &self.suggestions
    }

    /// Move pending suggestions into the region list; returns how many
    pub fn accept_suggestions(&mut self) -> Result<usize> {
        self.ensure_editable()?;
        if self.suggestions.is_empty() {
            return Ok(0);
        }

        let incoming = std::mem::take(&mut self.suggestions);
        let count = incoming.len();
        self.checkpoint();

        let mut merged = std::mem::take(&mut self.regions);
        merged.extend(incoming);
        // Suggestion raw ids may collide with existing ones
        self.regions = region::rescope(merged, &self.id);
        Ok(count)
    }

    pub fn label_summary(&self) -> LabelSummary {
        label_summary(&self.regions)
    }

    pub fn snapshot(&self) -> AnnotationSnapshot {
        AnnotationSnapshot {
            id: self.id.clone(),
            pk: self.pk,
            kind: self.kind,
            user_generate: self.user_generate,
            editable: self.editable,
            region_count: self.regions.len(),
            draft_id: self.draft_id,
            parent_prediction: self.parent_prediction,
            parent_annotation: self.parent_annotation,
            completed_by: self.completed_by,
        }
    }

    fn region_index(&self, id: &str) -> Result<usize> {
        self.regions
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| Error::NotFound(format!("region {} in {}", id, self.id)))
    }

    fn checkpoint(&mut self) {
        self.history.record(self.regions.clone());
    }

    fn restore(&mut self, regions: Vec<Region>) {
        self.regions = regions;
        let present: BTreeSet<String> = self.regions.iter().map(|r| r.id.clone()).collect();
        self.selected_regions.retain(|id| present.contains(id));
    }
}

/// Read-only snapshot of an earlier submitted state
#[derive(Debug, Clone)]
pub struct HistoryItem {
    /// Session-local id
    pub id: String,
    /// Server id of the history entry
    pub history_pk: Option<i64>,
    /// pk of the annotation this snapshot belongs to
    pub annotation_id: Option<i64>,
    pub action: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    regions: Vec<Region>,
}

impl HistoryItem {
    pub fn from_record(id: String, record: &HistoryRecord) -> Self {
        let tagged: Vec<Region> = record
            .result
            .iter()
            .cloned()
            .map(|mut r| {
                r.hidden = true;
                r.origin.get_or_insert_with(|| ORIGIN_MANUAL.to_string());
                r
            })
            .collect();
        let regions = region::rescope(tagged, &id);

        Self {
            id,
            history_pk: record.id,
            annotation_id: record.annotation_id,
            action: record.action.clone(),
            created_at: record.created_at,
            created_by: record.created_by.clone(),
            regions,
        }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn label_summary(&self) -> LabelSummary {
        label_summary(&self.regions)
    }

    pub fn snapshot(&self) -> AnnotationSnapshot {
        AnnotationSnapshot {
            id: self.id.clone(),
            pk: self.annotation_id,
            kind: EntityKind::History,
            user_generate: false,
            editable: false,
            region_count: self.regions.len(),
            draft_id: None,
            parent_prediction: None,
            parent_annotation: None,
            completed_by: None,
        }
    }
}

/// Count regions per label
pub fn label_summary(regions: &[Region]) -> LabelSummary {
    let mut summary = LabelSummary::new();
    for region in regions {
        for label in region.labels() {
            *summary.entry(label).or_insert(0) += 1;
        }
    }
    summary
}
