//! Annotation lifecycle manager
//!
//! Owns the annotations, predictions and history items of one task and the
//! single selection pointer. Every public method is one named operation:
//! callers hold the store's write guard for the whole call, and events are
//! published only after the operation's mutations are complete.
//!
//! **Selection:** [`Selection::Annotation`] points at an annotation or a
//! prediction; [`Selection::History`] is a read-only view of a history item
//! belonging to the annotation that was selected when the history list was
//! loaded (the history owner).

use crate::annotation::{Annotation, DeserializeOptions, HistoryItem};
use crate::context::EditorContext;
use crate::error::{Error, Result};
use crate::normalize::{self, AnnotationRecord, DraftRecord, HistoryRecord};
use crate::offset::{ResolvedOffset, TimeAlignmentService};
use crate::persistence::SubmissionBody;
use crate::region::Region;
use crate::scheduler::{DeferredJob, TickQueue};
use crate::suggestions::{SuggestionToken, SuggestionTracker};
use crate::task::{Task, TaskMeta, TaskNavigator};
use crate::validation::{ValidationError, ValidationErrors, Validator};
use spanlab_common::config::OrderingPolicy;
use spanlab_common::events::{AnnotationSnapshot, EntityKind, SelectOptions};
use serde_json::Map;
use spanlab_common::{time, uuid_utils, EditorEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Store handle shared by the coordinator and the host
pub type SharedStore = Arc<RwLock<LifecycleManager>>;

const LOCAL_ID_LEN: usize = 5;

/// What is currently selected
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    None,
    /// Annotation or prediction, by local id
    Annotation(String),
    /// History item, by local id
    History(String),
}

/// How [`LifecycleManager::create_annotation`] seeds a new annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeedPolicy {
    /// Follow `store.carry_non_interactive_predictions`
    #[default]
    FromConfig,
    /// Start with no regions
    Empty,
    /// Copy prediction results marked `interactive_mode = false`
    CarryNonInteractive,
}

pub struct LifecycleManager {
    ctx: EditorContext,
    task: Task,
    annotations: Vec<Annotation>,
    predictions: Vec<Annotation>,
    history: Vec<HistoryItem>,
    history_owner: Option<String>,
    selection: Selection,
    viewing_all: bool,
    initialized: bool,
    validation: ValidationErrors,
    deferred: TickQueue<DeferredJob>,
    suggestions: SuggestionTracker,
    alignment: TimeAlignmentService,
    navigator: TaskNavigator,
    /// One lock per annotation with draft writes in flight or done
    draft_locks: HashMap<String, Arc<Mutex<()>>>,
}

impl LifecycleManager {
    pub fn new(ctx: EditorContext, task: Task) -> Self {
        let mut navigator = TaskNavigator::default();
        navigator.assign(task.id);

        Self {
            ctx,
            task,
            annotations: Vec::new(),
            predictions: Vec::new(),
            history: Vec::new(),
            history_owner: None,
            selection: Selection::None,
            viewing_all: false,
            initialized: false,
            validation: ValidationErrors::default(),
            deferred: TickQueue::new(),
            suggestions: SuggestionTracker::new(),
            alignment: TimeAlignmentService::new(),
            navigator,
            draft_locks: HashMap::new(),
        }
    }

    /// Wrap into the shared handle
    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn context(&self) -> &EditorContext {
        &self.ctx
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_meta(&self) -> &TaskMeta {
        &self.task.meta
    }

    pub fn set_task_meta(&mut self, meta: TaskMeta) {
        self.task.meta = meta;
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn predictions(&self) -> &[Annotation] {
        &self.predictions
    }

    pub fn history(&self) -> &[HistoryItem] {
        &self.history
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn is_viewing_all(&self) -> bool {
        self.viewing_all
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn navigator(&self) -> &TaskNavigator {
        &self.navigator
    }

    pub fn navigator_mut(&mut self) -> &mut TaskNavigator {
        &mut self.navigator
    }

    pub fn validation_errors(&self) -> &ValidationErrors {
        &self.validation
    }

    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Annotation or prediction by local id
    pub fn entity(&self, id: &str) -> Option<&Annotation> {
        self.annotations
            .iter()
            .chain(self.predictions.iter())
            .find(|a| a.id == id)
    }

    pub fn annotation(&self, id: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.id == id)
    }

    /// Mutable access for the editing layer
    pub fn annotation_mut(&mut self, id: &str) -> Result<&mut Annotation> {
        self.annotations
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| Error::NotFound(format!("annotation {}", id)))
    }

    pub fn annotation_by_pk(&self, pk: i64) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.pk == Some(pk))
    }

    /// Id of the annotation or prediction being worked on
    ///
    /// While a history item is viewed this is the history owner.
    pub fn selected_id(&self) -> Option<&str> {
        match &self.selection {
            Selection::None => None,
            Selection::Annotation(id) => Some(id.as_str()),
            Selection::History(_) => self.history_owner.as_deref(),
        }
    }

    pub fn selected(&self) -> Option<&Annotation> {
        self.selected_id().and_then(|id| self.entity(id))
    }

    /// Selected annotation (predictions excluded)
    pub fn selected_annotation(&self) -> Option<&Annotation> {
        self.selected_id().and_then(|id| self.annotation(id))
    }

    pub fn selected_annotation_mut(&mut self) -> Result<&mut Annotation> {
        let id = self
            .selected_id()
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidState("no annotation selected".to_string()))?;
        self.annotation_mut(&id)
    }

    pub fn selected_history(&self) -> Option<&HistoryItem> {
        match &self.selection {
            Selection::History(id) => self.history.iter().find(|h| &h.id == id),
            _ => None,
        }
    }

    fn ordering(&self) -> OrderingPolicy {
        self.ctx.config.store.ordering
    }

    /// Most recently created annotation under the ordering policy
    fn newest_annotation_id(&self) -> Option<String> {
        let newest = match self.ordering() {
            OrderingPolicy::AppendToEnd => self.annotations.last(),
            OrderingPolicy::PrependToStart => self.annotations.first(),
        };
        newest.map(|a| a.id.clone())
    }

    fn next_local_id(&self) -> String {
        uuid_utils::unique_short_id(LOCAL_ID_LEN, |candidate| {
            self.annotations.iter().any(|a| a.id == candidate)
                || self.predictions.iter().any(|a| a.id == candidate)
                || self.history.iter().any(|h| h.id == candidate)
        })
    }

    fn selected_snapshot(&self) -> Option<AnnotationSnapshot> {
        self.selected().map(Annotation::snapshot)
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    /// Initialize from the records carried by the task
    pub fn load_task(&mut self) {
        let predictions = self.task.predictions.clone();
        let annotations = self.task.annotations.clone();
        let drafts = self.task.drafts.clone();
        self.initialize(predictions, annotations, drafts, Vec::new());
    }

    /// Build entities from backend records and select the newest one
    ///
    /// Re-entrant: records whose pk is already present and drafts already
    /// attached to an annotation are skipped.
    pub fn initialize(
        &mut self,
        predictions: Vec<AnnotationRecord>,
        annotations: Vec<AnnotationRecord>,
        drafts: Vec<DraftRecord>,
        history_hint: Vec<HistoryRecord>,
    ) {
        let mut added_predictions = 0;
        for record in predictions {
            if record.pk.is_some() && self.predictions.iter().any(|p| p.pk == record.pk) {
                tracing::debug!(pk = ?record.pk, "Prediction already loaded");
                continue;
            }
            self.insert_prediction(&record, true);
            added_predictions += 1;
        }

        let mut added_annotations = 0;
        for record in annotations {
            if record.pk.is_some() && self.annotations.iter().any(|a| a.pk == record.pk) {
                tracing::debug!(pk = ?record.pk, "Annotation already loaded");
                continue;
            }
            self.insert_annotation(&record, true);
            added_annotations += 1;
        }

        let restored = self.restore_drafts(drafts);

        let target = restored.or_else(|| self.newest_annotation_id());
        if let Some(id) = target {
            // A re-entrant call keeps the history already loaded for the target
            let options = SelectOptions {
                retain_history: self.initialized && self.history_owner.as_deref() == Some(id.as_str()),
                ..SelectOptions::default()
            };
            self.select_annotation(&id, options);
            if let Ok(current) = self.annotation_mut(&id) {
                current.reinit_history();
            }
        } else {
            let newest_prediction = match self.ordering() {
                OrderingPolicy::AppendToEnd => self.predictions.last(),
                OrderingPolicy::PrependToStart => self.predictions.first(),
            }
            .map(|p| p.id.clone());
            if let Some(id) = newest_prediction {
                self.select_prediction(&id);
            }
        }

        if !history_hint.is_empty() {
            self.set_history(history_hint);
        }

        tracing::debug!(
            task_id = self.task.id,
            added_annotations,
            added_predictions,
            selection = ?self.selection,
            "Store initialized"
        );

        if !self.initialized {
            self.initialized = true;
            self.ctx.emit(EditorEvent::StorageInitialized {
                task_id: self.task.id,
                annotation_count: self.annotations.len(),
                prediction_count: self.predictions.len(),
                timestamp: time::now(),
            });
        }
    }

    /// Attach task drafts; returns the id of the last annotation touched
    fn restore_drafts(&mut self, drafts: Vec<DraftRecord>) -> Option<String> {
        let mut restored = None;

        for draft in drafts {
            if self.annotations.iter().any(|a| a.draft_id == Some(draft.id)) {
                tracing::debug!(draft_id = draft.id, "Draft already attached");
                continue;
            }

            let id = match draft.annotation {
                Some(pk) => match self.annotation_by_pk(pk) {
                    Some(existing) => existing.id.clone(),
                    None => {
                        tracing::warn!(draft_id = draft.id, pk, "Draft references unknown annotation, skipped");
                        continue;
                    }
                },
                None => {
                    let record = AnnotationRecord {
                        user_generate: true,
                        created_by: draft.created_username.clone(),
                        created_at: draft.created_at,
                        lead_time: draft.lead_time,
                        draft: Some(draft.result.clone()),
                        ..AnnotationRecord::default()
                    };
                    let idx = self.insert_annotation(&record, true);
                    self.annotations[idx].id.clone()
                }
            };

            if let Ok(annotation) = self.annotation_mut(&id) {
                annotation.deserialize_results(draft.result.clone(), DeserializeOptions::default());
                annotation.versions.draft = Some(draft.result);
                annotation.set_draft_id(draft.id);
                annotation.mark_draft_saved(draft.created_at.unwrap_or_else(time::now));
                annotation.reinit_history();
                tracing::info!(annotation = %id, draft_id = draft.id, "Draft restored");
                restored = Some(id);
            }
        }

        restored
    }

    fn insert_prediction(&mut self, record: &AnnotationRecord, hidden: bool) -> usize {
        let id = self.next_local_id();
        let mut prediction = Annotation::from_record(id, EntityKind::Prediction, record);
        prediction.editable = false;
        prediction.deserialize_results(record.result.clone(), DeserializeOptions { hidden });

        self.predictions.push(prediction);
        self.predictions.len() - 1
    }

    fn insert_annotation(&mut self, record: &AnnotationRecord, hidden: bool) -> usize {
        let id = self.next_local_id();
        let mut annotation = Annotation::from_record(id, EntityKind::Annotation, record);

        if annotation.created_by.is_none() {
            annotation.created_by = Some(self.ctx.user.display_name.clone());
        }
        if annotation.user_generate && annotation.completed_by.is_none() {
            annotation.completed_by = Some(self.resolve_author(annotation.created_by.as_deref()));
        }

        let results = record.draft.clone().unwrap_or_else(|| record.result.clone());
        annotation.deserialize_results(results, DeserializeOptions { hidden });

        match self.ordering() {
            OrderingPolicy::AppendToEnd => {
                self.annotations.push(annotation);
                self.annotations.len() - 1
            }
            OrderingPolicy::PrependToStart => {
                self.annotations.insert(0, annotation);
                0
            }
        }
    }

    /// Author of a user-generated annotation: the known user whose e-mail
    /// appears in `created_by`, else the current user
    fn resolve_author(&self, created_by: Option<&str>) -> i64 {
        created_by
            .and_then(normalize::email_from_created_by)
            .and_then(|email| self.ctx.find_user_by_email(&email))
            .map(|user| user.id)
            .unwrap_or(self.ctx.user.id)
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Add a read-only prediction
    ///
    /// It is selected only when no annotation exists and nothing is selected.
    pub fn add_prediction(&mut self, record: AnnotationRecord) -> &Annotation {
        let idx = self.insert_prediction(&record, false);
        if self.annotations.is_empty() && self.selection == Selection::None {
            let id = self.predictions[idx].id.clone();
            self.select_prediction(&id);
        }
        &self.predictions[idx]
    }

    /// Add an annotation from a backend record (draft payload preferred)
    pub fn add_annotation(&mut self, record: AnnotationRecord) -> &Annotation {
        let idx = self.insert_annotation(&record, false);
        &self.annotations[idx]
    }

    /// Create a new user annotation
    ///
    /// When seeded from non-interactive prediction results the annotation
    /// is selected and the seed becomes its history baseline.
    pub fn create_annotation(&mut self, policy: SeedPolicy) -> &Annotation {
        let carry = match policy {
            SeedPolicy::FromConfig => self.ctx.config.store.carry_non_interactive_predictions,
            SeedPolicy::Empty => false,
            SeedPolicy::CarryNonInteractive => true,
        };

        let seed: Vec<Region> = if carry {
            self.predictions
                .iter()
                .flat_map(|p| p.regions().iter())
                .filter(|r| r.interactive_mode == Some(false))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let record = AnnotationRecord {
            user_generate: true,
            ..AnnotationRecord::default()
        };
        let idx = self.insert_annotation(&record, false);
        let id = self.annotations[idx].id.clone();

        if !seed.is_empty() {
            let count = seed.len();
            self.select_annotation(&id, SelectOptions::default());
            if let Ok(annotation) = self.annotation_mut(&id) {
                annotation.deserialize_results(seed, DeserializeOptions::default());
                annotation.reinit_history();
            }
            tracing::debug!(annotation = %id, regions = count, "Annotation seeded from predictions");
        }

        &self.annotations[idx]
    }

    /// Copy all results of a prediction (or annotation) into a new annotation
    pub fn add_annotation_from_prediction(&mut self, source_id: &str) -> Result<&Annotation> {
        let source = self
            .entity(source_id)
            .ok_or_else(|| Error::NotFound(format!("entity {}", source_id)))?;
        let results: Vec<Region> = source.regions().to_vec();
        let (source_kind, source_pk) = (source.kind, source.pk);

        let record = AnnotationRecord {
            user_generate: true,
            ..AnnotationRecord::default()
        };
        let idx = self.insert_annotation(&record, false);
        let id = self.annotations[idx].id.clone();

        {
            let annotation = &mut self.annotations[idx];
            annotation.deserialize_results(results, DeserializeOptions::default());
            annotation.reinit_history();
            match (source_kind, source_pk) {
                (EntityKind::Prediction, Some(pk)) => annotation.parent_prediction = Some(pk),
                (EntityKind::Annotation, Some(pk)) => annotation.parent_annotation = Some(pk),
                _ => {}
            }
        }

        self.select_annotation(&id, SelectOptions::default());
        Ok(&self.annotations[idx])
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    fn unselect_current(&mut self) {
        let Some(id) = self.selected_id().map(str::to_string) else {
            return;
        };
        if let Some(entity) = self
            .annotations
            .iter_mut()
            .chain(self.predictions.iter_mut())
            .find(|a| a.id == id)
        {
            entity.unselect_all();
            entity.selected = false;
        }
    }

    /// Selections leave compare-mode
    fn leave_viewing_all(&mut self) {
        if self.viewing_all {
            self.viewing_all = false;
            self.ctx.emit(EditorEvent::ViewingAllChanged {
                viewing_all: false,
                timestamp: time::now(),
            });
        }
    }

    fn reset_history_view(&mut self) {
        self.history.clear();
        self.history_owner = None;
    }

    /// Select an annotation by local id, falling back to pk, then to the
    /// first annotation
    ///
    /// Returns `None` only when there is no annotation at all.
    pub fn select_annotation(&mut self, id: &str, options: SelectOptions) -> Option<&Annotation> {
        if self.annotations.is_empty() {
            return None;
        }

        let previous = self.selected_snapshot();
        self.leave_viewing_all();
        self.unselect_current();

        let pk = id.parse::<i64>().ok();
        let idx = self
            .annotations
            .iter()
            .position(|a| a.id == id)
            .or_else(|| pk.and_then(|pk| self.annotations.iter().position(|a| a.pk == Some(pk))))
            .unwrap_or(0);

        if !options.retain_history {
            self.reset_history_view();
        }

        let annotation = &mut self.annotations[idx];
        annotation.selected = true;
        annotation.editable = true;
        annotation.reveal();
        let selected = annotation.snapshot();
        let selected_pk = annotation.pk;
        self.selection = Selection::Annotation(selected.id.clone());

        if let Some(pk) = selected_pk {
            self.navigator.record_annotation(pk);
        }

        tracing::debug!(annotation = %selected.id, pk = ?selected_pk, ?options, "Annotation selected");
        self.ctx.emit(EditorEvent::SelectAnnotation {
            selected,
            previous,
            options,
            timestamp: time::now(),
        });

        Some(&self.annotations[idx])
    }

    /// Read-only selection of a prediction (falls back to the first one)
    pub fn select_prediction(&mut self, id: &str) -> Option<&Annotation> {
        if self.predictions.is_empty() {
            return None;
        }

        self.leave_viewing_all();
        self.unselect_current();
        self.reset_history_view();

        let idx = self.predictions.iter().position(|p| p.id == id).unwrap_or(0);
        let prediction = &mut self.predictions[idx];
        prediction.selected = true;
        prediction.reveal();
        self.selection = Selection::Annotation(prediction.id.clone());

        tracing::debug!(prediction = %prediction.id, "Prediction selected");
        Some(&self.predictions[idx])
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Destroy an annotation, repair backlinks and reselect the first
    /// remaining annotation
    pub fn delete_annotation(&mut self, id: &str) -> Result<AnnotationSnapshot> {
        let idx = self
            .annotations
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| Error::NotFound(format!("annotation {}", id)))?;

        let snapshot = self.annotations[idx].snapshot();
        self.ctx.emit(EditorEvent::DeleteAnnotation {
            annotation: snapshot.clone(),
            timestamp: time::now(),
        });

        let removed = self.annotations.remove(idx);
        self.draft_locks.remove(&removed.id);
        self.clear_deleted_parents(removed.pk);

        self.selection = Selection::None;
        match self.annotations.first().map(|a| a.id.clone()) {
            Some(first) => {
                self.select_annotation(&first, SelectOptions::default());
            }
            None => self.reset_history_view(),
        }

        tracing::info!(annotation = %snapshot.id, pk = ?snapshot.pk, "Annotation deleted");
        Ok(snapshot)
    }

    /// Null every `parent_annotation` pointing at `pk`
    pub fn clear_deleted_parents(&mut self, pk: Option<i64>) {
        let Some(pk) = pk else {
            return;
        };
        for annotation in self.annotations.iter_mut() {
            if annotation.parent_annotation == Some(pk) {
                annotation.parent_annotation = None;
            }
        }
    }

    // ------------------------------------------------------------------
    // Compare mode
    // ------------------------------------------------------------------

    /// Enter or leave compare-mode
    ///
    /// Entering returns the id of the selected annotation when it has
    /// unsaved edits; the caller owns the draft write.
    pub fn toggle_viewing_all(&mut self) -> Option<String> {
        self.viewing_all = !self.viewing_all;

        if self.viewing_all {
            let mut needs_draft = None;
            if let Some(id) = self.selected_id().map(str::to_string) {
                if let Some(annotation) = self.annotations.iter().find(|a| a.id == id) {
                    if annotation.needs_draft_save() {
                        needs_draft = Some(id.clone());
                    }
                }
                self.unselect_current();
            }
            for annotation in self.annotations.iter_mut() {
                annotation.editable = false;
            }

            self.ctx.emit(EditorEvent::ViewingAllChanged {
                viewing_all: true,
                timestamp: time::now(),
            });
            needs_draft
        } else {
            if let Some(id) = self.newest_annotation_id() {
                let options = SelectOptions {
                    from_view_all: true,
                    ..SelectOptions::default()
                };
                self.select_annotation(&id, options);
            }
            self.ctx.emit(EditorEvent::ViewingAllChanged {
                viewing_all: false,
                timestamp: time::now(),
            });
            None
        }
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub fn add_history(&mut self, record: &HistoryRecord) -> &HistoryItem {
        if self.history_owner.is_none() {
            self.history_owner = self.selected_id().map(str::to_string);
        }
        let id = self.next_local_id();
        self.history.push(HistoryItem::from_record(id, record));
        &self.history[self.history.len() - 1]
    }

    /// Drop all history items; a history view returns to its owner
    pub fn clear_history(&mut self) {
        if matches!(self.selection, Selection::History(_)) {
            self.leave_history_view();
        }
        self.reset_history_view();
    }

    /// Load the history of the selected annotation
    ///
    /// Ignored unless the records describe the selected, submitted
    /// annotation (first record's `annotation_id` equals its pk).
    pub fn set_history(&mut self, records: Vec<HistoryRecord>) {
        self.clear_history();

        let Some(first) = records.first() else {
            return;
        };
        let Some(pk) = self.selected_annotation().and_then(|a| a.pk) else {
            return;
        };
        if first.annotation_id != Some(pk) {
            tracing::debug!(pk, history_for = ?first.annotation_id, "History ignored for other annotation");
            return;
        }

        for record in &records {
            self.add_history(record);
        }
    }

    /// View a history item read-only, or return to the annotation (`None`)
    ///
    /// Label summaries are recomputed on the next tick.
    pub fn select_history(&mut self, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => {
                if !self.history.iter().any(|h| h.id == id) {
                    return Err(Error::NotFound(format!("history item {}", id)));
                }
                if self.history_owner.is_none() {
                    self.history_owner = self.selected_id().map(str::to_string);
                }
                if let Some(owner) = self.history_owner.clone() {
                    if let Some(annotation) = self.annotations.iter_mut().find(|a| a.id == owner) {
                        annotation.unselect_all();
                        annotation.editable = false;
                    }
                }
                self.selection = Selection::History(id.to_string());
            }
            None => self.leave_history_view(),
        }

        self.deferred.push(DeferredJob::RefreshLabelSummary);
        self.ctx.emit(EditorEvent::HistorySelected {
            history_id: id.map(str::to_string),
            timestamp: time::now(),
        });
        Ok(())
    }

    fn leave_history_view(&mut self) {
        if !matches!(self.selection, Selection::History(_)) {
            return;
        }
        match self.history_owner.clone() {
            Some(owner) => {
                if let Some(annotation) = self.annotations.iter_mut().find(|a| a.id == owner) {
                    annotation.editable = true;
                }
                self.selection = Selection::Annotation(owner);
            }
            None => self.selection = Selection::None,
        }
    }

    /// Run jobs deferred by earlier operations; returns how many ran
    pub fn run_deferred(&mut self) -> usize {
        let jobs = self.deferred.drain();
        let count = jobs.len();
        for job in jobs {
            match job {
                DeferredJob::RefreshLabelSummary => self.refresh_label_summary(),
            }
        }
        count
    }

    fn refresh_label_summary(&self) {
        let summary = match &self.selection {
            Selection::None => return,
            Selection::History(id) => self
                .history
                .iter()
                .find(|h| &h.id == id)
                .map(|h| (h.id.clone(), h.label_summary())),
            Selection::Annotation(id) => self.entity(id).map(|a| (a.id.clone(), a.label_summary())),
        };

        if let Some((source_id, summary)) = summary {
            self.ctx.emit(EditorEvent::LabelSummaryUpdated { source_id, summary });
        }
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Merge errors, keeping the first error per identifier
    pub fn add_errors(&mut self, errors: impl IntoIterator<Item = ValidationError>) {
        self.validation.extend(errors);
    }

    pub fn clear_errors(&mut self) {
        self.validation.clear();
    }

    /// Validate the selected annotation; the error list is replaced
    pub fn validate_selected(&mut self, validator: &dyn Validator) -> Result<bool> {
        let errors = {
            let annotation = self
                .selected_annotation()
                .ok_or_else(|| Error::InvalidState("no annotation selected".to_string()))?;
            validator.validate(annotation)
        };
        self.validation.clear();
        self.validation.extend(errors);

        if !self.validation.is_empty() {
            tracing::debug!(errors = self.validation.len(), "Validation failed");
        }
        Ok(self.validation.is_empty())
    }

    /// Lock serializing the draft writes of annotation `id`
    ///
    /// Holders read `draft_id` only after acquiring it, so overlapping
    /// saves update the draft the first one created.
    pub fn draft_lock(&mut self, id: &str) -> Arc<Mutex<()>> {
        self.draft_locks.entry(id.to_string()).or_default().clone()
    }

    /// Forget every entity and the selection
    pub fn reset_annotations(&mut self) {
        self.selection = Selection::None;
        self.annotations.clear();
        self.predictions.clear();
        self.reset_history_view();
        self.viewing_all = false;
        self.deferred.clear();
        self.draft_locks.clear();
        tracing::debug!(task_id = self.task.id, "Store reset");
    }

    // ------------------------------------------------------------------
    // Suggestions
    // ------------------------------------------------------------------

    /// Start a suggestion request for the selected annotation
    pub fn begin_suggestions(&mut self) -> SuggestionToken {
        self.suggestions.begin()
    }

    pub fn is_awaiting_suggestions(&self) -> bool {
        self.suggestions.is_awaiting()
    }

    /// Apply an answer; returns `false` when the request was superseded
    pub fn apply_suggestions(&mut self, token: SuggestionToken, results: Vec<Region>) -> Result<bool> {
        if !self.suggestions.complete(token) {
            return Ok(false);
        }

        let annotation = self.selected_annotation_mut()?;
        annotation.set_suggestions(results);
        let (annotation_id, count) = (annotation.id.clone(), annotation.suggestions().len());

        self.ctx.emit(EditorEvent::SuggestionsApplied { annotation_id, count });
        Ok(true)
    }

    /// Accept pending suggestions into the selected annotation
    pub fn accept_suggestions(&mut self) -> Result<usize> {
        self.selected_annotation_mut()?.accept_suggestions()
    }

    // ------------------------------------------------------------------
    // Persistence payloads
    // ------------------------------------------------------------------

    /// Body for submit, update, skip and draft requests
    ///
    /// `lead_time` adds this session's seconds to the stored lead time and
    /// the task draft's. `id` is sent only when asked for and the
    /// annotation already exists on the server.
    pub fn submission_body(&self, id: &str, include_id: bool) -> Result<SubmissionBody> {
        let annotation = self
            .annotation(id)
            .ok_or_else(|| Error::NotFound(format!("annotation {}", id)))?;

        let lead_time =
            time::seconds_since(annotation.loaded_at) + annotation.lead_time + self.task.draft_lead_time();
        let send_id = include_id && (!annotation.user_generate || annotation.sent_user_generate);

        Ok(SubmissionBody {
            id: if send_id { annotation.pk } else { None },
            result: annotation.serialize_annotation(),
            draft_id: annotation.draft_id,
            parent_prediction: annotation.parent_prediction,
            parent_annotation: annotation.parent_annotation,
            offset: self.submission_offset(),
            lead_time,
            unique_id: self.task.unique_lock_id.clone(),
            extra: Map::new(),
        })
    }

    // ------------------------------------------------------------------
    // Offsets
    // ------------------------------------------------------------------

    /// Offset of the selection; `pk_hint` overrides the selection's pk
    pub fn annotation_offset(&self, pk_hint: Option<i64>) -> ResolvedOffset {
        let (stored, pk) = match self.selected() {
            Some(selected) => (selected.offset, pk_hint.or(selected.pk)),
            None => (0.0, pk_hint),
        };
        TimeAlignmentService::resolve(stored, pk, &self.task.meta)
    }

    pub fn set_working_offset(&mut self, value: f64) {
        self.alignment.set_working_offset(value);
    }

    pub fn working_offset(&self) -> Option<f64> {
        self.alignment.working_offset()
    }

    /// Offset sent with the next submission body
    pub fn submission_offset(&self) -> f64 {
        self.alignment.submission_offset(&self.task.meta)
    }
}
