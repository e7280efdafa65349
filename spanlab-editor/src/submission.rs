//! Submission coordinator
//!
//! Runs submit, update, skip, unskip, accept and reject against the
//! [`Persistence`] collaborator with at most one request in flight.
//!
//! **Busy window:** the busy flag (a `watch` channel) is raised with an
//! atomic check-and-set; a request arriving while it is raised is dropped
//! without side effects. The flag falls at `max(min_busy, request time)`,
//! but never later than `max_wait`. When the ceiling is reached first the
//! request keeps running in its own task and applies its result to the
//! store whenever the backend answers.
//!
//! **Locking:** the store's write guard is taken for each synchronous step
//! and released before any backend call.
//!
//! **Failure:** local state (queue position, draft id, sent flag) changes
//! only after the backend accepted the request.

use crate::drafts::{self, DraftOutcome};
use crate::error::{Error, Result};
use crate::lifecycle::SharedStore;
use crate::offset::TimeAlignmentService;
use crate::persistence::{response_id, DraftTarget, Persistence};
use crate::validation::{AcceptAll, Validator};
use serde_json::{json, Map, Value};
use spanlab_common::events::{AnnotationSnapshot, ReviewDecision, SubmissionAction, ToastKind};
use spanlab_common::{time, EditorEvent, EventBus};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;

pub const ANNOTATION_SAVED: &str = "Annotation saved successfully";
pub const ANNOTATION_UPDATED: &str = "Annotation updated successfully";
pub const OFFSET_SAVED: &str = "Offset updated successfully";
pub const OFFSET_FAILED: &str = "There was an error updating your task offset value";

/// Position of the current task in the annotator's queue (1-based)
///
/// Moves are clamped to `[1, total]`; with an empty queue the position
/// stays 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueuePosition {
    position: usize,
    total: usize,
}

impl QueuePosition {
    pub fn new(position: usize, total: usize) -> Self {
        let position = if total == 0 { 0 } else { position.clamp(1, total) };
        Self { position, total }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn increment(&mut self) {
        if self.total > 0 {
            self.position = (self.position + 1).clamp(1, self.total);
        }
    }

    pub fn decrement(&mut self) {
        if self.total > 0 {
            self.position = self.position.saturating_sub(1).clamp(1, self.total);
        }
    }
}

/// How a coordinated request ended (from the caller's point of view)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Backend answered within the busy window and the result was applied
    Completed,
    /// Request failed; an error toast was emitted
    Failed,
    /// Validation rejected the annotation; nothing changed
    Invalid,
    /// Another request was in flight
    Dropped,
    /// Busy ceiling reached; the request continues in the background
    Detached,
}

/// Coordinates backend writes for one store
#[derive(Clone)]
pub struct SubmissionCoordinator {
    store: SharedStore,
    persistence: Arc<dyn Persistence>,
    validator: Arc<dyn Validator>,
    events: Arc<EventBus>,
    busy: Arc<watch::Sender<bool>>,
    queue: Arc<RwLock<QueuePosition>>,
    min_busy: Duration,
    max_wait: Duration,
}

impl SubmissionCoordinator {
    /// Create a coordinator using the store's configuration and event bus
    pub async fn new(store: SharedStore, persistence: Arc<dyn Persistence>) -> Self {
        let (events, submission) = {
            let manager = store.read().await;
            let ctx = manager.context();
            (ctx.events.clone(), ctx.config.submission.clone())
        };
        let (busy, _) = watch::channel(false);

        Self {
            store,
            persistence,
            validator: Arc::new(AcceptAll),
            events,
            busy: Arc::new(busy),
            queue: Arc::new(RwLock::new(QueuePosition::default())),
            min_busy: submission.min_busy(),
            max_wait: submission.max_wait(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    /// Receiver following the busy flag
    pub fn busy_watch(&self) -> watch::Receiver<bool> {
        self.busy.subscribe()
    }

    pub async fn set_queue(&self, position: usize, total: usize) {
        *self.queue.write().await = QueuePosition::new(position, total);
    }

    pub async fn queue(&self) -> QueuePosition {
        *self.queue.read().await
    }

    // ------------------------------------------------------------------
    // Busy window
    // ------------------------------------------------------------------

    fn try_begin(&self, action: SubmissionAction) -> bool {
        let acquired = self.busy.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        if acquired {
            self.events.emit_lossy(EditorEvent::BusyChanged { busy: true, action });
        }
        acquired
    }

    fn finish(&self, action: SubmissionAction) {
        self.busy.send_replace(false);
        self.events.emit_lossy(EditorEvent::BusyChanged { busy: false, action });
    }

    async fn run_busy<F>(&self, action: SubmissionAction, request: F) -> SubmissionOutcome
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if !self.try_begin(action) {
            tracing::debug!(%action, "Request dropped, another one is in flight");
            return SubmissionOutcome::Dropped;
        }

        let started = Instant::now();
        let events = self.events.clone();
        let mut handle = tokio::spawn(async move {
            let result = request.await;
            if let Err(e) = &result {
                tracing::error!(%action, error = %e, "Request failed");
                events.emit_lossy(EditorEvent::toast(action.failure_message(), ToastKind::Error));
            }
            result
        });

        let outcome = match tokio::time::timeout(self.max_wait, &mut handle).await {
            Ok(Ok(Ok(()))) => SubmissionOutcome::Completed,
            Ok(Ok(Err(_))) => SubmissionOutcome::Failed,
            Ok(Err(join_error)) => {
                tracing::error!(%action, error = %join_error, "Request task aborted");
                self.events
                    .emit_lossy(EditorEvent::toast(action.failure_message(), ToastKind::Error));
                SubmissionOutcome::Failed
            }
            Err(_) => {
                tracing::warn!(
                    %action,
                    max_wait_ms = self.max_wait.as_millis() as u64,
                    "Busy ceiling reached, request continues in background"
                );
                SubmissionOutcome::Detached
            }
        };

        if outcome != SubmissionOutcome::Detached {
            let floor = self.min_busy.min(self.max_wait);
            let elapsed = started.elapsed();
            if elapsed < floor {
                tokio::time::sleep(floor - elapsed).await;
            }
        }

        self.finish(action);
        tracing::debug!(%action, ?outcome, elapsed_ms = started.elapsed().as_millis() as u64, "Busy window closed");
        outcome
    }

    /// Validate the selected annotation; returns its id when valid
    async fn validate_selected(&self) -> std::result::Result<String, SubmissionOutcome> {
        let mut manager = self.store.write().await;
        let Some(id) = manager.selected_annotation().map(|a| a.id.clone()) else {
            tracing::warn!("No annotation selected, nothing to submit");
            return Err(SubmissionOutcome::Invalid);
        };
        match manager.validate_selected(self.validator.as_ref()) {
            Ok(true) => Ok(id),
            Ok(false) => Err(SubmissionOutcome::Invalid),
            Err(e) => {
                tracing::warn!(error = %e, "Validation could not run");
                Err(SubmissionOutcome::Invalid)
            }
        }
    }

    // ------------------------------------------------------------------
    // Submit / update
    // ------------------------------------------------------------------

    /// Submit the selected annotation (update when it already has a pk)
    pub async fn submit_annotation(&self) -> SubmissionOutcome {
        if self.is_busy() {
            return SubmissionOutcome::Dropped;
        }
        let id = match self.validate_selected().await {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let is_update = {
            let manager = self.store.read().await;
            manager.annotation(&id).is_some_and(|a| a.pk.is_some())
        };
        let action = if is_update {
            SubmissionAction::Update
        } else {
            SubmissionAction::Submit
        };

        let this = self.clone();
        self.run_busy(action, async move { this.persist_annotation(id, Map::new()).await })
            .await
    }

    /// Update the selected, already persisted annotation
    pub async fn update_annotation(&self, extra: Map<String, Value>) -> SubmissionOutcome {
        if self.is_busy() {
            return SubmissionOutcome::Dropped;
        }
        let id = match self.validate_selected().await {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        let this = self.clone();
        self.run_busy(SubmissionAction::Update, async move {
            this.persist_annotation(id, extra).await
        })
        .await
    }

    async fn persist_annotation(&self, id: String, extra: Map<String, Value>) -> Result<()> {
        let (task_id, pk, body) = {
            let manager = self.store.read().await;
            let pk = manager
                .annotation(&id)
                .ok_or_else(|| Error::NotFound(format!("annotation {}", id)))?
                .pk;
            let mut body = manager.submission_body(&id, false)?.with_extra(extra);
            // Counts as sent once this request succeeds, so updates carry the pk
            body.id = pk;
            (manager.task().id, pk, body)
        };

        let (server_result, pk) = match pk {
            Some(pk) => (self.persistence.update(task_id, pk, &body).await?, pk),
            None => {
                let response = self.persistence.submit(task_id, &body).await?;
                let pk = response_id(&response).ok_or_else(|| {
                    Error::BadRequest("submit response without id".to_string())
                })?;
                (response, pk)
            }
        };
        let created = body.id.is_none();
        self.queue.write().await.increment();

        {
            let mut manager = self.store.write().await;
            let annotation = manager.annotation_mut(&id)?;
            annotation.send_user_generate();
            annotation.drop_draft();
            annotation.update_personal_key(pk);
            let event_data = annotation.snapshot();

            let ctx = manager.context();
            if created {
                tracing::info!(annotation = %id, pk, "Annotation submitted");
                ctx.emit(EditorEvent::SubmitAnnotation {
                    event_data,
                    server_result,
                    timestamp: time::now(),
                });
                ctx.emit(EditorEvent::toast(ANNOTATION_SAVED, ToastKind::Info));
            } else {
                tracing::info!(annotation = %id, pk, "Annotation updated");
                ctx.emit(EditorEvent::UpdateAnnotation {
                    event_data,
                    server_result,
                    timestamp: time::now(),
                });
                ctx.emit(EditorEvent::toast(ANNOTATION_UPDATED, ToastKind::Info));
            }
        }

        self.save_working_offset(task_id, pk).await;
        Ok(())
    }

    /// Persist the working offset as the override for `pk`
    ///
    /// Failures are reported with a toast but do not fail the submission.
    async fn save_working_offset(&self, task_id: i64, pk: i64) {
        let (value, meta) = {
            let manager = self.store.read().await;
            match manager.working_offset() {
                Some(value) => (value, manager.task_meta().clone()),
                None => return,
            }
        };

        let saved = TimeAlignmentService::save_offset_on_annotation_submit(
            self.persistence.as_ref(),
            task_id,
            &meta,
            pk,
            value,
        )
        .await;

        let mut manager = self.store.write().await;
        match saved {
            Ok(meta) => {
                manager.set_task_meta(meta);
                let ctx = manager.context();
                ctx.emit(EditorEvent::OffsetUpdated {
                    annotation_pk: pk,
                    offset: value,
                    timestamp: time::now(),
                });
                ctx.emit(EditorEvent::toast(OFFSET_SAVED, ToastKind::Info));
            }
            Err(e) => {
                tracing::error!(task_id, pk, error = %e, "Offset save failed");
                manager.context().emit(EditorEvent::toast(OFFSET_FAILED, ToastKind::Error));
            }
        }
    }

    // ------------------------------------------------------------------
    // Skip / unskip
    // ------------------------------------------------------------------

    /// Mark the task as skipped (cancelled annotation)
    pub async fn skip_task(&self, extra: Map<String, Value>) -> SubmissionOutcome {
        let Some(id) = self.selected_id().await else {
            return SubmissionOutcome::Invalid;
        };
        let this = self.clone();
        self.run_busy(SubmissionAction::Skip, async move { this.persist_skip(id, extra).await })
            .await
    }

    async fn persist_skip(&self, id: String, extra: Map<String, Value>) -> Result<()> {
        let (task_id, body) = {
            let manager = self.store.read().await;
            let mut body = manager.submission_body(&id, true)?.with_extra(extra);
            body.extra.insert("was_cancelled".into(), Value::Bool(true));
            (manager.task().id, body)
        };

        let pk = match body.id {
            Some(pk) => {
                self.persistence.update(task_id, pk, &body).await?;
                pk
            }
            None => {
                let response = self.persistence.submit(task_id, &body).await?;
                response_id(&response)
                    .ok_or_else(|| Error::BadRequest("skip response without id".to_string()))?
            }
        };
        self.queue.write().await.increment();

        let mut manager = self.store.write().await;
        let annotation = manager.annotation_mut(&id)?;
        annotation.send_user_generate();
        annotation.drop_draft();
        annotation.update_personal_key(pk);
        annotation.was_cancelled = true;
        tracing::info!(task_id, pk, "Task skipped");
        manager.context().emit(EditorEvent::SkipTask {
            task_id,
            timestamp: time::now(),
        });
        Ok(())
    }

    /// Revert a skip: the cancelled annotation goes back to a draft
    pub async fn unskip_task(&self) -> SubmissionOutcome {
        let Some(id) = self.selected_id().await else {
            return SubmissionOutcome::Invalid;
        };
        let this = self.clone();
        self.run_busy(SubmissionAction::Unskip, async move { this.persist_unskip(id).await })
            .await
    }

    async fn persist_unskip(&self, id: String) -> Result<()> {
        let (task_id, pk, draft_id, draft_body) = {
            let manager = self.store.read().await;
            let annotation = manager
                .annotation(&id)
                .ok_or_else(|| Error::NotFound(format!("annotation {}", id)))?;
            let body = manager.submission_body(&id, false)?.into_draft();
            (manager.task().id, annotation.pk, annotation.draft_id, body)
        };

        let draft_id = match draft_id {
            Some(draft_id) => {
                let mut detach = Map::new();
                detach.insert("annotation".into(), Value::Null);
                self.persistence.update_draft(draft_id, &detach).await?;
                draft_id
            }
            None => {
                let response = self
                    .persistence
                    .create_draft(DraftTarget::Task(task_id), &draft_body)
                    .await?;
                response_id(&response)
                    .ok_or_else(|| Error::BadRequest("draft response without id".to_string()))?
            }
        };
        if let Some(pk) = pk {
            self.persistence.delete_annotation(task_id, pk).await?;
        }

        let mut manager = self.store.write().await;
        let annotation = manager.annotation_mut(&id)?;
        annotation.pk = None;
        annotation.user_generate = true;
        annotation.sent_user_generate = false;
        annotation.was_cancelled = false;
        annotation.set_draft_id(draft_id);
        annotation.mark_draft_saved(time::now());
        tracing::info!(task_id, ?pk, draft_id, "Skip reverted");
        manager.context().emit(EditorEvent::UnskipTask {
            task_id,
            timestamp: time::now(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Review
    // ------------------------------------------------------------------

    /// Reviewer accepts the selected annotation; advances the queue
    pub async fn accept_annotation(&self) -> SubmissionOutcome {
        self.review(ReviewDecision::Accepted, None).await
    }

    /// Reviewer rejects the selected annotation; moves the queue back
    pub async fn reject_annotation(&self, comment: Option<String>) -> SubmissionOutcome {
        self.review(ReviewDecision::Rejected, comment).await
    }

    async fn review(&self, decision: ReviewDecision, comment: Option<String>) -> SubmissionOutcome {
        if self.is_busy() {
            return SubmissionOutcome::Dropped;
        }
        let id = match self.validate_selected().await {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        let action = match decision {
            ReviewDecision::Accepted => SubmissionAction::Accept,
            ReviewDecision::Rejected => SubmissionAction::Reject,
        };

        let this = self.clone();
        self.run_busy(action, async move { this.persist_review(id, decision, comment).await })
            .await
    }

    async fn persist_review(
        &self,
        id: String,
        decision: ReviewDecision,
        comment: Option<String>,
    ) -> Result<()> {
        let (task_id, pk, is_dirty, body) = {
            let manager = self.store.read().await;
            let annotation = manager
                .annotation(&id)
                .ok_or_else(|| Error::NotFound(format!("annotation {}", id)))?;
            let pk = annotation
                .pk
                .ok_or_else(|| Error::InvalidState(format!("annotation {} was never submitted", id)))?;
            let is_dirty = annotation.is_dirty();

            let mut extra = Map::new();
            extra.insert("review".into(), json!(decision.as_str()));
            if let Some(comment) = &comment {
                extra.insert("comment".into(), json!(comment));
            }
            let body = manager.submission_body(&id, true)?.with_extra(extra);
            (manager.task().id, pk, is_dirty, body)
        };

        self.persistence.update(task_id, pk, &body).await?;

        {
            let mut queue = self.queue.write().await;
            match decision {
                ReviewDecision::Accepted => queue.increment(),
                ReviewDecision::Rejected => queue.decrement(),
            }
        }

        let mut manager = self.store.write().await;
        let annotation = manager.annotation_mut(&id)?;
        annotation.drop_draft();
        let event_data: AnnotationSnapshot = annotation.snapshot();
        tracing::info!(task_id, pk, decision = decision.as_str(), is_dirty, "Review recorded");
        manager.context().emit(EditorEvent::ReviewAnnotation {
            decision,
            event_data,
            is_dirty,
            comment,
            timestamp: time::now(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deletion, drafts, compare-mode
    // ------------------------------------------------------------------

    /// Delete an annotation on the backend, then locally
    ///
    /// Unsent annotations only have their draft (if any) removed on the
    /// backend. A backend failure leaves the store untouched.
    pub async fn delete_annotation(&self, id: &str) -> Result<AnnotationSnapshot> {
        let (task_id, unsent, pk, draft_id) = {
            let manager = self.store.read().await;
            let annotation = manager
                .annotation(id)
                .ok_or_else(|| Error::NotFound(format!("annotation {}", id)))?;
            (
                manager.task().id,
                annotation.is_unsent(),
                annotation.pk,
                annotation.draft_id,
            )
        };

        if unsent {
            if let Some(draft_id) = draft_id {
                self.persistence.delete_draft(draft_id).await?;
            }
        } else if let Some(pk) = pk {
            self.persistence.delete_annotation(task_id, pk).await?;
        }

        self.store.write().await.delete_annotation(id)
    }

    /// Upsert the draft of annotation `id`
    pub async fn save_draft(&self, id: &str, extra: Map<String, Value>) -> Result<DraftOutcome> {
        drafts::save_draft(&self.store, self.persistence.as_ref(), id, extra).await
    }

    /// Save the selected annotation as a postponed draft and move on
    pub async fn postpone_task(&self) -> Result<DraftOutcome> {
        let id = self
            .selected_id()
            .await
            .ok_or_else(|| Error::InvalidState("no annotation selected".to_string()))?;

        let mut extra = Map::new();
        extra.insert("was_postponed".into(), Value::Bool(true));
        let outcome = self.save_draft(&id, extra).await?;
        self.queue.write().await.increment();
        Ok(outcome)
    }

    /// Toggle compare-mode, saving the draft the store asks for
    pub async fn toggle_viewing_all(&self) -> Result<bool> {
        let (viewing_all, needs_draft) = {
            let mut manager = self.store.write().await;
            let needs_draft = manager.toggle_viewing_all();
            (manager.is_viewing_all(), needs_draft)
        };
        if let Some(id) = needs_draft {
            self.save_draft(&id, Map::new()).await?;
        }
        Ok(viewing_all)
    }

    async fn selected_id(&self) -> Option<String> {
        let manager = self.store.read().await;
        manager.selected_annotation().map(|a| a.id.clone())
    }
}
