//! Draft upsert
//!
//! A draft is written to `update_draft` when the annotation already has a
//! `draft_id`; otherwise it is created (on the task for unsent annotations,
//! on the annotation once it has a pk) and the returned id is attached.
//!
//! The store guard is released while the request is in flight. The edit
//! timestamp captured before sending becomes `draft_saved`, so edits made
//! during the request keep the annotation dirty.
//!
//! Writes for one annotation are serialized by its draft lock: a second
//! save waits for the first and then sees its `draft_id`.

use crate::error::{Error, Result};
use crate::lifecycle::SharedStore;
use crate::persistence::{response_id, DraftTarget, Persistence};
use serde_json::{Map, Value};
use spanlab_common::events::ToastKind;
use spanlab_common::{time, EditorEvent};

pub const DRAFT_SAVED: &str = "Draft saved successfully";
pub const DRAFT_FAILED: &str = "There was an error saving your draft";

/// Result of a draft write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftOutcome {
    /// Nothing new to store
    Unchanged,
    Created(i64),
    Updated(i64),
}

impl DraftOutcome {
    pub fn draft_id(&self) -> Option<i64> {
        match self {
            DraftOutcome::Unchanged => None,
            DraftOutcome::Created(id) | DraftOutcome::Updated(id) => Some(*id),
        }
    }
}

/// Write the draft of annotation `id`
///
/// With an empty `extra` the write is skipped unless the annotation has
/// edits newer than its last saved draft. Failures emit an error toast and
/// are returned; nothing is retried.
pub async fn save_draft(
    store: &SharedStore,
    persistence: &dyn Persistence,
    id: &str,
    extra: Map<String, Value>,
) -> Result<DraftOutcome> {
    let lock = store.write().await.draft_lock(id);
    let _saving = lock.lock().await;

    let (task_id, pk, draft_id, body, edited_at) = {
        let manager = store.read().await;
        let annotation = manager
            .annotation(id)
            .ok_or_else(|| Error::NotFound(format!("annotation {}", id)))?;

        if extra.is_empty() && !annotation.needs_draft_save() {
            tracing::debug!(annotation = %id, "Draft up to date, not saved");
            return Ok(DraftOutcome::Unchanged);
        }

        let body = manager.submission_body(id, false)?.with_extra(extra).into_draft();
        (
            manager.task().id,
            annotation.pk,
            annotation.draft_id.filter(|d| *d > 0),
            body,
            annotation.last_edit().unwrap_or_else(time::now),
        )
    };

    let outcome = send_draft(persistence, task_id, pk, draft_id, &body).await;
    let mut manager = store.write().await;

    match outcome {
        Ok(outcome) => {
            let Some(saved_id) = outcome.draft_id() else {
                return Ok(outcome);
            };
            match manager.annotation_mut(id) {
                Ok(annotation) => {
                    annotation.set_draft_id(saved_id);
                    annotation.mark_draft_saved(edited_at);
                }
                Err(_) => {
                    tracing::warn!(annotation = %id, draft_id = saved_id, "Annotation gone before draft was attached");
                }
            }

            tracing::info!(annotation = %id, draft_id = saved_id, ?outcome, "Draft saved");
            let ctx = manager.context();
            ctx.emit(EditorEvent::DraftSaved {
                annotation_id: id.to_string(),
                draft_id: saved_id,
                created: matches!(outcome, DraftOutcome::Created(_)),
                timestamp: time::now(),
            });
            ctx.emit(EditorEvent::toast(DRAFT_SAVED, ToastKind::Info));
            Ok(outcome)
        }
        Err(e) => {
            tracing::error!(annotation = %id, error = %e, "Draft save failed");
            manager.context().emit(EditorEvent::toast(DRAFT_FAILED, ToastKind::Error));
            Err(e)
        }
    }
}

async fn send_draft(
    persistence: &dyn Persistence,
    task_id: i64,
    pk: Option<i64>,
    draft_id: Option<i64>,
    body: &Map<String, Value>,
) -> Result<DraftOutcome> {
    if let Some(draft_id) = draft_id {
        persistence.update_draft(draft_id, body).await?;
        return Ok(DraftOutcome::Updated(draft_id));
    }

    let target = match pk {
        Some(pk) => DraftTarget::Annotation { task_id, pk },
        None => DraftTarget::Task(task_id),
    };
    let response = persistence.create_draft(target, body).await?;
    let created = response_id(&response)
        .ok_or_else(|| Error::BadRequest("draft response without id".to_string()))?;
    Ok(DraftOutcome::Created(created))
}
