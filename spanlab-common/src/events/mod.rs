//! Event types for the spanlab editor
//!
//! Provides the editor event definitions and the EventBus hosts subscribe to.

// Sub-modules (supporting types)
mod annotation_types;
mod submission_types;

pub use annotation_types::{AnnotationSnapshot, EntityKind, LabelSummary, SelectOptions};
pub use submission_types::{ReviewDecision, SubmissionAction, ToastKind};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Editor event types
///
/// Events are published at the end of a named store operation, after every
/// mutation of that operation has been applied. Payloads are owned
/// snapshots, never live references into the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EditorEvent {
    /// Selection moved to an annotation
    ///
    /// Triggers:
    /// - Host: sync URL / task history with the selected pk
    /// - Rendering: swap the region layers
    SelectAnnotation {
        /// Newly selected annotation
        selected: AnnotationSnapshot,
        /// Previously selected annotation, if any
        previous: Option<AnnotationSnapshot>,
        /// Options the selection was made with
        options: SelectOptions,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Annotation is about to be destroyed
    DeleteAnnotation {
        annotation: AnnotationSnapshot,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// First submission of an annotation succeeded
    SubmitAnnotation {
        /// Annotation as it was sent, after the server pk was applied
        event_data: AnnotationSnapshot,
        /// Raw server response
        server_result: serde_json::Value,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Existing annotation was updated on the server
    UpdateAnnotation {
        event_data: AnnotationSnapshot,
        server_result: serde_json::Value,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Task was skipped
    SkipTask {
        task_id: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A previous skip was reverted
    UnskipTask {
        task_id: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Reviewer accepted or rejected the selected annotation
    ReviewAnnotation {
        decision: ReviewDecision,
        event_data: AnnotationSnapshot,
        /// Whether the reviewer edited before deciding
        is_dirty: bool,
        comment: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Host-facing notification
    Toast {
        message: String,
        #[serde(rename = "toast_type")]
        kind: ToastKind,
    },

    /// Store finished its first initialization
    StorageInitialized {
        task_id: i64,
        annotation_count: usize,
        prediction_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A history item became the read-only view (None = back to the annotation)
    HistorySelected {
        history_id: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Compare-mode was entered or left
    ViewingAllChanged {
        viewing_all: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Derived label counts for the viewed item were recomputed
    LabelSummaryUpdated {
        /// Id of the annotation or history item summarized
        source_id: String,
        summary: LabelSummary,
    },

    /// Draft persisted (created or updated)
    DraftSaved {
        annotation_id: String,
        draft_id: i64,
        created: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Offset override stored for an annotation pk
    OffsetUpdated {
        annotation_pk: i64,
        offset: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Suggestions from the latest request were applied
    SuggestionsApplied {
        annotation_id: String,
        count: usize,
    },

    /// Submission busy flag changed
    BusyChanged {
        busy: bool,
        action: SubmissionAction,
    },
}

impl EditorEvent {
    /// Convenience constructor for toast notifications
    pub fn toast(message: impl Into<String>, kind: ToastKind) -> Self {
        EditorEvent::Toast {
            message: message.into(),
            kind,
        }
    }

    /// Get event type as string for logging and host bridges
    pub fn event_type(&self) -> &str {
        match self {
            EditorEvent::SelectAnnotation { .. } => "selectAnnotation",
            EditorEvent::DeleteAnnotation { .. } => "deleteAnnotation",
            EditorEvent::SubmitAnnotation { .. } => "submitAnnotation",
            EditorEvent::UpdateAnnotation { .. } => "updateAnnotation",
            EditorEvent::SkipTask { .. } => "skipTask",
            EditorEvent::UnskipTask { .. } => "unskipTask",
            EditorEvent::ReviewAnnotation { decision, .. } => match decision {
                ReviewDecision::Accepted => "acceptAnnotation",
                ReviewDecision::Rejected => "rejectAnnotation",
            },
            EditorEvent::Toast { .. } => "toast",
            EditorEvent::StorageInitialized { .. } => "storageInitialized",
            EditorEvent::HistorySelected { .. } => "historySelected",
            EditorEvent::ViewingAllChanged { .. } => "viewingAllChanged",
            EditorEvent::LabelSummaryUpdated { .. } => "labelSummaryUpdated",
            EditorEvent::DraftSaved { .. } => "draftSaved",
            EditorEvent::OffsetUpdated { .. } => "offsetUpdated",
            EditorEvent::SuggestionsApplied { .. } => "suggestionsApplied",
            EditorEvent::BusyChanged { .. } => "busyChanged",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for editor events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block the store)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
///
/// # Examples
///
/// ```
/// use spanlab_common::events::{EditorEvent, EventBus, ToastKind};
///
/// let event_bus = EventBus::new(64);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(EditorEvent::toast("Draft saved successfully", ToastKind::Info));
/// assert_eq!(rx.try_recv().unwrap().event_type(), "toast");
/// ```
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<EditorEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before lagging subscribers
    ///   start losing the oldest ones
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EditorEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EditorEvent,
    ) -> Result<usize, broadcast::error::SendError<EditorEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EditorEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event dropped: no subscribers");
        }
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str) -> AnnotationSnapshot {
        AnnotationSnapshot {
            id: id.to_string(),
            pk: Some(7),
            kind: EntityKind::Annotation,
            user_generate: true,
            editable: true,
            region_count: 2,
            draft_id: None,
            parent_prediction: None,
            parent_annotation: None,
            completed_by: Some(1),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(8);
        let result = bus.emit(EditorEvent::toast("hello", ToastKind::Info));
        assert!(result.is_err());
    }

    #[test]
    fn test_emit_reaches_every_subscriber() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let delivered = bus
            .emit(EditorEvent::toast("saved", ToastKind::Info))
            .expect("two subscribers");
        assert_eq!(delivered, 2);
        assert_eq!(rx1.try_recv().unwrap().event_type(), "toast");
        assert_eq!(rx2.try_recv().unwrap().event_type(), "toast");
    }

    #[test]
    fn test_select_event_serializes_with_type_tag() {
        let event = EditorEvent::SelectAnnotation {
            selected: snapshot("abc12"),
            previous: None,
            options: SelectOptions::retaining_history(),
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_value(&event).expect("serializable");
        assert_eq!(json["type"], "SelectAnnotation");
        assert_eq!(json["selected"]["id"], "abc12");
        assert_eq!(json["selected"]["kind"], "annotation");
        assert_eq!(json["options"]["retain_history"], true);
        assert!(json["previous"].is_null());
    }

    #[test]
    fn test_toast_serializes_kind_as_toast_type() {
        let json = serde_json::to_value(EditorEvent::toast("boom", ToastKind::Error)).unwrap();
        assert_eq!(json["toast_type"], "error");
        assert_eq!(json["message"], "boom");
    }

    #[test]
    fn test_review_event_type_names() {
        let accepted = EditorEvent::ReviewAnnotation {
            decision: ReviewDecision::Accepted,
            event_data: snapshot("a"),
            is_dirty: false,
            comment: None,
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(accepted.event_type(), "acceptAnnotation");

        let rejected = EditorEvent::ReviewAnnotation {
            decision: ReviewDecision::Rejected,
            event_data: snapshot("a"),
            is_dirty: true,
            comment: Some("wrong label".into()),
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(rejected.event_type(), "rejectAnnotation");
    }
}
