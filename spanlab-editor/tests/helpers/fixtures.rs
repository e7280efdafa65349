//! Store and record fixtures

use spanlab_common::{EditorConfig, EditorEvent};
use spanlab_editor::normalize::AnnotationRecord;
use spanlab_editor::{CurrentUser, EditorContext, LifecycleManager, Region, SharedStore, Task};
use tokio::sync::broadcast;

pub const TASK_ID: i64 = 42;

pub fn test_user() -> CurrentUser {
    CurrentUser::new(1, "annotator@example.com", "Annotator")
}

/// Default configuration with an explicit busy window
pub fn test_config(min_busy_ms: u64, max_wait_ms: u64) -> EditorConfig {
    let mut config = EditorConfig::default();
    config.submission.min_busy_ms = min_busy_ms;
    config.submission.max_wait_ms = max_wait_ms;
    config
}

pub fn span(id: &str, start: f64, end: f64, label: &str) -> Region {
    Region::span(id, "tricks", "chart", start, end, &[label])
}

/// Persisted annotation record with one region
pub fn record(pk: i64) -> AnnotationRecord {
    AnnotationRecord {
        pk: Some(pk),
        result: vec![span(&format!("r{}", pk), 0.0, 1.0, "Jump")],
        ..AnnotationRecord::default()
    }
}

/// Initialized store for task [`TASK_ID`]
pub fn store_with(config: EditorConfig, annotations: Vec<AnnotationRecord>) -> SharedStore {
    let ctx = EditorContext::new(config, test_user());
    let task = Task {
        id: TASK_ID,
        ..Task::default()
    };
    let mut manager = LifecycleManager::new(ctx, task);
    manager.initialize(Vec::new(), annotations, Vec::new(), Vec::new());
    manager.into_shared()
}

/// Every event currently buffered for `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<EditorEvent>) -> Vec<EditorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
