//! Integration tests for the annotation lifecycle
//!
//! Drives LifecycleManager from raw task JSON through selection, history,
//! deletion and the deferred tick queue, checking the events hosts see.

mod helpers;

use helpers::{drain_events, span, test_user};
use serde_json::json;
use spanlab_common::events::{EntityKind, SelectOptions};
use spanlab_common::{EditorConfig, EditorEvent};
use spanlab_editor::normalize::normalize_history;
use spanlab_editor::scheduler::flush_after_tick;
use spanlab_editor::{EditorContext, LifecycleManager, SeedPolicy, Selection, Task};
use std::collections::HashSet;

fn task_json() -> serde_json::Value {
    json!({
        "id": 42,
        "data": { "csv": "/data/run-1.csv" },
        "meta": "{\"offset\": 500, \"annotations_offset\": [{\"annotation\": 7, \"offset\": 150}]}",
        "predictions": [{
            "id": 90,
            "result": [
                { "id": "p1", "from_name": "tricks", "to_name": "chart", "type": "timeserieslabels",
                  "value": { "start": 0.0, "end": 2.0, "timeserieslabels": ["Jump"] } }
            ]
        }],
        "annotations": [
            {
                "id": "7",
                "createdBy": "Annotator annotator@example.com, 1",
                "result": [
                    { "id": "a1", "from_name": "tricks", "to_name": "chart", "type": "timeserieslabels",
                      "value": { "start": 1.0, "end": 2.0, "timeserieslabels": ["Jump"] } },
                    { "id": "a2", "from_name": "tricks", "to_name": "chart", "type": "timeserieslabels",
                      "parent_id": "a1",
                      "value": { "start": 1.2, "end": 1.8, "timeserieslabels": ["Spin"] } },
                    { "id": "a3", "from_name": "tricks", "to_name": "chart", "type": "timeserieslabels",
                      "parent_id": "missing",
                      "value": { "start": 3.0, "end": 4.0, "timeserieslabels": ["Spin"] } }
                ]
            },
            { "id": 8, "parent_annotation": 7, "result": [] },
            { "id": "not-a-number", "result": [] }
        ]
    })
}

fn loaded_manager() -> LifecycleManager {
    let ctx = EditorContext::new(EditorConfig::default(), test_user());
    let task = Task::from_json(task_json()).expect("valid task");
    let mut manager = LifecycleManager::new(ctx, task);
    manager.load_task();
    manager
}

#[test]
fn test_load_from_task_json() {
    let manager = loaded_manager();

    assert_eq!(manager.annotations().len(), 3);
    assert_eq!(manager.predictions().len(), 1);
    assert_eq!(manager.annotations()[2].pk, None, "non-numeric pk is dropped");
    assert_eq!(manager.selected_annotation().map(|a| a.pk), Some(None));

    let first = &manager.annotations()[0];
    assert_eq!(first.pk, Some(7));
    assert_eq!(first.regions().len(), 3);
    assert_eq!(first.regions()[1].parent_id, Some(format!("a1#{}", first.id)));
    assert_eq!(first.regions()[2].parent_id, None, "dangling parent is nulled");
}

#[test]
fn test_local_ids_are_unique() {
    let mut manager = loaded_manager();
    for _ in 0..50 {
        manager.create_annotation(SeedPolicy::Empty);
    }

    let mut seen = HashSet::new();
    for entity in manager.annotations().iter().chain(manager.predictions()) {
        assert!(seen.insert(entity.id.clone()), "duplicate id {}", entity.id);
    }
    assert_eq!(seen.len(), 54);
}

#[test]
fn test_serialize_round_trip_keeps_parent_links() {
    let manager = loaded_manager();
    let annotation = manager.annotation_by_pk(7).unwrap();

    let exported = annotation.serialize_annotation();
    assert_eq!(exported[0].id, "a1");
    assert_eq!(exported[1].parent_id.as_deref(), Some("a1"));

    let value = serde_json::to_value(&exported).unwrap();
    assert_eq!(value[1]["type"], "timeserieslabels");
    assert_eq!(value[1]["value"]["end"], 1.8);
}

#[test]
fn test_offset_resolution_from_task_meta() {
    let mut manager = loaded_manager();

    manager.select_annotation("7", SelectOptions::default());
    assert_eq!(manager.annotation_offset(None).value, 150.0);

    manager.select_annotation("8", SelectOptions::default());
    assert_eq!(manager.annotation_offset(None).value, 500.0);
}

#[test]
fn test_delete_clears_parent_backlink_and_emits() {
    let mut manager = loaded_manager();
    let mut rx = manager.context().events.subscribe();
    let target = manager.annotation_by_pk(7).unwrap().id.clone();

    let deleted = manager.delete_annotation(&target).unwrap();

    assert_eq!(deleted.pk, Some(7));
    assert_eq!(manager.annotation_by_pk(8).unwrap().parent_annotation, None);
    assert_eq!(manager.selected_annotation().and_then(|a| a.pk), Some(8));

    let events = drain_events(&mut rx);
    assert_eq!(events[0].event_type(), "deleteAnnotation");
    assert!(matches!(&events[1], EditorEvent::SelectAnnotation { selected, .. } if selected.pk == Some(8)));
}

#[test]
fn test_select_emits_previous_and_options() {
    let mut manager = loaded_manager();
    let mut rx = manager.context().events.subscribe();
    let previous = manager.selected_id().unwrap().to_string();

    manager.select_annotation("7", SelectOptions::retaining_history());

    let events = drain_events(&mut rx);
    let EditorEvent::SelectAnnotation { selected, previous: prev, options, .. } = &events[0] else {
        panic!("expected selectAnnotation");
    };
    assert_eq!(selected.pk, Some(7));
    assert_eq!(prev.as_ref().map(|p| p.id.clone()), Some(previous));
    assert!(options.retain_history);
    assert_eq!(selected.kind, EntityKind::Annotation);
}

#[test]
fn test_prediction_copy_becomes_editable_annotation() {
    let mut manager = loaded_manager();
    let prediction_id = manager.predictions()[0].id.clone();

    let created = manager.add_annotation_from_prediction(&prediction_id).unwrap();
    assert_eq!(created.parent_prediction, Some(90));
    let created_id = created.id.clone();

    let annotation = manager.annotation_mut(&created_id).unwrap();
    annotation.add_region(span("new", 5.0, 6.0, "Flip")).unwrap();
    assert_eq!(annotation.regions().len(), 2);

    let prediction = manager.entity(&prediction_id).unwrap();
    assert_eq!(prediction.regions().len(), 1, "prediction untouched");
}

#[tokio::test]
async fn test_history_selection_defers_label_summary() {
    let mut manager = loaded_manager();
    manager.select_annotation("7", SelectOptions::default());
    let history = vec![
        normalize_history(json!({
            "id": 300,
            "annotation_id": 7,
            "action": "submitted",
            "result": [
                { "id": "h1", "from_name": "tricks", "to_name": "chart", "type": "timeserieslabels",
                  "value": { "start": 0.0, "end": 1.0, "timeserieslabels": ["Jump"] } },
                { "id": "h2", "from_name": "tricks", "to_name": "chart", "type": "timeserieslabels",
                  "value": { "start": 1.0, "end": 2.0, "timeserieslabels": ["Jump"] } }
            ]
        }))
        .unwrap(),
    ];
    manager.set_history(history);
    let history_id = manager.history()[0].id.clone();
    let mut rx = manager.context().events.subscribe();

    manager.select_history(Some(&history_id)).unwrap();
    assert_eq!(manager.selection(), &Selection::History(history_id.clone()));
    let owner = manager.selected_id().unwrap().to_string();
    let frozen = manager.annotation_mut(&owner).unwrap();
    assert!(frozen.add_region(span("x", 0.0, 1.0, "Jump")).is_err(), "history view freezes editing");

    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 1, "summary not computed inside the operation");
    assert_eq!(events[0].event_type(), "historySelected");

    let store = manager.into_shared();
    assert_eq!(flush_after_tick(&store).await, 1);

    let events = drain_events(&mut rx);
    let EditorEvent::LabelSummaryUpdated { source_id, summary } = &events[0] else {
        panic!("expected label summary");
    };
    assert_eq!(source_id, &history_id);
    assert_eq!(summary.get("Jump"), Some(&2));
}

#[test]
fn test_storage_initialized_emitted_once() {
    let ctx = EditorContext::new(EditorConfig::default(), test_user());
    let mut rx = ctx.events.subscribe();
    let task = Task::from_json(task_json()).unwrap();
    let mut manager = LifecycleManager::new(ctx, task);

    manager.load_task();
    manager.load_task();

    let initialized = drain_events(&mut rx)
        .into_iter()
        .filter(|e| e.event_type() == "storageInitialized")
        .count();
    assert_eq!(initialized, 1);
    assert_eq!(manager.annotations().len(), 4, "records without pk cannot be deduplicated");
}
