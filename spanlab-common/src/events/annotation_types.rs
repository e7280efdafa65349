//! Annotation-side type definitions for event payloads
//!
//! Immutable summaries handed to subscribers. They are built after an
//! operation finishes, so a subscriber never observes a half-applied change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What kind of entity a snapshot describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Annotation,
    Prediction,
    History,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Annotation => write!(f, "annotation"),
            EntityKind::Prediction => write!(f, "prediction"),
            EntityKind::History => write!(f, "history"),
        }
    }
}

/// Point-in-time summary of an annotation, prediction or history item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSnapshot {
    /// Session-local id
    pub id: String,
    /// Server id, once assigned
    pub pk: Option<i64>,
    pub kind: EntityKind,
    pub user_generate: bool,
    pub editable: bool,
    pub region_count: usize,
    pub draft_id: Option<i64>,
    pub parent_prediction: Option<i64>,
    pub parent_annotation: Option<i64>,
    pub completed_by: Option<i64>,
}

/// Options passed along with a selection change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOptions {
    /// Keep the history list instead of clearing it
    #[serde(default)]
    pub retain_history: bool,
    /// Selection happened because compare-mode was left
    #[serde(default)]
    pub from_view_all: bool,
}

impl SelectOptions {
    pub fn retaining_history() -> Self {
        Self {
            retain_history: true,
            ..Self::default()
        }
    }
}

/// Label name → number of regions carrying that label
pub type LabelSummary = BTreeMap<String, usize>;
